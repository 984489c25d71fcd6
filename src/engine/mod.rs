//! Rule and workflow interpreters
//!
//! Interpreters are reentrant and stateless aside from the per-invocation
//! context: they evaluate against a captured snapshot reference and never
//! block, so a concurrent snapshot install cannot affect a running
//! evaluation.

mod conditions;
mod context;
mod functions;
mod rules;
mod trace;
mod workflows;

pub use conditions::evaluate_condition;
pub use context::EvalContext;
pub use functions::execute_function;
pub use rules::evaluate_rule;
pub use trace::{ConditionKind, ConditionTrace, StepKind, StepTrace, TraceMode, WorkflowTrace};
pub use workflows::{run_workflow, WorkflowOutcome};

use thiserror::Error;

/// Errors raised during evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The configuration references an entity the snapshot does not hold.
    #[error("{kind} '{id}' is not in the active configuration")]
    MissingDependency {
        /// Entity kind, e.g. `rule` or `function`.
        kind: &'static str,
        /// Referenced id.
        id: String,
    },

    /// An aggregate function found no numeric inputs in the record.
    #[error("function '{function_id}' has no numeric inputs")]
    FunctionMissingInput {
        /// The failing function.
        function_id: String,
    },

    /// A workflow referenced a step id that is not defined.
    #[error("workflow step '{step_id}' is not defined")]
    StepUnknown {
        /// The unresolved step id.
        step_id: String,
    },

    /// A rule step branch target is empty.
    #[error("workflow step '{step_id}' branches to an empty target")]
    DanglingBranch {
        /// The step with the empty branch.
        step_id: String,
    },

    /// The execution exceeded the configured step budget.
    #[error("workflow exceeded the step limit of {limit}")]
    StepLimitExceeded {
        /// Configured `max_steps`.
        limit: u32,
    },

    /// Nested rule references recursed past the configured depth.
    #[error("nested rule depth exceeded the limit of {limit}")]
    RuleDepthExceeded {
        /// Configured `max_rule_depth`.
        limit: u32,
    },

    /// The caller cancelled mid-evaluation.
    #[error("evaluation cancelled")]
    Cancelled,
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::cache::NamespaceSnapshot;
    use crate::model::{
        Condition, EntityStatus, Field, Function, Rule, RuleLogic, ScalarType, Step, Terminal,
        Workflow,
    };

    pub fn number_field(id: &str) -> Field {
        Field {
            field_id: id.to_string(),
            scalar_type: ScalarType::Number,
            description: None,
        }
    }

    pub fn string_field(id: &str) -> Field {
        Field {
            field_id: id.to_string(),
            scalar_type: ScalarType::String,
            description: None,
        }
    }

    pub fn rule(id: &str, logic: RuleLogic, conditions: Vec<Condition>) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version: 1,
            status: EntityStatus::Active,
            logic,
            conditions,
        }
    }

    pub fn rule_step(rule_id: &str, on_success: &str, on_failure: &str) -> Step {
        Step::Rule {
            rule_id: rule_id.to_string(),
            on_success: on_success.to_string(),
            on_failure: on_failure.to_string(),
        }
    }

    pub fn terminal_step(terminal_id: &str) -> Step {
        Step::Terminal {
            terminal_id: terminal_id.to_string(),
        }
    }

    pub fn terminal(id: &str) -> Terminal {
        Terminal {
            terminal_id: id.to_string(),
        }
    }

    pub fn workflow(id: &str, start_at: &str, steps: Vec<(&str, Step)>) -> Workflow {
        Workflow {
            workflow_id: id.to_string(),
            version: 1,
            status: EntityStatus::Active,
            start_at: start_at.to_string(),
            steps: steps
                .into_iter()
                .map(|(step_id, step)| (step_id.to_string(), step))
                .collect(),
        }
    }

    pub fn snapshot(
        fields: Vec<Field>,
        functions: Vec<Function>,
        rules: Vec<Rule>,
        workflows: Vec<Workflow>,
        terminals: Vec<Terminal>,
    ) -> NamespaceSnapshot {
        NamespaceSnapshot {
            namespace: "test".to_string(),
            checksum: "test-checksum".to_string(),
            built_at: Utc::now(),
            approx_bytes: 0,
            fields: fields.into_iter().map(|f| (f.field_id.clone(), f)).collect(),
            active_functions: functions
                .into_iter()
                .map(|f| (f.function_id.clone(), f))
                .collect(),
            active_rules: rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect(),
            active_workflows: workflows
                .into_iter()
                .map(|w| (w.workflow_id.clone(), w))
                .collect(),
            terminals: terminals
                .into_iter()
                .map(|t| (t.terminal_id.clone(), t))
                .collect(),
        }
    }
}
