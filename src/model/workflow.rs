//! Workflow step graphs

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::EntityStatus;

/// One step in a workflow's step graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Evaluate a rule and branch on its result.
    Rule {
        /// Rule to evaluate.
        rule_id: String,
        /// Next step when the rule evaluates `true`.
        on_success: String,
        /// Next step when the rule evaluates `false`.
        on_failure: String,
    },
    /// Halt with a terminal outcome.
    Terminal {
        /// Referenced terminal id.
        terminal_id: String,
    },
}

/// A versioned workflow: a step graph driven by rule results.
///
/// Cycles among rule steps are permitted by the grammar; the interpreter
/// bounds them with a per-execution step budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique id within the namespace.
    pub workflow_id: String,

    /// Version number, starting at 1.
    pub version: u32,

    /// Lifecycle status.
    pub status: EntityStatus,

    /// Entry step id; must name a key of `steps`.
    pub start_at: String,

    /// The step graph keyed by step id.
    pub steps: HashMap<String, Step>,
}

impl Workflow {
    /// Structural validation: the entry step exists, every branch resolves,
    /// and at least one terminal is reachable from the entry step.
    pub fn validate(&self) -> Result<(), String> {
        if !self.steps.contains_key(&self.start_at) {
            return Err(format!(
                "workflow {}: start step '{}' is not defined",
                self.workflow_id, self.start_at
            ));
        }

        for (step_id, step) in &self.steps {
            if let Step::Rule {
                on_success,
                on_failure,
                ..
            } = step
            {
                for target in [on_success, on_failure] {
                    if target.is_empty() {
                        return Err(format!(
                            "workflow {}: step '{}' has an empty branch target",
                            self.workflow_id, step_id
                        ));
                    }
                    if !self.steps.contains_key(target) {
                        return Err(format!(
                            "workflow {}: step '{}' branches to undefined step '{}'",
                            self.workflow_id, step_id, target
                        ));
                    }
                }
            }
        }

        if !self.reaches_terminal() {
            return Err(format!(
                "workflow {}: no terminal step reachable from '{}'",
                self.workflow_id, self.start_at
            ));
        }

        Ok(())
    }

    fn reaches_terminal(&self) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([self.start_at.as_str()]);

        while let Some(step_id) = queue.pop_front() {
            if !visited.insert(step_id) {
                continue;
            }
            match self.steps.get(step_id) {
                Some(Step::Terminal { .. }) => return true,
                Some(Step::Rule {
                    on_success,
                    on_failure,
                    ..
                }) => {
                    queue.push_back(on_success);
                    queue.push_back(on_failure);
                }
                None => {}
            }
        }
        false
    }
}
