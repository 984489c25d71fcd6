//! Workflow interpretation: a step graph driven by rule results

use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use crate::engine::context::EvalContext;
use crate::engine::rules::evaluate_rule;
use crate::engine::trace::{StepKind, StepTrace, TraceMode, WorkflowTrace};
use crate::engine::EvalError;
use crate::model::{Step, Workflow};

/// Result of a completed workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    /// Terminal the execution halted at.
    pub terminal_id: String,

    /// Number of rule steps executed before the terminal.
    pub rule_steps: u32,

    /// Executed steps, present when tracing was requested.
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub trace: WorkflowTrace,
}

/// Drive a workflow from its start step to a terminal.
///
/// Rule steps evaluate their rule and branch on the result; terminal steps
/// halt. The step graph may contain cycles, so executions are bounded by the
/// configured `max_steps`; crossing it fails with
/// [`EvalError::StepLimitExceeded`]. Cancellation is honored at step
/// boundaries.
pub fn run_workflow(
    workflow: &Workflow,
    ctx: &mut EvalContext<'_>,
    mode: TraceMode,
) -> Result<WorkflowOutcome, EvalError> {
    let mut current: &str = &workflow.start_at;
    let mut rule_steps: u32 = 0;
    let mut trace: WorkflowTrace = SmallVec::new();

    loop {
        ctx.check_cancelled()?;
        let step = workflow
            .steps
            .get(current)
            .ok_or_else(|| EvalError::StepUnknown {
                step_id: current.to_string(),
            })?;

        match step {
            Step::Terminal { terminal_id } => {
                if !ctx.snapshot().terminals.contains_key(terminal_id) {
                    return Err(EvalError::MissingDependency {
                        kind: "terminal",
                        id: terminal_id.clone(),
                    });
                }
                if mode.enabled() {
                    trace.push(StepTrace {
                        step_id: current.to_string(),
                        kind: StepKind::Terminal,
                        rule_id: None,
                        terminal_id: Some(terminal_id.clone()),
                        result: None,
                        next: None,
                        conditions: Vec::new(),
                    });
                }
                debug!(
                    workflow_id = %workflow.workflow_id,
                    terminal_id = %terminal_id,
                    rule_steps,
                    "workflow reached terminal"
                );
                return Ok(WorkflowOutcome {
                    terminal_id: terminal_id.clone(),
                    rule_steps,
                    trace,
                });
            }
            Step::Rule {
                rule_id,
                on_success,
                on_failure,
            } => {
                let rule = ctx
                    .snapshot()
                    .active_rules
                    .get(rule_id)
                    .ok_or_else(|| EvalError::MissingDependency {
                        kind: "rule",
                        id: rule_id.clone(),
                    })?;
                let result = evaluate_rule(rule, ctx)?;
                let next = if result { on_success } else { on_failure };
                if next.is_empty() {
                    return Err(EvalError::DanglingBranch {
                        step_id: current.to_string(),
                    });
                }

                if mode.enabled() {
                    let conditions = if mode == TraceMode::Full {
                        ctx.take_conditions()
                    } else {
                        Vec::new()
                    };
                    trace.push(StepTrace {
                        step_id: current.to_string(),
                        kind: StepKind::Rule,
                        rule_id: Some(rule_id.clone()),
                        terminal_id: None,
                        result: Some(result),
                        next: Some(next.clone()),
                        conditions,
                    });
                }

                rule_steps += 1;
                if rule_steps > ctx.config().max_steps {
                    return Err(EvalError::StepLimitExceeded {
                        limit: ctx.config().max_steps,
                    });
                }
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::test_support::{
        number_field, rule, rule_step, snapshot, terminal, terminal_step, workflow,
    };
    use crate::model::{Condition, Operator, RecordData, RuleLogic};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn branching_snapshot() -> crate::cache::NamespaceSnapshot {
        snapshot(
            vec![number_field("income")],
            vec![],
            vec![rule(
                "r1",
                RuleLogic::And,
                vec![Condition::Field {
                    field_id: "income".to_string(),
                    operator: Operator::Ge,
                    value: json!(50_000),
                }],
            )],
            vec![workflow(
                "w1",
                "check",
                vec![
                    ("check", rule_step("r1", "accept", "reject")),
                    ("accept", terminal_step("approve")),
                    ("reject", terminal_step("deny")),
                ],
            )],
            vec![terminal("approve"), terminal("deny")],
        )
    }

    fn record(income: f64) -> RecordData {
        let mut record = RecordData::new();
        record.insert("income".to_string(), json!(income));
        record
    }

    fn run(
        snap: &crate::cache::NamespaceSnapshot,
        workflow_id: &str,
        record: &RecordData,
        config: &EngineConfig,
        mode: TraceMode,
    ) -> Result<WorkflowOutcome, EvalError> {
        let cancel = CancellationToken::new();
        let mut ctx = EvalContext::new(snap, record, config, &cancel, mode == TraceMode::Full);
        run_workflow(&snap.active_workflows[workflow_id], &mut ctx, mode)
    }

    #[test]
    fn branches_to_the_matching_terminal() {
        let snap = branching_snapshot();
        let config = EngineConfig::default();

        let approved = run(&snap, "w1", &record(60_000.0), &config, TraceMode::Off).unwrap();
        assert_eq!(approved.terminal_id, "approve");
        assert_eq!(approved.rule_steps, 1);

        let denied = run(&snap, "w1", &record(40_000.0), &config, TraceMode::Off).unwrap();
        assert_eq!(denied.terminal_id, "deny");
    }

    #[test]
    fn simple_trace_records_steps_without_condition_detail() {
        let snap = branching_snapshot();
        let config = EngineConfig::default();

        let outcome = run(&snap, "w1", &record(60_000.0), &config, TraceMode::Simple).unwrap();
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[0].kind, StepKind::Rule);
        assert_eq!(outcome.trace[0].result, Some(true));
        assert_eq!(outcome.trace[0].next.as_deref(), Some("accept"));
        assert!(outcome.trace[0].conditions.is_empty());
        assert_eq!(outcome.trace[1].kind, StepKind::Terminal);
        assert_eq!(outcome.trace[1].terminal_id.as_deref(), Some("approve"));
    }

    #[test]
    fn full_trace_attaches_condition_detail_per_step() {
        let snap = branching_snapshot();
        let config = EngineConfig::default();

        let outcome = run(&snap, "w1", &record(60_000.0), &config, TraceMode::Full).unwrap();
        let check = &outcome.trace[0];
        assert_eq!(check.conditions.len(), 1);
        assert_eq!(check.conditions[0].reference, "income");
        assert!(check.conditions[0].result);
    }

    #[test]
    fn cyclic_workflow_exceeds_the_step_limit() {
        let snap = snapshot(
            vec![number_field("income")],
            vec![],
            vec![rule(
                "always",
                RuleLogic::And,
                vec![Condition::Field {
                    field_id: "income".to_string(),
                    operator: Operator::Ge,
                    value: json!(0),
                }],
            )],
            vec![workflow(
                "spin",
                "a",
                vec![
                    ("a", rule_step("always", "b", "end")),
                    ("b", rule_step("always", "a", "end")),
                    ("end", terminal_step("done")),
                ],
            )],
            vec![terminal("done")],
        );
        let config = EngineConfig {
            max_steps: 16,
            ..EngineConfig::default()
        };

        let err = run(&snap, "spin", &record(1.0), &config, TraceMode::Off).unwrap_err();
        assert_eq!(err, EvalError::StepLimitExceeded { limit: 16 });
    }

    #[test]
    fn unknown_step_fails() {
        let mut snap = branching_snapshot();
        let broken = workflow(
            "broken",
            "check",
            vec![("check", rule_step("r1", "missing", "missing"))],
        );
        snap.active_workflows.insert("broken".to_string(), broken);

        let config = EngineConfig::default();
        let err = run(&snap, "broken", &record(60_000.0), &config, TraceMode::Off).unwrap_err();
        assert_eq!(
            err,
            EvalError::StepUnknown {
                step_id: "missing".to_string()
            }
        );
    }

    #[test]
    fn missing_terminal_declaration_is_a_dependency_error() {
        let snap = snapshot(
            vec![],
            vec![],
            vec![],
            vec![workflow("w", "end", vec![("end", terminal_step("ghost"))])],
            vec![],
        );
        let config = EngineConfig::default();
        let err = run(&snap, "w", &RecordData::new(), &config, TraceMode::Off).unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingDependency {
                kind: "terminal",
                id: "ghost".to_string()
            }
        );
    }

    #[test]
    fn cancellation_stops_at_a_step_boundary() {
        let snap = branching_snapshot();
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = record(60_000.0);
        let mut ctx = EvalContext::new(&snap, &input, &config, &cancel, false);

        let err = run_workflow(&snap.active_workflows["w1"], &mut ctx, TraceMode::Off).unwrap_err();
        assert_eq!(err, EvalError::Cancelled);
    }
}
