//! Rule interpretation: AND/OR over ordered conditions

use crate::engine::conditions::evaluate_condition;
use crate::engine::context::EvalContext;
use crate::engine::EvalError;
use crate::model::{Rule, RuleLogic};

/// Evaluate a rule against the context's record and snapshot.
///
/// Conditions run in declared order and short-circuit: `AND` stops at the
/// first `false`, `OR` at the first `true`. Nested rule references recurse
/// against the same snapshot, bounded by the context's depth guard.
pub fn evaluate_rule(rule: &Rule, ctx: &mut EvalContext<'_>) -> Result<bool, EvalError> {
    ctx.check_cancelled()?;
    ctx.enter_rule()?;
    let result = combine(rule, ctx);
    ctx.exit_rule();
    result
}

fn combine(rule: &Rule, ctx: &mut EvalContext<'_>) -> Result<bool, EvalError> {
    match rule.logic {
        RuleLogic::And => {
            for condition in &rule.conditions {
                if !evaluate_condition(condition, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleLogic::Or => {
            for condition in &rule.conditions {
                if evaluate_condition(condition, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::test_support::{number_field, rule, snapshot};
    use crate::model::{Condition, Operator, RecordData};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn income_condition(threshold: f64) -> Condition {
        Condition::Field {
            field_id: "income".to_string(),
            operator: Operator::Ge,
            value: json!(threshold),
        }
    }

    fn record(income: f64) -> RecordData {
        let mut record = RecordData::new();
        record.insert("income".to_string(), json!(income));
        record
    }

    #[test]
    fn and_requires_every_condition() {
        let snap = snapshot(
            vec![number_field("income")],
            vec![],
            vec![rule(
                "r1",
                RuleLogic::And,
                vec![income_condition(50_000.0), income_condition(10_000.0)],
            )],
            vec![],
            vec![],
        );
        let r1 = &snap.active_rules["r1"];
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();

        let high = record(60_000.0);
        let mut ctx = EvalContext::new(&snap, &high, &config, &cancel, false);
        assert!(evaluate_rule(r1, &mut ctx).unwrap());

        let mid = record(20_000.0);
        let mut ctx = EvalContext::new(&snap, &mid, &config, &cancel, false);
        assert!(!evaluate_rule(r1, &mut ctx).unwrap());
    }

    #[test]
    fn or_takes_the_first_hit() {
        let snap = snapshot(
            vec![number_field("income")],
            vec![],
            vec![rule(
                "r1",
                RuleLogic::Or,
                vec![income_condition(100_000.0), income_condition(10_000.0)],
            )],
            vec![],
            vec![],
        );
        let r1 = &snap.active_rules["r1"];
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();

        let mid = record(20_000.0);
        let mut ctx = EvalContext::new(&snap, &mid, &config, &cancel, false);
        assert!(evaluate_rule(r1, &mut ctx).unwrap());

        let low = record(5_000.0);
        let mut ctx = EvalContext::new(&snap, &low, &config, &cancel, false);
        assert!(!evaluate_rule(r1, &mut ctx).unwrap());
    }

    #[test]
    fn nested_rules_resolve_transitively() {
        let snap = snapshot(
            vec![number_field("income")],
            vec![],
            vec![
                rule("r1", RuleLogic::And, vec![income_condition(50_000.0)]),
                rule(
                    "r2",
                    RuleLogic::And,
                    vec![Condition::Rule {
                        rule_id: "r1".to_string(),
                    }],
                ),
            ],
            vec![],
            vec![],
        );
        let r2 = &snap.active_rules["r2"];
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();

        let high = record(60_000.0);
        let mut ctx = EvalContext::new(&snap, &high, &config, &cancel, false);
        assert!(evaluate_rule(r2, &mut ctx).unwrap());

        let low = record(40_000.0);
        let mut ctx = EvalContext::new(&snap, &low, &config, &cancel, false);
        assert!(!evaluate_rule(r2, &mut ctx).unwrap());
    }

    #[test]
    fn self_referential_rules_hit_the_depth_guard() {
        let snap = snapshot(
            vec![],
            vec![],
            vec![rule(
                "loop",
                RuleLogic::And,
                vec![Condition::Rule {
                    rule_id: "loop".to_string(),
                }],
            )],
            vec![],
            vec![],
        );
        let looping = &snap.active_rules["loop"];
        let config = EngineConfig {
            max_rule_depth: 8,
            ..EngineConfig::default()
        };
        let cancel = CancellationToken::new();
        let empty = RecordData::new();
        let mut ctx = EvalContext::new(&snap, &empty, &config, &cancel, false);

        let err = evaluate_rule(looping, &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::RuleDepthExceeded { limit: 8 });
    }

    #[test]
    fn missing_nested_rule_is_a_dependency_error() {
        let snap = snapshot(
            vec![],
            vec![],
            vec![rule(
                "r2",
                RuleLogic::And,
                vec![Condition::Rule {
                    rule_id: "ghost".to_string(),
                }],
            )],
            vec![],
            vec![],
        );
        let r2 = &snap.active_rules["r2"];
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();
        let empty = RecordData::new();
        let mut ctx = EvalContext::new(&snap, &empty, &config, &cancel, false);

        let err = evaluate_rule(r2, &mut ctx).unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingDependency {
                kind: "rule",
                id: "ghost".to_string()
            }
        );
    }

    #[test]
    fn trace_follows_declared_condition_order() {
        let snap = snapshot(
            vec![number_field("income")],
            vec![],
            vec![rule(
                "r1",
                RuleLogic::Or,
                vec![income_condition(100_000.0), income_condition(10_000.0)],
            )],
            vec![],
            vec![],
        );
        let r1 = &snap.active_rules["r1"];
        let config = EngineConfig::default();
        let cancel = CancellationToken::new();
        let mid = record(20_000.0);
        let mut ctx = EvalContext::new(&snap, &mid, &config, &cancel, true);

        assert!(evaluate_rule(r1, &mut ctx).unwrap());
        let trace = ctx.take_conditions();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].expected, Some(json!(100_000.0)));
        assert!(!trace[0].result);
        assert_eq!(trace[1].expected, Some(json!(10_000.0)));
        assert!(trace[1].result);
    }
}
