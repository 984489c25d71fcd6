//! Condition evaluation against a record and a snapshot

use serde_json::Value;

use crate::engine::context::EvalContext;
use crate::engine::functions::execute_function;
use crate::engine::rules::evaluate_rule;
use crate::engine::trace::{ConditionKind, ConditionTrace};
use crate::engine::EvalError;
use crate::model::{Condition, FunctionValue, Operator, ScalarType};

/// Evaluate one condition.
///
/// Field conditions are total: a missing record field, an undeclared field
/// id, or a type mismatch all evaluate to `false`. Function and nested-rule
/// conditions fail with [`EvalError::MissingDependency`] when the snapshot
/// lacks the referenced entity.
pub fn evaluate_condition(
    condition: &Condition,
    ctx: &mut EvalContext<'_>,
) -> Result<bool, EvalError> {
    match condition {
        Condition::Field {
            field_id,
            operator,
            value,
        } => {
            let result = evaluate_field(field_id, *operator, value, ctx);
            ctx.push_condition(ConditionTrace {
                kind: ConditionKind::Field,
                reference: field_id.clone(),
                operator: Some(*operator),
                expected: Some(value.clone()),
                actual: ctx.record().get(field_id).cloned(),
                result,
            });
            Ok(result)
        }
        Condition::Function {
            function_id,
            operator,
            value,
        } => {
            let function = ctx
                .snapshot()
                .active_functions
                .get(function_id)
                .ok_or_else(|| EvalError::MissingDependency {
                    kind: "function",
                    id: function_id.clone(),
                })?;
            let computed = execute_function(function, ctx.record())?;
            let result = compare_function_result(computed, *operator, value);
            ctx.push_condition(ConditionTrace {
                kind: ConditionKind::Function,
                reference: function_id.clone(),
                operator: Some(*operator),
                expected: Some(value.clone()),
                actual: serde_json::to_value(computed).ok(),
                result,
            });
            Ok(result)
        }
        Condition::Rule { rule_id } => {
            let rule = ctx
                .snapshot()
                .active_rules
                .get(rule_id)
                .ok_or_else(|| EvalError::MissingDependency {
                    kind: "rule",
                    id: rule_id.clone(),
                })?;
            let result = evaluate_rule(rule, ctx)?;
            ctx.push_condition(ConditionTrace {
                kind: ConditionKind::Rule,
                reference: rule_id.clone(),
                operator: None,
                expected: None,
                actual: None,
                result,
            });
            Ok(result)
        }
    }
}

fn evaluate_field(
    field_id: &str,
    operator: Operator,
    expected: &Value,
    ctx: &EvalContext<'_>,
) -> bool {
    // Conditions over undeclared fields cannot match anything.
    let Some(field) = ctx.snapshot().fields.get(field_id) else {
        return false;
    };
    let Some(observed) = ctx.record().get(field_id) else {
        return false;
    };

    match field.scalar_type {
        ScalarType::Number => match (observed.as_f64(), expected.as_f64()) {
            (Some(actual), Some(wanted)) => compare_numbers(actual, operator, wanted),
            _ => false,
        },
        ScalarType::String => match (observed.as_str(), expected.as_str()) {
            (Some(actual), Some(wanted)) => compare_strings(actual, operator, wanted),
            _ => false,
        },
    }
}

/// Numeric comparison over `f64` with IEEE-754 NaN semantics: NaN is
/// unordered and unequal to everything, itself included, so `!=` is the one
/// comparison it satisfies.
pub(crate) fn compare_numbers(actual: f64, operator: Operator, expected: f64) -> bool {
    if actual.is_nan() || expected.is_nan() {
        return operator == Operator::Ne;
    }
    match operator {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        Operator::Gt => actual > expected,
        Operator::Lt => actual < expected,
        Operator::Ge => actual >= expected,
        Operator::Le => actual <= expected,
    }
}

/// Byte-wise string comparison; ordering operators do not apply to strings.
fn compare_strings(actual: &str, operator: Operator, expected: &str) -> bool {
    match operator {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        _ => false,
    }
}

fn compare_function_result(computed: FunctionValue, operator: Operator, expected: &Value) -> bool {
    match computed {
        FunctionValue::Number(actual) => match expected.as_f64() {
            Some(wanted) => compare_numbers(actual, operator, wanted),
            None => false,
        },
        FunctionValue::Bool(actual) => match (operator, expected.as_bool()) {
            (Operator::Eq, Some(wanted)) => actual == wanted,
            (Operator::Ne, Some(wanted)) => actual != wanted,
            _ => false,
        },
    }
}
