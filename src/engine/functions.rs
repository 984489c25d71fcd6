//! Function execution over input records

use serde_json::Value;

use crate::engine::EvalError;
use crate::model::{Function, FunctionKind, FunctionValue, RecordData};

/// Execute a declared function against an input record.
///
/// Aggregates ignore missing fields but require at least one numeric input.
/// The membership kind probes its first argument's value against the
/// declared candidates, coercing to the type of the first candidate.
pub fn execute_function(function: &Function, record: &RecordData) -> Result<FunctionValue, EvalError> {
    match function.kind {
        FunctionKind::Max | FunctionKind::Sum | FunctionKind::Avg => {
            let inputs: Vec<f64> = function
                .args
                .iter()
                .filter_map(|field_id| record.get(field_id).and_then(Value::as_f64))
                .collect();
            if inputs.is_empty() {
                return Err(EvalError::FunctionMissingInput {
                    function_id: function.function_id.clone(),
                });
            }
            let sum: f64 = inputs.iter().sum();
            let result = match function.kind {
                FunctionKind::Max => inputs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                FunctionKind::Sum => sum,
                _ => sum / inputs.len() as f64,
            };
            Ok(FunctionValue::Number(result))
        }
        FunctionKind::In => {
            let probe_field = function.args.first().ok_or_else(|| {
                EvalError::FunctionMissingInput {
                    function_id: function.function_id.clone(),
                }
            })?;
            let candidates = function.values.as_deref().unwrap_or_default();
            let Some(observed) = record.get(probe_field) else {
                return Ok(FunctionValue::Bool(false));
            };
            Ok(FunctionValue::Bool(is_member(observed, candidates)))
        }
    }
}

/// Membership test with coercion matching the first candidate's type.
fn is_member(observed: &Value, candidates: &[Value]) -> bool {
    match candidates.first() {
        Some(Value::Number(_)) => match observed.as_f64() {
            Some(probe) if !probe.is_nan() => candidates
                .iter()
                .filter_map(Value::as_f64)
                .any(|candidate| candidate == probe),
            _ => false,
        },
        Some(Value::String(_)) => match observed.as_str() {
            Some(probe) => candidates
                .iter()
                .filter_map(Value::as_str)
                .any(|candidate| candidate == probe),
            None => false,
        },
        _ => false,
    }
}
