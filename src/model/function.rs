//! Declared aggregate and membership functions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityStatus;

/// The computation a function performs over record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Maximum of the numeric argument values.
    Max,
    /// Sum of the numeric argument values.
    Sum,
    /// Arithmetic mean of the numeric argument values.
    Avg,
    /// Membership test of the first argument's value against `values`.
    In,
}

impl FunctionKind {
    /// The result type this kind produces.
    pub fn return_type(self) -> ReturnType {
        match self {
            FunctionKind::Max | FunctionKind::Sum | FunctionKind::Avg => ReturnType::Number,
            FunctionKind::In => ReturnType::Bool,
        }
    }
}

/// Result type of a function, derived from its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    /// Numeric result.
    Number,
    /// Boolean result.
    Bool,
}

/// Runtime result of executing a function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionValue {
    /// Result of an aggregate kind.
    Number(f64),
    /// Result of a membership kind.
    Bool(bool),
}

/// A versioned function over record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Unique id within the namespace.
    pub function_id: String,

    /// Version number, starting at 1.
    pub version: u32,

    /// Lifecycle status.
    pub status: EntityStatus,

    /// Computation kind; also determines the return type.
    pub kind: FunctionKind,

    /// Field ids the function reads. Non-empty for aggregate kinds; for
    /// `in`, the first entry is the probe field.
    pub args: Vec<String>,

    /// Membership candidates for the `in` kind; unused otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl Function {
    /// The result type derived from this function's kind.
    pub fn return_type(&self) -> ReturnType {
        self.kind.return_type()
    }

    /// Structural validation of the declaration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.args.is_empty() {
            return Err(format!("function {} declares no args", self.function_id));
        }
        if self.kind == FunctionKind::In
            && self.values.as_ref().map_or(true, |v| v.is_empty())
        {
            return Err(format!(
                "function {} of kind 'in' declares no values",
                self.function_id
            ));
        }
        Ok(())
    }
}
