//! Entity model for namespace-scoped rule configuration
//!
//! All entities are owned by a namespace. Functions, rules, and workflows are
//! versioned: at most one `Draft` and at most one `Active` version exist per
//! id, and publishing a new version supersedes the previously active one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod condition;
pub mod function;
pub mod workflow;

pub use condition::{Condition, Operator, Rule, RuleLogic};
pub use function::{Function, FunctionKind, FunctionValue, ReturnType};
pub use workflow::{Step, Workflow};

/// Input record evaluated against rules and workflows: field id to value.
pub type RecordData = HashMap<String, Value>;

/// Scalar type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// 64-bit floating point; integers widen on evaluation.
    Number,
    /// UTF-8 string compared byte-wise.
    String,
}

/// Lifecycle status of a versioned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Editable, not yet in force.
    Draft,
    /// The single published version currently in force.
    Active,
    /// Superseded history.
    Inactive,
}

/// A typed field declaration referenced by functions and rule conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Unique id within the namespace.
    pub field_id: String,

    /// Declared scalar type; record values are coerced against it.
    pub scalar_type: ScalarType,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named halt state referenced by workflow terminal steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    /// Unique id within the namespace.
    pub terminal_id: String,
}
