//! Rules and their conditions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityStatus;

/// Comparison operator applied between an observed and an expected value.
///
/// Numbers support the full set; strings support `Eq` and `Ne` only. Applying
/// an ordering operator to a string evaluates to `false` rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        };
        f.write_str(symbol)
    }
}

/// How a rule combines its condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLogic {
    /// Every condition must hold; short-circuits on the first `false`.
    And,
    /// Any condition may hold; short-circuits on the first `true`.
    Or,
}

/// One predicate inside a rule.
///
/// Parsed once at snapshot build time into a typed variant; the evaluator
/// never re-inspects raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// Compare a record field against an expected value.
    Field {
        /// Field to look up in the input record.
        field_id: String,
        /// Comparison operator.
        operator: Operator,
        /// Expected value.
        value: Value,
    },
    /// Compare the result of an active function against an expected value.
    Function {
        /// Function to execute.
        function_id: String,
        /// Comparison operator.
        operator: Operator,
        /// Expected value.
        value: Value,
    },
    /// Delegate to another active rule, evaluated against the same snapshot.
    Rule {
        /// Referenced rule id.
        rule_id: String,
    },
}

/// A versioned rule: conditions combined under AND/OR logic.
///
/// Conditions keep their declared order; trace output follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique id within the namespace.
    pub rule_id: String,

    /// Version number, starting at 1.
    pub version: u32,

    /// Lifecycle status.
    pub status: EntityStatus,

    /// Combination logic over the conditions.
    pub logic: RuleLogic,

    /// Ordered predicate list.
    pub conditions: Vec<Condition>,
}
