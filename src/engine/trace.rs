//! Execution trace capture

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::model::Operator;

/// How much trace detail an execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMode {
    /// No trace capture.
    #[default]
    Off,
    /// Per-step detail for workflows, per-condition detail for rules.
    Simple,
    /// Like `Simple`, plus per-condition detail inside workflow steps.
    Full,
}

impl TraceMode {
    /// Whether any trace is captured.
    pub fn enabled(self) -> bool {
        self != TraceMode::Off
    }
}

/// Which condition variant produced a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    /// A field comparison.
    Field,
    /// A function comparison.
    Function,
    /// A nested rule reference.
    Rule,
}

/// One evaluated condition: what was compared and what came out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTrace {
    /// Condition variant.
    pub kind: ConditionKind,

    /// The id the condition resolved: field, function, or rule.
    pub reference: String,

    /// Comparison operator; absent for nested rule references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,

    /// Expected value; absent for nested rule references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,

    /// Observed or computed value; absent when the input was missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,

    /// The condition's boolean result.
    pub result: bool,
}

/// Step variant recorded in a workflow trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// A rule step.
    Rule,
    /// A terminal step.
    Terminal,
}

/// One executed workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    /// Step id in the workflow's step graph.
    pub step_id: String,

    /// Step variant.
    pub kind: StepKind,

    /// Rule evaluated by a rule step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    /// Terminal reached by a terminal step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,

    /// Rule result for rule steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,

    /// Step the execution branched to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Per-condition detail, recorded in `Full` mode only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionTrace>,
}

/// Ordered steps of one workflow execution. Most workflows are short, so the
/// first few entries live inline.
pub type WorkflowTrace = SmallVec<[StepTrace; 8]>;
