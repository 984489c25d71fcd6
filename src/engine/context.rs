//! Per-invocation evaluation context

use tokio_util::sync::CancellationToken;

use crate::cache::NamespaceSnapshot;
use crate::config::EngineConfig;
use crate::engine::trace::ConditionTrace;
use crate::engine::EvalError;
use crate::model::RecordData;

/// Everything one evaluation needs: the captured snapshot, the input record,
/// interpreter limits, the caller's cancellation token, and the trace buffer.
///
/// The context pins a single snapshot reference for its whole lifetime, so a
/// concurrent refresh never changes what an in-flight evaluation sees.
pub struct EvalContext<'a> {
    snapshot: &'a NamespaceSnapshot,
    record: &'a RecordData,
    config: &'a EngineConfig,
    cancel: &'a CancellationToken,
    trace_conditions: bool,
    depth: u32,
    conditions: Vec<ConditionTrace>,
}

impl<'a> EvalContext<'a> {
    /// Build a context. `trace_conditions` turns on per-condition capture.
    pub fn new(
        snapshot: &'a NamespaceSnapshot,
        record: &'a RecordData,
        config: &'a EngineConfig,
        cancel: &'a CancellationToken,
        trace_conditions: bool,
    ) -> Self {
        Self {
            snapshot,
            record,
            config,
            cancel,
            trace_conditions,
            depth: 0,
            conditions: Vec::new(),
        }
    }

    /// The snapshot this evaluation runs against.
    pub fn snapshot(&self) -> &'a NamespaceSnapshot {
        self.snapshot
    }

    /// The input record.
    pub fn record(&self) -> &'a RecordData {
        self.record
    }

    /// Interpreter limits.
    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Fail fast if the caller has cancelled.
    pub fn check_cancelled(&self) -> Result<(), EvalError> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        Ok(())
    }

    /// Enter a (possibly nested) rule evaluation.
    pub(crate) fn enter_rule(&mut self) -> Result<(), EvalError> {
        if self.depth >= self.config.max_rule_depth {
            return Err(EvalError::RuleDepthExceeded {
                limit: self.config.max_rule_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn exit_rule(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append a condition trace entry, if capture is enabled.
    pub(crate) fn push_condition(&mut self, entry: ConditionTrace) {
        if self.trace_conditions {
            self.conditions.push(entry);
        }
    }

    /// Drain the captured condition entries, e.g. to attach them to a
    /// workflow step.
    pub fn take_conditions(&mut self) -> Vec<ConditionTrace> {
        std::mem::take(&mut self.conditions)
    }
}
