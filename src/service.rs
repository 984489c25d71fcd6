//! Execution service facade
//!
//! Accepts execute-rule and execute-workflow requests, ensures snapshot
//! freshness, resolves the target entity, and invokes the interpreters.
//! Admin operations (`force_reload`, `cache_stats`) bypass the tick schedule
//! but share the same single-flight refresh path.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::cache::{CacheError, CacheStats, NamespaceSnapshot, RefreshCoordinator, SnapshotCache};
use crate::config::RuleFlowConfig;
use crate::engine::{
    evaluate_rule, run_workflow, ConditionTrace, EvalContext, TraceMode, WorkflowTrace,
};
use crate::metrics;
use crate::model::RecordData;
use crate::resilience::CircuitBreaker;
use crate::store::{ConfigStore, StoreError};
use crate::{Result, RuleFlowError};

/// Outcome of one rule execution.
#[derive(Debug, Clone, Serialize)]
pub struct RuleExecution {
    /// Unique id of this execution.
    pub execution_id: Uuid,
    /// Namespace the rule belongs to.
    pub namespace: String,
    /// Executed rule.
    pub rule_id: String,
    /// Version of the rule that was active.
    pub rule_version: u32,
    /// The rule's boolean result.
    pub passed: bool,
    /// Wall-clock execution time.
    pub evaluated_at: DateTime<Utc>,
    /// Per-condition trace, present when tracing was requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<ConditionTrace>,
}

/// Outcome of one workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecution {
    /// Unique id of this execution.
    pub execution_id: Uuid,
    /// Namespace the workflow belongs to.
    pub namespace: String,
    /// Executed workflow.
    pub workflow_id: String,
    /// Version of the workflow that was active.
    pub workflow_version: u32,
    /// Terminal the execution halted at.
    pub terminal_id: String,
    /// Number of rule steps executed.
    pub rule_steps: u32,
    /// Wall-clock execution time.
    pub evaluated_at: DateTime<Utc>,
    /// Per-step trace, present when tracing was requested.
    #[serde(skip_serializing_if = "smallvec::SmallVec::is_empty")]
    pub trace: WorkflowTrace,
}

/// Facade over the cache, refresh coordinator, and interpreters.
pub struct ExecutionService {
    cache: Arc<SnapshotCache>,
    coordinator: Arc<RefreshCoordinator>,
    config: RuleFlowConfig,
}

impl ExecutionService {
    /// Wire a service over a backing store: one cache, one breaker, one
    /// refresh coordinator.
    pub fn new(store: Arc<dyn ConfigStore>, config: RuleFlowConfig) -> Self {
        let cache = Arc::new(SnapshotCache::new(config.cache.max_size_bytes()));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store,
            cache.clone(),
            breaker,
            config.cache.clone(),
        ));
        Self {
            cache,
            coordinator,
            config,
        }
    }

    /// The refresh coordinator, e.g. to drive ticks explicitly.
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Start the background poller; it stops when `shutdown` is cancelled.
    pub fn spawn_poller(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.coordinator.spawn_poller(shutdown)
    }

    /// Execute an active rule against an input record.
    #[instrument(skip(self, record, cancel))]
    pub async fn execute_rule(
        &self,
        namespace: &str,
        rule_id: &str,
        record: &RecordData,
        trace_mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<RuleExecution> {
        require_id("namespace", namespace)?;
        require_id("rule_id", rule_id)?;

        let started = Instant::now();
        let result = self
            .execute_rule_inner(namespace, rule_id, record, trace_mode, cancel)
            .await;
        metrics::record_execution(
            namespace,
            "rule",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn execute_rule_inner(
        &self,
        namespace: &str,
        rule_id: &str,
        record: &RecordData,
        trace_mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<RuleExecution> {
        let snapshot = self.fresh_snapshot(namespace, cancel).await?;
        let rule =
            snapshot
                .active_rules
                .get(rule_id)
                .ok_or_else(|| RuleFlowError::EntityNotFound {
                    namespace: namespace.to_string(),
                    kind: "rule",
                    id: rule_id.to_string(),
                })?;

        let mut ctx = EvalContext::new(
            &snapshot,
            record,
            &self.config.workflow,
            cancel,
            trace_mode.enabled(),
        );
        let passed = evaluate_rule(rule, &mut ctx)?;

        Ok(RuleExecution {
            execution_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            rule_id: rule_id.to_string(),
            rule_version: rule.version,
            passed,
            evaluated_at: Utc::now(),
            trace: ctx.take_conditions(),
        })
    }

    /// Execute an active workflow against an input record.
    #[instrument(skip(self, record, cancel))]
    pub async fn execute_workflow(
        &self,
        namespace: &str,
        workflow_id: &str,
        record: &RecordData,
        trace_mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecution> {
        require_id("namespace", namespace)?;
        require_id("workflow_id", workflow_id)?;

        let started = Instant::now();
        let result = self
            .execute_workflow_inner(namespace, workflow_id, record, trace_mode, cancel)
            .await;
        metrics::record_execution(
            namespace,
            "workflow",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn execute_workflow_inner(
        &self,
        namespace: &str,
        workflow_id: &str,
        record: &RecordData,
        trace_mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecution> {
        let snapshot = self.fresh_snapshot(namespace, cancel).await?;
        let workflow = snapshot.active_workflows.get(workflow_id).ok_or_else(|| {
            RuleFlowError::EntityNotFound {
                namespace: namespace.to_string(),
                kind: "workflow",
                id: workflow_id.to_string(),
            }
        })?;

        let mut ctx = EvalContext::new(
            &snapshot,
            record,
            &self.config.workflow,
            cancel,
            trace_mode == TraceMode::Full,
        );
        let outcome = run_workflow(workflow, &mut ctx, trace_mode)?;

        Ok(WorkflowExecution {
            execution_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_version: workflow.version,
            terminal_id: outcome.terminal_id,
            rule_steps: outcome.rule_steps,
            evaluated_at: Utc::now(),
            trace: outcome.trace,
        })
    }

    /// Admin reload of one namespace, or of every namespace the backing
    /// store knows when `namespace` is `None`.
    pub async fn force_reload(&self, namespace: Option<&str>) -> Result<()> {
        match namespace {
            Some(namespace) => {
                require_id("namespace", namespace)?;
                self.coordinator.force_reload(namespace).await?;
            }
            None => self.coordinator.force_reload_all().await?,
        }
        Ok(())
    }

    /// Cache statistics for one namespace, if the cache has seen it.
    pub fn cache_stats(&self, namespace: &str) -> Option<CacheStats> {
        self.cache.stats(namespace)
    }

    async fn fresh_snapshot(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<NamespaceSnapshot>> {
        self.coordinator
            .ensure_fresh(namespace, cancel)
            .await
            .map_err(|error| match error {
                CacheError::Store(StoreError::NamespaceNotFound(_)) => {
                    RuleFlowError::EntityNotFound {
                        namespace: namespace.to_string(),
                        kind: "namespace",
                        id: namespace.to_string(),
                    }
                }
                other => RuleFlowError::Cache(other),
            })
    }
}

fn require_id(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RuleFlowError::InvalidInput(format!("{name} is required")));
    }
    Ok(())
}
