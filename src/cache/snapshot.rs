//! Immutable namespace snapshots and the consistent-view builder

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::CacheError;
use crate::model::{Field, Function, Rule, Terminal, Workflow};
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::store::{ConfigStore, StoreError};

/// Immutable bundle of one namespace's active configuration.
///
/// Shared by reference: the cache holds the current snapshot and every
/// in-flight request keeps its own `Arc`, so an install never disturbs a
/// running evaluation.
#[derive(Debug, Serialize)]
pub struct NamespaceSnapshot {
    /// Owning namespace.
    pub namespace: String,

    /// Checksum of the active configuration this snapshot was built from.
    pub checksum: String,

    /// Wall-clock build time.
    pub built_at: DateTime<Utc>,

    /// Rough in-memory footprint, used for the cache ceiling.
    pub approx_bytes: u64,

    /// Field declarations by id.
    pub fields: HashMap<String, Field>,

    /// Active function versions by id.
    pub active_functions: HashMap<String, Function>,

    /// Active rule versions by id.
    pub active_rules: HashMap<String, Rule>,

    /// Active workflow versions by id.
    pub active_workflows: HashMap<String, Workflow>,

    /// Terminals by id.
    pub terminals: HashMap<String, Terminal>,
}

impl NamespaceSnapshot {
    fn assemble(
        namespace: &str,
        checksum: String,
        fields: Vec<Field>,
        functions: Vec<Function>,
        rules: Vec<Rule>,
        workflows: Vec<Workflow>,
        terminals: Vec<Terminal>,
    ) -> Self {
        let mut snapshot = Self {
            namespace: namespace.to_string(),
            checksum,
            built_at: Utc::now(),
            approx_bytes: 0,
            fields: fields.into_iter().map(|f| (f.field_id.clone(), f)).collect(),
            active_functions: functions
                .into_iter()
                .map(|f| (f.function_id.clone(), f))
                .collect(),
            active_rules: rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect(),
            active_workflows: workflows
                .into_iter()
                .map(|w| (w.workflow_id.clone(), w))
                .collect(),
            terminals: terminals
                .into_iter()
                .map(|t| (t.terminal_id.clone(), t))
                .collect(),
        };
        snapshot.approx_bytes = serde_json::to_vec(&snapshot).map(|v| v.len() as u64).unwrap_or(0);
        snapshot
    }
}

/// Builds snapshots from the backing store with a consistent view.
///
/// The repository offers no read transaction, so consistency is enforced by
/// checksum bracketing: read the checksum, list everything, read it again.
/// A mismatch discards the build and retries once; a second mismatch fails
/// with [`CacheError::BuildContended`].
pub struct SnapshotBuilder {
    store: Arc<dyn ConfigStore>,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
}

impl SnapshotBuilder {
    /// Create a builder. Every store call it issues passes through the
    /// breaker and the per-call timeout.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        breaker: Arc<CircuitBreaker>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            breaker,
            call_timeout,
        }
    }

    /// Run one backing-store call under breaker protection and the per-call
    /// timeout. Timeouts count as breaker failures.
    pub(crate) async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let call_timeout = self.call_timeout;
        let outcome = self
            .breaker
            .try_call(|| async move {
                match tokio::time::timeout(call_timeout, op()).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(error)) => Err(GuardedFailure::Store(error)),
                    Err(_) => Err(GuardedFailure::Timeout),
                }
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(BreakerError::Open) => Err(CacheError::BreakerOpen),
            Err(BreakerError::Upstream(GuardedFailure::Store(error))) => {
                Err(CacheError::Store(error))
            }
            Err(BreakerError::Upstream(GuardedFailure::Timeout)) => {
                Err(CacheError::StoreTimeout(call_timeout))
            }
        }
    }

    /// Build a snapshot of `namespace` against the checksum currently stored.
    pub async fn build(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<NamespaceSnapshot, CacheError> {
        let mut expected = self
            .guarded(|| self.store.get_checksum(namespace))
            .await?;

        for attempt in 0..2 {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let fields = self.guarded(|| self.store.list_fields(namespace)).await?;
            let functions = self
                .guarded(|| self.store.list_active_functions(namespace))
                .await?;
            let rules = self
                .guarded(|| self.store.list_active_rules(namespace))
                .await?;
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let workflows = self
                .guarded(|| self.store.list_active_workflows(namespace))
                .await?;
            let terminals = self
                .guarded(|| self.store.list_terminals(namespace))
                .await?;

            let observed = self
                .guarded(|| self.store.get_checksum(namespace))
                .await?;
            if observed == expected {
                return Ok(NamespaceSnapshot::assemble(
                    namespace, observed, fields, functions, rules, workflows, terminals,
                ));
            }

            debug!(
                namespace,
                attempt, "checksum moved during snapshot build, retrying"
            );
            expected = observed;
        }

        Err(CacheError::BuildContended(namespace.to_string()))
    }
}

enum GuardedFailure {
    Store(StoreError),
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::model::ScalarType;
    use crate::store::MemoryConfigStore;

    fn builder(store: &MemoryConfigStore) -> SnapshotBuilder {
        SnapshotBuilder::new(
            Arc::new(store.clone()),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            Duration::from_secs(5),
        )
    }

    fn seeded_store() -> MemoryConfigStore {
        let store = MemoryConfigStore::new();
        store.create_namespace("demo");
        store
            .put_field(
                "demo",
                Field {
                    field_id: "income".to_string(),
                    scalar_type: ScalarType::Number,
                    description: None,
                },
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn builds_a_consistent_snapshot() {
        let store = seeded_store();
        store.recompute_checksum("demo").await.unwrap();
        let expected = store.get_checksum("demo").await.unwrap();

        let snapshot = builder(&store)
            .build("demo", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.namespace, "demo");
        assert_eq!(snapshot.checksum, expected);
        assert!(snapshot.fields.contains_key("income"));
        assert!(snapshot.approx_bytes > 0);
    }

    #[tokio::test]
    async fn missing_checksum_fails_the_build() {
        let store = seeded_store();
        let result = builder(&store)
            .build("demo", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(CacheError::Store(StoreError::ChecksumMissing(_)))
        ));
    }

    #[tokio::test]
    async fn cancellation_discards_the_build() {
        let store = seeded_store();
        store.recompute_checksum("demo").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = builder(&store).build("demo", &cancel).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
    }
}
