//! Checksum-driven refresh coordination
//!
//! Two triggers feed the same per-namespace single-flight path: a periodic
//! tick that sweeps every namespace the backing store knows, and an on-demand
//! freshness check issued by the execution service. A refresh recomputes the
//! namespace checksum, compares it with the last applied one, and only
//! rebuilds the snapshot on a mismatch. All store traffic passes through the
//! circuit breaker; while it is open, ticks skip and on-demand callers are
//! served the last good snapshot if one exists.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheError, NamespaceSnapshot, SnapshotBuilder, SnapshotCache};
use crate::config::CacheConfig;
use crate::metrics;
use crate::resilience::CircuitBreaker;
use crate::store::ConfigStore;

/// Drives snapshot refreshes for all namespaces.
pub struct RefreshCoordinator {
    store: Arc<dyn ConfigStore>,
    cache: Arc<SnapshotCache>,
    builder: SnapshotBuilder,
    config: CacheConfig,
}

impl RefreshCoordinator {
    /// Wire a coordinator over a backing store, cache, and breaker.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cache: Arc<SnapshotCache>,
        breaker: Arc<CircuitBreaker>,
        config: CacheConfig,
    ) -> Self {
        let builder = SnapshotBuilder::new(store.clone(), breaker, config.store_call_timeout());
        Self {
            store,
            cache,
            builder,
            config,
        }
    }

    /// Spawn the periodic poller. It sweeps until `shutdown` is cancelled.
    pub fn spawn_poller(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_sec = coordinator.config.refresh_interval_sec,
                "configuration poller started"
            );
            loop {
                let pause = coordinator.next_pause();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => coordinator.poll_once().await,
                }
            }
            info!("configuration poller stopped");
        })
    }

    fn next_pause(&self) -> Duration {
        let jitter_cap = self.config.refresh_jitter().as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        self.config.refresh_interval() + Duration::from_millis(jitter)
    }

    /// One full sweep over every namespace the backing store reports.
    /// Exposed so tests and admin surfaces can drive ticks deterministically.
    pub async fn poll_once(&self) {
        let namespaces = match self.builder.guarded(|| self.store.list_namespaces()).await {
            Ok(namespaces) => namespaces,
            Err(CacheError::BreakerOpen) => {
                debug!("skipping poll tick, circuit breaker is open");
                return;
            }
            Err(error) => {
                warn!(%error, "failed to list namespaces for poll tick");
                return;
            }
        };

        stream::iter(namespaces)
            .for_each_concurrent(self.config.refresh_concurrency.max(1), |namespace| {
                let cancel = CancellationToken::new();
                async move {
                    // A tick always recomputes and compares checksums; the
                    // freshness window only short-circuits on-demand callers.
                    match self.refresh(&namespace, true, &cancel).await {
                        Ok(_) => self.publish_staleness(&namespace),
                        Err(CacheError::BreakerOpen) => {
                            debug!(namespace, "tick refresh skipped, circuit breaker open");
                        }
                        Err(error) => {
                            warn!(namespace, %error, "tick refresh failed");
                        }
                    }
                }
            })
            .await;
    }

    /// Ensure a usable, sufficiently fresh snapshot for `namespace`.
    ///
    /// Fast path: the cached snapshot was checked within `refresh_interval`.
    /// Slow path: join the per-namespace single-flight refresh; concurrent
    /// callers coalesce and all receive the newly installed snapshot. While
    /// the breaker is open, the last good snapshot is served if present,
    /// otherwise the call fails with [`CacheError::Unavailable`].
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<NamespaceSnapshot>, CacheError> {
        let slot = self.cache.slot(namespace);
        if slot.is_fresh(self.config.refresh_interval()) {
            if let Some(snapshot) = self.cache.read(namespace) {
                return Ok(snapshot);
            }
        }

        let deadline = self
            .config
            .refresh_timeout()
            .max(self.config.min_refresh_deadline());
        let refreshed = tokio::time::timeout(deadline, self.refresh(namespace, false, cancel))
            .await
            .map_err(|_| CacheError::DeadlineExceeded(namespace.to_string()))?;

        match refreshed {
            Ok(snapshot) => Ok(snapshot),
            Err(CacheError::Cancelled) => Err(CacheError::Cancelled),
            Err(error) => match self.cache.read(namespace) {
                // A failing refresh is recovered by the next tick; callers
                // keep working off the last good snapshot until then.
                Some(stale) => {
                    warn!(namespace, %error, "refresh failed, serving last good snapshot");
                    Ok(stale)
                }
                None if matches!(error, CacheError::BreakerOpen) => {
                    Err(CacheError::Unavailable(namespace.to_string()))
                }
                None => Err(error),
            },
        }
    }

    /// Admin reload: bypasses the freshness window but keeps checksum
    /// comparison, so an unchanged configuration is not rebuilt.
    pub async fn force_reload(&self, namespace: &str) -> Result<(), CacheError> {
        let cancel = CancellationToken::new();
        self.refresh(namespace, true, &cancel).await.map(|_| ())
    }

    /// Admin reload of every namespace known to the backing store.
    pub async fn force_reload_all(&self) -> Result<(), CacheError> {
        let namespaces = self.builder.guarded(|| self.store.list_namespaces()).await?;
        for namespace in namespaces {
            self.force_reload(&namespace).await?;
        }
        Ok(())
    }

    /// The shared refresh path. `skip_window` bypasses the freshness-window
    /// short circuit (ticks and admin reloads); checksum comparison still
    /// decides whether to rebuild.
    async fn refresh(
        &self,
        namespace: &str,
        skip_window: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<NamespaceSnapshot>, CacheError> {
        let slot = self.cache.slot(namespace);

        // Single-flight: one in-flight refresh per namespace; everyone else
        // queues here and usually exits through the coalescing check below.
        let _guard = slot.refresh_guard.lock().await;

        if !skip_window && slot.is_fresh(self.config.refresh_interval()) {
            if let Some(snapshot) = self.cache.read(namespace) {
                return Ok(snapshot);
            }
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let result = self.refresh_locked(namespace, &slot, cancel).await;
        if let Err(error) = &result {
            if !matches!(error, CacheError::BreakerOpen | CacheError::Cancelled) {
                slot.record_refresh_error();
                metrics::record_refresh_error(namespace);
            }
        }
        result
    }

    async fn refresh_locked(
        &self,
        namespace: &str,
        slot: &crate::cache::store::NamespaceSlot,
        cancel: &CancellationToken,
    ) -> Result<Arc<NamespaceSnapshot>, CacheError> {
        self.builder
            .guarded(|| self.store.recompute_checksum(namespace))
            .await?;
        let stored = self
            .builder
            .guarded(|| self.store.get_checksum(namespace))
            .await?;
        slot.mark_checked();

        let unchanged = slot
            .meta
            .read()
            .last_applied_checksum
            .as_deref()
            .map(|applied| applied == stored)
            .unwrap_or(false);
        if unchanged {
            if let Some(snapshot) = self.cache.read(namespace) {
                debug!(namespace, "checksum unchanged, keeping snapshot");
                return Ok(snapshot);
            }
        }

        let started = Instant::now();
        let snapshot = Arc::new(self.builder.build(namespace, cancel).await?);
        let checksum = snapshot.checksum.clone();
        self.cache.install(namespace, snapshot.clone());
        metrics::record_refresh(
            namespace,
            Utc::now().timestamp() as f64,
            started.elapsed().as_secs_f64(),
        );
        info!(
            namespace,
            checksum = %checksum,
            duration_ms = started.elapsed().as_millis() as u64,
            "installed namespace snapshot"
        );
        Ok(snapshot)
    }

    fn publish_staleness(&self, namespace: &str) {
        if let Some(stats) = self.cache.stats(namespace) {
            if let Some(staleness) = stats.staleness_seconds {
                metrics::record_staleness(namespace, staleness);
            }
        }
    }
}
