//! Namespace configuration cache
//!
//! One immutable snapshot per namespace, installed by atomic pointer swap and
//! refreshed by a checksum-driven coordinator. Readers capture a stable
//! `Arc` reference and never block on concurrent installs.

mod refresh;
mod snapshot;
mod store;

pub use refresh::RefreshCoordinator;
pub use snapshot::{NamespaceSnapshot, SnapshotBuilder};
pub use store::{CacheStats, SnapshotCache};

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by the cache and refresh layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No snapshot is cached and refresh is blocked by the open breaker.
    #[error("configuration unavailable for namespace {0}")]
    Unavailable(String),

    /// The circuit breaker rejected a backing-store call.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// A backing-store operation failed.
    #[error("backing store failure: {0}")]
    Store(#[from] StoreError),

    /// A backing-store call exceeded the per-call timeout.
    #[error("backing store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The refresh did not complete within its deadline.
    #[error("refresh of namespace {0} exceeded its deadline")]
    DeadlineExceeded(String),

    /// The configuration kept changing while the snapshot was being built.
    #[error("snapshot build for namespace {0} was superseded by concurrent changes")]
    BuildContended(String),

    /// The caller cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
}
