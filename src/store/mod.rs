//! Backing-store repository for namespace configuration
//!
//! The engine only reads configuration and recomputes checksums; mutation is
//! the business of an outer administrative layer. [`MemoryConfigStore`]
//! provides a complete single-process implementation with the versioned
//! entity lifecycle, used both standalone and as the test double.

mod memory;

pub use memory::MemoryConfigStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Field, Function, Rule, Terminal, Workflow};

/// Errors raised by backing-store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The namespace (or its checksum) does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// The namespace exists but has no persisted checksum yet.
    #[error("no checksum recorded for namespace {0}")]
    ChecksumMissing(String),

    /// An entity failed structural validation on write.
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// A lifecycle rule was violated on write.
    #[error("lifecycle conflict: {0}")]
    LifecycleConflict(String),

    /// Transient or persistent upstream failure.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Read-side repository contract consumed by the refresh coordinator.
///
/// Every operation is idempotent and safe to retry; failures surface as
/// [`StoreError`] and are isolated by the circuit breaker upstream.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All namespaces known to the store.
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError>;

    /// Recompute and persist the checksum of the namespace's active
    /// configuration. The checksum depends only on the set of active
    /// entities and their contents.
    async fn recompute_checksum(&self, namespace: &str) -> Result<(), StoreError>;

    /// Read the stored checksum.
    async fn get_checksum(&self, namespace: &str) -> Result<String, StoreError>;

    /// All fields of the namespace.
    async fn list_fields(&self, namespace: &str) -> Result<Vec<Field>, StoreError>;

    /// Active function versions, one per function id.
    async fn list_active_functions(&self, namespace: &str) -> Result<Vec<Function>, StoreError>;

    /// Active rule versions, one per rule id.
    async fn list_active_rules(&self, namespace: &str) -> Result<Vec<Rule>, StoreError>;

    /// Active workflow versions, one per workflow id.
    async fn list_active_workflows(&self, namespace: &str) -> Result<Vec<Workflow>, StoreError>;

    /// All terminals of the namespace.
    async fn list_terminals(&self, namespace: &str) -> Result<Vec<Terminal>, StoreError>;
}
