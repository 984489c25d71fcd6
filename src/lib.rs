//! # ruleflow
//!
//! Multi-tenant rule and workflow evaluation engine built around a
//! checksum-driven namespace configuration cache.
//!
//! ## Overview
//!
//! Tenants (namespaces) own fields, functions, rules, workflows, and
//! terminals. The active configuration of a namespace is bundled into an
//! immutable snapshot, installed by atomic pointer swap, and refreshed when
//! the backing store's checksum moves. Rule and workflow executions capture
//! one snapshot reference and evaluate against it without locking.
//!
//! ## Key pieces
//!
//! - **Snapshot cache**: lock-free reads, per-namespace single-flight
//!   refresh, LRU eviction under a memory ceiling
//! - **Refresh coordinator**: periodic checksum polling with jitter,
//!   protected by a circuit breaker around the backing store
//! - **Interpreters**: recursive condition/rule evaluation and a bounded
//!   workflow step machine, with optional execution tracing

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for ruleflow operations
pub type Result<T> = std::result::Result<T, RuleFlowError>;

/// Main error type for ruleflow operations
#[derive(Error, Debug)]
pub enum RuleFlowError {
    /// The request is missing a required reference.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested entity is not in the namespace's active configuration.
    #[error("{kind} '{id}' not found in namespace '{namespace}'")]
    EntityNotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Entity kind, e.g. `rule` or `workflow`.
        kind: &'static str,
        /// Requested id.
        id: String,
    },

    /// Evaluation failed.
    #[error("evaluation error: {0}")]
    Eval(#[from] engine::EvalError),

    /// The configuration cache could not produce a snapshot.
    #[error("cache error: {0}")]
    Cache(#[from] cache::CacheError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Namespace configuration cache and refresh coordination
pub mod cache;

/// Configuration types
pub mod config;

/// Rule and workflow interpreters
pub mod engine;

/// Prometheus metrics
pub mod metrics;

/// Entity model
pub mod model;

/// Circuit breaker around the backing store
pub mod resilience;

/// Execution service facade
pub mod service;

/// Backing-store repository
pub mod store;

pub use cache::{CacheStats, NamespaceSnapshot};
pub use config::RuleFlowConfig;
pub use engine::TraceMode;
pub use model::RecordData;
pub use service::{ExecutionService, RuleExecution, WorkflowExecution};
pub use store::{ConfigStore, MemoryConfigStore};
