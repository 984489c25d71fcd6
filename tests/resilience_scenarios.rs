//! Circuit breaker behavior observed through the execution service

use std::sync::Arc;
use std::time::Duration;

use ruleflow::cache::CacheError;
use ruleflow::config::{BreakerConfig, CacheConfig};
use ruleflow::model::{
    Condition, EntityStatus, Field, Operator, RecordData, Rule, RuleLogic, ScalarType,
};
use ruleflow::{ExecutionService, MemoryConfigStore, RuleFlowConfig, RuleFlowError, TraceMode};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Install a log subscriber once so breaker transitions show up under
/// `RUST_LOG` when a scenario misbehaves.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
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
        .put_draft_rule(
            "demo",
            Rule {
                rule_id: "r1".to_string(),
                version: 0,
                status: EntityStatus::Draft,
                logic: RuleLogic::And,
                conditions: vec![Condition::Field {
                    field_id: "income".to_string(),
                    operator: Operator::Ge,
                    value: json!(50_000),
                }],
            },
        )
        .unwrap();
    store.publish_rule("demo", "r1").unwrap();
    store
}

/// A config whose breaker trips after two failures and probes after 50ms,
/// with the freshness window disabled so every execution checks the store.
fn tight_config() -> RuleFlowConfig {
    RuleFlowConfig {
        cache: CacheConfig {
            refresh_interval_sec: 0,
            ..CacheConfig::default()
        },
        circuit_breaker: BreakerConfig {
            failure_threshold: 2,
            recovery_timeout_ms: 50,
        },
        ..RuleFlowConfig::default()
    }
}

fn record(income: f64) -> RecordData {
    let mut record = RecordData::new();
    record.insert("income".to_string(), json!(income));
    record
}

#[tokio::test]
async fn empty_cache_with_open_breaker_is_unavailable() {
    init_logging();
    let store = seeded_store();
    let service = ExecutionService::new(Arc::new(store.clone()), tight_config());
    let cancel = CancellationToken::new();
    let input = record(60_000.0);

    // Two failing refreshes trip the breaker.
    store.fail_next_ops(2);
    for _ in 0..2 {
        let err = service
            .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RuleFlowError::Cache(CacheError::Store(_))));
    }

    // The third call is rejected without touching the store: the injected
    // failures are exhausted, yet the call still cannot proceed.
    let err = service
        .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuleFlowError::Cache(CacheError::Unavailable(_))
    ));

    // After the recovery timeout the probe runs, succeeds, and closes the
    // breaker; execution works again.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let execution = service
        .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
        .await
        .unwrap();
    assert!(execution.passed);
}

#[tokio::test]
async fn warm_cache_serves_stale_while_the_store_is_down() {
    init_logging();
    let store = seeded_store();
    let service = ExecutionService::new(Arc::new(store.clone()), tight_config());
    let cancel = CancellationToken::new();
    let input = record(60_000.0);

    // Warm the cache.
    let warm = service
        .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
        .await
        .unwrap();
    assert!(warm.passed);

    // The store goes down; executions keep serving the last good snapshot,
    // through the failures and after the breaker opens.
    store.fail_next_ops(10);
    for _ in 0..5 {
        let execution = service
            .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
            .await
            .unwrap();
        assert!(execution.passed);
        assert_eq!(execution.rule_version, 1);
    }

    let stats = service.cache_stats("demo").unwrap();
    assert!(stats.resident);
    assert!(stats.refresh_errors > 0);
}

#[tokio::test]
async fn scheduled_ticks_skip_while_the_breaker_is_open() {
    init_logging();
    let store = seeded_store();
    let service = ExecutionService::new(Arc::new(store.clone()), tight_config());

    // Trip the breaker with direct reload attempts.
    store.fail_next_ops(2);
    for _ in 0..2 {
        assert!(service.force_reload(Some("demo")).await.is_err());
    }

    // A tick while open is a no-op: it does not consume injected failures
    // and does not install anything.
    store.fail_next_ops(3);
    service.coordinator().poll_once().await;
    let stats = service.cache_stats("demo");
    assert!(stats.map_or(true, |s| !s.resident));
}

#[tokio::test]
async fn failed_probe_reopens_the_breaker() {
    init_logging();
    let store = seeded_store();
    let service = ExecutionService::new(Arc::new(store.clone()), tight_config());
    let cancel = CancellationToken::new();
    let input = record(60_000.0);

    store.fail_next_ops(2);
    for _ in 0..2 {
        let _ = service
            .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
            .await;
    }

    // Probe after the recovery timeout fails and reopens the breaker.
    tokio::time::sleep(Duration::from_millis(60)).await;
    store.fail_next_ops(1);
    let err = service
        .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RuleFlowError::Cache(CacheError::Store(_))));

    // Immediately after, the breaker is open again.
    let err = service
        .execute_rule("demo", "r1", &input, TraceMode::Off, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuleFlowError::Cache(CacheError::Unavailable(_))
    ));
}
