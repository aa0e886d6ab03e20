//! Tests for pool configuration

use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;

#[test]
fn test_default_config() {
    let config = PoolConfig::default();
    assert_eq!(config.partition_count(), 1);
    assert_eq!(config.min_connections_per_partition(), 1);
    assert_eq!(config.max_connections_per_partition(), 10);
    assert_eq!(config.acquire_increment(), 2);
    assert_eq!(
        config.idle_connection_test_period(),
        Some(Duration::from_secs(240 * 60))
    );
    assert_eq!(config.idle_max_age(), Some(Duration::from_secs(60 * 60)));
    assert_eq!(config.max_connection_age(), None);
    assert_eq!(config.connection_timeout(), None);
    assert_eq!(config.acquire_retry_attempts(), 5);
    assert_eq!(config.acquire_retry_delay(), Duration::from_secs(7));
    assert_eq!(config.service_order(), ServiceOrder::Fifo);
    assert_eq!(config.strategy(), StrategyKind::Default);
    assert!(!config.lazy_init());
}

#[test]
fn test_builder_pattern() {
    let config = PoolConfig::new(2, 5)
        .with_pool_name("reports")
        .with_partition_count(3)
        .with_acquire_increment(2)
        .with_connection_timeout_ms(50)
        .with_null_on_connection_timeout(true)
        .with_statements_cache_size(8)
        .with_release_helper_threads(2)
        .with_service_order(ServiceOrder::Lifo)
        .with_strategy(StrategyKind::Cached);

    assert_eq!(config.pool_name(), "reports");
    assert_eq!(config.partition_count(), 3);
    assert_eq!(config.connection_timeout(), Some(Duration::from_millis(50)));
    assert!(config.null_on_connection_timeout());
    assert_eq!(config.statements_cache_size(), 8);
    assert_eq!(config.release_helper_threads(), 2);
    assert_eq!(config.service_order(), ServiceOrder::Lifo);
    assert_eq!(config.strategy(), StrategyKind::Cached);
}

#[rstest]
#[case::zero_partitions(PoolConfig::new(1, 5).with_partition_count(0), 1, 1, 5, 2)]
#[case::zero_max(PoolConfig::new(1, 0), 1, 1, 10, 2)]
#[case::min_above_max(PoolConfig::new(8, 4), 1, 4, 4, 2)]
#[case::zero_increment(PoolConfig::new(1, 5).with_acquire_increment(0), 1, 1, 5, 1)]
#[case::increment_above_max(PoolConfig::new(1, 3).with_acquire_increment(9), 1, 1, 3, 3)]
fn test_sanitize_sizing(
    #[case] config: PoolConfig,
    #[case] partitions: usize,
    #[case] min: usize,
    #[case] max: usize,
    #[case] increment: usize,
) {
    let config = config.sanitized();
    assert_eq!(
        (
            config.partition_count(),
            config.min_connections_per_partition(),
            config.max_connections_per_partition(),
            config.acquire_increment(),
        ),
        (partitions, min, max, increment)
    );
}

#[rstest]
#[case(0.0)]
#[case(0.5)]
#[case(f64::NAN)]
fn test_sanitize_retry_multiplier(#[case] multiplier: f64) {
    let config = PoolConfig::default()
        .with_acquire_retry_multiplier(multiplier)
        .sanitized();
    assert_eq!(config.retry_policy().multiplier(), 1.0);
}

#[test]
fn test_sanitize_retry_delay_and_probe() {
    let config = PoolConfig::default()
        .with_acquire_retry(3, 0)
        .with_liveness_probe_timeout_ms(0)
        .with_connection_test_statement("   ")
        .with_pool_name("")
        .sanitized();

    assert_eq!(config.acquire_retry_delay(), Duration::from_secs(7));
    assert_eq!(config.liveness_probe_timeout(), Duration::from_secs(5));
    assert_eq!(config.connection_test_statement(), None);
    assert_eq!(config.pool_name(), "shardpool");
    assert_eq!(config.retry_policy().max_retries(), 3);
}

#[rstest]
#[case::both(1_000, 500, Some(500))]
#[case::test_only(1_000, 0, Some(1_000))]
#[case::idle_only(0, 300, Some(300))]
#[case::neither(0, 0, None)]
fn test_tester_period(#[case] test_ms: u64, #[case] idle_ms: u64, #[case] expected: Option<u64>) {
    let config = PoolConfig::default()
        .with_idle_connection_test_period_ms(test_ms)
        .with_idle_max_age_ms(idle_ms);
    assert_eq!(config.tester_period(), expected.map(Duration::from_millis));
}

#[test]
fn test_from_toml_str() {
    let config = PoolConfig::from_toml_str(
        r#"
        pool_name = "orders"
        partition_count = 2
        min_connections_per_partition = 2
        max_connections_per_partition = 5
        connection_timeout_ms = 250
        service_order = "lifo"
        strategy = "cached"

        [endpoint]
        url = "postgres://localhost/orders"

        [credentials]
        username = "app"
        password = "secret"
        "#,
    )
    .expect("valid toml");

    assert_eq!(config.pool_name(), "orders");
    assert_eq!(config.partition_count(), 2);
    assert_eq!(config.min_connections_per_partition(), 2);
    assert_eq!(config.max_connections_per_partition(), 5);
    assert_eq!(config.connection_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(config.service_order(), ServiceOrder::Lifo);
    assert_eq!(config.strategy(), StrategyKind::Cached);
    assert_eq!(config.endpoint().url, "postgres://localhost/orders");
    assert_eq!(config.credentials().username.as_deref(), Some("app"));
    // Untouched keys keep their defaults
    assert_eq!(config.acquire_increment(), 2);
}

#[test]
fn test_from_toml_str_rejects_bad_types() {
    let err = PoolConfig::from_toml_str("partition_count = \"many\"").unwrap_err();
    assert!(matches!(err, ShardpoolError::Configuration(_)));
}

#[test]
fn test_config_json_roundtrip() {
    let config = PoolConfig::new(2, 8).with_max_connection_age_ms(30_000);
    let json = serde_json::to_string(&config).expect("serialize");
    let restored: PoolConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored.min_connections_per_partition(), 2);
    assert_eq!(restored.max_connections_per_partition(), 8);
    assert_eq!(restored.max_connection_age(), Some(Duration::from_secs(30)));
}
