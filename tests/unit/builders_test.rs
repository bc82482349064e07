//! Tests for context builders

use std::time::Duration;

use prometheus_resource_cache::builders::build_context;
use prometheus_resource_cache::config::CacheConfig;
use prometheus_resource_cache::core::CacheError;
use prometheus_resource_cache::infra::{ManualBackend, MemoryHost};

#[test]
fn test_build_context_schedules_sweep() {
    let ctx = build_context(&CacheConfig::default(), ManualBackend::new(), MemoryHost::new())
        .expect("valid config");
    let timer = ctx.sweep_timer().expect("sweep scheduled");
    assert!(ctx.scheduler().is_scheduled(timer));
    assert_eq!(ctx.scheduler().active_count(), 1);
}

#[test]
fn test_build_context_rejects_invalid_config() {
    let cfg = CacheConfig::new().with_eviction_factor(0.5);
    let err = build_context(&cfg, ManualBackend::new(), MemoryHost::new()).unwrap_err();
    assert!(matches!(err, CacheError::InvalidConfig(_)));
}

#[test]
fn test_built_context_serves_instances() {
    let ctx = build_context(
        &CacheConfig::new().with_sweep_interval_secs(1),
        ManualBackend::immediate(),
        MemoryHost::new(),
    )
    .expect("valid config");

    ctx.pool().acquire("bullet", |_| {});
    ctx.tick(Duration::from_millis(16));
    assert_eq!(ctx.pool().stats("bullet").map(|s| s.active), Some(1));
    assert_eq!(ctx.pool().host().live_count(), 1);
}
