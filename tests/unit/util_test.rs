//! Tests for telemetry helpers

use prometheus_resource_cache::util::{init_tracing, init_tracing_with};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    // A subscriber is in place now, so an explicit filter is refused.
    assert!(!init_tracing_with("prometheus_resource_cache=debug"));
}
