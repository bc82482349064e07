//! Tests for error types

use prometheus_resource_cache::core::CacheError;

#[test]
fn test_load_failed_error() {
    let err = CacheError::load_failed("ui/panel", "404");
    assert_eq!(format!("{}", err), "load `ui/panel` failed: 404");
}

#[test]
fn test_duplicate_template_error() {
    let err = CacheError::DuplicateTemplate("enemy".to_string());
    assert_eq!(format!("{}", err), "duplicate template: enemy");
}

#[test]
fn test_invalid_config_error() {
    let err = CacheError::InvalidConfig("bad".to_string());
    assert_eq!(format!("{}", err), "invalid config: bad");
}

#[test]
fn test_backend_error() {
    let err = CacheError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_errors_clone_for_every_waiter() {
    let err = CacheError::Instantiate {
        key: "tree".into(),
        reason: "no mesh".into(),
    };
    let copies = vec![err.clone(), err.clone()];
    assert!(copies.iter().all(|e| *e == err));
}
