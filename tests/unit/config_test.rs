//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_resource_cache::config::{
    CacheConfig, DEFAULT_SWEEP_INTERVAL_SECS, ENV_AUTO_SWEEP, ENV_EVICTION_FACTOR,
    ENV_SWEEP_INTERVAL,
};
use prometheus_resource_cache::core::CacheError;

#[test]
fn test_default_config_is_valid() {
    let cfg = CacheConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    assert_eq!(cfg.sweep_interval(), Duration::from_secs(600));
    assert!((cfg.eviction_factor - 1.2).abs() < f64::EPSILON);
    assert!(cfg.auto_sweep);
}

#[test]
fn test_zero_interval_rejected() {
    let cfg = CacheConfig::new().with_sweep_interval_secs(0);
    assert!(matches!(cfg.validate(), Err(CacheError::InvalidConfig(_))));
}

#[test]
fn test_factor_below_one_rejected() {
    assert!(CacheConfig::new().with_eviction_factor(0.9).validate().is_err());
    assert!(CacheConfig::new().with_eviction_factor(f64::NAN).validate().is_err());
    assert!(CacheConfig::new().with_eviction_factor(1.0).validate().is_ok());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "sweep_interval_secs": 30,
        "eviction_factor": 1.5
    }"#;

    let config = CacheConfig::from_json_str(json).expect("valid json");
    assert_eq!(config.sweep_interval_secs, 30);
    assert!((config.eviction_factor - 1.5).abs() < f64::EPSILON);
    assert!(config.auto_sweep);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(CacheConfig::from_json_str(r#"{ "eviction_factor": 0.5 }"#).is_err());
    assert!(CacheConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        (ENV_SWEEP_INTERVAL, "45"),
        (ENV_EVICTION_FACTOR, " 2.0 "),
        (ENV_AUTO_SWEEP, "false"),
    ]
    .into_iter()
    .collect();

    let cfg = CacheConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string()))
        .expect("valid vars");
    assert_eq!(cfg.sweep_interval_secs, 45);
    assert!((cfg.eviction_factor - 2.0).abs() < f64::EPSILON);
    assert!(!cfg.auto_sweep);
}

#[test]
fn test_config_from_lookup_bad_number() {
    let err = CacheConfig::from_lookup(|name| {
        (name == ENV_SWEEP_INTERVAL).then(|| "soon".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains(ENV_SWEEP_INTERVAL));
}

#[test]
fn test_config_from_lookup_defaults() {
    let cfg = CacheConfig::from_lookup(|_| None).expect("defaults");
    assert_eq!(cfg, CacheConfig::default());
}
