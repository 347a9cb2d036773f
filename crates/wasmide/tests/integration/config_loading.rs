use wasmide::config::{Config, ConfigError};

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.epoch_tick_ms, 5);
    assert_eq!(config.pool.workers, 2);
    assert_eq!(config.pool.queue_capacity, 3);
    assert_eq!(config.limits.wall_time_limit, Some(2.0));
    assert_eq!(config.facilities.system.substitute.as_str(), "jail/system");
    assert_eq!(config.facilities.scanner.substitute.as_str(), "jail/scanner");
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.pool.workers, 1);
    assert_eq!(config.pool.queue_capacity, 5);
    assert_eq!(config.entry_point, "main");
    assert_eq!(config.facilities.system.substitute.as_str(), "sandbox/system");
}

#[test]
fn test_load_invalid_zero_workers() {
    let path = format!("{}/configs/invalid_zero_workers.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_self_redirect() {
    let path = format!("{}/configs/invalid_self_redirect.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_module_name() {
    let path = format!("{}/configs/invalid_module_name.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_example_config_is_valid() {
    let config = Config::parse_toml(wasmide::EXAMPLE_CONFIG).expect("example config");
    config.validate().expect("example config should validate");
}
