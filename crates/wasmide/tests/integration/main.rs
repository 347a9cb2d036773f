//! Integration tests for wasmide
//!
//! Every test drives real WebAssembly through the full pipeline, using the
//! sources under `tests/fixtures/sources`.

use std::fs;

use wasmide::config::Config;

mod compilation;
mod concurrency;
mod config_loading;
mod execution;
mod patching;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Create a test config with a short deadline so failing tests finish quickly
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.limits.wall_time_limit = Some(2.0);
    config
}
