//! Configuration loading for the binary.
//!
//! Sources, later ones winning:
//! 1. `octofhir-smart.toml` in the working directory, or `--config <path>`
//! 2. `SMART_*` environment variables (`SMART_CLIENT_ID`, `SMART_FLOW__TTL`)
//! 3. `FHIR_BASE_URL` and `DEBUG`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use octofhir_smart::SmartConfig;

/// Configuration file picked up when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "octofhir-smart.toml";

pub fn load_config(path: Option<&Path>) -> Result<SmartConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    // Environment variable overrides, e.g. SMART_CLIENT_ID=app, SMART_FLOW__TTL=10m
    builder = builder.add_source(
        Environment::with_prefix("SMART")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder.build().context("Failed to read configuration")?;
    let mut merged: SmartConfig = cfg
        .try_deserialize()
        .context("Invalid configuration")?;
    apply_env_overrides(&mut merged, |key| std::env::var(key).ok());
    merged.validate().context("Invalid configuration")?;
    Ok(merged)
}

/// Applies the unprefixed `FHIR_BASE_URL` and `DEBUG` variables.
///
/// `DEBUG` also enables redacted token logging at debug level.
pub fn apply_env_overrides(cfg: &mut SmartConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("FHIR_BASE_URL").filter(|v| !v.trim().is_empty()) {
        cfg.fhir_base_url = Some(url);
    }
    if let Some(debug) = lookup("DEBUG") {
        cfg.debug = matches!(
            debug.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    if cfg.debug {
        cfg.session.log_tokens = true;
    }
}

/// Log level implied by the configuration.
pub fn log_level(cfg: &SmartConfig) -> &'static str {
    if cfg.debug { "debug" } else { "info" }
}
