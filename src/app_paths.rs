//! Centralized storage paths for phone-lookup persistence.
//!
//! Everything lives under one application home directory:
//! - `data/api_usage.json` - Monthly API usage record
//! - `logs/<component>.log` - Run logs written by `RunLogger`
//! - `config.yaml` - Default configuration file
//!
//! The home directory is `<data_local_dir>/phone-lookup/` unless the
//! `PHONE_LOOKUP_HOME` environment variable points somewhere else.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the application directory under the platform data dir.
const APP_DIR: &str = "phone-lookup";

/// Environment variable overriding the application home directory.
pub const HOME_ENV: &str = "PHONE_LOOKUP_HOME";

/// File name of the persistent usage record.
pub const USAGE_FILENAME: &str = "api_usage.json";

/// Returns the application home directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - No platform data directory can be determined and `PHONE_LOOKUP_HOME` is unset
/// - Directory creation fails
pub fn app_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .context("Could not determine a data directory for phone-lookup")?
            .join(APP_DIR),
    };
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Returns the data directory: `<home>/data/`
pub fn data_dir() -> Result<PathBuf> {
    let dir = app_home_dir()?.join("data");
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Returns the logs directory: `<home>/logs/`
pub fn logs_dir() -> Result<PathBuf> {
    let dir = app_home_dir()?.join("logs");
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Returns the usage record path: `<home>/data/api_usage.json`
pub fn usage_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(USAGE_FILENAME))
}

/// Returns the default config path: `<home>/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_home_dir()?.join("config.yaml"))
}

/// Derives a sibling output path: `<dir>/<stem><suffix>.xlsx`
///
/// `report.xlsx` with suffix `_processed` becomes `report_processed.xlsx`.
pub fn sibling_output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file_name = format!("{}{}.xlsx", stem, suffix);
    match input.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}
