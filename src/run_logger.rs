//! Persistent run logging for the lookup and embedding stages.
//!
//! Every message the pipeline reports through its observer is mirrored here,
//! one line per entry, with a UTC timestamp, a level and the component name:
//!
//! ```text
//! [2026-01-15T14:30:00.123Z] [INFO] [PHONE_LOOKUP] Loaded 120 phone numbers for processing
//! [2026-01-15T14:30:01.456Z] [ERROR] [IMAGE_EMBEDDER] Error downloading image from https://...
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log verbosity levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Stage failures and per-row/per-cell errors
    Error = 0,
    /// Conditions worth noting that do not stop processing
    Warn = 1,
    /// Progress of a run (default)
    #[default]
    Info = 2,
    /// Per-request detail
    Debug = 3,
}

impl LogLevel {
    /// Returns the uppercase string representation for log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which stage produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    PhoneLookup,
    ImageEmbedder,
    Pipeline,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::PhoneLookup => "PHONE_LOOKUP",
            Component::ImageEmbedder => "IMAGE_EMBEDDER",
            Component::Pipeline => "PIPELINE",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            Component::PhoneLookup => "phone_lookup.log",
            Component::ImageEmbedder => "image_embedder.log",
            Component::Pipeline => "pipeline.log",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A thread-safe append-only logger writing one file per component.
pub struct RunLogger {
    logs_dir: PathBuf,
    files: Mutex<Vec<(Component, File)>>,
    log_level: LogLevel,
}

impl RunLogger {
    /// Creates a logger rooted at `logs_dir`. Files are opened lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created.
    pub fn new(logs_dir: &Path, log_level: LogLevel) -> Result<Self> {
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;
        Ok(Self {
            logs_dir: logs_dir.to_path_buf(),
            files: Mutex::new(Vec::new()),
            log_level,
        })
    }

    /// Checks if a message at the given level should be logged.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level <= self.log_level
    }

    /// Appends a line to the component's log file.
    ///
    /// Format: `[YYYY-MM-DDTHH:MM:SS.mmmZ] [LEVEL] [COMPONENT] message`
    ///
    /// Write failures are swallowed; logging never interrupts a run.
    pub fn log(&self, level: LogLevel, component: Component, message: &str) {
        if !self.should_log(level) {
            return;
        }
        let Ok(mut files) = self.files.lock() else {
            return;
        };

        let index = match files.iter().position(|(c, _)| *c == component) {
            Some(i) => i,
            None => {
                let path = self.log_path(component);
                match OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => {
                        files.push((component, file));
                        files.len() - 1
                    }
                    Err(_) => return,
                }
            }
        };

        let (_, file) = &mut files[index];
        let _ = writeln!(
            file,
            "[{}] [{}] [{}] {}",
            format_timestamp(),
            level,
            component,
            message
        );
        let _ = file.flush();
    }

    /// Path of the file a component logs to.
    pub fn log_path(&self, component: Component) -> PathBuf {
        self.logs_dir.join(component.file_name())
    }
}

/// Formats the current UTC time as an ISO 8601 timestamp with milliseconds.
fn format_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
