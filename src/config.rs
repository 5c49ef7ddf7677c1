use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that supplies the API key when the config has none.
pub const API_KEY_ENV: &str = "PHONE_LOOKUP_API_KEY";

/// Resolved settings consumed by the lookup and embedding stages.
///
/// Every field has a default so a partial (or missing) YAML file still
/// yields a usable configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// RapidAPI key for the lookup endpoint
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Seconds to wait between two lookups
    #[serde(default = "default_request_delay")]
    pub request_delay: f64,
    /// Rows between periodic output saves
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the `base * 2^attempt` retry backoff, in seconds
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,
    /// Per-request network timeout, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default = "default_image_dimension")]
    pub max_image_width: u32,
    #[serde(default = "default_image_dimension")]
    pub max_image_height: u32,
    /// JPEG quality, 1-100
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
    #[serde(default = "default_row_height")]
    pub row_height: f64,
    #[serde(default = "default_column_width")]
    pub column_width: f64,
    /// Keep downloaded images in memory for the rest of the run
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
    #[serde(default = "default_max_requests_per_month")]
    pub max_requests_per_month: u64,
    #[serde(default = "default_warning_threshold")]
    pub usage_warning_threshold: u64,
    #[serde(default = "default_critical_threshold")]
    pub usage_critical_threshold: u64,
}

fn default_api_host() -> String {
    "eyecon.p.rapidapi.com".to_string()
}

fn default_request_delay() -> f64 {
    1.5
}

fn default_save_interval() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> f64 {
    1.0
}

fn default_timeout() -> u64 {
    30
}

fn default_country_code() -> String {
    "92".to_string()
}

fn default_image_dimension() -> u32 {
    100
}

fn default_image_quality() -> u8 {
    85
}

fn default_row_height() -> f64 {
    75.0
}

fn default_column_width() -> f64 {
    15.0
}

fn default_enable_cache() -> bool {
    true
}

fn default_max_requests_per_month() -> u64 {
    1000
}

fn default_warning_threshold() -> u64 {
    800
}

fn default_critical_threshold() -> u64 {
    950
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_host: default_api_host(),
            request_delay: default_request_delay(),
            save_interval: default_save_interval(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            timeout: default_timeout(),
            default_country_code: default_country_code(),
            max_image_width: default_image_dimension(),
            max_image_height: default_image_dimension(),
            image_quality: default_image_quality(),
            row_height: default_row_height(),
            column_width: default_column_width(),
            enable_cache: default_enable_cache(),
            max_requests_per_month: default_max_requests_per_month(),
            usage_warning_threshold: default_warning_threshold(),
            usage_critical_threshold: default_critical_threshold(),
        }
    }
}

impl AppConfig {
    /// Loads and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise starts from defaults. The
    /// `PHONE_LOOKUP_API_KEY` environment variable fills an empty key.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        if config.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.save_interval == 0 {
            anyhow::bail!("save_interval must be at least 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.image_quality == 0 || self.image_quality > 100 {
            anyhow::bail!(
                "image_quality must be between 1 and 100, got {}",
                self.image_quality
            );
        }
        if self.max_image_width == 0 || self.max_image_height == 0 {
            anyhow::bail!("max_image_width and max_image_height must be at least 1");
        }
        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            anyhow::bail!(
                "default_country_code must be digits only, got '{}'",
                self.default_country_code
            );
        }
        if self.request_delay.is_nan() || self.request_delay < 0.0 {
            anyhow::bail!("request_delay must not be negative");
        }
        if self.retry_backoff_secs.is_nan() || self.retry_backoff_secs < 0.0 {
            anyhow::bail!("retry_backoff_secs must not be negative");
        }
        Ok(())
    }

    /// True when an API key has been configured.
    pub fn is_api_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Full URL of the search endpoint.
    pub fn api_url(&self) -> String {
        format!("https://{}/api/v1/search", self.api_host)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_delay).unwrap_or(Duration::ZERO)
    }
}
