//! Persistent API request accounting.
//!
//! [`UsageTracker`] owns the on-disk usage record and rewrites it after every
//! mutation. Callers hold the tracker directly and pass it where it is needed;
//! there is no process-wide instance.

pub mod stats;
pub mod types;

pub use stats::{AlertLevel, TrendPoint, UsageAlert, UsageStats, DEFAULT_TREND_MONTHS};
pub use types::{MonthlyUsage, ResetEvent, UsageRecord};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use types::FullResetTag;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the machine.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Timestamp layout used throughout the usage record.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Rejects anything that is not a real `YYYY-MM` month.
pub fn validate_month_key(month: &str) -> Result<()> {
    let valid = month.len() == 7
        && chrono::NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").is_ok();
    if !valid {
        anyhow::bail!("Invalid month '{}', expected YYYY-MM", month);
    }
    Ok(())
}

pub struct UsageTracker {
    storage_file: PathBuf,
    /// Month the tracker last wrote to, used for rollover detection
    current_month: String,
    record: UsageRecord,
    clock: Box<dyn Clock>,
}

impl UsageTracker {
    /// Opens the record at `storage_file` using the system clock.
    pub fn open(storage_file: impl Into<PathBuf>) -> Self {
        Self::with_clock(storage_file, Box::new(SystemClock))
    }

    /// Opens the record with an explicit clock.
    ///
    /// A missing or unreadable file starts a fresh record rather than failing.
    pub fn with_clock(storage_file: impl Into<PathBuf>, clock: Box<dyn Clock>) -> Self {
        let storage_file = storage_file.into();
        let now = clock.now();
        let record = load_record(&storage_file)
            .unwrap_or_else(|| UsageRecord::new(&format_timestamp(now)));

        let mut tracker = Self {
            storage_file,
            current_month: stats::month_key(now.date()),
            record,
            clock,
        };
        tracker.ensure_current_month();
        tracker
    }

    pub fn storage_file(&self) -> &Path {
        &self.storage_file
    }

    #[cfg(test)]
    pub fn record(&self) -> &UsageRecord {
        &self.record
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn live_month(&self) -> String {
        stats::month_key(self.now().date())
    }

    fn fresh_month(&self) -> MonthlyUsage {
        MonthlyUsage {
            count: 0,
            first_request: Some(format_timestamp(self.now())),
            last_request: None,
            daily_breakdown: Default::default(),
        }
    }

    fn ensure_current_month(&mut self) {
        if self.record.monthly_usage.contains_key(&self.current_month) {
            return;
        }
        let entry = self.fresh_month();
        self.record
            .monthly_usage
            .insert(self.current_month.clone(), entry);
        if let Err(e) = self.save() {
            tracing::warn!("Could not persist usage record: {:#}", e);
        }
    }

    /// Writes the record as pretty JSON, refreshing its metadata.
    fn save(&mut self) -> Result<()> {
        self.record.metadata.last_updated = format_timestamp(self.now());
        self.record.metadata.version = types::RECORD_VERSION.to_string();
        if self.record.metadata.created.is_empty() {
            self.record.metadata.created = self.record.metadata.last_updated.clone();
        }

        if let Some(parent) = self.storage_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }
        let content = serde_json::to_string_pretty(&self.record)
            .context("Failed to serialize usage record")?;
        std::fs::write(&self.storage_file, content).with_context(|| {
            format!(
                "Failed to write usage record: {}",
                self.storage_file.display()
            )
        })?;
        tracing::debug!("Usage data saved to {}", self.storage_file.display());
        Ok(())
    }

    /// Records `count` requests against the live month and today.
    ///
    /// A change of month since the last write starts a fresh month entry
    /// first. Only a failed write is reported as an error.
    pub fn increment_usage(&mut self, count: u64) -> Result<()> {
        let now = self.now();
        let live_month = stats::month_key(now.date());
        if live_month != self.current_month {
            self.current_month = live_month;
            self.ensure_current_month();
        }

        let stamp = format_timestamp(now);
        let day = stats::day_key(now.date());
        let fresh = self.fresh_month();
        let month = self
            .record
            .monthly_usage
            .entry(self.current_month.clone())
            .or_insert(fresh);
        month.count += count;
        month.last_request = Some(stamp.clone());
        *month.daily_breakdown.entry(day).or_insert(0) += count;

        let all_time = &mut self.record.all_time_stats;
        all_time.total_requests += count;
        if all_time.first_request.is_none() {
            all_time.first_request = Some(stamp.clone());
        }
        all_time.last_request = Some(stamp);

        self.save()?;
        tracing::info!(
            "Incremented usage by {}. Current month: {}",
            count,
            self.get_current_month_usage()
        );
        Ok(())
    }

    pub fn get_current_month_usage(&self) -> u64 {
        self.get_monthly_usage(&self.live_month()).unwrap_or(0)
    }

    pub fn get_previous_month_usage(&self) -> u64 {
        let key = stats::previous_month_key(self.now().date());
        self.get_monthly_usage(&key).unwrap_or(0)
    }

    pub fn get_all_time_usage(&self) -> u64 {
        self.record.all_time_stats.total_requests
    }

    /// Count for `year_month` (`YYYY-MM`), if the month has an entry.
    pub fn get_monthly_usage(&self, year_month: &str) -> Option<u64> {
        self.record.monthly_usage.get(year_month).map(|m| m.count)
    }

    pub fn get_current_month_daily_breakdown(&self) -> std::collections::BTreeMap<String, u64> {
        self.record
            .monthly_usage
            .get(&self.live_month())
            .map(|m| m.daily_breakdown.clone())
            .unwrap_or_default()
    }

    pub fn get_usage_trend(&self, months: usize) -> Vec<TrendPoint> {
        stats::usage_trend(&self.record, self.now().date(), months)
    }

    pub fn get_usage_stats(&self) -> UsageStats {
        stats::compute_stats(&self.record, self.now().date())
    }

    pub fn get_usage_alerts(&self, warning_threshold: u64, critical_threshold: u64) -> Vec<UsageAlert> {
        stats::compute_alerts(
            &self.get_usage_stats(),
            warning_threshold,
            critical_threshold,
        )
    }

    /// Months with an entry, oldest first.
    pub fn get_available_months(&self) -> Vec<String> {
        self.record.monthly_usage.keys().cloned().collect()
    }

    /// Zeroes one month (the live month when `month` is `None`) and logs the
    /// cleared count in the reset history. The all-time total is kept.
    pub fn reset_monthly_usage(&mut self, month: Option<&str>) -> Result<()> {
        let key = match month {
            Some(m) => {
                validate_month_key(m)?;
                m.to_string()
            }
            None => self.live_month(),
        };
        let Some(previous) = self.record.monthly_usage.get(&key).map(|m| m.count) else {
            anyhow::bail!("No usage recorded for {}", key);
        };

        let reset_at = format_timestamp(self.now());
        self.record.reset_history.push(ResetEvent::Month {
            month: key.clone(),
            previous_count: previous,
            reset_at,
        });
        let fresh = self.fresh_month();
        self.record.monthly_usage.insert(key.clone(), fresh);

        self.save()?;
        tracing::info!("Reset usage counter for {}", key);
        Ok(())
    }

    pub fn reset_current_month(&mut self) -> Result<()> {
        self.reset_monthly_usage(None)
    }

    /// Clears every counter and records the previous all-time total.
    pub fn reset_all_usage(&mut self) -> Result<()> {
        let now = format_timestamp(self.now());
        let previous_total = self.record.all_time_stats.total_requests;
        let mut history = std::mem::take(&mut self.record.reset_history);
        history.push(ResetEvent::Full {
            kind: FullResetTag::FullReset,
            previous_total,
            reset_at: now.clone(),
        });

        self.record = UsageRecord::new(&now);
        self.record.reset_history = history;
        self.current_month = self.live_month();
        let fresh = self.fresh_month();
        self.record
            .monthly_usage
            .insert(self.current_month.clone(), fresh);

        self.save()?;
        tracing::warn!("All usage data has been reset");
        Ok(())
    }

    /// Overwrites a month's count, moving the all-time total by the same
    /// difference.
    pub fn set_usage_count(&mut self, count: u64, month: Option<&str>) -> Result<()> {
        let key = self.target_month(month)?;
        let fresh = self.fresh_month();
        let entry = self.record.monthly_usage.entry(key.clone()).or_insert(fresh);
        let previous = entry.count;
        entry.count = count;
        self.shift_all_time(previous, count);

        self.save()?;
        tracing::info!("Set usage for {} to {} (was {})", key, count, previous);
        Ok(())
    }

    /// Adds a signed amount to a month's count. The month never drops below
    /// zero and the all-time total moves by the amount actually applied.
    pub fn add_usage(&mut self, delta: i64, month: Option<&str>) -> Result<()> {
        let key = self.target_month(month)?;
        let fresh = self.fresh_month();
        let entry = self.record.monthly_usage.entry(key.clone()).or_insert(fresh);
        let previous = entry.count;
        let updated = if delta >= 0 {
            previous.saturating_add(delta.unsigned_abs())
        } else {
            previous.saturating_sub(delta.unsigned_abs())
        };
        entry.count = updated;
        self.shift_all_time(previous, updated);

        self.save()?;
        tracing::info!("Adjusted usage for {} by {}: now {}", key, delta, updated);
        Ok(())
    }

    fn target_month(&self, month: Option<&str>) -> Result<String> {
        match month {
            Some(m) => {
                validate_month_key(m)?;
                Ok(m.to_string())
            }
            None => Ok(self.live_month()),
        }
    }

    fn shift_all_time(&mut self, from: u64, to: u64) {
        let total = &mut self.record.all_time_stats.total_requests;
        *total = if to >= from {
            total.saturating_add(to - from)
        } else {
            total.saturating_sub(from - to)
        };
    }

    /// Writes a copy of the record to `path`.
    pub fn export_usage_data(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.record)
            .context("Failed to serialize usage record")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write export file: {}", path.display()))?;
        tracing::info!("Usage data exported to {}", path.display());
        Ok(())
    }

    /// Replaces the record with the one stored at `path` and persists it.
    pub fn import_usage_data(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read import file: {}", path.display()))?;
        let imported: UsageRecord = serde_json::from_str(&content)
            .with_context(|| format!("Invalid usage data format in {}", path.display()))?;
        if imported.all_time_stats.total_requests < imported.monthly_total() {
            tracing::warn!(
                all_time = imported.all_time_stats.total_requests,
                monthly = imported.monthly_total(),
                "imported all-time total is below the sum of its months"
            );
        }
        self.record = imported;
        self.save()?;
        tracing::info!("Usage data imported from {}", path.display());
        Ok(())
    }
}

impl std::fmt::Display for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UsageTracker(current_month={}, usage={})",
            self.live_month(),
            self.get_current_month_usage()
        )
    }
}

fn load_record(path: &Path) -> Option<UsageRecord> {
    if !path.exists() {
        return None;
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from));
    match parsed {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(
                "Could not load usage record {}, starting fresh: {}",
                path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tests;
