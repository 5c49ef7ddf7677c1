//! Derived usage statistics and quota alerts.
//!
//! Everything here is a pure function of a [`UsageRecord`] and a calendar
//! date, which keeps month arithmetic testable without a clock.

use super::types::UsageRecord;
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Projected monthly usage above this raises an info alert.
pub const PROJECTION_ALERT_CEILING: u64 = 1000;

/// Distance between two samples of the usage trend.
const TREND_STEP_DAYS: u64 = 30;

/// Months covered by [`UsageStats::usage_trend`].
pub const DEFAULT_TREND_MONTHS: usize = 6;

/// Snapshot of usage for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub current_month: String,
    pub current_month_usage: u64,
    pub previous_month_usage: u64,
    pub all_time_usage: u64,
    pub daily_average: f64,
    pub projected_monthly: u64,
    pub usage_change_percent: f64,
    pub daily_breakdown: BTreeMap<String, u64>,
    pub usage_trend: Vec<TrendPoint>,
    pub first_request: Option<String>,
    pub last_request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub month: String,
    pub usage: u64,
    /// e.g. `March 2025`
    pub month_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    Warning,
    Info,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageAlert {
    pub level: AlertLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_usage: Option<u64>,
}

/// `YYYY-MM` key of the month containing `date`.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// `YYYY-MM-DD` key of `date`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Key of the calendar month before the one containing `date`.
pub fn previous_month_key(date: NaiveDate) -> String {
    // Stepping back day-of-month days always lands on the previous month's last day.
    let last_of_previous = date
        .checked_sub_days(Days::new(u64::from(date.day())))
        .unwrap_or(date);
    month_key(last_of_previous)
}

/// Number of days in the month containing `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn month_count(record: &UsageRecord, key: &str) -> u64 {
    record.monthly_usage.get(key).map(|m| m.count).unwrap_or(0)
}

/// Samples the last `months` months by stepping back 30 days at a time,
/// oldest first.
///
/// Thirty-day steps can skip or repeat a calendar month near month ends.
pub fn usage_trend(record: &UsageRecord, today: NaiveDate, months: usize) -> Vec<TrendPoint> {
    let mut trend: Vec<TrendPoint> = (0..months)
        .filter_map(|i| today.checked_sub_days(Days::new(TREND_STEP_DAYS * i as u64)))
        .map(|date| {
            let month = month_key(date);
            TrendPoint {
                usage: month_count(record, &month),
                month_name: date.format("%B %Y").to_string(),
                month,
            }
        })
        .collect();
    trend.reverse();
    trend
}

/// Percentage change from `previous` to `current`, one decimal place.
pub fn change_percent(current: u64, previous: u64) -> f64 {
    if previous > 0 {
        round_to(
            (current as f64 - previous as f64) / previous as f64 * 100.0,
            1,
        )
    } else if current > 0 {
        100.0
    } else {
        0.0
    }
}

/// Full statistics as of `today`.
pub fn compute_stats(record: &UsageRecord, today: NaiveDate) -> UsageStats {
    let current_month = month_key(today);
    let current = record.monthly_usage.get(&current_month);
    let current_usage = current.map(|m| m.count).unwrap_or(0);
    let previous_usage = month_count(record, &previous_month_key(today));

    let day_of_month = f64::from(today.day().max(1));
    let raw_average = current_usage as f64 / day_of_month;
    let projected_monthly = (raw_average * f64::from(days_in_month(today))) as u64;

    UsageStats {
        current_month_usage: current_usage,
        previous_month_usage: previous_usage,
        all_time_usage: record.all_time_stats.total_requests,
        daily_average: round_to(raw_average, 2),
        projected_monthly,
        usage_change_percent: change_percent(current_usage, previous_usage),
        daily_breakdown: current
            .map(|m| m.daily_breakdown.clone())
            .unwrap_or_default(),
        usage_trend: usage_trend(record, today, DEFAULT_TREND_MONTHS),
        first_request: record.all_time_stats.first_request.clone(),
        last_request: record.all_time_stats.last_request.clone(),
        current_month,
    }
}

/// Alerts for the current month. A critical alert replaces the warning.
pub fn compute_alerts(
    stats: &UsageStats,
    warning_threshold: u64,
    critical_threshold: u64,
) -> Vec<UsageAlert> {
    let mut alerts = Vec::new();
    let current = stats.current_month_usage;

    if current >= critical_threshold {
        alerts.push(UsageAlert {
            level: AlertLevel::Critical,
            message: format!(
                "Critical: Monthly usage ({}) exceeds critical threshold ({})",
                current, critical_threshold
            ),
            current_usage: Some(current),
            threshold: Some(critical_threshold),
            projected_usage: None,
        });
    } else if current >= warning_threshold {
        alerts.push(UsageAlert {
            level: AlertLevel::Warning,
            message: format!(
                "Warning: Monthly usage ({}) exceeds warning threshold ({})",
                current, warning_threshold
            ),
            current_usage: Some(current),
            threshold: Some(warning_threshold),
            projected_usage: None,
        });
    }

    if stats.projected_monthly > PROJECTION_ALERT_CEILING {
        alerts.push(UsageAlert {
            level: AlertLevel::Info,
            message: format!(
                "Projected monthly usage: {} requests",
                stats.projected_monthly
            ),
            current_usage: None,
            threshold: None,
            projected_usage: Some(stats.projected_monthly),
        });
    }

    alerts
}

#[cfg(test)]
#[path = "tests/stats_tests.rs"]
mod tests;
