//! Persisted shape of the API usage record (`api_usage.json`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into `metadata.version`.
pub const RECORD_VERSION: &str = "1.0.0";

/// The whole usage document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub metadata: UsageMetadata,
    /// Keyed by `YYYY-MM`
    pub monthly_usage: BTreeMap<String, MonthlyUsage>,
    pub all_time_stats: AllTimeStats,
    /// Append-only log of resets, absent until the first reset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reset_history: Vec<ResetEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub version: String,
    pub created: String,
    pub last_updated: String,
}

/// Counters for one calendar month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub count: u64,
    pub first_request: Option<String>,
    pub last_request: Option<String>,
    /// Keyed by `YYYY-MM-DD`
    #[serde(default)]
    pub daily_breakdown: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllTimeStats {
    pub total_requests: u64,
    pub first_request: Option<String>,
    pub last_request: Option<String>,
}

/// Marker serialized as `"type": "full_reset"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullResetTag {
    FullReset,
}

/// One entry of `reset_history`.
///
/// Month resets carry no `type` field, so the enum is untagged and the
/// full-reset variant is matched first on its `type` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResetEvent {
    Full {
        #[serde(rename = "type")]
        kind: FullResetTag,
        previous_total: u64,
        reset_at: String,
    },
    Month {
        month: String,
        previous_count: u64,
        reset_at: String,
    },
}

impl UsageRecord {
    /// Fresh document stamped with `now`.
    pub fn new(now: &str) -> Self {
        Self {
            metadata: UsageMetadata {
                version: RECORD_VERSION.to_string(),
                created: now.to_string(),
                last_updated: now.to_string(),
            },
            monthly_usage: BTreeMap::new(),
            all_time_stats: AllTimeStats::default(),
            reset_history: Vec::new(),
        }
    }

    /// Sum of every month's count.
    pub fn monthly_total(&self) -> u64 {
        self.monthly_usage.values().map(|m| m.count).sum()
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
