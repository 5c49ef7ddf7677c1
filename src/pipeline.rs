//! Runs the lookup and embedding stages back to back.
//!
//! The embedding stage reads and rewrites the lookup output in place, and only
//! runs when the lookup stage completed. Each stage opens its own HTTP
//! session and drops it when it returns.

use crate::cancel::CancellationToken;
use crate::config::{AppConfig, API_KEY_ENV};
use crate::http::Connector;
use crate::image_embedder::{EmbedStats, ImageEmbedder};
use crate::observer::{Observer, RunOutcome};
use crate::phone_lookup::{LookupStats, PhoneLookup};
use crate::run_logger::{Component, LogLevel};
use crate::usage_tracker::{AlertLevel, UsageAlert, UsageTracker};
use std::path::Path;
use thiserror::Error;

/// Reasons a run is refused before any row is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("API key is not configured. Set api_key in the config file or {API_KEY_ENV}.")]
    MissingApiKey,

    #[error("Monthly API limit reached ({used}/{limit}). Pass --ignore-limit to run anyway.")]
    QuotaReached { used: u64, limit: u64 },
}

/// Checks credentials and quota. Returns the current usage alerts.
pub fn preflight(
    config: &AppConfig,
    tracker: &UsageTracker,
    ignore_limit: bool,
) -> Result<Vec<UsageAlert>, PreflightError> {
    if !config.is_api_configured() {
        return Err(PreflightError::MissingApiKey);
    }

    let used = tracker.get_current_month_usage();
    if used >= config.max_requests_per_month {
        if !ignore_limit {
            return Err(PreflightError::QuotaReached {
                used,
                limit: config.max_requests_per_month,
            });
        }
        tracing::warn!(
            used,
            limit = config.max_requests_per_month,
            "monthly limit reached, continuing because the limit is ignored"
        );
    }

    Ok(tracker.get_usage_alerts(
        config.usage_warning_threshold,
        config.usage_critical_threshold,
    ))
}

/// Outcome and counters of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport<S> {
    pub outcome: RunOutcome,
    pub stats: S,
}

/// Outcome of each stage of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub lookup: StageReport<LookupStats>,
    /// `None` when the lookup stage did not complete
    pub embed: Option<StageReport<EmbedStats>>,
}

impl PipelineOutcome {
    /// The last stage that ran decides the overall outcome.
    pub fn overall(&self) -> &RunOutcome {
        self.embed
            .as_ref()
            .map_or(&self.lookup.outcome, |embed| &embed.outcome)
    }
}

/// Shared wiring for the two stages.
pub struct Pipeline<'a> {
    pub config: &'a AppConfig,
    pub connector: &'a dyn Connector,
    pub observer: &'a dyn Observer,
    pub cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    /// Runs preflight, then the lookup stage alone.
    pub fn lookup(
        &self,
        tracker: &mut UsageTracker,
        input: &Path,
        output: &Path,
        ignore_limit: bool,
    ) -> StageReport<LookupStats> {
        if let Err(outcome) = self.check(tracker, ignore_limit) {
            return StageReport {
                outcome,
                stats: LookupStats::default(),
            };
        }
        self.run_lookup(tracker, input, output)
    }

    /// Runs the embedding stage alone.
    pub fn embed(&self, input: &Path, output: &Path) -> StageReport<EmbedStats> {
        self.observer.stage_started(Component::ImageEmbedder);
        let http = self.connector.connect();
        let mut embedder =
            ImageEmbedder::new(self.config, http.as_ref(), self.observer, self.cancel.clone());
        let outcome = embedder.run(input, output);
        let stats = embedder.stats().clone();
        StageReport { outcome, stats }
    }

    /// Runs preflight, the lookup into `output`, then embedding over `output`.
    pub fn run(
        &self,
        tracker: &mut UsageTracker,
        input: &Path,
        output: &Path,
        ignore_limit: bool,
    ) -> PipelineOutcome {
        if let Err(outcome) = self.check(tracker, ignore_limit) {
            return PipelineOutcome {
                lookup: StageReport {
                    outcome,
                    stats: LookupStats::default(),
                },
                embed: None,
            };
        }

        self.observer.log(LogLevel::Info, "=== PHONE LOOKUP STARTED ===");
        let lookup = self.run_lookup(tracker, input, output);
        if !lookup.outcome.is_completed() || self.cancel.is_cancelled() {
            self.observer.status("Phone lookup stopped or failed");
            return PipelineOutcome {
                lookup,
                embed: None,
            };
        }

        self.observer.log(LogLevel::Info, "=== IMAGE EMBEDDING STARTED ===");
        let embed = self.embed(output, output);
        if embed.outcome.is_completed() {
            self.observer.status("Processing complete!");
            self.observer.log(LogLevel::Info, "=== PROCESSING COMPLETE ===");
        }
        PipelineOutcome {
            lookup,
            embed: Some(embed),
        }
    }

    fn run_lookup(
        &self,
        tracker: &mut UsageTracker,
        input: &Path,
        output: &Path,
    ) -> StageReport<LookupStats> {
        self.observer.stage_started(Component::PhoneLookup);
        let http = self.connector.connect();
        let mut lookup = PhoneLookup::new(
            self.config,
            http.as_ref(),
            tracker,
            self.observer,
            self.cancel.clone(),
        );
        let outcome = lookup.run(input, output);
        let stats = lookup.stats().clone();
        StageReport { outcome, stats }
    }

    /// Preflight with its findings reported to the observer.
    fn check(&self, tracker: &UsageTracker, ignore_limit: bool) -> Result<(), RunOutcome> {
        self.observer.stage_started(Component::Pipeline);
        match preflight(self.config, tracker, ignore_limit) {
            Ok(alerts) => {
                for alert in alerts {
                    let level = match alert.level {
                        AlertLevel::Info => LogLevel::Info,
                        AlertLevel::Warning | AlertLevel::Critical => LogLevel::Warn,
                    };
                    self.observer.log(level, &alert.message);
                }
                self.observer.usage(&tracker.get_usage_stats());
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.observer.log(LogLevel::Error, &message);
                self.observer.status(&message);
                Err(RunOutcome::Failed(message))
            }
        }
    }
}
