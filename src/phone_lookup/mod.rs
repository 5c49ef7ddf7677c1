//! Phone number lookup stage.
//!
//! Reads the `Number` column of an input workbook, queries the search API for
//! each valid number in order, and writes a wide-format result workbook.
//! Rows never fail the run; only loading the input or the final save can.

pub mod number;
pub mod response;
pub mod table;

pub use number::{normalize_number, split_number, validate_phone_number, NumberError};
pub use response::{interpret_response, LookupResult, LookupStatus};
pub use table::{FamilyWidths, OutputTable};

use crate::cancel::CancellationToken;
use crate::config::AppConfig;
use crate::http::{HttpClient, HttpError};
use crate::observer::{Observer, RunOutcome};
use crate::run_logger::LogLevel;
use crate::sheet::{self, SaveError, Table};
use crate::usage_tracker::{self, UsageTracker};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Where a lookup run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupPhase {
    #[default]
    Idle,
    Loading,
    Processing,
    Stopping,
    Saving,
    Done,
    Failed,
}

/// Counters for the last run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub total: usize,
    pub processed: usize,
    pub successes: usize,
    /// Rows whose status is anything but `Success`
    pub errors: usize,
    pub widths: FamilyWidths,
}

impl std::fmt::Display for LookupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} numbers looked up, {} found, {} errors",
            self.processed, self.total, self.successes, self.errors
        )
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Input file must contain a 'Number' column")]
    MissingNumberColumn,
    #[error("Error loading input file: {0:#}")]
    Read(anyhow::Error),
}

/// Input rows that survived number normalization.
pub struct InputBatch {
    pub table: Table,
    /// Input row index and normalized number, in input order
    pub numbers: Vec<(usize, String)>,
}

/// Reads `path` and normalizes its `Number` column. Rows whose number does
/// not normalize are left out.
pub fn load_input(path: &Path, country_code: &str) -> Result<InputBatch, LoadError> {
    let table = sheet::read_table(path).map_err(LoadError::Read)?;
    let column = table
        .column_index(table::NUMBER_COLUMN)
        .ok_or(LoadError::MissingNumberColumn)?;

    let numbers = (0..table.len())
        .filter_map(|row| {
            let raw = table.cell(row, column).to_string();
            normalize_number(raw.trim(), country_code).map(|n| (row, n))
        })
        .collect();
    Ok(InputBatch { table, numbers })
}

enum Fetch {
    Body(Vec<u8>),
    Exhausted(HttpError),
    Cancelled,
}

fn timestamp_now() -> String {
    usage_tracker::format_timestamp(chrono::Local::now().naive_local())
}

pub struct PhoneLookup<'a> {
    config: &'a AppConfig,
    http: &'a dyn HttpClient,
    tracker: &'a mut UsageTracker,
    observer: &'a dyn Observer,
    cancel: CancellationToken,
    phase: LookupPhase,
    stats: LookupStats,
}

impl<'a> PhoneLookup<'a> {
    pub fn new(
        config: &'a AppConfig,
        http: &'a dyn HttpClient,
        tracker: &'a mut UsageTracker,
        observer: &'a dyn Observer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            http,
            tracker,
            observer,
            cancel,
            phase: LookupPhase::Idle,
            stats: LookupStats::default(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> LookupPhase {
        self.phase
    }

    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.observer.log(level, message);
    }

    fn enter(&mut self, phase: LookupPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "lookup phase change");
        self.phase = phase;
    }

    fn stop_requested(&self) -> bool {
        if self.observer.should_stop() {
            self.cancel.cancel();
        }
        self.cancel.is_cancelled()
    }

    /// Looks up every valid number of `input` and writes the results to
    /// `output`.
    pub fn run(&mut self, input: &Path, output: &Path) -> RunOutcome {
        self.stats = LookupStats::default();
        self.log(LogLevel::Info, "Starting phone lookup process");

        self.enter(LookupPhase::Loading);
        self.observer.status("Loading input file...");
        let batch = match load_input(input, &self.config.default_country_code) {
            Ok(batch) => batch,
            Err(e) => {
                self.log(LogLevel::Error, &e.to_string());
                self.observer.status(match &e {
                    LoadError::MissingNumberColumn => "Error: Missing 'Number' column",
                    LoadError::Read(_) => "Error loading input file",
                });
                self.enter(LookupPhase::Failed);
                return RunOutcome::Failed(e.to_string());
            }
        };

        let total = batch.numbers.len();
        self.stats.total = total;
        self.log(
            LogLevel::Info,
            &format!(
                "Input file loaded: {} valid phone numbers ({} rows skipped)",
                total,
                batch.table.len() - total
            ),
        );

        let mut table = OutputTable::new(&batch.table.headers);
        self.enter(LookupPhase::Processing);
        self.observer.status("Starting API lookups...");

        let mut stopped = false;
        for (idx, (row, number)) in batch.numbers.iter().enumerate() {
            if self.stop_requested() {
                stopped = true;
                break;
            }

            self.observer.progress((idx + 1) as f64 / total as f64 * 100.0);
            self.observer
                .status(&format!("Processing {}/{}: {}", idx + 1, total, number));

            let Some(result) = self.lookup_number(number) else {
                stopped = true;
                break;
            };
            self.record_result(&result);
            let input_row = batch.table.rows.get(*row).map(Vec::as_slice);
            table.push(input_row.unwrap_or_default(), result);

            if (idx + 1) % self.config.save_interval == 0 {
                match self.save(&table, output) {
                    Ok(()) => self.log(
                        LogLevel::Info,
                        &format!("Progress saved: {}/{} numbers processed", idx + 1, total),
                    ),
                    Err(e) => self.log(LogLevel::Error, &e.to_string()),
                }
            }

            if idx + 1 < total {
                self.cancel.sleep(self.config.request_delay());
            }
        }
        self.stats.widths = table.widths();

        if stopped {
            self.enter(LookupPhase::Stopping);
            self.log(LogLevel::Info, "Processing stopped by user");
            self.observer.status("Processing stopped");
            self.enter(LookupPhase::Done);
            return RunOutcome::Stopped;
        }

        self.enter(LookupPhase::Saving);
        self.observer.status("Saving results...");
        if let Err(e) = self.save(&table, output) {
            self.log(LogLevel::Error, &e.to_string());
            self.enter(LookupPhase::Failed);
            return RunOutcome::Failed(e.to_string());
        }

        let widths = self.stats.widths;
        if table.is_empty() {
            self.log(LogLevel::Warn, "No valid phone numbers found in input file");
        }
        self.log(
            LogLevel::Info,
            &format!(
                "Final results saved to: {} ({} rows)",
                output.display(),
                table.len()
            ),
        );
        self.log(
            LogLevel::Info,
            &format!(
                "Output format: {} name columns, {} image columns, {} base64 columns",
                widths.names, widths.images, widths.base64
            ),
        );
        self.log(
            LogLevel::Info,
            &format!(
                "Phone lookup completed successfully. Processed: {}, Errors: {}",
                self.stats.processed, self.stats.errors
            ),
        );
        self.observer.status("Phone lookup completed successfully");
        self.enter(LookupPhase::Done);
        RunOutcome::Completed
    }

    fn record_result(&mut self, result: &LookupResult) {
        self.stats.processed += 1;
        if !result.status.is_success() {
            self.stats.errors += 1;
            return;
        }

        self.stats.successes += 1;
        if let Err(e) = self.tracker.increment_usage(1) {
            self.log(
                LogLevel::Warn,
                &format!("Could not record API usage: {:#}", e),
            );
        }
        self.observer.usage(&self.tracker.get_usage_stats());
    }

    fn save(&self, table: &OutputTable, output: &Path) -> Result<(), SaveError> {
        let result = sheet::write_table(output, &table.to_table());
        if let Err(e) = &result {
            self.observer.status(if e.is_permission_denied() {
                "Error: Close Excel file and try again"
            } else {
                "Error saving results"
            });
        }
        result
    }

    /// Looks up one normalized number. `None` means the run was stopped
    /// while the request was being retried.
    pub fn lookup_number(&self, number: &str) -> Option<LookupResult> {
        if let Err(e @ (NumberError::Empty | NumberError::TooShort)) = validate_phone_number(number) {
            return Some(LookupResult::failed(
                timestamp_now(),
                LookupStatus::InvalidFormat,
                &e.to_string(),
            ));
        }

        let (code, local) = split_number(number, &self.config.default_country_code);
        self.log(LogLevel::Debug, &format!("API request: {}{}", code, local));

        let result = match self.fetch(&code, &local) {
            Fetch::Body(body) => interpret_response(&body, &timestamp_now()),
            Fetch::Exhausted(err) if err.is_timeout() => {
                LookupResult::failed(timestamp_now(), LookupStatus::Timeout, "Request timeout")
            }
            Fetch::Exhausted(_) => LookupResult::failed(
                timestamp_now(),
                LookupStatus::RetriesExhausted,
                "Request failed after retries",
            ),
            Fetch::Cancelled => return None,
        };

        if result.status.is_success() {
            self.log(
                LogLevel::Debug,
                &format!(
                    "  -> Found: {} names, {} images",
                    result.names().len(),
                    result.image_urls.len()
                ),
            );
        }
        Some(result)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.config.retry_backoff_secs * f64::from(2u32.saturating_pow(attempt));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn fetch(&self, code: &str, local: &str) -> Fetch {
        let url = self.config.api_url();
        let query = [("code", code), ("number", local)];
        let headers = [
            ("x-rapidapi-host", self.config.api_host.as_str()),
            ("x-rapidapi-key", self.config.api_key.as_str()),
        ];
        let max_attempts = self.config.max_retries.max(1);

        let mut attempt = 0;
        loop {
            if self.stop_requested() {
                return Fetch::Cancelled;
            }
            let err = match self.http.get(&url, &query, &headers) {
                Ok(body) => return Fetch::Body(body),
                Err(err) => err,
            };

            if attempt + 1 >= max_attempts {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "API request failed after {} attempts: {}",
                        max_attempts, err
                    ),
                );
                return Fetch::Exhausted(err);
            }

            let delay = self.backoff(attempt);
            if err.is_timeout() {
                self.log(
                    LogLevel::Warn,
                    &format!("API timeout, retrying in {:.1}s...", delay.as_secs_f64()),
                );
            } else {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "API error: {}, retrying in {:.1}s...",
                        err,
                        delay.as_secs_f64()
                    ),
                );
            }
            if self.cancel.sleep(delay) {
                return Fetch::Cancelled;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "tests/lookup_tests.rs"]
mod tests;
