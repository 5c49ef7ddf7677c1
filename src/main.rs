mod app_paths;
mod cancel;
mod config;
mod console;
mod http;
mod image_embedder;
mod observer;
mod phone_lookup;
mod pipeline;
mod run_logger;
mod sheet;
mod usage_tracker;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use cancel::CancellationToken;
use clap::{Parser, Subcommand};
use config::AppConfig;
use console::ConsoleObserver;
use http::UreqConnector;
use observer::RunOutcome;
use pipeline::{Pipeline, StageReport};
use run_logger::{LogLevel, RunLogger};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use usage_tracker::{UsageTracker, DEFAULT_TREND_MONTHS};

#[derive(Parser)]
#[command(name = "phone-lookup")]
#[command(about = "Look up phone numbers from a spreadsheet and embed the contact images")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Config file (defaults to <home>/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print debug lines to the console and the run log
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up every number, then embed the images into the same output
    Run {
        input: PathBuf,
        /// Defaults to <input>_processed.xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run even when the monthly limit is reached
        #[arg(long)]
        ignore_limit: bool,
    },
    /// Look up every number without embedding images
    Lookup {
        input: PathBuf,
        /// Defaults to <input>_processed.xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        ignore_limit: bool,
    },
    /// Embed images from Image_* and b64_* columns
    Embed {
        input: PathBuf,
        /// Defaults to <input>_with_images.xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect or adjust the API usage record
    Usage {
        #[command(subcommand)]
        action: UsageAction,
    },
}

#[derive(Subcommand)]
enum UsageAction {
    /// Current statistics
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Threshold and projection alerts
    Alerts,
    /// Every recorded month with its count
    Months,
    /// Reset the current month, one month, or everything
    Reset {
        /// Month as YYYY-MM
        #[arg(long, conflicts_with = "all")]
        month: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Set a month's count
    Set {
        count: u64,
        #[arg(long)]
        month: Option<String>,
    },
    /// Add to (or subtract from) a month's count
    Add {
        #[arg(allow_hyphen_values = true)]
        delta: i64,
        #[arg(long)]
        month: Option<String>,
    },
    /// Write the usage record to a file
    Export { path: PathBuf },
    /// Replace the usage record with a file's content
    Import { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => app_paths::default_config_path()?,
    };
    let config = AppConfig::load_or_default(&config_path)?;
    let mut tracker = UsageTracker::open(app_paths::usage_file_path()?);

    match cli.command {
        Command::Run {
            input,
            output,
            ignore_limit,
        } => {
            let output =
                output.unwrap_or_else(|| app_paths::sibling_output_path(&input, "_processed"));
            with_pipeline(&config, cli.verbose, |pipeline| {
                let outcome = pipeline.run(&mut tracker, &input, &output, ignore_limit);
                let mut summary = vec![format!("Lookup: {}", outcome.lookup.stats)];
                if let Some(embed) = &outcome.embed {
                    summary.push(format!("Images: {}", embed.stats));
                }
                RunSummary {
                    outcome: outcome.overall().clone(),
                    output: output.clone(),
                    summary,
                }
            })
        }
        Command::Lookup {
            input,
            output,
            ignore_limit,
        } => {
            let output =
                output.unwrap_or_else(|| app_paths::sibling_output_path(&input, "_processed"));
            with_pipeline(&config, cli.verbose, |pipeline| {
                let report = pipeline.lookup(&mut tracker, &input, &output, ignore_limit);
                RunSummary::stage("Lookup", report, &output)
            })
        }
        Command::Embed { input, output } => {
            let output =
                output.unwrap_or_else(|| app_paths::sibling_output_path(&input, "_with_images"));
            with_pipeline(&config, cli.verbose, |pipeline| {
                let report = pipeline.embed(&input, &output);
                RunSummary::stage("Images", report, &output)
            })
        }
        Command::Usage { action } => run_usage(&config, &mut tracker, action),
    }
}

/// What a command ran, where it wrote, and the stage counters to print.
struct RunSummary {
    outcome: RunOutcome,
    output: PathBuf,
    summary: Vec<String>,
}

impl RunSummary {
    fn stage<S: std::fmt::Display>(label: &str, report: StageReport<S>, output: &Path) -> Self {
        Self {
            summary: vec![format!("{}: {}", label, report.stats)],
            outcome: report.outcome,
            output: output.to_path_buf(),
        }
    }
}

/// Builds the console observer, HTTP connector and Ctrl-C handler, runs
/// `body` and turns its outcome into the process result.
fn with_pipeline(
    config: &AppConfig,
    verbose: bool,
    body: impl FnOnce(&Pipeline<'_>) -> RunSummary,
) -> Result<()> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let logger = match app_paths::logs_dir().and_then(|dir| RunLogger::new(&dir, level)) {
        Ok(logger) => Some(logger),
        Err(e) => {
            tracing::warn!("Run log disabled: {:#}", e);
            None
        }
    };
    let observer = ConsoleObserver::new(logger, level);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let connector = UreqConnector::new(config);
    let pipeline = Pipeline {
        config,
        connector: &connector,
        observer: &observer,
        cancel,
    };

    let summary = body(&pipeline);
    observer.finish();
    report(&summary)
}

fn report(run: &RunSummary) -> Result<()> {
    for line in &run.summary {
        println!("{}", line);
    }
    match &run.outcome {
        RunOutcome::Completed => {
            println!("Done. Output file: {}", run.output.display());
            Ok(())
        }
        RunOutcome::Stopped => {
            println!("Stopped. Partial results: {}", run.output.display());
            Ok(())
        }
        RunOutcome::Failed(reason) => anyhow::bail!("{}", reason),
    }
}

fn run_usage(config: &AppConfig, tracker: &mut UsageTracker, action: UsageAction) -> Result<()> {
    match action {
        UsageAction::Show { json } => {
            let stats = tracker.get_usage_stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!(
                "Month {}: {} of {} requests",
                stats.current_month, stats.current_month_usage, config.max_requests_per_month
            );
            println!("Previous month: {}", tracker.get_previous_month_usage());
            println!("All time: {}", tracker.get_all_time_usage());
            println!(
                "Daily average: {:.1}, projected this month: {}",
                stats.daily_average, stats.projected_monthly
            );
            println!("Change vs previous month: {:+.1}%", stats.usage_change_percent);
            println!("Usage file: {}", tracker.storage_file().display());
            println!("Daily:");
            for (day, count) in tracker.get_current_month_daily_breakdown() {
                println!("  {} {}", day, count);
            }
            println!("Trend:");
            for point in tracker.get_usage_trend(DEFAULT_TREND_MONTHS) {
                println!("  {:<16} {}", point.month_name, point.usage);
            }
        }
        UsageAction::Alerts => {
            let alerts = tracker.get_usage_alerts(
                config.usage_warning_threshold,
                config.usage_critical_threshold,
            );
            if alerts.is_empty() {
                println!("No alerts");
            }
            for alert in alerts {
                println!("[{}] {}", alert.level.as_str(), alert.message);
            }
        }
        UsageAction::Months => {
            for month in tracker.get_available_months() {
                let count = tracker.get_monthly_usage(&month).unwrap_or(0);
                println!("{} {}", month, count);
            }
        }
        UsageAction::Reset { month, all } => {
            if all {
                tracker.reset_all_usage()?;
                println!("All usage data reset");
            } else {
                match month {
                    Some(month) => tracker.reset_monthly_usage(Some(&month))?,
                    None => tracker.reset_current_month()?,
                }
                println!("Monthly usage reset");
            }
        }
        UsageAction::Set { count, month } => {
            tracker.set_usage_count(count, month.as_deref())?;
            println!("{}", tracker);
        }
        UsageAction::Add { delta, month } => {
            tracker.add_usage(delta, month.as_deref())?;
            println!("{}", tracker);
        }
        UsageAction::Export { path } => {
            tracker.export_usage_data(&path)?;
            println!("Exported to {}", path.display());
        }
        UsageAction::Import { path } => {
            tracker.import_usage_data(&path)?;
            println!("Imported from {}", path.display());
        }
    }
    Ok(())
}
