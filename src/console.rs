//! Terminal observer: progress bar, console log lines and the run log.

use crate::observer::Observer;
use crate::run_logger::{Component, LogLevel, RunLogger};
use crate::usage_tracker::UsageStats;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

const BAR_TEMPLATE: &str = "{prefix:>14.bold} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}";

pub struct ConsoleObserver {
    bar: ProgressBar,
    logger: Option<RunLogger>,
    console_level: LogLevel,
    component: Mutex<Component>,
}

impl ConsoleObserver {
    /// `logger` receives every log line regardless of `console_level`
    /// (it applies its own level).
    pub fn new(logger: Option<RunLogger>, console_level: LogLevel) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self {
            bar,
            logger,
            console_level,
            component: Mutex::new(Component::Pipeline),
        }
    }

    fn component(&self) -> Component {
        self.component
            .lock()
            .map(|c| *c)
            .unwrap_or(Component::Pipeline)
    }

    /// Prints `line` above the progress bar.
    pub fn println(&self, line: &str) {
        self.bar.suspend(|| eprintln!("{}", line));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn stage_label(component: Component) -> &'static str {
    match component {
        Component::PhoneLookup => "Phone lookup",
        Component::ImageEmbedder => "Images",
        Component::Pipeline => "Preflight",
    }
}

impl Observer for ConsoleObserver {
    fn stage_started(&self, component: Component) {
        if let Ok(mut current) = self.component.lock() {
            *current = component;
        }
        self.bar.reset();
        self.bar.set_prefix(stage_label(component));
        self.bar.set_message("");
    }

    fn log(&self, level: LogLevel, message: &str) {
        if let Some(logger) = &self.logger {
            logger.log(level, self.component(), message);
        }
        if level <= self.console_level {
            self.println(&format!("[{}] {}", level, message));
        }
    }

    fn status(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn progress(&self, percent: f64) {
        self.bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
    }

    fn usage(&self, stats: &UsageStats) {
        tracing::debug!(
            month = %stats.current_month,
            used = stats.current_month_usage,
            projected = stats.projected_monthly,
            "usage updated"
        );
    }
}
