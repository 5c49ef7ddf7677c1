//! Fakes and fixtures shared by the stage tests.

use crate::http::{Connector, HttpClient, HttpError};
use crate::observer::Observer;
use crate::run_logger::{Component, LogLevel};
use crate::sheet::{write_table, Cell, Table};
use crate::usage_tracker::UsageStats;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Handler = dyn Fn(usize, &RecordedRequest) -> Result<Vec<u8>, HttpError> + Send + Sync;

/// HTTP client answering from a closure that sees the call index and request.
pub struct ScriptedHttp {
    handler: Box<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    sessions: Mutex<usize>,
}

impl ScriptedHttp {
    pub fn new(
        handler: impl Fn(usize, &RecordedRequest) -> Result<Vec<u8>, HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            sessions: Mutex::new(0),
        }
    }

    /// Always answers with `body`.
    pub fn always(body: Vec<u8>) -> Self {
        Self::new(move |_, _| Ok(body.clone()))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn sessions_opened(&self) -> usize {
        *self.sessions.lock().unwrap()
    }
}

/// Session handed out by [`ScriptedHttp`]; shares its script and request log.
struct ScriptedSession<'a>(&'a ScriptedHttp);

impl HttpClient for ScriptedSession<'_> {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, HttpError> {
        self.0.get(url, query, headers)
    }
}

impl Connector for ScriptedHttp {
    fn connect(&self) -> Box<dyn HttpClient + '_> {
        *self.sessions.lock().unwrap() += 1;
        Box::new(ScriptedSession(self))
    }
}

impl HttpClient for ScriptedHttp {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, HttpError> {
        let request = RecordedRequest {
            url: url.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.handler)(index, &request)
    }
}

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    pub stages: Mutex<Vec<Component>>,
    pub logs: Mutex<Vec<(LogLevel, String)>>,
    pub statuses: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<f64>>,
    pub usage_updates: Mutex<Vec<u64>>,
    /// Answer `should_stop` with true once this many progress events arrived
    pub stop_after_progress: Option<usize>,
}

impl RecordingObserver {
    pub fn stopping_after(progress_events: usize) -> Self {
        Self {
            stop_after_progress: Some(progress_events),
            ..Self::default()
        }
    }

    pub fn has_log(&self, needle: &str) -> bool {
        self.logs.lock().unwrap().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn has_status(&self, needle: &str) -> bool {
        self.statuses.lock().unwrap().iter().any(|s| s.contains(needle))
    }

    pub fn last_progress(&self) -> Option<f64> {
        self.progress.lock().unwrap().last().copied()
    }
}

impl Observer for RecordingObserver {
    fn stage_started(&self, component: Component) {
        self.stages.lock().unwrap().push(component);
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn progress(&self, percent: f64) {
        self.progress.lock().unwrap().push(percent);
    }

    fn usage(&self, stats: &UsageStats) {
        self.usage_updates
            .lock()
            .unwrap()
            .push(stats.current_month_usage);
    }

    fn should_stop(&self) -> bool {
        self.stop_after_progress
            .is_some_and(|n| self.progress.lock().unwrap().len() >= n)
    }
}

/// Writes a workbook with `headers` and text `rows`.
pub fn write_workbook(path: &Path, headers: &[&str], rows: &[Vec<&str>]) {
    let table = Table {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .iter()
            .map(|r| r.iter().map(|c| Cell::text(*c)).collect())
            .collect(),
    };
    write_table(path, &table).unwrap();
}

/// A small PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 128]));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Names of the `xl/media/` entries inside a saved xlsx.
pub fn embedded_media(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .filter(|name| name.starts_with("xl/media/"))
        .collect()
}
