//! Image embedding stage.
//!
//! Finds image URL and base64 columns in a workbook, turns every non-empty
//! cell into a thumbnail and places it over that cell in the output workbook.
//! A bad cell is logged and skipped; only loading and saving can fail the run.

pub mod cache;
pub mod codec;

pub use cache::ImageCache;
pub use codec::{decode_base64_image, validate_image_url, ImageCodec, JpegThumbnailer};

use crate::cancel::CancellationToken;
use crate::config::AppConfig;
use crate::http::HttpClient;
use crate::observer::{Observer, RunOutcome};
use crate::run_logger::LogLevel;
use crate::sheet::{self, Table};
use rust_xlsxwriter::{Image, Workbook, Worksheet, XlsxError};
use std::path::Path;

/// Rows between two progress log lines.
const LOG_EVERY_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Url,
    Base64,
}

/// Image-bearing columns of a table, by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageColumns {
    pub urls: Vec<usize>,
    pub base64: Vec<usize>,
}

impl ImageColumns {
    /// Matches `image_` for URLs and `b64_` or `base64_` for payloads,
    /// ignoring case.
    pub fn detect(headers: &[String]) -> Self {
        let mut columns = Self::default();
        for (i, header) in headers.iter().enumerate() {
            let lower = header.to_lowercase();
            if lower.starts_with("image_") {
                columns.urls.push(i);
            } else if lower.starts_with("b64_") || lower.starts_with("base64_") {
                columns.base64.push(i);
            }
        }
        columns
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.base64.is_empty()
    }

    /// Columns in processing order: URL columns first.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ImageKind)> + '_ {
        self.urls
            .iter()
            .map(|c| (*c, ImageKind::Url))
            .chain(self.base64.iter().map(|c| (*c, ImageKind::Base64)))
    }

    /// Non-blank cells across all detected columns.
    pub fn count_images(&self, table: &Table) -> usize {
        (0..table.len())
            .map(|row| {
                self.iter()
                    .filter(|(col, _)| !table.cell(row, *col).is_blank())
                    .count()
            })
            .sum()
    }
}

/// Counters for the last run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedStats {
    pub total_images: usize,
    pub embedded: usize,
    pub errors: usize,
    pub cache_hits: usize,
}

impl std::fmt::Display for EmbedStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} images embedded, {} errors, {} cache hits",
            self.embedded, self.total_images, self.errors, self.cache_hits
        )
    }
}

pub struct ImageEmbedder<'a> {
    config: &'a AppConfig,
    http: &'a dyn HttpClient,
    codec: Box<dyn ImageCodec + 'a>,
    observer: &'a dyn Observer,
    cancel: CancellationToken,
    cache: ImageCache,
    stats: EmbedStats,
}

impl<'a> ImageEmbedder<'a> {
    pub fn new(
        config: &'a AppConfig,
        http: &'a dyn HttpClient,
        observer: &'a dyn Observer,
        cancel: CancellationToken,
    ) -> Self {
        let codec = JpegThumbnailer {
            max_width: config.max_image_width,
            max_height: config.max_image_height,
            quality: config.image_quality,
        };
        Self {
            config,
            http,
            codec: Box::new(codec),
            observer,
            cancel,
            cache: ImageCache::new(config.enable_cache),
            stats: EmbedStats::default(),
        }
    }

    /// Replaces the thumbnail codec.
    #[cfg(test)]
    pub fn with_codec(mut self, codec: Box<dyn ImageCodec + 'a>) -> Self {
        self.codec = codec;
        self
    }

    pub fn stats(&self) -> &EmbedStats {
        &self.stats
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.observer.log(level, message);
    }

    fn stop_requested(&self) -> bool {
        if self.observer.should_stop() {
            self.cancel.cancel();
        }
        self.cancel.is_cancelled()
    }

    /// Embeds the images referenced by `input` into `output`.
    ///
    /// When `output` already exists its cells are kept and the images are
    /// laid over them; otherwise the output starts as a copy of `input`.
    pub fn run(&mut self, input: &Path, output: &Path) -> RunOutcome {
        self.stats = EmbedStats::default();
        self.cache = ImageCache::new(self.config.enable_cache);
        self.log(LogLevel::Info, "Starting image embedding process");

        let outcome = self.embed(input, output);

        self.stats.cache_hits = self.cache.hits();
        self.cache.clear();
        match &outcome {
            RunOutcome::Failed(_) => self.log(
                LogLevel::Info,
                &format!(
                    "Image embedding completed with issues. Processed: {}, Errors: {}",
                    self.stats.embedded, self.stats.errors
                ),
            ),
            _ => self.log(
                LogLevel::Info,
                &format!(
                    "Image embedding completed successfully. Processed: {}, Errors: {}",
                    self.stats.embedded, self.stats.errors
                ),
            ),
        }
        outcome
    }

    fn embed(&mut self, input: &Path, output: &Path) -> RunOutcome {
        self.observer.status("Loading Excel file...");
        let data = match sheet::read_table(input) {
            Ok(table) => table,
            Err(e) => {
                let message = format!("Error loading input file: {:#}", e);
                self.log(LogLevel::Error, &message);
                self.observer.status("Error loading input file");
                return RunOutcome::Failed(message);
            }
        };

        if data.is_empty() {
            self.log(LogLevel::Warn, "Input file has no data rows");
        }
        let columns = ImageColumns::detect(&data.headers);
        if columns.is_empty() {
            self.log(
                LogLevel::Warn,
                "No image or base64 columns found in input file",
            );
        }
        self.log(
            LogLevel::Info,
            &format!(
                "Input file loaded: {} rows, {} image columns, {} base64 columns",
                data.len(),
                columns.urls.len(),
                columns.base64.len()
            ),
        );
        let total = columns.count_images(&data);
        self.stats.total_images = total;
        self.log(LogLevel::Info, &format!("Total images to process: {}", total));

        self.observer.status("Preparing workbook...");
        let destination = match self.load_destination(input, output, &data) {
            Ok(table) => table,
            Err(message) => {
                self.log(LogLevel::Error, &message);
                return RunOutcome::Failed(message);
            }
        };

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        if let Err(e) = sheet::fill_worksheet(worksheet, &destination) {
            let message = format!("Error preparing workbook: {}", e);
            self.log(LogLevel::Error, &message);
            return RunOutcome::Failed(message);
        }

        // Image columns located by header name in the destination sheet.
        let targets: Vec<(usize, usize, ImageKind)> = columns
            .iter()
            .filter_map(|(col, kind)| {
                let header = data.headers.get(col)?;
                destination
                    .column_index(header)
                    .map(|dest_col| (col, dest_col, kind))
            })
            .collect();
        self.configure_layout(worksheet, data.len().max(destination.len()), &targets);

        self.observer.status("Embedding images...");
        let stopped = self.embed_rows(worksheet, &data, &targets, total);

        if stopped {
            self.log(LogLevel::Info, "Image embedding stopped by user");
        } else {
            self.observer.status("Saving workbook...");
        }
        match sheet::save_workbook(&mut workbook, output) {
            Ok(()) => {
                self.log(
                    LogLevel::Info,
                    &format!("Workbook saved successfully: {}", output.display()),
                );
            }
            Err(e) => {
                self.log(LogLevel::Error, &e.to_string());
                self.observer.status(if e.is_permission_denied() {
                    "Error: Close Excel file and try again"
                } else {
                    "Error saving workbook"
                });
                if !stopped {
                    return RunOutcome::Failed(e.to_string());
                }
            }
        }

        if stopped {
            self.observer.status("Image embedding stopped");
            RunOutcome::Stopped
        } else {
            self.observer.status("Image embedding completed successfully");
            RunOutcome::Completed
        }
    }

    fn load_destination(
        &self,
        input: &Path,
        output: &Path,
        data: &Table,
    ) -> Result<Table, String> {
        if output.exists() {
            let table = sheet::read_table(output)
                .map_err(|e| format!("Error preparing workbook: {:#}", e))?;
            self.log(
                LogLevel::Info,
                &format!("Loaded existing workbook: {}", output.display()),
            );
            Ok(table)
        } else {
            self.log(
                LogLevel::Info,
                &format!(
                    "Copied {} to create workbook: {}",
                    input.display(),
                    output.display()
                ),
            );
            Ok(data.clone())
        }
    }

    fn configure_layout(
        &self,
        worksheet: &mut Worksheet,
        rows: usize,
        targets: &[(usize, usize, ImageKind)],
    ) {
        match apply_layout(worksheet, self.config, rows, targets) {
            Ok(()) => self.log(LogLevel::Debug, "Excel layout configured successfully"),
            Err(e) => self.log(
                LogLevel::Warn,
                &format!("Error configuring Excel layout: {}", e),
            ),
        }
    }

    /// Embeds every target cell. Returns true when stopped early.
    fn embed_rows(
        &mut self,
        worksheet: &mut Worksheet,
        data: &Table,
        targets: &[(usize, usize, ImageKind)],
        total: usize,
    ) -> bool {
        for row in 0..data.len() {
            for (col, dest_col, kind) in targets {
                if self.stop_requested() {
                    return true;
                }
                let cell = data.cell(row, *col);
                if cell.is_blank() {
                    continue;
                }
                let value = cell.to_string();
                match self.embed_cell(worksheet, row, *dest_col, *kind, value.trim()) {
                    Ok(()) => self.stats.embedded += 1,
                    Err(message) => {
                        self.stats.errors += 1;
                        self.log(LogLevel::Error, &message);
                    }
                }
            }

            if total > 0 {
                let embedded = self.stats.embedded as f64;
                self.observer.progress(embedded / total as f64 * 100.0);
                self.observer.status(&format!(
                    "Embedding images... {}/{}",
                    self.stats.embedded, total
                ));
            }
            if (row + 1) % LOG_EVERY_ROWS == 0 {
                self.log(
                    LogLevel::Info,
                    &format!(
                        "Processed {} rows, {} images",
                        row + 1,
                        self.stats.embedded
                    ),
                );
            }
        }
        false
    }

    fn embed_cell(
        &mut self,
        worksheet: &mut Worksheet,
        row: usize,
        col: usize,
        kind: ImageKind,
        value: &str,
    ) -> Result<(), String> {
        let bytes = match kind {
            ImageKind::Url => {
                if !validate_image_url(value) {
                    self.log(
                        LogLevel::Debug,
                        &format!("URL has no image extension, fetching anyway: {}", value),
                    );
                }
                let http = self.http;
                self.cache
                    .get_or_fetch(value, || http.get(value, &[], &[]))
                    .map_err(|e| format!("Error downloading image from {}: {}", value, e))?
            }
            ImageKind::Base64 => decode_base64_image(value).map_err(|e| e.to_string())?,
        };

        let thumbnail = self.codec.thumbnail(&bytes).map_err(|e| match kind {
            ImageKind::Url => format!("Error embedding URL image {}: {}", value, e),
            ImageKind::Base64 => format!("Error embedding base64 image: {}", e),
        })?;

        insert_thumbnail(worksheet, row, col, &thumbnail)
            .map_err(|e| format!("Error embedding image data: {}", e))?;

        match kind {
            ImageKind::Url => self.log(LogLevel::Debug, &format!("Embedded URL image: {}", value)),
            ImageKind::Base64 => self.log(
                LogLevel::Debug,
                &format!("Embedded base64 image in row {}, column {}", row + 2, col + 1),
            ),
        }
        Ok(())
    }
}

/// Row heights for every data row and widths for the image columns.
fn apply_layout(
    worksheet: &mut Worksheet,
    config: &AppConfig,
    rows: usize,
    targets: &[(usize, usize, ImageKind)],
) -> Result<(), XlsxError> {
    for row in 0..rows {
        worksheet.set_row_height(sheet::data_row(row)?, config.row_height)?;
    }
    for (_, dest_col, _) in targets {
        worksheet.set_column_width(sheet::column(*dest_col)?, config.column_width)?;
    }
    Ok(())
}

fn insert_thumbnail(
    worksheet: &mut Worksheet,
    row: usize,
    col: usize,
    bytes: &[u8],
) -> Result<(), XlsxError> {
    let image = Image::new_from_buffer(bytes)?;
    worksheet.insert_image(sheet::data_row(row)?, sheet::column(col)?, &image)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/embedder_tests.rs"]
mod tests;
