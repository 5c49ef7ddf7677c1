use crate::http::HttpError;
use std::collections::HashMap;

/// In-memory URL to image bytes cache, owned by one embedding run.
#[derive(Default)]
pub struct ImageCache {
    enabled: bool,
    entries: HashMap<String, Vec<u8>>,
    hits: usize,
}

impl ImageCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    /// Returns the cached bytes for `url`, or runs `fetch` and remembers a
    /// successful result.
    pub fn get_or_fetch(
        &mut self,
        url: &str,
        fetch: impl FnOnce() -> Result<Vec<u8>, HttpError>,
    ) -> Result<Vec<u8>, HttpError> {
        if self.enabled {
            if let Some(bytes) = self.entries.get(url) {
                self.hits += 1;
                return Ok(bytes.clone());
            }
        }
        let bytes = fetch()?;
        if self.enabled {
            self.entries.insert(url.to_string(), bytes.clone());
        }
        Ok(bytes)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
