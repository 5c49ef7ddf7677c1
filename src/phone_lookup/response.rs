//! Lookup results and decoding of the search API's JSON body.

use serde_json::Value;
use std::fmt;

/// Outcome of one lookup, rendered into the `Lookup_Status` column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LookupStatus {
    #[default]
    Unknown,
    Success,
    /// The number was too short to send
    InvalidFormat,
    /// The API answered with `status: false` and this message
    ApiRejected(String),
    /// Every retry attempt failed
    RetriesExhausted,
    /// Every retry attempt failed and the last one timed out
    Timeout,
    InvalidJson,
}

impl LookupStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, LookupStatus::Success)
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStatus::Unknown => f.write_str("Unknown"),
            LookupStatus::Success => f.write_str("Success"),
            LookupStatus::InvalidFormat => f.write_str("Invalid format"),
            LookupStatus::ApiRejected(message) => write!(f, "API Error: {}", message),
            LookupStatus::RetriesExhausted => f.write_str("API Error"),
            LookupStatus::Timeout => f.write_str("Error: timeout"),
            LookupStatus::InvalidJson => f.write_str("Error: Invalid JSON response"),
        }
    }
}

/// Everything one lookup contributes to its output row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupResult {
    pub status: LookupStatus,
    pub full_name: String,
    pub other_names: Vec<String>,
    pub image_urls: Vec<String>,
    pub base64_images: Vec<String>,
    pub error_message: String,
    pub timestamp: String,
}

impl LookupResult {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            ..Self::default()
        }
    }

    pub fn failed(timestamp: impl Into<String>, status: LookupStatus, message: &str) -> Self {
        Self {
            status,
            error_message: message.to_string(),
            ..Self::new(timestamp)
        }
    }

    /// Values for the `Name_N` columns: the full name first, then the
    /// alternate names.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.other_names.len() + 1);
        if !self.full_name.is_empty() {
            names.push(self.full_name.clone());
        }
        names.extend(self.other_names.iter().cloned());
        names
    }
}

/// Fields pulled from the `data` payload of a successful response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactData {
    pub full_name: String,
    pub other_names: Vec<String>,
    pub image_urls: Vec<String>,
    pub base64_images: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric rank of a picture size key; non-numeric keys rank lowest.
fn size_rank(key: &str) -> u64 {
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
        key.parse().unwrap_or(u64::MAX)
    } else {
        0
    }
}

/// URL of the largest picture not already collected.
fn largest_new_picture<'a>(
    pictures: &'a serde_json::Map<String, Value>,
    seen: &[String],
) -> Option<&'a str> {
    let mut sizes: Vec<(&String, &Value)> = pictures.iter().collect();
    sizes.sort_by_key(|(key, _)| std::cmp::Reverse(size_rank(key)));
    sizes
        .into_iter()
        .filter_map(|(_, url)| url.as_str())
        .find(|url| !url.is_empty() && !seen.iter().any(|s| s == url))
}

/// Collects contact data from `data`, which may be one object or a list.
pub fn extract_contact_data(data: &Value) -> ContactData {
    let entries: Vec<&Value> = match data {
        Value::Object(_) => vec![data],
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    let mut contact = ContactData::default();
    for entry in entries {
        if let Some(name) = entry.get("fullName").and_then(Value::as_str) {
            if !name.is_empty() {
                contact.full_name = name.to_string();
            }
        }

        if let Some(others) = entry.get("otherNames").and_then(Value::as_array) {
            for other in others {
                let name = match other {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(o) => o.get("name").and_then(Value::as_str),
                    _ => None,
                };
                if let Some(name) = name {
                    push_unique(&mut contact.other_names, name);
                }
            }
        }

        if let Some(image) = entry.get("image").and_then(Value::as_str) {
            push_unique(&mut contact.image_urls, image);
        }

        if let Some(images) = entry.get("images").and_then(Value::as_array) {
            for image in images {
                let Some(pictures) = image.get("pictures").and_then(Value::as_object) else {
                    continue;
                };
                if let Some(url) = largest_new_picture(pictures, &contact.image_urls) {
                    let url = url.to_string();
                    contact.image_urls.push(url);
                }
            }
        }

        if let Some(b64) = entry.get("b64").and_then(Value::as_str) {
            push_unique(&mut contact.base64_images, b64);
        }
    }
    contact
}

/// Turns a response body into a lookup result stamped with `timestamp`.
pub fn interpret_response(body: &[u8], timestamp: &str) -> LookupResult {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            return LookupResult::failed(
                timestamp,
                LookupStatus::InvalidJson,
                "Invalid JSON response from API",
            )
        }
    };

    if !parsed.get("status").is_some_and(is_truthy) {
        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return LookupResult {
            status: LookupStatus::ApiRejected(message.to_string()),
            ..LookupResult::new(timestamp)
        };
    }

    let contact = parsed
        .get("data")
        .map(extract_contact_data)
        .unwrap_or_default();
    LookupResult {
        status: LookupStatus::Success,
        full_name: contact.full_name,
        other_names: contact.other_names,
        image_urls: contact.image_urls,
        base64_images: contact.base64_images,
        error_message: String::new(),
        timestamp: timestamp.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/response_tests.rs"]
mod tests;
