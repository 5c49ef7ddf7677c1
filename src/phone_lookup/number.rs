//! Phone number cleanup and country-code splitting.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

pub const MIN_DIGITS: usize = 10;
pub const MAX_DIGITS: usize = 15;

fn non_dial_chars() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9+]").ok()).as_ref()
}

/// Keeps only digits and `+`.
fn strip_to_dial_chars(raw: &str) -> String {
    match non_dial_chars() {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect(),
    }
}

/// Normalizes a raw cell value to digits with the country code in front.
///
/// A leading `0` is replaced by `country_code` and a leading `+` is dropped.
/// Returns `None` unless the result has between 10 and 15 digits.
pub fn normalize_number(raw: &str, country_code: &str) -> Option<String> {
    let cleaned = strip_to_dial_chars(raw);
    let normalized = if let Some(rest) = cleaned.strip_prefix('0') {
        format!("{}{}", country_code, rest)
    } else if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else {
        cleaned
    };
    let digits: String = normalized.chars().filter(|c| c.is_ascii_digit()).collect();

    (MIN_DIGITS..=MAX_DIGITS)
        .contains(&digits.len())
        .then_some(digits)
}

/// Splits a number into `(country_code, local_number)` for the lookup API.
pub fn split_number(number: &str, country_code: &str) -> (String, String) {
    let cleaned: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    if !country_code.is_empty() {
        if let Some(local) = cleaned.strip_prefix(country_code) {
            return (country_code.to_string(), local.to_string());
        }
    }
    if let Some(local) = cleaned.strip_prefix('0') {
        return (country_code.to_string(), local.to_string());
    }
    (country_code.to_string(), cleaned.to_string())
}

/// Why a raw phone number cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NumberError {
    #[error("Empty phone number")]
    Empty,
    #[error("Phone number too short")]
    TooShort,
    #[error("Phone number too long")]
    TooLong,
}

/// Length check on the digits and `+` signs of `raw`.
pub fn validate_phone_number(raw: &str) -> Result<(), NumberError> {
    if raw.trim().is_empty() {
        return Err(NumberError::Empty);
    }
    let cleaned = strip_to_dial_chars(raw);
    if cleaned.len() < MIN_DIGITS {
        return Err(NumberError::TooShort);
    }
    if cleaned.len() > MAX_DIGITS {
        return Err(NumberError::TooLong);
    }
    Ok(())
}
