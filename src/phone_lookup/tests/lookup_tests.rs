use super::*;
use crate::sheet::{read_table, Cell};
use crate::test_support::{write_workbook, RecordingObserver, ScriptedHttp};
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

fn fast_config() -> AppConfig {
    AppConfig {
        api_key: "test-key".to_string(),
        request_delay: 0.0,
        retry_backoff_secs: 0.0,
        save_interval: 1,
        ..AppConfig::default()
    }
}

fn found(name: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "status": true,
        "data": {
            "fullName": name,
            "otherNames": [{"name": format!("{} alt", name)}],
            "image": format!("https://img.example/{}.jpg", name),
        }
    }))
    .unwrap()
}

struct Fixture {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new(numbers: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.xlsx");
        let output = dir.path().join("output.xlsx");
        let rows: Vec<Vec<&str>> = numbers.iter().map(|n| vec![*n, "note"]).collect();
        write_workbook(&input, &["Number", "Note"], &rows);
        Self { dir, input, output }
    }

    fn tracker(&self) -> UsageTracker {
        UsageTracker::open(self.dir.path().join("api_usage.json"))
    }
}

fn column_values(table: &Table, name: &str) -> Vec<String> {
    let idx = table.column_index(name).unwrap();
    (0..table.len())
        .map(|r| table.cell(r, idx).to_string())
        .collect()
}

#[test]
fn test_run_drops_invalid_numbers_and_counts_successes() {
    let fx = Fixture::new(&["03001234567", "12345", "abc123", "", "+92 300 7654321"]);
    let config = fast_config();
    let http = ScriptedHttp::new(|i, _| Ok(found(&format!("person{}", i))));
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let mut lookup = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    );
    let outcome = lookup.run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(lookup.phase(), LookupPhase::Done);
    assert_eq!(lookup.stats().processed, 2);
    assert_eq!(lookup.stats().successes, 2);
    assert_eq!(lookup.stats().widths.names, 2);
    assert_eq!(tracker.get_current_month_usage(), 2);
    assert_eq!(observer.usage_updates.lock().unwrap().clone(), vec![1, 2]);
    assert_eq!(observer.last_progress(), Some(100.0));

    let requests = http.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "https://eyecon.p.rapidapi.com/api/v1/search");
    assert_eq!(requests[0].query_value("code"), Some("92"));
    assert_eq!(requests[0].query_value("number"), Some("3001234567"));
    assert_eq!(requests[1].query_value("number"), Some("3007654321"));
    assert!(requests[0]
        .headers
        .contains(&("x-rapidapi-key".to_string(), "test-key".to_string())));

    let saved = read_table(&fx.output).unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(
        saved.headers[..4].to_vec(),
        vec!["Number", "Lookup_Status", "Name_1", "Name_2"]
    );
    assert_eq!(column_values(&saved, "Number"), vec!["03001234567", "+92 300 7654321"]);
    assert_eq!(column_values(&saved, "Lookup_Status"), vec!["Success", "Success"]);
    assert_eq!(column_values(&saved, "Name_2"), vec!["person0 alt", "person1 alt"]);
    assert_eq!(column_values(&saved, "Note"), vec!["note", "note"]);
}

#[test]
fn test_rejected_lookup_is_recorded_without_usage() {
    let fx = Fixture::new(&["03001234567"]);
    let config = fast_config();
    let http = ScriptedHttp::always(
        serde_json::to_vec(&json!({"status": false, "message": "no match"})).unwrap(),
    );
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let outcome = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    )
    .run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(tracker.get_current_month_usage(), 0);
    let saved = read_table(&fx.output).unwrap();
    assert_eq!(column_values(&saved, "Lookup_Status"), vec!["API Error: no match"]);
}

#[test]
fn test_retry_after_timeout_then_success() {
    let fx = Fixture::new(&["03001234567"]);
    let config = fast_config();
    let http = ScriptedHttp::new(|i, _| {
        if i == 0 {
            Err(HttpError::Timeout)
        } else {
            Ok(found("late"))
        }
    });
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let outcome = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    )
    .run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(http.call_count(), 2);
    assert!(observer.has_log("API timeout, retrying in 0.0s"));
    assert_eq!(tracker.get_current_month_usage(), 1);
}

#[test]
fn test_exhausted_retries_mark_row() {
    let fx = Fixture::new(&["03001234567", "03007654321"]);
    let config = fast_config();
    let http = ScriptedHttp::new(|i, _| {
        if i < 3 {
            Err(HttpError::Status(500))
        } else {
            Err(HttpError::Timeout)
        }
    });
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let mut lookup = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    );
    let outcome = lookup.run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(http.call_count(), 6);
    assert_eq!(lookup.stats().errors, 2);

    let saved = read_table(&fx.output).unwrap();
    assert_eq!(
        column_values(&saved, "Lookup_Status"),
        vec!["API Error", "Error: timeout"]
    );
    assert_eq!(
        column_values(&saved, "Error_Message"),
        vec!["Request failed after retries", "Request timeout"]
    );
    assert_eq!(tracker.get_current_month_usage(), 0);
}

#[test]
fn test_missing_number_column_fails_before_requests() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.xlsx");
    write_workbook(&input, &["Phone"], &[vec!["03001234567"]]);
    let config = fast_config();
    let http = ScriptedHttp::always(found("x"));
    let mut tracker = UsageTracker::open(dir.path().join("api_usage.json"));
    let observer = RecordingObserver::default();

    let mut lookup = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    );
    let outcome = lookup.run(&input, &dir.path().join("out.xlsx"));

    assert!(outcome.is_failed());
    assert_eq!(lookup.phase(), LookupPhase::Failed);
    assert_eq!(http.call_count(), 0);
    assert!(observer.has_status("Error: Missing 'Number' column"));
}

#[test]
fn test_missing_input_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = fast_config();
    let http = ScriptedHttp::always(found("x"));
    let mut tracker = UsageTracker::open(dir.path().join("api_usage.json"));
    let observer = RecordingObserver::default();

    let outcome = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    )
    .run(&dir.path().join("absent.xlsx"), &dir.path().join("out.xlsx"));

    assert!(outcome.is_failed());
    assert!(observer.has_status("Error loading input file"));
}

#[test]
fn test_cancel_after_second_row_keeps_two_rows() {
    let fx = Fixture::new(&[
        "03000000001",
        "03000000002",
        "03000000003",
        "03000000004",
        "03000000005",
    ]);
    let config = fast_config();
    let token = CancellationToken::new();
    let stopper = token.clone();
    let http = ScriptedHttp::new(move |i, _| {
        if i == 1 {
            stopper.cancel();
        }
        Ok(found(&format!("p{}", i)))
    });
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let mut lookup = PhoneLookup::new(&config, &http, &mut tracker, &observer, token);
    let outcome = lookup.run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(http.call_count(), 2);
    assert_eq!(lookup.stats().processed, 2);
    assert!(observer.has_status("Processing stopped"));

    let saved = read_table(&fx.output).unwrap();
    assert_eq!(
        column_values(&saved, "Number"),
        vec!["03000000001", "03000000002"]
    );
}

#[test]
fn test_stop_keeps_only_last_periodic_save() {
    let fx = Fixture::new(&[
        "03000000001",
        "03000000002",
        "03000000003",
        "03000000004",
        "03000000005",
    ]);
    let config = AppConfig {
        save_interval: 2,
        ..fast_config()
    };
    let token = CancellationToken::new();
    let stopper = token.clone();
    let http = ScriptedHttp::new(move |i, _| {
        if i == 2 {
            stopper.cancel();
        }
        Ok(found(&format!("p{}", i)))
    });
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let mut lookup = PhoneLookup::new(&config, &http, &mut tracker, &observer, token);
    let outcome = lookup.run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(http.call_count(), 3);
    assert_eq!(lookup.stats().processed, 3);
    assert!(observer.has_log("Progress saved: 2/5 numbers processed"));

    let saved = read_table(&fx.output).unwrap();
    assert_eq!(
        column_values(&saved, "Number"),
        vec!["03000000001", "03000000002"]
    );
}

#[test]
fn test_save_interval_saves_every_other_row() {
    let fx = Fixture::new(&[
        "03000000001",
        "03000000002",
        "03000000003",
        "03000000004",
        "03000000005",
    ]);
    let config = AppConfig {
        save_interval: 2,
        ..fast_config()
    };
    let http = ScriptedHttp::always(found("x"));
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let outcome = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    )
    .run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Completed);
    let saves: Vec<String> = observer
        .logs
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, m)| m.starts_with("Progress saved"))
        .map(|(_, m)| m.clone())
        .collect();
    assert_eq!(
        saves,
        vec![
            "Progress saved: 2/5 numbers processed",
            "Progress saved: 4/5 numbers processed",
        ]
    );
    assert_eq!(read_table(&fx.output).unwrap().len(), 5);
}

#[test]
fn test_observer_stop_abandons_row_in_flight() {
    let fx = Fixture::new(&["03000000001", "03000000002", "03000000003"]);
    let config = fast_config();
    let http = ScriptedHttp::always(found("x"));
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::stopping_after(3);

    let outcome = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    )
    .run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(http.call_count(), 2);
    assert_eq!(read_table(&fx.output).unwrap().len(), 2);
}

#[test]
fn test_cancel_during_backoff_skips_row() {
    let fx = Fixture::new(&["03000000001", "03000000002"]);
    let config = AppConfig {
        retry_backoff_secs: 30.0,
        ..fast_config()
    };
    let token = CancellationToken::new();
    let stopper = token.clone();
    let http = ScriptedHttp::new(move |_, _| {
        stopper.cancel();
        Err(HttpError::Transport("connection reset".to_string()))
    });
    let mut tracker = fx.tracker();
    let observer = RecordingObserver::default();

    let outcome =
        PhoneLookup::new(&config, &http, &mut tracker, &observer, token).run(&fx.input, &fx.output);

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(http.call_count(), 1);
    assert!(!fx.output.exists());
}

#[test]
fn test_lookup_number_rejects_short_number() {
    let config = fast_config();
    let http = ScriptedHttp::always(found("x"));
    let dir = TempDir::new().unwrap();
    let mut tracker = UsageTracker::open(dir.path().join("api_usage.json"));
    let observer = RecordingObserver::default();
    let lookup = PhoneLookup::new(
        &config,
        &http,
        &mut tracker,
        &observer,
        CancellationToken::new(),
    );

    let result = lookup.lookup_number("12345").unwrap();
    assert_eq!(result.status, LookupStatus::InvalidFormat);
    assert_eq!(result.error_message, "Phone number too short");
    assert_eq!(http.call_count(), 0);
}

#[test]
fn test_load_input_keeps_row_indices() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.xlsx");
    let table = Table {
        headers: vec!["Number".to_string()],
        rows: vec![
            vec![Cell::Number(3001234567.0)],
            vec![Cell::text("bad")],
            vec![Cell::text("0300-7654321")],
        ],
    };
    crate::sheet::write_table(&input, &table).unwrap();

    let batch = load_input(&input, "92").unwrap();
    assert_eq!(
        batch.numbers,
        vec![
            (0, "3001234567".to_string()),
            (2, "923007654321".to_string())
        ]
    );
}
