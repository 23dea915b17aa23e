//! Event sources: JSON lines files, channel exclusion and conversion totals.

use chrono::{Duration, TimeZone, Utc};
use markov_attribution_core::{
    counter::count_transitions,
    error::AttrError,
    event::TouchEvent,
    source::{
        write_json_lines, ConversionTotal, DistinctConverters, EventSource, ExcludeStates,
        FixedConversionTotal, JsonLinesEventSource, MemoryEventSource,
    },
    types::{CONVERSION, NO_CONVERSION, START},
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn ev(customer: &str, minute: i64, state: &str) -> TouchEvent {
    let epoch = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();
    TouchEvent::new(customer, epoch + Duration::minutes(minute), state)
}

fn sample() -> Vec<TouchEvent> {
    vec![
        ev("c1", 0, "TV"),
        ev("c1", 10, "Retargeting"),
        ev("c1", 20, CONVERSION),
        ev("c2", 0, "Retargeting"),
        ev("c3", 0, "TV"),
        ev("c3", 5, CONVERSION),
        ev("c3", 9, CONVERSION),
    ]
}

fn collect<S: EventSource>(source: &S) -> Vec<TouchEvent> {
    source
        .events()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

// ── JSON lines ────────────────────────────────────────────────────────────────

#[test]
fn json_lines_replay_what_was_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("touches.jsonl");

    let written = write_json_lines(&path, &sample()).unwrap();
    assert_eq!(written, 7);

    let source = JsonLinesEventSource::new(&path);
    assert_eq!(collect(&source), sample());
    assert_eq!(collect(&source), sample(), "second pass must replay the stream");
}

#[test]
fn json_lines_skip_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hand.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"customer_id":"c9","timestamp":"2024-02-10T12:00:00Z","state":"TV"}"#,
            "\n\n",
            r#"{"customer_id":"c9","timestamp":"2024-02-10T12:30:00Z","state":"Conversion"}"#,
            "\n   \n",
        ),
    )
    .unwrap();

    let events = collect(&JsonLinesEventSource::new(&path));
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].state, CONVERSION);
    assert_eq!(events[1].timestamp, ev("c9", 30, CONVERSION).timestamp);
}

#[test]
fn malformed_line_surfaces_as_serialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    std::fs::write(&path, "{\"customer_id\": \"c1\"}\n").unwrap();

    let err = count_transitions(&JsonLinesEventSource::new(&path)).unwrap_err();
    assert!(matches!(err, AttrError::Serialization(_)), "got {err:?}");
}

#[test]
fn missing_file_is_reported_with_its_path() {
    let source = JsonLinesEventSource::new("/nonexistent/touches.jsonl");
    let err = source.events().err().expect("open must fail");
    assert!(err.to_string().contains("/nonexistent/touches.jsonl"), "{err}");
}

// ── Channel exclusion ─────────────────────────────────────────────────────────

#[test]
fn excluding_a_channel_joins_its_neighbours() {
    let source = ExcludeStates::new(MemoryEventSource::new(sample()), ["Retargeting"]);
    let counted = count_transitions(&source).unwrap();
    let c = &counted.counts;

    assert_eq!(c.get("TV", CONVERSION), 2, "c1 now goes TV → Conversion");
    assert_eq!(c.get(START, "Retargeting"), 0);
    assert!(!counted.vocabulary.contains("Retargeting"));
    assert_eq!(counted.customers, 2, "c2 had only Retargeting events");
    assert_eq!(c.get(START, NO_CONVERSION), 0);
}

// ── Conversion totals ─────────────────────────────────────────────────────────

#[test]
fn distinct_converters_count_each_customer_once() {
    let source = MemoryEventSource::new(sample());
    let total = DistinctConverters(&source).total_conversions().unwrap();
    assert_eq!(total, 2, "c3 converting twice still counts once");
}

#[test]
fn fixed_total_is_passed_through() {
    assert_eq!(FixedConversionTotal(1_234).total_conversions().unwrap(), 1_234);
}
