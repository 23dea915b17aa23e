//! Matrix builder: normalisation, self-loops, canonical ordering,
//! renormalisation and graph edges.

use markov_attribution_core::{
    counter::{StateVocabulary, TransitionCounts},
    error::AttrError,
    matrix::{TransitionMatrix, ROW_SUM_TOLERANCE},
    types::{CONVERSION, NO_CONVERSION, START},
};

const TOL: f64 = 1e-12;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn worked_example_matrix() -> TransitionMatrix {
    let mut counts = TransitionCounts::new();
    counts.add(START, "TV", 3);
    counts.add(START, CONVERSION, 7);
    counts.add("TV", CONVERSION, 2);
    counts.add("TV", NO_CONVERSION, 1);
    let mut vocab = StateVocabulary::new();
    vocab.insert("TV");
    TransitionMatrix::from_counts(&counts, &vocab)
}

fn p(m: &TransitionMatrix, src: &str, dst: &str) -> f64 {
    m.probability(src, dst)
        .unwrap_or_else(|| panic!("{src} -> {dst} not in matrix"))
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ── from_counts ───────────────────────────────────────────────────────────────

#[test]
fn worked_example_probabilities() {
    let m = worked_example_matrix();
    assert!((p(&m, START, "TV") - 0.3).abs() < TOL);
    assert!((p(&m, START, CONVERSION) - 0.7).abs() < TOL);
    assert!((p(&m, "TV", CONVERSION) - 2.0 / 3.0).abs() < TOL);
    assert!((p(&m, "TV", NO_CONVERSION) - 1.0 / 3.0).abs() < TOL);
    assert_eq!(p(&m, START, NO_CONVERSION), 0.0);
}

#[test]
fn labels_are_lexicographic() {
    let m = worked_example_matrix();
    assert_eq!(m.labels(), labels(&[CONVERSION, NO_CONVERSION, START, "TV"]).as_slice());
    assert_eq!(m.index_of(START), Some(2));
    assert_eq!(m.index_of("Radio"), None);
}

#[test]
fn absorbing_states_self_loop() {
    let m = worked_example_matrix();
    assert_eq!(p(&m, CONVERSION, CONVERSION), 1.0);
    assert_eq!(p(&m, NO_CONVERSION, NO_CONVERSION), 1.0);
    assert_eq!(p(&m, CONVERSION, NO_CONVERSION), 0.0);
}

#[test]
fn counts_out_of_absorbing_states_are_ignored() {
    let mut counts = TransitionCounts::new();
    counts.add(START, "TV", 2);
    counts.add("TV", NO_CONVERSION, 1);
    counts.add("TV", CONVERSION, 1);
    counts.add(NO_CONVERSION, "TV", 5);
    counts.add(CONVERSION, START, 3);
    let m = TransitionMatrix::from_counts(&counts, &StateVocabulary::new());

    assert_eq!(p(&m, NO_CONVERSION, NO_CONVERSION), 1.0);
    assert_eq!(p(&m, NO_CONVERSION, "TV"), 0.0);
    assert_eq!(p(&m, CONVERSION, CONVERSION), 1.0);
    assert_eq!(p(&m, CONVERSION, START), 0.0);
    assert!(m.is_row_stochastic(ROW_SUM_TOLERANCE));
}

#[test]
fn state_never_seen_as_source_self_loops() {
    let mut counts = TransitionCounts::new();
    counts.add(START, "Orphan", 4);
    let m = TransitionMatrix::from_counts(&counts, &StateVocabulary::new());
    assert!(m.contains("Orphan"), "destination-only state must get a row");
    assert_eq!(p(&m, "Orphan", "Orphan"), 1.0);
    assert_eq!(p(&m, START, "Orphan"), 1.0);
}

#[test]
fn every_row_sums_to_one() {
    let mut counts = TransitionCounts::new();
    counts.add(START, "A", 17);
    counts.add(START, "B", 9);
    counts.add(START, "C", 3);
    counts.add("A", "B", 11);
    counts.add("A", CONVERSION, 5);
    counts.add("A", NO_CONVERSION, 13);
    counts.add("B", "A", 7);
    counts.add("B", "C", 1);
    counts.add("B", NO_CONVERSION, 19);
    counts.add("C", CONVERSION, 2);
    let m = TransitionMatrix::from_counts(&counts, &StateVocabulary::new());

    for (label, sum) in m.labels().iter().zip(m.row_sums()) {
        assert!(
            (sum - 1.0).abs() <= ROW_SUM_TOLERANCE,
            "row {label} sums to {sum}"
        );
    }
    assert!(m.is_row_stochastic(ROW_SUM_TOLERANCE));
}

// ── Renormalisation ───────────────────────────────────────────────────────────

#[test]
fn renormalizing_a_stochastic_matrix_is_a_no_op() {
    let m = worked_example_matrix();
    let again = m.renormalized();
    assert_eq!(again, m, "renormalization changed a row-stochastic matrix");
    assert_eq!(again.renormalized(), m);
}

#[test]
fn renormalizing_scales_rows_and_fixes_empty_ones() {
    let m = TransitionMatrix::from_rows(
        labels(&["A", "B"]),
        vec![vec![2.0, 6.0], vec![0.0, 0.0]],
    )
    .unwrap();
    let r = m.renormalized();
    assert!((p(&r, "A", "A") - 0.25).abs() < TOL);
    assert!((p(&r, "A", "B") - 0.75).abs() < TOL);
    assert_eq!(p(&r, "B", "B"), 1.0, "all-zero row becomes a self-loop");
    assert!(r.is_row_stochastic(ROW_SUM_TOLERANCE));
}

// ── from_rows ─────────────────────────────────────────────────────────────────

#[test]
fn from_rows_reorders_into_canonical_order() {
    let m = TransitionMatrix::from_rows(
        labels(&[START, "TV", CONVERSION, NO_CONVERSION]),
        vec![
            vec![0.0, 0.3, 0.7, 0.0],
            vec![0.0, 0.0, 0.6, 0.4],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ],
    )
    .unwrap();

    assert_eq!(m.labels()[0], CONVERSION);
    assert_eq!(m.labels()[3], "TV");
    assert_eq!(p(&m, START, "TV"), 0.3);
    assert_eq!(p(&m, "TV", NO_CONVERSION), 0.4);
    assert_eq!(m.values()[(3, 0)], 0.6, "TV -> Conversion lands at (3, 0)");
}

#[test]
fn from_rows_rejects_malformed_input() {
    let ragged = TransitionMatrix::from_rows(labels(&["A", "B"]), vec![vec![1.0, 0.0], vec![1.0]]);
    assert!(matches!(ragged, Err(AttrError::Validation(_))));

    let negative =
        TransitionMatrix::from_rows(labels(&["A", "B"]), vec![vec![1.5, -0.5], vec![0.0, 1.0]]);
    assert!(matches!(negative, Err(AttrError::Validation(_))));

    let duplicate =
        TransitionMatrix::from_rows(labels(&["A", "A"]), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert!(matches!(duplicate, Err(AttrError::Validation(_))));

    let short = TransitionMatrix::from_rows(labels(&["A", "B"]), vec![vec![1.0, 0.0]]);
    assert!(matches!(short, Err(AttrError::Validation(_))));
}

// ── Edges and output ──────────────────────────────────────────────────────────

#[test]
fn edges_skip_absorbing_self_loops_and_small_weights() {
    let m = worked_example_matrix();

    let all: Vec<(String, String)> = m
        .edges(0.01)
        .into_iter()
        .map(|e| (e.source, e.destination))
        .collect();
    assert_eq!(
        all,
        vec![
            (START.to_string(), CONVERSION.to_string()),
            (START.to_string(), "TV".to_string()),
            ("TV".to_string(), CONVERSION.to_string()),
            ("TV".to_string(), NO_CONVERSION.to_string()),
        ]
    );

    let strong = m.edges(0.5);
    assert_eq!(strong.len(), 2, "only 0.7 and 2/3 exceed 0.5");
    assert!(strong.iter().all(|e| e.probability > 0.5));
}

#[test]
fn matrix_serializes_as_labeled_table() {
    let m = worked_example_matrix();
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["labels"][2], START);
    assert_eq!(json["rows"].as_array().unwrap().len(), 4);
    assert_eq!(json["rows"][0][0], 1.0, "Conversion self-loop");

    let back: TransitionMatrix = serde_json::from_value(json).unwrap();
    assert_eq!(back, m);
}
