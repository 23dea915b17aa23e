//! Removal-effect attribution under both policies.

use markov_attribution_core::{
    absorption::AbsorptionSolver,
    counter::{count_transitions, StateVocabulary, TransitionCounts},
    error::AttrError,
    matrix::{TransitionMatrix, ROW_SUM_TOLERANCE},
    removal::{remove_channel, RemovalEffectAttributor, RemovalPolicy},
    source::MemoryEventSource,
    synth::{demo_matrix, JourneySimulator},
    types::{CONVERSION, NO_CONVERSION, START},
};

const TOL: f64 = 1e-12;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn worked_example_counts() -> TransitionCounts {
    let mut counts = TransitionCounts::new();
    counts.add(START, "TV", 3);
    counts.add(START, CONVERSION, 7);
    counts.add("TV", CONVERSION, 2);
    counts.add("TV", NO_CONVERSION, 1);
    counts
}

fn worked_example() -> TransitionMatrix {
    TransitionMatrix::from_counts(&worked_example_counts(), &StateVocabulary::new())
}

fn matrix(labels: &[&str], rows: Vec<Vec<f64>>) -> TransitionMatrix {
    TransitionMatrix::from_rows(labels.iter().map(|s| s.to_string()).collect(), rows)
        .expect("well-formed matrix")
}

/// Start→A 0.4, Start→B 0.4, Start→Conversion 0.2;
/// A→A 0.5, A→C 0.5; B→Conversion 0.5, B→No_Conversion 0.5; C→Conversion 1.
/// Deleting C leaves A looping on itself forever.
fn trap_on_deletion() -> TransitionMatrix {
    matrix(
        &[START, "A", "B", "C", CONVERSION, NO_CONVERSION],
        vec![
            vec![0.0, 0.4, 0.4, 0.0, 0.2, 0.0],
            vec![0.0, 0.5, 0.0, 0.5, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5],
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        ],
    )
}

fn synthetic_matrix() -> TransitionMatrix {
    let sim = JourneySimulator::new(demo_matrix().unwrap())
        .unwrap()
        .with_repeat_probability(0.1)
        .unwrap();
    let source = MemoryEventSource::new(sim.generate(3_000, 99));
    let counted = count_transitions(&source).unwrap();
    TransitionMatrix::from_counts(&counted.counts, &counted.vocabulary)
}

// ── Deletion ──────────────────────────────────────────────────────────────────

#[test]
fn deletion_rescales_predecessor_row() {
    let reduced = remove_channel(&worked_example(), "TV", RemovalPolicy::Deletion).unwrap();
    assert!(!reduced.contains("TV"));
    assert_eq!(reduced.probability(START, CONVERSION), Some(1.0));
    assert_eq!(reduced.probability(START, NO_CONVERSION), Some(0.0));

    let rate = AbsorptionSolver::new().conversion_probability(&reduced).unwrap();
    assert!((rate - 1.0).abs() < TOL);
}

#[test]
fn deletion_effect_is_negative_and_not_clamped() {
    let m = worked_example();
    let attributor = RemovalEffectAttributor::new(RemovalPolicy::Deletion);
    let effect = attributor.channel_effect(&m, "TV", 0.9).unwrap();
    let value = effect.removal_effect.expect("defined effect");
    assert!((value + 0.1).abs() < TOL, "expected -0.1, got {value}");
}

#[test]
fn deletion_attribution_of_a_single_channel_takes_everything() {
    let table = RemovalEffectAttributor::new(RemovalPolicy::Deletion)
        .attribute(&worked_example(), 250)
        .unwrap();

    assert!((table.base_conversion_rate - 0.9).abs() < TOL);
    assert!((table.total_effect + 0.1).abs() < TOL);
    let tv = table.record("TV").unwrap();
    assert!((tv.proportion.unwrap() - 1.0).abs() < TOL);
    assert!((tv.conversions_attributed.unwrap() - 250.0).abs() < 1e-9);
    assert_eq!(table.total_observed_conversions, 250);
}

// ── Redistribution ────────────────────────────────────────────────────────────

#[test]
fn redistribution_routes_through_successors() {
    let reduced =
        remove_channel(&worked_example(), "TV", RemovalPolicy::Redistribution).unwrap();
    let to_conv = reduced.probability(START, CONVERSION).unwrap();
    let to_no = reduced.probability(START, NO_CONVERSION).unwrap();
    assert!((to_conv - 0.9).abs() < TOL, "got {to_conv}");
    assert!((to_no - 0.1).abs() < TOL, "got {to_no}");
    assert!(reduced.is_row_stochastic(ROW_SUM_TOLERANCE));
}

#[test]
fn redistribution_effect_of_worked_example_is_zero() {
    let m = worked_example();
    let attributor = RemovalEffectAttributor::new(RemovalPolicy::Redistribution);
    let effects = attributor.removal_effects(&m).unwrap();
    let tv = &effects.effects[0];
    assert_eq!(tv.channel, "TV");
    assert!(tv.removal_effect.unwrap().abs() < TOL);
}

#[test]
fn redistribution_drops_repeat_exposure_mass() {
    // TV now repeats a quarter of the time: TV→TV 1, TV→Conversion 2, TV→No_Conversion 1.
    let mut counts = TransitionCounts::new();
    counts.add(START, "TV", 3);
    counts.add(START, CONVERSION, 7);
    counts.add("TV", "TV", 1);
    counts.add("TV", CONVERSION, 2);
    counts.add("TV", NO_CONVERSION, 1);
    let m = TransitionMatrix::from_counts(&counts, &StateVocabulary::new());

    let effects = RemovalEffectAttributor::new(RemovalPolicy::Redistribution)
        .removal_effects(&m)
        .unwrap();
    assert!((effects.base_conversion_rate - 0.9).abs() < TOL);

    // Start row after rerouting: Conversion 0.85, No_Conversion 0.075, sum 0.925.
    let expected = 0.9 - 0.85 / 0.925;
    let got = effects.effects[0].removal_effect.unwrap();
    assert!((got - expected).abs() < 1e-9, "expected {expected}, got {got}");
}

#[test]
fn all_zero_effects_cannot_be_normalized() {
    let err = RemovalEffectAttributor::new(RemovalPolicy::Redistribution)
        .attribute(&worked_example(), 100)
        .unwrap_err();
    assert!(
        matches!(err, AttrError::DivisionByZero { .. }),
        "expected DivisionByZero, got {err:?}"
    );
}

#[test]
fn policies_differ_on_the_same_matrix() {
    let m = worked_example();
    let del = RemovalEffectAttributor::new(RemovalPolicy::Deletion)
        .removal_effects(&m)
        .unwrap();
    let red = RemovalEffectAttributor::new(RemovalPolicy::Redistribution)
        .removal_effects(&m)
        .unwrap();
    let d = del.effects[0].removal_effect.unwrap();
    let r = red.effects[0].removal_effect.unwrap();
    assert!((d - r).abs() > 0.05, "deletion {d} vs redistribution {r}");
}

// ── Edge cases ────────────────────────────────────────────────────────────────

#[test]
fn zero_traffic_channel_has_no_effect_under_either_policy() {
    // "Dormant" has an outgoing row but nothing ever transitions into it.
    let mut counts = worked_example_counts();
    counts.add("Dormant", CONVERSION, 4);
    let m = TransitionMatrix::from_counts(&counts, &StateVocabulary::new());
    assert_eq!(m.probability(START, "Dormant"), Some(0.0));

    for policy in RemovalPolicy::ALL {
        let effects = RemovalEffectAttributor::new(policy)
            .removal_effects(&m)
            .unwrap();
        let dormant = effects
            .effects
            .iter()
            .find(|e| e.channel == "Dormant")
            .unwrap();
        let value = dormant.removal_effect.unwrap();
        assert!(value.abs() < TOL, "{policy}: expected 0, got {value}");
    }
}

#[test]
fn singular_channel_is_excluded_not_zeroed() {
    let m = trap_on_deletion();
    let table = RemovalEffectAttributor::new(RemovalPolicy::Deletion)
        .attribute(&m, 1_000)
        .unwrap();

    // Base: 0.4·1 + 0.4·0.5 + 0.2 = 0.8.
    assert!((table.base_conversion_rate - 0.8).abs() < TOL);

    let c = table.record("C").unwrap();
    assert!(c.removal_effect.is_none());
    assert!(c.proportion.is_none());
    assert!(c.conversions_attributed.is_none());
    assert!(c.failure.as_deref().unwrap_or("").contains("Singular"));
    assert_eq!(table.excluded_channels(), vec!["C"]);

    // Without A: Start→B 2/3, Start→Conversion 1/3 ⇒ 2/3. Effect 0.8 − 2/3.
    let a = table.record("A").unwrap().removal_effect.unwrap();
    assert!((a - (0.8 - 2.0 / 3.0)).abs() < TOL, "A effect {a}");
    // Without B: Start→A 2/3, Start→Conversion 1/3 ⇒ 1. Effect −0.2.
    let b = table.record("B").unwrap().removal_effect.unwrap();
    assert!((b + 0.2).abs() < TOL, "B effect {b}");

    let share: f64 = table.defined().filter_map(|r| r.proportion).sum();
    assert!((share - 1.0).abs() < 1e-9, "defined proportions sum to {share}");
    assert!((table.total_effect - (a + b)).abs() < TOL);
}

#[test]
fn redistribution_keeps_trapped_channel_solvable() {
    let effects = RemovalEffectAttributor::new(RemovalPolicy::Redistribution)
        .removal_effects(&trap_on_deletion())
        .unwrap();
    assert!(effects.effects.iter().all(|e| e.is_defined()));
}

#[test]
fn reserved_and_unknown_states_cannot_be_removed() {
    let m = worked_example();
    for state in [START, CONVERSION, NO_CONVERSION, "Radio"] {
        let err = remove_channel(&m, state, RemovalPolicy::Deletion).unwrap_err();
        assert!(matches!(err, AttrError::Validation(_)), "{state}: got {err:?}");
    }
}

#[test]
fn channels_are_transient_non_start_states() {
    let channels = RemovalEffectAttributor::channels(&trap_on_deletion());
    assert_eq!(channels, vec!["A", "B", "C"]);
}

// ── Larger models ─────────────────────────────────────────────────────────────

#[test]
fn counterfactual_matrices_stay_row_stochastic() {
    let m = synthetic_matrix();
    for channel in RemovalEffectAttributor::channels(&m) {
        for policy in RemovalPolicy::ALL {
            let reduced = remove_channel(&m, &channel, policy).unwrap();
            assert_eq!(reduced.len(), m.len() - 1);
            assert!(
                reduced.is_row_stochastic(ROW_SUM_TOLERANCE),
                "{policy} without {channel} is not row-stochastic"
            );
        }
    }
}

#[test]
fn parallel_and_sequential_agree() {
    let m = synthetic_matrix();
    for policy in RemovalPolicy::ALL {
        let seq = RemovalEffectAttributor::new(policy)
            .removal_effects(&m)
            .unwrap();
        let par = RemovalEffectAttributor::new(policy)
            .parallel(true)
            .removal_effects(&m)
            .unwrap();
        assert_eq!(seq, par, "{policy}: fan-out changed the result");
    }
}

#[test]
fn attributed_conversions_sum_to_observed_total() {
    let m = synthetic_matrix();
    let table = RemovalEffectAttributor::new(RemovalPolicy::Deletion)
        .attribute(&m, 480)
        .unwrap();
    let total: f64 = table.defined().filter_map(|r| r.conversions_attributed).sum();
    assert!((total - 480.0).abs() < 1e-6, "attributed {total}");
    assert_eq!(table.records.len(), 3);
}
