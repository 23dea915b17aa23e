//! Synthetic journeys: walk a known transition matrix to produce events.
//!
//! Used by tests to check that counting recovers the generating model, and
//! by the runner to produce demo input. No_Conversion is never emitted:
//! a journey that times out simply stops producing events.

use crate::{
    error::{AttrError, AttrResult},
    event::TouchEvent,
    matrix::{TransitionMatrix, ROW_SUM_TOLERANCE},
    rng::StreamRng,
    types::{CONVERSION, NO_CONVERSION, START},
};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Three-channel demo model (TV plus two programmatic lines). Channels
/// repeat with some probability, as impressions do.
pub fn demo_matrix() -> AttrResult<TransitionMatrix> {
    let labels = [START, "TV", "Prog_Contextual", "Prog_Retargeting", CONVERSION, NO_CONVERSION];
    let rows = vec![
        vec![0.0, 0.50, 0.30, 0.20, 0.00, 0.00],
        vec![0.0, 0.10, 0.20, 0.20, 0.05, 0.45],
        vec![0.0, 0.10, 0.05, 0.25, 0.08, 0.52],
        vec![0.0, 0.05, 0.10, 0.15, 0.15, 0.55],
        vec![0.0, 0.00, 0.00, 0.00, 1.00, 0.00],
        vec![0.0, 0.00, 0.00, 0.00, 0.00, 1.00],
    ];
    TransitionMatrix::from_rows(labels.iter().map(|s| s.to_string()).collect(), rows)
}

#[derive(Debug, Clone)]
pub struct JourneySimulator {
    matrix:             TransitionMatrix,
    repeat_probability: f64,
    max_touches:        usize,
    epoch:              DateTime<Utc>,
    spacing:            Duration,
}

impl JourneySimulator {
    /// The generating matrix must contain Start and be row-stochastic.
    pub fn new(matrix: TransitionMatrix) -> AttrResult<Self> {
        if !matrix.contains(START) {
            return Err(AttrError::missing_state(START));
        }
        if !matrix.is_row_stochastic(ROW_SUM_TOLERANCE) {
            return Err(AttrError::Validation(
                "generating matrix is not row-stochastic".into(),
            ));
        }
        Ok(Self {
            matrix,
            repeat_probability: 0.0,
            max_touches: 50,
            epoch: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            spacing: Duration::hours(1),
        })
    }

    /// Chance that a converted customer starts another journey.
    pub fn with_repeat_probability(mut self, p: f64) -> AttrResult<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(AttrError::Validation(format!(
                "repeat probability must be in [0, 1], got {p}"
            )));
        }
        self.repeat_probability = p;
        Ok(self)
    }

    /// Upper bound on steps per customer; a walk that hits it just stops.
    pub fn with_max_touches(mut self, max_touches: usize) -> Self {
        self.max_touches = max_touches.max(1);
        self
    }

    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    /// Events for `customers` customers, sorted by (customer_id, timestamp).
    pub fn generate(&self, customers: usize, seed: u64) -> Vec<TouchEvent> {
        let mut events = Vec::new();
        for index in 0..customers {
            self.walk_customer(index, seed, &mut events);
        }
        log::info!(
            "synth: seed={seed} customers={customers} events={}",
            events.len()
        );
        events
    }

    fn walk_customer(&self, index: usize, seed: u64, out: &mut Vec<TouchEvent>) {
        let mut rng = StreamRng::new(seed, index as u64);
        let customer_id = format!("cust-{index:07}");
        let start = self.index(START);
        let conversion = self.matrix.index_of(CONVERSION);
        let no_conversion = self.matrix.index_of(NO_CONVERSION);

        let mut state = start;
        let mut emitted = 0i32;
        for _ in 0..self.max_touches {
            let row: Vec<f64> = self.matrix.values().row(state).iter().copied().collect();
            let Some(next) = rng.pick_weighted(&row) else {
                break;
            };

            if Some(next) == no_conversion {
                break;
            }
            if next == start {
                state = start;
                continue;
            }

            let timestamp = self.epoch + self.spacing * emitted;
            out.push(TouchEvent::new(
                customer_id.clone(),
                timestamp,
                self.matrix.labels()[next].clone(),
            ));
            emitted += 1;

            if Some(next) == conversion {
                if !rng.chance(self.repeat_probability) {
                    break;
                }
                state = start;
            } else if next == state && self.matrix.values()[(state, state)] >= 1.0 {
                // A channel that only loops to itself would spin forever.
                break;
            } else {
                state = next;
            }
        }
    }

    fn index(&self, state: &str) -> usize {
        self.matrix
            .index_of(state)
            .unwrap_or_else(|| unreachable!("'{state}' checked at construction"))
    }
}
