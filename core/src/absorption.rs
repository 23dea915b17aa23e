//! Absorption solver — fundamental-matrix algebra over an absorbing chain.
//!
//! Partition the canonical matrix into
//!   Q: transient → transient
//!   R: transient → absorbing
//! then N = (I − Q)⁻¹ (expected visits before absorption) and B = N · R
//! (probability of ending in each absorbing state).
//!
//! I − Q is factored by LU with partial pivoting. A zero or vanishing pivot
//! is reported as SingularMatrix; the solver never substitutes a default.

use crate::{
    error::{AttrError, AttrResult},
    matrix::TransitionMatrix,
    types::{StateLabel, ABSORBING_STATES, CONVERSION, RESERVED_STATES, START},
};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Smallest |pivot| of the LU factorization still treated as invertible.
pub const SINGULAR_PIVOT: f64 = 1e-12;

/// Probabilities may leave [0, 1] by at most this much before the result
/// is rejected as numerically unsound.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct AbsorptionSolver {
    absorbing: Vec<StateLabel>,
}

impl Default for AbsorptionSolver {
    fn default() -> Self {
        Self {
            absorbing: ABSORBING_STATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AbsorptionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorbing_states(&self) -> &[StateLabel] {
        &self.absorbing
    }

    /// Solve the chain. Fails with Validation if a reserved state is
    /// missing, with SingularMatrix if I − Q cannot be inverted.
    pub fn solve(&self, matrix: &TransitionMatrix) -> AttrResult<Absorption> {
        for state in RESERVED_STATES {
            if !matrix.contains(state) {
                return Err(AttrError::missing_state(state));
            }
        }

        let (transient_idx, absorbing_idx): (Vec<usize>, Vec<usize>) = (0..matrix.len())
            .partition(|&i| !self.absorbing.contains(&matrix.labels()[i]));

        let p = matrix.values();
        let t = transient_idx.len();
        let k = absorbing_idx.len();
        let q = DMatrix::from_fn(t, t, |a, b| p[(transient_idx[a], transient_idx[b])]);
        let r = DMatrix::from_fn(t, k, |a, b| p[(transient_idx[a], absorbing_idx[b])]);

        let i_minus_q = DMatrix::<f64>::identity(t, t) - q;
        let lu = i_minus_q.lu();

        let min_pivot = lu
            .u()
            .diagonal()
            .iter()
            .fold(f64::INFINITY, |m, d| m.min(d.abs()));
        if min_pivot < SINGULAR_PIVOT {
            return Err(AttrError::SingularMatrix {
                context: format!("smallest LU pivot {min_pivot:e} over {t} transient states"),
            });
        }

        let fundamental = lu.try_inverse().ok_or_else(|| AttrError::SingularMatrix {
            context: format!("LU inverse failed over {t} transient states"),
        })?;
        let probabilities = &fundamental * r;

        if probabilities.iter().any(|v| !v.is_finite()) {
            return Err(AttrError::SingularMatrix {
                context: "absorption probabilities are not finite".into(),
            });
        }

        let labels = matrix.labels();
        Ok(Absorption {
            transient: transient_idx.iter().map(|&i| labels[i].clone()).collect(),
            absorbing: absorbing_idx.iter().map(|&i| labels[i].clone()).collect(),
            fundamental,
            probabilities,
        })
    }

    /// P(eventually Conversion | Start).
    pub fn conversion_probability(&self, matrix: &TransitionMatrix) -> AttrResult<f64> {
        self.solve(matrix)?.conversion_probability()
    }
}

/// Result of one solve: absorption probabilities B and fundamental matrix N,
/// both indexed by transient states in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct Absorption {
    transient:     Vec<StateLabel>,
    absorbing:     Vec<StateLabel>,
    fundamental:   DMatrix<f64>,
    probabilities: DMatrix<f64>,
}

impl Absorption {
    pub fn transient_states(&self) -> &[StateLabel] {
        &self.transient
    }

    pub fn absorbing_states(&self) -> &[StateLabel] {
        &self.absorbing
    }

    /// B, rows = transient states, columns = absorbing states.
    pub fn probabilities(&self) -> &DMatrix<f64> {
        &self.probabilities
    }

    /// N = (I − Q)⁻¹.
    pub fn fundamental(&self) -> &DMatrix<f64> {
        &self.fundamental
    }

    /// P(eventually absorbed in `to` | currently in `from`).
    pub fn probability(&self, from: &str, to: &str) -> Option<f64> {
        let i = self.transient_index(from)?;
        let j = self.absorbing.iter().position(|s| s == to)?;
        Some(self.probabilities[(i, j)])
    }

    /// P(eventually Conversion | Start), checked against [0, 1].
    pub fn conversion_probability(&self) -> AttrResult<f64> {
        let p = self
            .probability(START, CONVERSION)
            .ok_or_else(|| AttrError::missing_state(CONVERSION))?;
        if !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&p) {
            return Err(AttrError::SingularMatrix {
                context: format!("conversion probability {p} outside [0, 1]"),
            });
        }
        Ok(p.clamp(0.0, 1.0))
    }

    /// Expected visits to each transient state before absorption, starting
    /// from `from`.
    pub fn expected_visits(&self, from: &str) -> Option<Vec<(StateLabel, f64)>> {
        let i = self.transient_index(from)?;
        Some(
            self.transient
                .iter()
                .enumerate()
                .map(|(j, s)| (s.clone(), self.fundamental[(i, j)]))
                .collect(),
        )
    }

    /// Expected number of steps before absorption, starting from `from`.
    pub fn expected_steps(&self, from: &str) -> Option<f64> {
        let i = self.transient_index(from)?;
        Some(self.fundamental.row(i).sum())
    }

    pub fn to_table(&self) -> AbsorptionTable {
        AbsorptionTable {
            transient: self.transient.clone(),
            absorbing: self.absorbing.clone(),
            rows: (0..self.transient.len())
                .map(|i| self.probabilities.row(i).iter().copied().collect())
                .collect(),
        }
    }

    fn transient_index(&self, state: &str) -> Option<usize> {
        self.transient
            .binary_search_by(|s| s.as_str().cmp(state))
            .ok()
    }
}

/// Tabular form of B for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionTable {
    pub transient: Vec<StateLabel>,
    pub absorbing: Vec<StateLabel>,
    pub rows:      Vec<Vec<f64>>,
}
