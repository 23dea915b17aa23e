//! Transition matrix — labeled, square, row-stochastic.
//!
//! RULE: Labels are always held in canonical lexicographic order, and
//! label → index lookup is a binary search over that order. Nothing looks
//! a state up by name at solve time.

use crate::{
    counter::{StateVocabulary, TransitionCounts},
    error::{AttrError, AttrResult},
    types::{is_absorbing, StateLabel},
};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tolerance for "this row sums to one".
pub const ROW_SUM_TOLERANCE: f64 = 1e-9;

/// Rows within this distance of one are left untouched by renormalization,
/// so renormalizing a stochastic matrix is an exact no-op.
const RENORMALIZE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
#[derive(Serialize, Deserialize)]
#[serde(into = "MatrixTable", try_from = "MatrixTable")]
pub struct TransitionMatrix {
    labels: Vec<StateLabel>,
    values: DMatrix<f64>,
}

/// Plain tabular form of a matrix, used for JSON output and input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixTable {
    pub labels: Vec<StateLabel>,
    pub rows:   Vec<Vec<f64>>,
}

/// A directed edge of the transition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source:      StateLabel,
    pub destination: StateLabel,
    pub probability: f64,
}

impl TransitionMatrix {
    /// Normalize raw counts into transition probabilities.
    ///
    /// Absorbing states always get a pure self-loop, whatever was counted
    /// out of them. Other states never observed as a source get a self-loop
    /// of probability one so every row is a valid distribution.
    pub fn from_counts(counts: &TransitionCounts, vocabulary: &StateVocabulary) -> Self {
        let mut states: BTreeSet<&str> = vocabulary.iter().collect();
        for (src, dst, _) in counts.iter() {
            states.insert(src);
            states.insert(dst);
        }
        let labels: Vec<StateLabel> = states.into_iter().map(str::to_string).collect();
        let n = labels.len();

        let mut values = DMatrix::<f64>::zeros(n, n);
        for (src, dst, count) in counts.iter() {
            let i = position(&labels, src);
            let j = position(&labels, dst);
            values[(i, j)] += count as f64;
        }

        for i in 0..n {
            if is_absorbing(&labels[i]) {
                values.row_mut(i).fill(0.0);
                values[(i, i)] = 1.0;
                continue;
            }
            let total: f64 = values.row(i).sum();
            if total > 0.0 {
                for j in 0..n {
                    values[(i, j)] /= total;
                }
            } else {
                values[(i, i)] = 1.0;
            }
        }

        log::debug!("matrix: built {n}x{n} from {} distinct transitions", counts.len());
        Self { labels, values }
    }

    /// Build from labeled rows. Labels may come in any order; the result is
    /// permuted into canonical order. Rows are taken as given, not normalized.
    pub fn from_rows(labels: Vec<StateLabel>, rows: Vec<Vec<f64>>) -> AttrResult<Self> {
        let n = labels.len();
        if rows.len() != n {
            return Err(AttrError::Validation(format!(
                "matrix has {n} labels but {} rows",
                rows.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(AttrError::Validation(format!(
                "row {i} has {} columns, expected {n}",
                row.len()
            )));
        }
        if rows.iter().flatten().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(AttrError::Validation(
                "matrix entries must be finite and non-negative".into(),
            ));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| labels[a].cmp(&labels[b]));
        if order.windows(2).any(|w| labels[w[0]] == labels[w[1]]) {
            return Err(AttrError::Validation("matrix labels must be unique".into()));
        }

        let values = DMatrix::from_fn(n, n, |i, j| rows[order[i]][order[j]]);
        let labels = order.iter().map(|&k| labels[k].clone()).collect();
        Ok(Self { labels, values })
    }

    pub(crate) fn from_parts(labels: Vec<StateLabel>, values: DMatrix<f64>) -> Self {
        debug_assert!(labels.windows(2).all(|w| w[0] < w[1]));
        debug_assert_eq!(labels.len(), values.nrows());
        Self { labels, values }
    }

    pub fn labels(&self) -> &[StateLabel] {
        &self.labels
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, state: &str) -> bool {
        self.index_of(state).is_some()
    }

    pub fn index_of(&self, state: &str) -> Option<usize> {
        self.labels.binary_search_by(|l| l.as_str().cmp(state)).ok()
    }

    /// P(source → destination), or None if either state is unknown.
    pub fn probability(&self, source: &str, destination: &str) -> Option<f64> {
        let i = self.index_of(source)?;
        let j = self.index_of(destination)?;
        Some(self.values[(i, j)])
    }

    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.values.row(i).sum()).collect()
    }

    pub fn is_row_stochastic(&self, tolerance: f64) -> bool {
        self.row_sums().iter().all(|s| (s - 1.0).abs() <= tolerance)
    }

    /// Rescale every row to sum to one; an all-zero row becomes a self-loop.
    pub fn renormalized(&self) -> Self {
        let mut values = self.values.clone();
        renormalize_rows(&mut values);
        Self {
            labels: self.labels.clone(),
            values,
        }
    }

    /// Non-negligible transitions, excluding absorbing self-loops.
    pub fn edges(&self, threshold: f64) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (i, src) in self.labels.iter().enumerate() {
            for (j, dst) in self.labels.iter().enumerate() {
                let p = self.values[(i, j)];
                if p <= threshold || (i == j && is_absorbing(src)) {
                    continue;
                }
                edges.push(Edge {
                    source: src.clone(),
                    destination: dst.clone(),
                    probability: p,
                });
            }
        }
        edges
    }

    pub fn to_table(&self) -> MatrixTable {
        MatrixTable {
            labels: self.labels.clone(),
            rows: (0..self.len())
                .map(|i| self.values.row(i).iter().copied().collect())
                .collect(),
        }
    }
}

pub(crate) fn renormalize_rows(values: &mut DMatrix<f64>) {
    let n = values.nrows();
    for i in 0..n {
        let total: f64 = values.row(i).sum();
        if (total - 1.0).abs() <= RENORMALIZE_EPSILON {
            continue;
        }
        if total > 0.0 {
            for j in 0..n {
                values[(i, j)] /= total;
            }
        } else {
            for j in 0..n {
                values[(i, j)] = 0.0;
            }
            values[(i, i)] = 1.0;
        }
    }
}

fn position(labels: &[StateLabel], state: &str) -> usize {
    labels
        .binary_search_by(|l| l.as_str().cmp(state))
        .unwrap_or_else(|_| unreachable!("state '{state}' missing from its own label set"))
}

impl From<TransitionMatrix> for MatrixTable {
    fn from(matrix: TransitionMatrix) -> Self {
        matrix.to_table()
    }
}

impl TryFrom<MatrixTable> for TransitionMatrix {
    type Error = AttrError;

    fn try_from(table: MatrixTable) -> AttrResult<Self> {
        TransitionMatrix::from_rows(table.labels, table.rows)
    }
}
