//! Removal-effect attribution.
//!
//! For every channel (a transient state other than Start) build a
//! counterfactual matrix with the channel excised, re-solve it, and take
//!   removal_effect = base_rate − counterfactual_rate
//! The effect is signed: a channel that mostly leads to No_Conversion has a
//! negative effect and reports it as such.
//!
//! Each channel's computation reads only the shared base matrix, so the
//! per-channel work fans out over rayon without locking.

use crate::{
    absorption::AbsorptionSolver,
    error::{AttrError, AttrResult},
    matrix::{renormalize_rows, TransitionMatrix},
    types::{is_channel, StateLabel},
};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// |Σ effects| below this is treated as zero when normalizing.
pub const EFFECT_EPSILON: f64 = 1e-12;

/// How a channel is cut out of the transition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Drop the channel's row and column and renormalize. Mass that flowed
    /// into the channel is spread over each predecessor's other destinations.
    Deletion,
    /// Route predecessors straight to the channel's successors first
    /// (p→s += p→c × c→s), then drop and renormalize.
    Redistribution,
}

impl RemovalPolicy {
    pub const ALL: [RemovalPolicy; 2] = [RemovalPolicy::Deletion, RemovalPolicy::Redistribution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deletion       => "deletion",
            Self::Redistribution => "redistribution",
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalPolicy {
    type Err = AttrError;

    fn from_str(s: &str) -> AttrResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deletion"       => Ok(Self::Deletion),
            "redistribution" => Ok(Self::Redistribution),
            other => Err(AttrError::Validation(format!(
                "unknown removal policy '{other}' (expected deletion or redistribution)"
            ))),
        }
    }
}

/// Counterfactual matrix with `channel` removed under `policy`.
pub fn remove_channel(
    matrix: &TransitionMatrix,
    channel: &str,
    policy: RemovalPolicy,
) -> AttrResult<TransitionMatrix> {
    if !is_channel(channel) {
        return Err(AttrError::Validation(format!(
            "'{channel}' is a reserved state and cannot be removed"
        )));
    }
    let c = matrix
        .index_of(channel)
        .ok_or_else(|| AttrError::Validation(format!("unknown channel '{channel}'")))?;

    let mut values = matrix.values().clone();
    let n = values.nrows();

    if policy == RemovalPolicy::Redistribution {
        for p in (0..n).filter(|&p| p != c) {
            let into_channel = values[(p, c)];
            if into_channel == 0.0 {
                continue;
            }
            for s in (0..n).filter(|&s| s != c) {
                values[(p, s)] += into_channel * values[(c, s)];
            }
            values[(p, c)] = 0.0;
        }
    }

    let keep: Vec<usize> = (0..n).filter(|&i| i != c).collect();
    let mut reduced = DMatrix::from_fn(n - 1, n - 1, |i, j| values[(keep[i], keep[j])]);
    renormalize_rows(&mut reduced);

    let labels = keep.iter().map(|&i| matrix.labels()[i].clone()).collect();
    Ok(TransitionMatrix::from_parts(labels, reduced))
}

/// Outcome of removing one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEffect {
    pub channel:             StateLabel,
    /// None when the counterfactual chain could not be solved.
    pub counterfactual_rate: Option<f64>,
    pub removal_effect:      Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure:             Option<String>,
}

impl ChannelEffect {
    pub fn is_defined(&self) -> bool {
        self.removal_effect.is_some()
    }
}

/// Base rate plus one effect per channel, in canonical channel order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalEffects {
    pub policy:               RemovalPolicy,
    pub base_conversion_rate: f64,
    pub effects:              Vec<ChannelEffect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub channel:                StateLabel,
    pub removal_effect:         Option<f64>,
    pub proportion:             Option<f64>,
    pub conversions_attributed: Option<f64>,
    pub counterfactual_rate:    Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure:                Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionTable {
    pub policy:                     RemovalPolicy,
    pub base_conversion_rate:       f64,
    pub total_observed_conversions: u64,
    /// Σ removal_effect over channels with a defined effect.
    pub total_effect:               f64,
    pub records:                    Vec<AttributionRecord>,
}

impl AttributionTable {
    pub fn record(&self, channel: &str) -> Option<&AttributionRecord> {
        self.records.iter().find(|r| r.channel == channel)
    }

    /// Records that took part in normalization.
    pub fn defined(&self) -> impl Iterator<Item = &AttributionRecord> + '_ {
        self.records.iter().filter(|r| r.removal_effect.is_some())
    }

    pub fn excluded_channels(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.removal_effect.is_none())
            .map(|r| r.channel.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RemovalEffectAttributor {
    policy:   RemovalPolicy,
    parallel: bool,
    solver:   AbsorptionSolver,
}

impl RemovalEffectAttributor {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self {
            policy,
            parallel: false,
            solver: AbsorptionSolver::new(),
        }
    }

    /// Fan per-channel counterfactuals out over the rayon pool.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }

    /// Channels of `matrix`, in canonical order.
    pub fn channels(matrix: &TransitionMatrix) -> Vec<StateLabel> {
        matrix
            .labels()
            .iter()
            .filter(|s| is_channel(s))
            .cloned()
            .collect()
    }

    /// Effect of removing a single channel. Only a SingularMatrix failure is
    /// absorbed into the result; any other error is returned.
    pub fn channel_effect(
        &self,
        matrix: &TransitionMatrix,
        channel: &str,
        base_rate: f64,
    ) -> AttrResult<ChannelEffect> {
        let reduced = remove_channel(matrix, channel, self.policy)?;
        match self.solver.conversion_probability(&reduced) {
            Ok(rate) => {
                let effect = base_rate - rate;
                log::debug!(
                    "removal: policy={} channel={channel} counterfactual={rate:.6} effect={effect:+.6}",
                    self.policy
                );
                Ok(ChannelEffect {
                    channel: channel.to_string(),
                    counterfactual_rate: Some(rate),
                    removal_effect: Some(effect),
                    failure: None,
                })
            }
            Err(e) if e.is_singular() => {
                log::warn!(
                    "removal: policy={} channel={channel} excluded from normalization: {e}",
                    self.policy
                );
                Ok(ChannelEffect {
                    channel: channel.to_string(),
                    counterfactual_rate: None,
                    removal_effect: None,
                    failure: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Base conversion rate and every channel's removal effect.
    pub fn removal_effects(&self, matrix: &TransitionMatrix) -> AttrResult<RemovalEffects> {
        let base_rate = self.solver.conversion_probability(matrix)?;
        let channels = Self::channels(matrix);

        let effects: Vec<ChannelEffect> = if self.parallel {
            channels
                .par_iter()
                .map(|c| self.channel_effect(matrix, c, base_rate))
                .collect::<AttrResult<_>>()?
        } else {
            channels
                .iter()
                .map(|c| self.channel_effect(matrix, c, base_rate))
                .collect::<AttrResult<_>>()?
        };

        log::info!(
            "removal: policy={} base_rate={base_rate:.6} channels={} undefined={}",
            self.policy,
            effects.len(),
            effects.iter().filter(|e| !e.is_defined()).count()
        );

        Ok(RemovalEffects {
            policy: self.policy,
            base_conversion_rate: base_rate,
            effects,
        })
    }

    /// Full attribution: removal effects normalized and scaled by the
    /// externally observed conversion total.
    pub fn attribute(
        &self,
        matrix: &TransitionMatrix,
        total_observed_conversions: u64,
    ) -> AttrResult<AttributionTable> {
        let effects = self.removal_effects(matrix)?;
        normalize(effects, total_observed_conversions)
    }
}

/// proportion = effect / Σ effects; conversions = proportion × total.
/// Channels without a defined effect are excluded from Σ and get no share.
pub fn normalize(
    effects: RemovalEffects,
    total_observed_conversions: u64,
) -> AttrResult<AttributionTable> {
    let total_effect: f64 = effects
        .effects
        .iter()
        .filter_map(|e| e.removal_effect)
        .sum();

    if total_effect.abs() < EFFECT_EPSILON {
        return Err(AttrError::DivisionByZero { total_effect });
    }

    let records = effects
        .effects
        .into_iter()
        .map(|e| {
            let proportion = e.removal_effect.map(|effect| effect / total_effect);
            AttributionRecord {
                channel: e.channel,
                removal_effect: e.removal_effect,
                proportion,
                conversions_attributed: proportion
                    .map(|p| p * total_observed_conversions as f64),
                counterfactual_rate: e.counterfactual_rate,
                failure: e.failure,
            }
        })
        .collect();

    Ok(AttributionTable {
        policy: effects.policy,
        base_conversion_rate: effects.base_conversion_rate,
        total_observed_conversions,
        total_effect,
        records,
    })
}
