//! The attribution engine: one batch run over an event source.
//!
//! PIPELINE (fixed order):
//!   1. Transition counter      (events → counts + vocabulary)
//!   2. Matrix builder          (counts → row-stochastic matrix)
//!   3. Absorption solver       (matrix → base conversion rate)
//!   4. Removal-effect attributor, once per requested policy
//!   5. Channel economics       (only when configured)
//!
//! RULES:
//!   - The engine holds no model state between runs.
//!   - Inputs arrive only through the injected EventSource and
//!     ConversionTotal collaborators.

use crate::{
    absorption::{Absorption, AbsorptionSolver},
    config::AttributionConfig,
    counter::{count_transitions, CountedTransitions},
    economics::{channel_economics, evaluate_scenarios, ChannelEconomics, ScenarioOutcome},
    error::AttrResult,
    journey::{build_journeys, top_paths, PathFrequency},
    matrix::{Edge, TransitionMatrix},
    removal::{AttributionTable, RemovalEffectAttributor, RemovalPolicy},
    source::{ConversionTotal, EventSource},
    types::START,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything derived from one pass over the events.
#[derive(Debug, Clone)]
pub struct MarkovModel {
    pub counted:              CountedTransitions,
    pub matrix:               TransitionMatrix,
    pub absorption:           Absorption,
    pub base_conversion_rate: f64,
}

impl MarkovModel {
    /// Fit counts, matrix and absorption from an event source.
    pub fn fit<S: EventSource + ?Sized>(source: &S) -> AttrResult<Self> {
        let counted = count_transitions(source)?;
        Self::from_counts(counted)
    }

    pub fn from_counts(counted: CountedTransitions) -> AttrResult<Self> {
        let matrix = TransitionMatrix::from_counts(&counted.counts, &counted.vocabulary);
        let absorption = AbsorptionSolver::new().solve(&matrix)?;
        let base_conversion_rate = absorption.conversion_probability()?;
        log::info!(
            "model: states={} base_conversion_rate={base_conversion_rate:.6}",
            matrix.len()
        );
        Ok(Self {
            counted,
            matrix,
            absorption,
            base_conversion_rate,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EconomicsReport {
    pub channels:  Vec<ChannelEconomics>,
    pub scenarios: Vec<ScenarioOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributionReport {
    pub generated_at:         DateTime<Utc>,
    pub source:               String,
    pub events:               u64,
    pub customers:            u64,
    pub base_conversion_rate: f64,
    /// Expected touches before absorption, starting from Start.
    pub expected_touches:     Option<f64>,
    pub matrix:               TransitionMatrix,
    pub edges:                Vec<Edge>,
    pub top_paths:            Vec<PathFrequency>,
    pub attribution:          AttributionTable,
    pub economics:            Option<EconomicsReport>,
}

pub struct AttributionEngine<S, C> {
    config:      AttributionConfig,
    source:      S,
    conversions: C,
}

impl<S: EventSource, C: ConversionTotal> AttributionEngine<S, C> {
    pub fn new(config: AttributionConfig, source: S, conversions: C) -> Self {
        Self {
            config,
            source,
            conversions,
        }
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn build_model(&self) -> AttrResult<MarkovModel> {
        MarkovModel::fit(&self.source)
    }

    /// Run with the configured removal policy.
    pub fn run(&self) -> AttrResult<AttributionReport> {
        self.run_with_policy(self.config.removal_policy)
    }

    pub fn run_with_policy(&self, policy: RemovalPolicy) -> AttrResult<AttributionReport> {
        let mut reports = self.run_policies(&[policy])?;
        Ok(reports.remove(0))
    }

    /// Fit the model once and attribute under each policy in turn.
    pub fn run_policies(&self, policies: &[RemovalPolicy]) -> AttrResult<Vec<AttributionReport>> {
        log::info!("engine: run started source={}", self.source.name());
        let model = self.build_model()?;
        let total_conversions = self.conversions.total_conversions()?;

        let journeys = build_journeys(&self.source)?;
        let paths = top_paths(&journeys, self.config.top_paths, None);
        let edges = model.matrix.edges(self.config.edge_threshold);
        let expected_touches = model.absorption.expected_steps(START);

        let mut reports = Vec::with_capacity(policies.len());
        for &policy in policies {
            let attribution = RemovalEffectAttributor::new(policy)
                .parallel(self.config.parallel_channels)
                .attribute(&model.matrix, total_conversions)?;

            let economics = self.config.economics.as_ref().map(|econ| {
                let channels = channel_economics(&attribution, econ);
                let scenarios =
                    evaluate_scenarios(&channels, &econ.scenarios, econ.revenue_per_conversion);
                EconomicsReport { channels, scenarios }
            });

            log::info!(
                "engine: policy={policy} total_effect={:.6} conversions={total_conversions} excluded={:?}",
                attribution.total_effect,
                attribution.excluded_channels()
            );

            reports.push(AttributionReport {
                generated_at: Utc::now(),
                source: self.source.name().to_string(),
                events: model.counted.events,
                customers: model.counted.customers,
                base_conversion_rate: model.base_conversion_rate,
                expected_touches,
                matrix: model.matrix.clone(),
                edges: edges.clone(),
                top_paths: paths.clone(),
                attribution,
                economics,
            });
        }
        Ok(reports)
    }
}
