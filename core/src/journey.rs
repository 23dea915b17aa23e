//! Explicit customer journeys.
//!
//! Same cursor semantics as the streaming counter, but keeps each path so it
//! can be inspected: most frequent paths, exposed vs unexposed conversion
//! rates, and a second route to transition counts.

use crate::{
    counter::{CountedTransitions, TransitionCounts},
    error::AttrResult,
    event::TouchEvent,
    source::EventSource,
    types::{is_absorbing, CustomerId, StateLabel, CONVERSION, NO_CONVERSION, START},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Start, the states visited, then an absorbing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journey {
    pub customer_id:       CustomerId,
    pub states:            Vec<StateLabel>,
    /// The closing No_Conversion was added when the journey ran out of
    /// events, not observed.
    #[serde(default)]
    pub closed_by_timeout: bool,
}

impl Journey {
    pub fn converted(&self) -> bool {
        self.states.last().map(String::as_str) == Some(CONVERSION)
    }

    pub fn touches(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Consecutive (source, destination) pairs.
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.states
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
    }

    /// Path rendered as "Start > TV > Conversion".
    pub fn path(&self) -> String {
        self.states.join(" > ")
    }
}

/// Streaming journey reconstruction from sorted events.
#[derive(Debug, Default)]
pub struct JourneyBuilder {
    current_customer: Option<CustomerId>,
    path:             Vec<StateLabel>,
    done:             Vec<Journey>,
}

impl JourneyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &TouchEvent) {
        if self.current_customer.as_deref() != Some(event.customer_id.as_str()) {
            self.close_dangling();
            self.current_customer = Some(event.customer_id.clone());
            self.path = vec![START.to_string()];
        }

        self.path.push(event.state.clone());
        if is_absorbing(&event.state) {
            self.emit(false);
            self.path = vec![START.to_string()];
        }
    }

    pub fn finish(mut self) -> Vec<Journey> {
        self.close_dangling();
        self.done
    }

    fn close_dangling(&mut self) {
        if self.path.len() > 1 {
            self.path.push(NO_CONVERSION.to_string());
            self.emit(true);
        }
        self.path.clear();
    }

    fn emit(&mut self, closed_by_timeout: bool) {
        if let Some(customer_id) = &self.current_customer {
            self.done.push(Journey {
                customer_id: customer_id.clone(),
                states: std::mem::take(&mut self.path),
                closed_by_timeout,
            });
        }
    }
}

pub fn build_journeys<S: EventSource + ?Sized>(source: &S) -> AttrResult<Vec<Journey>> {
    let mut builder = JourneyBuilder::new();
    for event in source.events()? {
        builder.observe(&event?);
    }
    let journeys = builder.finish();
    log::info!("journeys: source={} built {}", source.name(), journeys.len());
    Ok(journeys)
}

/// Transition counts from explicit journeys. Agrees with the streaming
/// counter on the same event stream.
pub fn counts_from_journeys(journeys: &[Journey]) -> CountedTransitions {
    let mut out = CountedTransitions::default();
    let mut last_customer: Option<&str> = None;
    for journey in journeys {
        if last_customer != Some(journey.customer_id.as_str()) {
            out.customers += 1;
            last_customer = Some(journey.customer_id.as_str());
        }
        for state in &journey.states {
            out.vocabulary.insert(state);
        }
        for (src, dst) in journey.transitions() {
            out.counts.record(src, dst);
        }
        // Every state after Start is an observed event except a synthetic
        // No_Conversion closer.
        let synthetic = usize::from(journey.closed_by_timeout);
        out.events += journey.states.len().saturating_sub(1 + synthetic) as u64;
    }
    out
}

/// Counts only; convenience over `counts_from_journeys`.
pub fn transition_counts(journeys: &[Journey]) -> TransitionCounts {
    counts_from_journeys(journeys).counts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathFrequency {
    pub path:  String,
    pub count: u64,
}

/// The `n` most frequent full paths, optionally only among journeys that
/// touch `containing`. Ties are broken by path text.
pub fn top_paths(journeys: &[Journey], n: usize, containing: Option<&str>) -> Vec<PathFrequency> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for journey in journeys {
        if containing.is_some_and(|state| !journey.touches(state)) {
            continue;
        }
        *counts.entry(journey.path()).or_insert(0) += 1;
    }

    let mut ranked: Vec<PathFrequency> = counts
        .into_iter()
        .map(|(path, count)| PathFrequency { path, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
    ranked.truncate(n);
    ranked
}

/// Observed conversion rates of journeys with and without a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSplit {
    pub channel:            StateLabel,
    pub exposed_journeys:   u64,
    pub exposed_rate:       f64,
    pub unexposed_journeys: u64,
    pub unexposed_rate:     f64,
}

pub fn exposure_split(journeys: &[Journey], channel: &str) -> ExposureSplit {
    let (exposed, unexposed): (Vec<&Journey>, Vec<&Journey>) =
        journeys.iter().partition(|j| j.touches(channel));

    ExposureSplit {
        channel: channel.to_string(),
        exposed_journeys: exposed.len() as u64,
        exposed_rate: conversion_rate(&exposed),
        unexposed_journeys: unexposed.len() as u64,
        unexposed_rate: conversion_rate(&unexposed),
    }
}

/// Share of journeys ending in Conversion; zero for an empty slice.
pub fn conversion_rate(journeys: &[&Journey]) -> f64 {
    if journeys.is_empty() {
        return 0.0;
    }
    let converted = journeys.iter().filter(|j| j.converted()).count();
    converted as f64 / journeys.len() as f64
}
