//! Transition counter: one ordered forward pass over touch events.
//!
//! Cursor rules:
//!   - a new customer id resets the cursor to Start
//!   - an absorbing state (Conversion, or an explicit No_Conversion) records
//!     its transition, then resets the cursor to Start; a repeat purchase
//!     opens a new, independent journey
//!   - any other state advances the cursor
//!   - a journey left dangling on a channel at a customer boundary or at
//!     end of stream is closed with a synthetic transition into No_Conversion

use crate::{
    error::AttrResult,
    event::TouchEvent,
    source::EventSource,
    types::{is_absorbing, CustomerId, StateLabel, NO_CONVERSION, RESERVED_STATES, START},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One (source, destination) pair with its observation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCount {
    pub source:      StateLabel,
    pub destination: StateLabel,
    pub count:       u64,
}

/// Raw transition counts keyed by (source, destination).
///
/// Accumulation is commutative and associative, so counts built from
/// disjoint customer partitions can be merged in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<TransitionCount>", from = "Vec<TransitionCount>")]
pub struct TransitionCounts {
    counts: BTreeMap<(StateLabel, StateLabel), u64>,
}

impl TransitionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: &str, destination: &str) {
        self.add(source, destination, 1);
    }

    pub fn add(&mut self, source: &str, destination: &str, count: u64) {
        *self
            .counts
            .entry((source.to_string(), destination.to_string()))
            .or_insert(0) += count;
    }

    pub fn get(&self, source: &str, destination: &str) -> u64 {
        self.counts
            .get(&(source.to_string(), destination.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn merge(&mut self, other: &TransitionCounts) {
        for ((src, dst), count) in &other.counts {
            self.add(src, dst, *count);
        }
    }

    /// Number of distinct (source, destination) pairs.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Sum of counts leaving `source`.
    pub fn outgoing(&self, source: &str) -> u64 {
        self.iter()
            .filter(|(src, _, _)| *src == source)
            .map(|(_, _, c)| c)
            .sum()
    }

    /// Iterate in canonical (source, destination) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.counts
            .iter()
            .map(|((src, dst), c)| (src.as_str(), dst.as_str(), *c))
    }
}

impl From<TransitionCounts> for Vec<TransitionCount> {
    fn from(counts: TransitionCounts) -> Self {
        counts
            .counts
            .into_iter()
            .map(|((source, destination), count)| TransitionCount { source, destination, count })
            .collect()
    }
}

impl From<Vec<TransitionCount>> for TransitionCounts {
    fn from(rows: Vec<TransitionCount>) -> Self {
        let mut counts = TransitionCounts::new();
        for row in rows {
            counts.add(&row.source, &row.destination, row.count);
        }
        counts
    }
}

/// Every distinct state label seen, always including the reserved three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVocabulary {
    states: BTreeSet<StateLabel>,
}

impl Default for StateVocabulary {
    fn default() -> Self {
        Self {
            states: RESERVED_STATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StateVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: &str) {
        if !self.states.contains(state) {
            self.states.insert(state.to_string());
        }
    }

    pub fn contains(&self, state: &str) -> bool {
        self.states.contains(state)
    }

    pub fn merge(&mut self, other: &StateVocabulary) {
        for state in &other.states {
            self.insert(state);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Canonical lexicographic ordering.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.states.iter().map(String::as_str)
    }
}

/// Output of one counting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedTransitions {
    pub counts:     TransitionCounts,
    pub vocabulary: StateVocabulary,
    /// Events consumed.
    pub events:     u64,
    /// Distinct customer runs seen (a customer id change starts a new run).
    pub customers:  u64,
}

impl CountedTransitions {
    pub fn merge(&mut self, other: &CountedTransitions) {
        self.counts.merge(&other.counts);
        self.vocabulary.merge(&other.vocabulary);
        self.events += other.events;
        self.customers += other.customers;
    }
}

/// Streaming counter. Feed events with `observe`, then call `finish`.
#[derive(Debug)]
pub struct TransitionCounter {
    current_customer: Option<CustomerId>,
    cursor:           StateLabel,
    out:              CountedTransitions,
}

impl TransitionCounter {
    pub fn new() -> Self {
        Self {
            current_customer: None,
            cursor: START.to_string(),
            out: CountedTransitions::default(),
        }
    }

    pub fn observe(&mut self, event: &TouchEvent) {
        if self.current_customer.as_deref() != Some(event.customer_id.as_str()) {
            self.close_dangling_journey();
            self.current_customer = Some(event.customer_id.clone());
            self.cursor = START.to_string();
            self.out.customers += 1;
        }

        self.out.counts.record(&self.cursor, &event.state);
        self.out.vocabulary.insert(&self.cursor);
        self.out.vocabulary.insert(&event.state);
        self.out.events += 1;

        self.cursor = if is_absorbing(&event.state) {
            START.to_string()
        } else {
            event.state.clone()
        };
    }

    pub fn finish(mut self) -> CountedTransitions {
        self.close_dangling_journey();
        self.out
    }

    fn close_dangling_journey(&mut self) {
        if self.current_customer.is_some() && self.cursor != START {
            self.out.counts.record(&self.cursor, NO_CONVERSION);
        }
    }
}

impl Default for TransitionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Count every transition in `source` in a single pass.
pub fn count_transitions<S: EventSource + ?Sized>(source: &S) -> AttrResult<CountedTransitions> {
    let mut counter = TransitionCounter::new();
    for event in source.events()? {
        counter.observe(&event?);
    }
    let counted = counter.finish();
    log::info!(
        "counter: source={} events={} customers={} distinct_transitions={} states={}",
        source.name(),
        counted.events,
        counted.customers,
        counted.counts.len(),
        counted.vocabulary.len()
    );
    Ok(counted)
}
