//! Markov-chain removal-effect attribution.
//!
//! Sorted touch events → transition counts → row-stochastic matrix →
//! absorption probabilities → per-channel removal effects.

pub mod absorption;
pub mod config;
pub mod counter;
pub mod economics;
pub mod engine;
pub mod error;
pub mod event;
pub mod journey;
pub mod matrix;
pub mod removal;
pub mod rng;
pub mod source;
pub mod store;
pub mod synth;
pub mod types;

pub use error::{AttrError, AttrResult};
