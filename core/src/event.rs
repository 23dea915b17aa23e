//! Touch events: the only input the engine consumes.
//!
//! RULE: Events are produced by the ingestion layer, already sorted by
//! (customer_id, timestamp). Nothing in this crate re-sorts or checks them.

use crate::{
    error::{AttrError, AttrResult},
    types::{CustomerId, StateLabel, CONVERSION},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One observed touch: a channel exposure or a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub customer_id: CustomerId,
    pub timestamp:   DateTime<Utc>,
    pub state:       StateLabel,
}

impl TouchEvent {
    pub fn new(
        customer_id: impl Into<CustomerId>,
        timestamp: DateTime<Utc>,
        state: impl Into<StateLabel>,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            timestamp,
            state: state.into(),
        }
    }

    pub fn is_conversion(&self) -> bool {
        self.state == CONVERSION
    }
}

/// Fixed-width RFC 3339 rendering. Lexicographic order equals time order,
/// which the SQLite store relies on for ORDER BY.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> AttrResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AttrError::Validation(format!("bad timestamp '{raw}': {e}")))
}
