//! Shared primitive types and reserved state labels.

/// A customer identifier as supplied by the ingestion layer.
pub type CustomerId = String;

/// A state label: a channel name or one of the reserved labels below.
pub type StateLabel = String;

/// Implicit entry state of every journey. Never appears in input events.
pub const START: &str = "Start";

/// Absorbing state reached when a journey ends in a purchase.
pub const CONVERSION: &str = "Conversion";

/// Absorbing state for journeys that stop being observed.
pub const NO_CONVERSION: &str = "No_Conversion";

/// The canonical absorbing set, in canonical (sorted) order.
pub const ABSORBING_STATES: [&str; 2] = [CONVERSION, NO_CONVERSION];

/// The three labels every vocabulary and matrix must carry.
pub const RESERVED_STATES: [&str; 3] = [CONVERSION, NO_CONVERSION, START];

pub fn is_absorbing(state: &str) -> bool {
    ABSORBING_STATES.contains(&state)
}

/// A marketing channel is any state that is neither `Start` nor absorbing.
pub fn is_channel(state: &str) -> bool {
    state != START && !is_absorbing(state)
}
