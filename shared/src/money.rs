//! Money helpers
//!
//! All amounts are KSh with 2 decimal places, carried as [`Decimal`] end to
//! end. Floating point only appears at the wire boundary (gateway payloads).

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Round to 2 decimal places (half-up, matching receipt arithmetic).
pub fn round2(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a wire-side f64 amount into a 2-dp Decimal.
///
/// Returns `None` for NaN/infinite input so malformed gateway payloads are
/// rejected instead of silently becoming zero.
pub fn from_f64(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }
    Decimal::from_f64(v).map(round2)
}

/// Convert a Decimal to f64 for wire payloads.
pub fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}
