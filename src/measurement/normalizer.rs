//! Weight normalization: integer magnitude + sign + decimal places -> `f64`.
//!
//! Also home of the decimal-place heuristic used by firmware that sends no
//! decimal marker. The heuristic is deliberately simple and must stay that
//! way so operators can predict what the display will show:
//!
//! 1. `magnitude / 100` inside `0..=500` -> two decimal places
//! 2. else `magnitude / 1000` inside `0..=500` -> three decimal places
//! 3. else two decimal places
//!
//! A magnitude plausible under both divisors resolves to two places.

use crate::core::{DecimalPlaces, DecodedReading};

/// Upper bound (inclusive) of the plausible operating range, in display units.
pub const PLAUSIBLE_MAX: f64 = 500.0;

/// Resolves decimal places for a frame without a decimal marker.
pub fn infer_decimal_places(magnitude: u64) -> DecimalPlaces {
    let raw = magnitude as f64;
    if is_plausible(raw / 100.0) {
        DecimalPlaces::TWO
    } else if is_plausible(raw / 1000.0) {
        DecimalPlaces::THREE
    } else {
        DecimalPlaces::TWO
    }
}

fn is_plausible(value: f64) -> bool {
    (0.0..=PLAUSIBLE_MAX).contains(&value)
}

/// Signed weight for a decoded reading.
pub fn normalize(reading: &DecodedReading) -> f64 {
    let magnitude = reading.raw_magnitude() as f64 / reading.decimal_places().divisor();
    reading.sign().apply(magnitude)
}
