//! Core data types shared by every stage of the decode pipeline.
//!
//! # Data Flow
//!
//! ```text
//! ScaleLink --bytes--> StreamReassembler --Frame--> FrameDecoder --DecodedReading-->
//!     normalizer --f64--> ChangeFilter --EmittedWeight--> broadcast::channel<WeightEvent>
//! ```
//!
//! `DecodedReading` is immutable once produced: its fields are private and
//! only exposed through accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScaleError;

// =============================================================================
// Decimal places
// =============================================================================

/// Number of fractional digits in a raw magnitude, always within `0..=4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DecimalPlaces(u8);

impl DecimalPlaces {
    /// Largest decimal-position count any supported firmware signals.
    pub const MAX: u8 = 4;

    /// Zero fractional digits.
    pub const ZERO: DecimalPlaces = DecimalPlaces(0);
    /// Two fractional digits (hundredths).
    pub const TWO: DecimalPlaces = DecimalPlaces(2);
    /// Three fractional digits (thousandths).
    pub const THREE: DecimalPlaces = DecimalPlaces(3);

    /// Validates a decimal count.
    pub fn new(places: u8) -> Result<Self, ScaleError> {
        if places > Self::MAX {
            return Err(ScaleError::InvalidDecimalPlaces(places));
        }
        Ok(Self(places))
    }

    /// Decodes an ASCII decimal-position code (`'0'..='4'`).
    pub fn from_ascii(code: u8) -> Option<Self> {
        match code {
            b'0'..=b'4' => Some(Self(code - b'0')),
            _ => None,
        }
    }

    /// Raw count.
    pub fn get(self) -> u8 {
        self.0
    }

    /// `10^places`, the divisor that turns a raw magnitude into a weight.
    pub fn divisor(self) -> f64 {
        10f64.powi(i32::from(self.0))
    }

    /// One unit at this resolution, `10^-places`.
    pub fn epsilon(self) -> f64 {
        1.0 / self.divisor()
    }
}

impl TryFrom<u8> for DecimalPlaces {
    type Error = ScaleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DecimalPlaces> for u8 {
    fn from(value: DecimalPlaces) -> Self {
        value.0
    }
}

impl fmt::Display for DecimalPlaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Readings
// =============================================================================

/// Sign carried by a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    /// `-` is negative; every other marker byte is treated as positive.
    pub fn from_marker(byte: u8) -> Self {
        if byte == b'-' {
            Sign::Negative
        } else {
            Sign::Positive
        }
    }

    /// Applies the sign to a magnitude.
    pub fn apply(self, magnitude: f64) -> f64 {
        match self {
            Sign::Positive => magnitude,
            Sign::Negative => -magnitude,
        }
    }
}

/// One weight sample decoded from a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedReading {
    sign: Sign,
    raw_magnitude: u64,
    decimal_places: DecimalPlaces,
    timestamp: DateTime<Utc>,
}

impl DecodedReading {
    /// Creates a reading stamped with the current time.
    pub fn new(sign: Sign, raw_magnitude: u64, decimal_places: DecimalPlaces) -> Self {
        Self::at(sign, raw_magnitude, decimal_places, Utc::now())
    }

    /// Creates a reading with an explicit timestamp.
    pub fn at(
        sign: Sign,
        raw_magnitude: u64,
        decimal_places: DecimalPlaces,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sign,
            raw_magnitude,
            decimal_places,
            timestamp,
        }
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn raw_magnitude(&self) -> u64 {
        self.raw_magnitude
    }

    pub fn decimal_places(&self) -> DecimalPlaces {
        self.decimal_places
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A reading that passed the change filter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmittedWeight {
    /// Signed weight.
    pub value: f64,
    /// Resolution the value was decoded at.
    pub decimal_places: u8,
}

impl fmt::Display for EmittedWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", usize::from(self.decimal_places), self.value)
    }
}

/// Event published on the weight channel, one per accepted change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightEvent {
    /// Endpoint the reading came from (e.g. "/dev/ttyUSB0").
    pub endpoint: String,
    /// Signed weight.
    pub value: f64,
    /// Resolution the value was decoded at.
    pub decimal_places: u8,
    /// When the frame was decoded.
    pub timestamp: DateTime<Utc>,
}

impl WeightEvent {
    pub(crate) fn new(endpoint: &str, weight: EmittedWeight, timestamp: DateTime<Utc>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            value: weight.value,
            decimal_places: weight.decimal_places,
            timestamp,
        }
    }

    /// The `{value, decimal_places}` payload.
    pub fn weight(&self) -> EmittedWeight {
        EmittedWeight {
            value: self.value,
            decimal_places: self.decimal_places,
        }
    }
}

// =============================================================================
// Session state
// =============================================================================

/// Top-level lifecycle state of a scale session.
///
/// ```text
/// Idle --start--> Opening --open + timer armed--> Active --stop / transport error--> Closed
///                    ^                                                             |
///                    +----------------------------start----------------------------+
/// ```
///
/// There is no automatic `Closed -> Opening` transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opening,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_places_bounds() {
        assert!(DecimalPlaces::new(4).is_ok());
        assert!(matches!(
            DecimalPlaces::new(5),
            Err(ScaleError::InvalidDecimalPlaces(5))
        ));
        assert_eq!(DecimalPlaces::from_ascii(b'3'), Some(DecimalPlaces::THREE));
        assert_eq!(DecimalPlaces::from_ascii(b'5'), None);
        assert_eq!(DecimalPlaces::from_ascii(b'x'), None);
    }

    #[test]
    fn test_epsilon_matches_resolution() {
        assert!((DecimalPlaces::TWO.epsilon() - 0.01).abs() < 1e-12);
        assert!((DecimalPlaces::THREE.epsilon() - 0.001).abs() < 1e-12);
        assert!((DecimalPlaces::ZERO.epsilon() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sign_markers() {
        assert_eq!(Sign::from_marker(b'-'), Sign::Negative);
        assert_eq!(Sign::from_marker(b'+'), Sign::Positive);
        assert_eq!(Sign::from_marker(b' '), Sign::Positive);
        assert_eq!(Sign::Negative.apply(1.5), -1.5);
    }

    #[test]
    fn test_emitted_weight_display_uses_resolution() {
        let w = EmittedWeight {
            value: 10.0,
            decimal_places: 2,
        };
        assert_eq!(w.to_string(), "10.00");
    }

    #[test]
    fn test_decimal_places_serde_rejects_out_of_range() {
        let ok: DecimalPlaces = serde_json::from_str("3").unwrap();
        assert_eq!(ok, DecimalPlaces::THREE);
        assert!(serde_json::from_str::<DecimalPlaces>("7").is_err());
    }
}
