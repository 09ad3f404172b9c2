//! Mode-specific frame decoders.
//!
//! Decoders are a closed set chosen once per session. Frames of the
//! delimited ASCII mode carry no decimal marker, so their decimal places
//! come from the [`DecimalPolicy`]. The other two modes carry an explicit
//! decimal-position digit and always use it.
//!
//! ## Frame layouts
//!
//! ```text
//! delimited_ascii   STX  sign  d d d d d d d d [d] ...  ETX
//!                   (digit run ends at the first non-digit or the ninth digit)
//! delimited_binary  STX  sign  d d d d d d  dp          ETX
//! text_token             sign  d d d d d d  dp  CR
//! ```

use crate::core::{DecimalPlaces, DecodedReading, Sign};
use crate::error::FrameError;
use crate::measurement::normalizer;

use super::mode::{FramingMode, CR};
use super::reassembler::{Frame, FIXED_DIGIT_COUNT, TEXT_TOKEN_LEN};

/// Fewest leading digits a delimited ASCII payload must carry.
pub const ASCII_MIN_DIGITS: usize = 8;
/// Shortest delimited ASCII payload: sign plus eight digits.
pub const ASCII_MIN_PAYLOAD: usize = 1 + ASCII_MIN_DIGITS;
/// Most digits read from a delimited ASCII payload.
pub const ASCII_MAX_DIGITS: usize = 9;
/// Binary payload length: sign, six digits, decimal-position digit.
pub const BINARY_PAYLOAD_LEN: usize = 1 + FIXED_DIGIT_COUNT + 1;

/// How decimal places are resolved for frames without a decimal marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecimalPolicy {
    /// Divisor heuristic (100 first, then 1000, else 100).
    #[default]
    Heuristic,
    /// Always use this many decimal places.
    Forced(DecimalPlaces),
}

/// Decoder selected for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDecoder {
    /// Sign and digit run only; decimal places from the policy.
    DelimitedAscii { policy: DecimalPolicy },
    /// Fixed-width text token with a decimal-position code.
    TextToken,
    /// Shape-validated binary frame with a decimal-position digit.
    DelimitedBinary,
}

impl FrameDecoder {
    /// Builds the decoder for `mode`.
    pub fn for_mode(mode: FramingMode, policy: DecimalPolicy) -> Self {
        match mode {
            FramingMode::DelimitedAscii => FrameDecoder::DelimitedAscii { policy },
            FramingMode::TextToken => FrameDecoder::TextToken,
            FramingMode::DelimitedBinary => FrameDecoder::DelimitedBinary,
        }
    }

    pub fn mode(&self) -> FramingMode {
        match self {
            FrameDecoder::DelimitedAscii { .. } => FramingMode::DelimitedAscii,
            FrameDecoder::TextToken => FramingMode::TextToken,
            FrameDecoder::DelimitedBinary => FramingMode::DelimitedBinary,
        }
    }

    /// Decodes one frame.
    pub fn decode(&self, frame: &Frame<'_>) -> Result<DecodedReading, FrameError> {
        let payload = frame.payload();
        match self {
            FrameDecoder::DelimitedAscii { policy } => decode_implicit(payload, *policy),
            FrameDecoder::TextToken => {
                if payload.len() != TEXT_TOKEN_LEN {
                    return Err(FrameError::WrongLength {
                        len: payload.len(),
                        expected: TEXT_TOKEN_LEN,
                    });
                }
                if payload[TEXT_TOKEN_LEN - 1] != CR {
                    return Err(FrameError::MissingTerminator);
                }
                decode_explicit(&payload[..TEXT_TOKEN_LEN - 1])
            }
            FrameDecoder::DelimitedBinary => decode_explicit(payload),
        }
    }
}

/// Checks the binary frame shape: sign, six digits, one decimal digit.
pub(crate) fn validate_binary_shape(payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() != BINARY_PAYLOAD_LEN {
        return Err(FrameError::WrongLength {
            len: payload.len(),
            expected: BINARY_PAYLOAD_LEN,
        });
    }
    let sign = payload[0];
    if sign.is_ascii_control() || !sign.is_ascii() {
        return Err(FrameError::InvalidSign(sign));
    }
    check_digits(&payload[1..=FIXED_DIGIT_COUNT], 1)?;
    let code = payload[BINARY_PAYLOAD_LEN - 1];
    DecimalPlaces::from_ascii(code).ok_or(FrameError::InvalidDecimalCode(code))?;
    Ok(())
}

/// `sign + 6 digits + decimal code`.
fn decode_explicit(payload: &[u8]) -> Result<DecodedReading, FrameError> {
    validate_binary_shape(payload)?;
    let sign = Sign::from_marker(payload[0]);
    let magnitude = parse_magnitude(&payload[1..=FIXED_DIGIT_COUNT], 1)?;
    let code = payload[BINARY_PAYLOAD_LEN - 1];
    let places = DecimalPlaces::from_ascii(code).ok_or(FrameError::InvalidDecimalCode(code))?;
    Ok(DecodedReading::new(sign, magnitude, places))
}

/// `sign + 8..=9 digits`; a unit or status trailer after the digit run is
/// ignored, but the run itself must hold at least eight digits.
fn decode_implicit(payload: &[u8], policy: DecimalPolicy) -> Result<DecodedReading, FrameError> {
    if payload.len() < ASCII_MIN_PAYLOAD {
        return Err(FrameError::TooShort {
            len: payload.len(),
            min: ASCII_MIN_PAYLOAD,
        });
    }
    let sign = Sign::from_marker(payload[0]);
    let window = &payload[1..payload.len().min(1 + ASCII_MAX_DIGITS)];
    let run = window.iter().take_while(|b| b.is_ascii_digit()).count();
    if run < ASCII_MIN_DIGITS {
        return Err(FrameError::NonDigit {
            byte: window[run],
            offset: 1 + run,
        });
    }
    let magnitude = parse_magnitude(&window[..run], 1)?;
    let places = match policy {
        DecimalPolicy::Heuristic => normalizer::infer_decimal_places(magnitude),
        DecimalPolicy::Forced(places) => places,
    };
    Ok(DecodedReading::new(sign, magnitude, places))
}

fn check_digits(digits: &[u8], base_offset: usize) -> Result<(), FrameError> {
    match digits.iter().position(|b| !b.is_ascii_digit()) {
        Some(i) => Err(FrameError::NonDigit {
            byte: digits[i],
            offset: base_offset + i,
        }),
        None => Ok(()),
    }
}

fn parse_magnitude(digits: &[u8], base_offset: usize) -> Result<u64, FrameError> {
    check_digits(digits, base_offset)?;
    digits.iter().try_fold(0u64, |acc, &b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or(FrameError::MagnitudeOverflow)
    })
}
