//! Framing conventions and the serial line settings each one implies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Start-of-text marker opening a delimited frame.
pub const STX: u8 = 0x02;
/// End-of-text marker closing a delimited frame.
pub const ETX: u8 = 0x03;
/// Enquiry byte; asks a polled scale for its current reading.
pub const ENQ: u8 = 0x05;
/// Carriage return; trailing marker of a text token.
pub const CR: u8 = 0x0D;

/// Framing convention spoken by the scale firmware.
///
/// Chosen once at session start. Each mode fixes the line settings, whether
/// the scale must be polled, and which decoder handles its frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// `STX sign digits ETX`, no decimal marker. Decimal places are inferred.
    #[default]
    DelimitedAscii,
    /// Continuous `sign digits dp CR` text tokens on a 7-bit line.
    TextToken,
    /// `STX sign 6*digit dp ETX` with an explicit decimal-position digit.
    DelimitedBinary,
}

impl FramingMode {
    /// All supported modes.
    pub const ALL: [FramingMode; 3] = [
        FramingMode::DelimitedAscii,
        FramingMode::TextToken,
        FramingMode::DelimitedBinary,
    ];

    /// Line settings used when opening a session in this mode.
    pub fn line_settings(self) -> LineSettings {
        match self {
            FramingMode::DelimitedAscii | FramingMode::DelimitedBinary => LineSettings {
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
            },
            FramingMode::TextToken => LineSettings {
                baud_rate: 1200,
                data_bits: 7,
                stop_bits: 1,
                parity: Parity::None,
            },
        }
    }

    /// Whether the scale only transmits when it receives a poll byte.
    pub fn is_polled(self) -> bool {
        match self {
            FramingMode::DelimitedAscii | FramingMode::DelimitedBinary => true,
            FramingMode::TextToken => false,
        }
    }

    /// Configuration name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            FramingMode::DelimitedAscii => "delimited_ascii",
            FramingMode::TextToken => "text_token",
            FramingMode::DelimitedBinary => "delimited_binary",
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FramingMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown framing mode '{}' (expected delimited_ascii, text_token or delimited_binary)",
                    s
                )
            })
    }
}

/// Parity modes for serial communication
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn short(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// One of the fixed (baud, data bits, stop bits, parity) tuples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud {}-{}-{}",
            self.baud_rate,
            self.data_bits,
            self.parity.short(),
            self.stop_bits
        )
    }
}
