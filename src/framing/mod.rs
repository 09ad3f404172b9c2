//! Serial framing for scale protocols.
//!
//! - [`mode`]: the supported framing conventions and their line settings
//! - [`reassembler`]: bounded buffering and frame extraction
//! - [`decoder`]: per-mode frame decoding into [`DecodedReading`](crate::core::DecodedReading)

pub mod decoder;
pub mod mode;
pub mod reassembler;

pub use decoder::{DecimalPolicy, FrameDecoder};
pub use mode::{FramingMode, LineSettings, Parity, CR, ENQ, ETX, STX};
pub use reassembler::{BufferLimits, Frame, ReassemblyStats, StreamReassembler};
