//! The per-session decode pipeline.
//!
//! One `DecodePipeline` holds every piece of session-scoped decode state:
//! the reassembly buffer, the decoder chosen at session start and the
//! change-filter baseline. It is owned by exactly one session task, so the
//! whole pipeline is advanced under a single owner and a frame can never be
//! filtered against a baseline from another interleaving.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::core::{DecodedReading, EmittedWeight};
use crate::framing::{BufferLimits, DecimalPolicy, FrameDecoder, FramingMode, StreamReassembler};
use crate::measurement::{normalize, ChangeFilter};

/// Running totals for one pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Bytes fed into the pipeline.
    pub bytes: u64,
    /// Frames decoded into readings.
    pub decoded: u64,
    /// Frames dropped as malformed, by the reassembler or the decoder.
    pub dropped: u64,
    /// Times a reassembly buffer was trimmed to its tail.
    pub trims: u64,
    /// Weights that passed the change filter.
    pub emitted: u64,
}

/// An accepted weight together with the time its frame was decoded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Emission {
    pub weight: EmittedWeight,
    pub timestamp: DateTime<Utc>,
}

/// Reassembler -> decoder -> normalizer -> change filter.
pub struct DecodePipeline {
    reassembler: StreamReassembler,
    decoder: FrameDecoder,
    filter: ChangeFilter,
    bytes: u64,
    decoded: u64,
    decode_failures: u64,
    emitted: u64,
}

impl DecodePipeline {
    pub fn new(mode: FramingMode, policy: DecimalPolicy, limits: BufferLimits) -> Self {
        Self {
            reassembler: StreamReassembler::new(mode, limits),
            decoder: FrameDecoder::for_mode(mode, policy),
            filter: ChangeFilter::new(),
            bytes: 0,
            decoded: 0,
            decode_failures: 0,
            emitted: 0,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.decoder.mode()
    }

    pub fn decoder(&self) -> FrameDecoder {
        self.decoder
    }

    /// Feeds a chunk of raw bytes and returns the weights to publish.
    pub fn consume(&mut self, bytes: &[u8]) -> Vec<Emission> {
        self.bytes += bytes.len() as u64;

        let mut readings: Vec<DecodedReading> = Vec::new();
        let decoder = self.decoder;
        let decode_failures = &mut self.decode_failures;
        self.reassembler.consume(bytes, |frame| match decoder.decode(&frame) {
            Ok(reading) => readings.push(reading),
            Err(e) => {
                trace!(error = %e, mode = %frame.mode(), "Dropping malformed frame");
                *decode_failures += 1;
            }
        });

        self.decoded += readings.len() as u64;
        let mut emissions = Vec::new();
        for reading in readings {
            let value = normalize(&reading);
            if let Some(weight) = self.filter.accept(value, reading.decimal_places()) {
                self.emitted += 1;
                emissions.push(Emission {
                    weight,
                    timestamp: reading.timestamp(),
                });
            }
        }
        emissions
    }

    /// Clears buffered bytes and the change-filter baseline.
    pub fn reset(&mut self) {
        self.reassembler.reset();
        self.filter.reset();
    }

    /// Bytes waiting for a terminator.
    pub fn buffered_len(&self) -> usize {
        self.reassembler.buffered_len()
    }

    /// Last emitted value, if any.
    pub fn baseline(&self) -> Option<f64> {
        self.filter.baseline()
    }

    pub fn stats(&self) -> PipelineStats {
        let reassembly = self.reassembler.stats();
        PipelineStats {
            bytes: self.bytes,
            decoded: self.decoded,
            dropped: reassembly.rejected + self.decode_failures,
            trims: reassembly.trims,
            emitted: self.emitted,
        }
    }
}
