//! Stream reassembly: turns arbitrarily chunked serial bytes into frames.
//!
//! The reassembler owns the rolling byte buffer for a session. Frames are
//! handed to a callback as [`Frame`] values that borrow from that buffer,
//! so a frame can never outlive the bytes it was cut from. The buffer is
//! drained past each frame only after the callback returns.
//!
//! Two buffers exist:
//! - the frame buffer, used by the STX/ETX delimited modes;
//! - the text accumulator, scanned by the text-token mode.
//!
//! Both are capped. When a buffer grows past its capacity without yielding a
//! frame it is cut down to its most recent tail. That is the only defence
//! against a line that never sends a terminator, and each trim is counted.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::decoder::validate_binary_shape;
use super::mode::{FramingMode, CR, ETX, STX};

/// Width of a text token: sign, six digits, decimal code, CR.
pub const TEXT_TOKEN_LEN: usize = 9;
/// Number of digit bytes in a text token or a binary frame.
pub const FIXED_DIGIT_COUNT: usize = 6;

/// Size limits for a reassembly buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLimits {
    /// Hard cap; the buffer never stays longer than this after `consume`.
    pub capacity: usize,
    /// Tail length kept when the cap is exceeded.
    pub retain: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            capacity: 100,
            retain: 50,
        }
    }
}

impl BufferLimits {
    /// Limits with `retain` clamped to `capacity`.
    pub fn clamped(self) -> Self {
        Self {
            capacity: self.capacity,
            retain: self.retain.min(self.capacity),
        }
    }
}

/// A complete frame, borrowed from the reassembly buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    mode: FramingMode,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Builds a frame over an arbitrary payload. Mostly useful in tests.
    pub fn new(mode: FramingMode, payload: &'a [u8]) -> Self {
        Self { mode, payload }
    }

    /// Mode the frame was extracted under.
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes between the markers (delimited modes) or the whole token.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

/// Counters exposed for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Frames handed to the callback.
    pub frames: u64,
    /// Binary frames discarded by shape validation.
    pub rejected: u64,
    /// Times a buffer was cut back to its tail.
    pub trims: u64,
}

/// Rolling buffer plus the per-mode extraction rule.
pub struct StreamReassembler {
    mode: FramingMode,
    limits: BufferLimits,
    buffer: BytesMut,
    text: BytesMut,
    stats: ReassemblyStats,
}

impl StreamReassembler {
    /// Creates an empty reassembler for `mode`.
    pub fn new(mode: FramingMode, limits: BufferLimits) -> Self {
        let limits = limits.clamped();
        Self {
            mode,
            limits,
            buffer: BytesMut::with_capacity(limits.capacity),
            text: BytesMut::with_capacity(limits.capacity),
            stats: ReassemblyStats::default(),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes currently held for the active mode.
    pub fn buffered_len(&self) -> usize {
        match self.mode {
            FramingMode::TextToken => self.text.len(),
            FramingMode::DelimitedAscii | FramingMode::DelimitedBinary => self.buffer.len(),
        }
    }

    /// Bytes currently held for the active mode.
    pub fn buffered(&self) -> &[u8] {
        match self.mode {
            FramingMode::TextToken => &self.text,
            FramingMode::DelimitedAscii | FramingMode::DelimitedBinary => &self.buffer,
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Drops all buffered bytes. Counters are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.text.clear();
    }

    /// Appends `bytes` and hands every complete frame to `on_frame`.
    ///
    /// Returns the number of frames extracted by this call.
    pub fn consume<F>(&mut self, bytes: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Frame<'_>),
    {
        let before = self.stats.frames;
        match self.mode {
            FramingMode::DelimitedAscii | FramingMode::DelimitedBinary => {
                self.buffer.extend_from_slice(bytes);
                self.extract_delimited(&mut on_frame);
            }
            FramingMode::TextToken => {
                // 7-bit line; the eighth bit is noise if present at all.
                self.text.extend(bytes.iter().map(|b| b & 0x7F));
                self.extract_text_tokens(&mut on_frame);
            }
        }
        (self.stats.frames - before) as usize
    }

    fn extract_delimited<F>(&mut self, on_frame: &mut F)
    where
        F: FnMut(Frame<'_>),
    {
        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == STX) else {
                break;
            };
            let Some(end) = self.buffer[start + 1..]
                .iter()
                .position(|&b| b == ETX)
                .map(|offset| start + 1 + offset)
            else {
                break;
            };

            let payload = &self.buffer[start + 1..end];

            if self.mode == FramingMode::DelimitedBinary {
                if let Err(e) = validate_binary_shape(payload) {
                    trace!(error = %e, "Discarding binary frame that failed shape validation");
                    self.stats.rejected += 1;
                    // Resume at the next start marker inside the rejected span, if any.
                    let resume = self.buffer[start + 1..end]
                        .iter()
                        .position(|&b| b == STX)
                        .map(|offset| start + 1 + offset)
                        .unwrap_or(end + 1);
                    self.buffer.advance(resume);
                    continue;
                }
            }

            self.stats.frames += 1;
            on_frame(Frame::new(self.mode, payload));
            self.buffer.advance(end + 1);
        }

        Self::enforce_cap(&mut self.buffer, self.limits, &mut self.stats, self.mode);
    }

    fn extract_text_tokens<F>(&mut self, on_frame: &mut F)
    where
        F: FnMut(Frame<'_>),
    {
        while let Some(start) = find_text_token(&self.text) {
            let end = start + TEXT_TOKEN_LEN;
            self.stats.frames += 1;
            on_frame(Frame::new(self.mode, &self.text[start..end]));
            self.text.advance(end);
        }

        Self::enforce_cap(&mut self.text, self.limits, &mut self.stats, self.mode);
    }

    fn enforce_cap(
        buffer: &mut BytesMut,
        limits: BufferLimits,
        stats: &mut ReassemblyStats,
        mode: FramingMode,
    ) {
        if buffer.len() <= limits.capacity {
            return;
        }
        let dropped = buffer.len().saturating_sub(limits.retain);
        buffer.advance(dropped);
        stats.trims += 1;
        debug!(
            %mode,
            dropped,
            retained = buffer.len(),
            "Reassembly buffer exceeded capacity without a terminator; trimmed to tail"
        );
    }
}

/// Scans `window` for the first well-formed text token.
///
/// Bounded: one pass over at most `window.len() - TEXT_TOKEN_LEN + 1` start
/// positions, each checked against a fixed nine-byte shape.
fn find_text_token(window: &[u8]) -> Option<usize> {
    if window.len() < TEXT_TOKEN_LEN {
        return None;
    }
    (0..=window.len() - TEXT_TOKEN_LEN).find(|&i| is_text_token(&window[i..i + TEXT_TOKEN_LEN]))
}

fn is_text_token(candidate: &[u8]) -> bool {
    let (sign, rest) = match candidate.split_first() {
        Some(parts) => parts,
        None => return false,
    };
    matches!(sign, b'+' | b'-' | b' ')
        && rest[..FIXED_DIGIT_COUNT].iter().all(u8::is_ascii_digit)
        && matches!(rest[FIXED_DIGIT_COUNT], b'0'..=b'4')
        && rest[FIXED_DIGIT_COUNT + 1] == CR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(reassembler: &mut StreamReassembler, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        reassembler.consume(bytes, |f| frames.push(f.payload().to_vec()));
        frames
    }

    fn ascii() -> StreamReassembler {
        StreamReassembler::new(FramingMode::DelimitedAscii, BufferLimits::default())
    }

    #[test]
    fn test_single_delimited_frame() {
        let mut r = ascii();
        let frames = collect(&mut r, b"\x02+000012345\x03");
        assert_eq!(frames, vec![b"+000012345".to_vec()]);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut r = ascii();
        assert!(collect(&mut r, b"\x02+0000").is_empty());
        assert!(collect(&mut r, b"123").is_empty());
        let frames = collect(&mut r, b"45\x03\x02+00");
        assert_eq!(frames, vec![b"+000012345".to_vec()]);
        // Dangling start marker stays buffered.
        assert_eq!(r.buffered(), b"\x02+00");
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut r = ascii();
        let frames = collect(&mut r, b"junk\x02A\x03\x02B\x03\x02C\x03");
        assert_eq!(frames, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_end_marker_before_start_is_skipped() {
        let mut r = ascii();
        let frames = collect(&mut r, b"\x03\x03\x02+000000100\x03");
        assert_eq!(frames, vec![b"+000000100".to_vec()]);
    }

    #[test]
    fn test_buffer_cap_without_terminator() {
        let mut r = ascii();
        let mut noise = vec![STX];
        noise.extend(std::iter::repeat(b'7').take(149));
        assert!(collect(&mut r, &noise).is_empty());
        assert!(r.buffered_len() <= BufferLimits::default().capacity);
        assert_eq!(r.buffered_len(), BufferLimits::default().retain);
        assert_eq!(r.stats().trims, 1);

        // The start marker was in the discarded prefix, so a lone ETX yields nothing.
        assert!(collect(&mut r, &[ETX]).is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_buffer_trim_is_logged() {
        let mut r = ascii();
        collect(&mut r, &[b'9'; 120]);
        assert!(logs_contain("trimmed to tail"));
        assert!(logs_contain("dropped=70"));
    }

    #[test]
    fn test_binary_shape_rejection_does_not_block_next_frame() {
        let mut r = StreamReassembler::new(FramingMode::DelimitedBinary, BufferLimits::default());
        let frames = collect(&mut r, b"\x02+00a0002\x03\x02+0010002\x03");
        assert_eq!(frames, vec![b"+0010002".to_vec()]);
        assert_eq!(r.stats().rejected, 1);
    }

    #[test]
    fn test_binary_resumes_at_inner_start_marker() {
        let mut r = StreamReassembler::new(FramingMode::DelimitedBinary, BufferLimits::default());
        let frames = collect(&mut r, b"\x02+00\x02-0012503\x03");
        assert_eq!(frames, vec![b"-0012503".to_vec()]);
    }

    #[test]
    fn test_text_token_scan() {
        let mut r = StreamReassembler::new(FramingMode::TextToken, BufferLimits::default());
        let frames = collect(&mut r, b"ST,GS,+0012502\r\n-0000102\r");
        assert_eq!(frames, vec![b"+0012502\r".to_vec(), b"-0000102\r".to_vec()]);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_text_token_strips_high_bit() {
        let mut r = StreamReassembler::new(FramingMode::TextToken, BufferLimits::default());
        let token: Vec<u8> = b"+0000502\r".iter().map(|b| b | 0x80).collect();
        let frames = collect(&mut r, &token);
        assert_eq!(frames, vec![b"+0000502\r".to_vec()]);
    }

    #[test]
    fn test_text_accumulator_is_capped() {
        let limits = BufferLimits {
            capacity: 32,
            retain: 16,
        };
        let mut r = StreamReassembler::new(FramingMode::TextToken, limits);
        assert!(collect(&mut r, &[b'x'; 40]).is_empty());
        assert_eq!(r.buffered_len(), 16);
        // A token split across the trim boundary still completes.
        assert!(collect(&mut r, b"+00012").is_empty());
        let frames = collect(&mut r, b"31\r");
        assert_eq!(frames, vec![b"+0001231\r".to_vec()]);
    }

    #[test]
    fn test_retain_larger_than_capacity_is_clamped() {
        let limits = BufferLimits {
            capacity: 10,
            retain: 20,
        };
        let mut r = StreamReassembler::new(FramingMode::DelimitedAscii, limits);
        assert!(collect(&mut r, &[b'7'; 15]).is_empty());
        assert_eq!(r.buffered_len(), 10);
        assert_eq!(r.stats().trims, 1);

        let mut t = StreamReassembler::new(FramingMode::TextToken, limits);
        assert!(collect(&mut t, &[b'x'; 15]).is_empty());
        assert_eq!(t.buffered_len(), 10);
    }

    #[test]
    fn test_reset_clears_buffers() {
        let mut r = ascii();
        collect(&mut r, b"\x02+0001");
        r.reset();
        assert_eq!(r.buffered_len(), 0);
        assert!(collect(&mut r, b"23\x03").is_empty());
    }
}
