//! Push Frame Decoder
//!
//! The exchange does not guarantee one framing for its binary pushes. A frame
//! may be a bare wrapper, carry the channel name and a `0x00` delimiter in
//! front, carry a varint or fixed-length prefix, be gzip-compressed, or some
//! combination of these.
//!
//! Rather than guess, the decoder derives an ordered list of candidate start
//! offsets from a fixed set of strategies and returns the first candidate
//! that parses as a meaningful wrapper:
//!
//! | Order | Strategy | Candidate |
//! |-------|----------|-----------|
//! | a | [`CandidateStrategy::AfterDelimiter`] | bytes after a `channel\0` prefix |
//! | b | [`CandidateStrategy::WholeBuffer`] | the whole frame |
//! | c | [`CandidateStrategy::VarintPrefix`] | frame minus a leading varint |
//! | d | [`CandidateStrategy::FixedPrefix`] | frame minus 5 bytes |
//! | e | [`CandidateStrategy::DelimiterSkip`] | 1..=5 bytes past the delimiter |
//! | f | [`CandidateStrategy::TagByte`] | each `0x0A` in the first 128 bytes |
//!
//! Candidates with the same length and leading bytes are tried once.
//! Candidates that start with the gzip magic are inflated first; a corrupt
//! stream disqualifies only that candidate.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message;

use crate::domain::streaming::DecodedWrapper;
use crate::infrastructure::exchange::messages::ControlAck;
use crate::infrastructure::exchange::wire::PushWrapper;

/// Separator between the channel name and the payload.
pub const DELIMITER: u8 = 0x00;

/// Key byte of wrapper field 1 (`channel`, length-delimited).
pub const WRAPPER_TAG: u8 = 0x0A;

/// Upper bound on inflated frame size.
pub const MAX_DECOMPRESSED_BYTES: usize = 4 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const FIXED_PREFIX_LEN: usize = 5;
const MAX_DELIMITER_SKIP: usize = 5;
const TAG_SCAN_WINDOW: usize = 128;
const FINGERPRINT_LEN: usize = 8;
const PREVIEW_LEN: usize = 48;

// =============================================================================
// Results
// =============================================================================

/// Successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A push frame.
    Wrapper(DecodedWrapper),
    /// A JSON acknowledgement delivered as a binary frame.
    Control(ControlAck),
}

/// Every candidate failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("undecodable frame ({len} bytes, {candidates_tried} candidates tried): {preview}")]
pub struct DecodeFailure {
    /// Frame length.
    pub len: usize,
    /// Distinct candidates attempted.
    pub candidates_tried: usize,
    /// Printable rendering of the leading bytes.
    pub preview: String,
}

/// Why a single candidate was rejected.
#[derive(Debug, thiserror::Error)]
enum CandidateError {
    #[error("gzip inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("inflated frame exceeds size limit")]
    TooLarge,

    #[error("protobuf parse failed: {0}")]
    Parse(#[from] prost::DecodeError),

    #[error("wrapper has no channel, symbol, or deals")]
    Empty,
}

// =============================================================================
// Candidates
// =============================================================================

/// Where a candidate slice starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStrategy {
    /// Right after the first delimiter byte.
    AfterDelimiter,
    /// Offset zero.
    WholeBuffer,
    /// After a leading base-128 varint.
    VarintPrefix,
    /// After a fixed five-byte prefix.
    FixedPrefix,
    /// `n` bytes past the delimiter's successor.
    DelimiterSkip(usize),
    /// At a wrapper tag byte found by scanning.
    TagByte(usize),
}

/// One candidate slice and the strategy that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    /// Producing strategy.
    pub strategy: CandidateStrategy,
    /// Slice to parse.
    pub bytes: &'a [u8],
}

/// Ordered, de-duplicated candidate slices for `frame`.
#[must_use]
pub fn candidates(frame: &[u8]) -> Vec<Candidate<'_>> {
    let delimiter = channel_delimiter(frame);
    let mut starts: Vec<(CandidateStrategy, usize)> = Vec::new();

    if let Some(pos) = delimiter {
        starts.push((CandidateStrategy::AfterDelimiter, pos + 1));
    }

    starts.push((CandidateStrategy::WholeBuffer, 0));

    if let Some(consumed) = varint_prefix_len(frame) {
        starts.push((CandidateStrategy::VarintPrefix, consumed));
    }

    if frame.len() > FIXED_PREFIX_LEN {
        starts.push((CandidateStrategy::FixedPrefix, FIXED_PREFIX_LEN));
    }

    if let Some(pos) = delimiter {
        for skip in 1..=MAX_DELIMITER_SKIP {
            starts.push((CandidateStrategy::DelimiterSkip(skip), pos + 1 + skip));
        }
    }

    starts.extend(
        frame
            .iter()
            .take(TAG_SCAN_WINDOW)
            .enumerate()
            .filter(|&(_, &b)| b == WRAPPER_TAG)
            .map(|(pos, _)| (CandidateStrategy::TagByte(pos), pos)),
    );

    let mut seen = HashSet::new();
    starts
        .into_iter()
        .filter(|&(_, start)| start < frame.len())
        .map(|(strategy, start)| Candidate {
            strategy,
            bytes: &frame[start..],
        })
        .filter(|c| {
            let head = &c.bytes[..c.bytes.len().min(FINGERPRINT_LEN)];
            seen.insert((c.bytes.len(), head.to_vec()))
        })
        .collect()
}

/// Position of the delimiter, if it follows a printable channel name.
///
/// Protobuf bodies routinely contain `0x00`; only a non-empty printable
/// ASCII prefix makes the first one a delimiter.
fn channel_delimiter(frame: &[u8]) -> Option<usize> {
    let pos = frame.iter().position(|&b| b == DELIMITER)?;
    let channel = &frame[..pos];
    (!channel.is_empty() && channel.iter().all(|b| matches!(b, 0x20..=0x7E))).then_some(pos)
}

/// Bytes consumed by a leading varint, if one parses and leaves a remainder.
fn varint_prefix_len(frame: &[u8]) -> Option<usize> {
    let mut rest = frame;
    prost::encoding::decode_varint(&mut rest).ok()?;
    let consumed = frame.len() - rest.len();
    (consumed > 0 && !rest.is_empty()).then_some(consumed)
}

// =============================================================================
// Decoder
// =============================================================================

/// Stateless decoder for push frames.
#[derive(Debug, Default, Clone)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Create a new frame decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one binary frame.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailure` when no candidate yields a meaningful wrapper.
    pub fn decode(&self, frame: &[u8]) -> Result<Decoded, DecodeFailure> {
        if matches!(frame.first(), Some(b'{' | b'[')) {
            if let Ok(ack) = serde_json::from_slice::<ControlAck>(frame) {
                return Ok(Decoded::Control(ack));
            }
        }

        let candidates = candidates(frame);
        let decoded = candidates
            .iter()
            .find_map(|candidate| Self::decode_candidate(candidate.bytes).ok());

        decoded
            .map(|wrapper| Decoded::Wrapper(wrapper.into()))
            .ok_or_else(|| DecodeFailure {
                len: frame.len(),
                candidates_tried: candidates.len(),
                preview: preview(frame),
            })
    }

    fn decode_candidate(bytes: &[u8]) -> Result<PushWrapper, CandidateError> {
        let wrapper = if bytes.starts_with(&GZIP_MAGIC) {
            PushWrapper::decode(inflate(bytes)?.as_slice())?
        } else {
            PushWrapper::decode(bytes)?
        };

        if wrapper.is_meaningful() {
            Ok(wrapper)
        } else {
            Err(CandidateError::Empty)
        }
    }
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, CandidateError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_DECOMPRESSED_BYTES as u64 + 1)
        .read_to_end(&mut out)?;

    if out.len() > MAX_DECOMPRESSED_BYTES {
        return Err(CandidateError::TooLarge);
    }
    Ok(out)
}

/// Printable rendering of the first bytes of a frame.
fn preview(frame: &[u8]) -> String {
    let head = &frame[..frame.len().min(PREVIEW_LEN)];
    let mut out: String = head
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect();
    if frame.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
