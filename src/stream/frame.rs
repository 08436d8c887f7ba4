//! Xinghuo stream frame decoder.
//!
//! The backend sends one `data:` line per increment. Content lines carry
//! Base64-encoded UTF-8 text; a few control lines carry sentinels or a
//! metadata block and must never reach the client.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use futures_util::Stream;
use pin_project_lite::pin_project;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::util::truncate_for_log;

pub const DATA_PREFIX: &str = "data:";
/// End-of-turn sentinel.
pub const END_SENTINEL: &str = "<end>";
/// Session-id sentinel.
pub const SID_SENTINEL: &str = "<sid>";
/// Base64 of `<deep_x1>`, which opens a structured metadata block.
pub const METADATA_PREFIX: &str = "PGRlZXBfeDE+";

const LOG_PAYLOAD_MAX_BYTES: usize = 256;

/// Standard alphabet, padding required, non-zero trailing bits accepted.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[inline]
fn is_base64_symbol(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=')
}

/// Decode a content payload, ignoring bytes outside the Base64 alphabet
/// (embedded whitespace included).
fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if payload.bytes().all(is_base64_symbol) {
        return PAYLOAD_ENGINE.decode(payload);
    }
    let symbols: Vec<u8> = payload.bytes().filter(|b| is_base64_symbol(*b)).collect();
    PAYLOAD_ENGINE.decode(symbols)
}

/// A single line that failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Classification of one raw upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Not a `data:` line.
    Noise,
    /// End-of-turn or session-id sentinel.
    Sentinel,
    /// Metadata block marker.
    Metadata,
    /// Decoded to an empty string.
    Empty,
    Content(String),
}

/// Decode one raw upstream line.
///
/// # Errors
///
/// Returns [`FrameDecodeError`] when a content line is not valid Base64 or
/// does not decode to UTF-8. Bytes outside the Base64 alphabet are dropped
/// before decoding, so only bad length or padding is a Base64 error.
pub fn decode_line(line: &str) -> Result<Frame, FrameDecodeError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(Frame::Noise);
    };
    let payload = payload.trim();

    if payload.contains(END_SENTINEL) || payload.contains(SID_SENTINEL) {
        return Ok(Frame::Sentinel);
    }
    if payload.starts_with(METADATA_PREFIX) {
        return Ok(Frame::Metadata);
    }

    let bytes = decode_payload(payload)?;
    let text = String::from_utf8(bytes)?;
    if text.is_empty() {
        return Ok(Frame::Empty);
    }
    Ok(Frame::Content(text))
}

/// Counters kept by [`FrameDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines: u64,
    pub fragments: u64,
    pub control: u64,
    pub malformed: u64,
}

/// Stateful line decoder: applies [`decode_line`] and the lossy recovery
/// policy, keeping counters for diagnostics.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    stats: DecodeStats,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fragment carried by `line`, if any.
    ///
    /// Malformed lines are logged and skipped.
    pub fn decode(&mut self, line: &str) -> Option<String> {
        self.stats.lines += 1;
        match decode_line(line) {
            Ok(Frame::Content(text)) => {
                self.stats.fragments += 1;
                Some(text)
            }
            Ok(Frame::Noise | Frame::Empty) => None,
            Ok(Frame::Sentinel | Frame::Metadata) => {
                self.stats.control += 1;
                None
            }
            Err(err) => {
                self.stats.malformed += 1;
                warn!(
                    error = %err,
                    payload = truncate_for_log(line, LOG_PAYLOAD_MAX_BYTES),
                    "skipping undecodable upstream frame"
                );
                None
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

pin_project! {
    /// Lazy fragment stream over a raw line stream.
    ///
    /// Upstream errors pass through as `Err` items.
    pub struct FragmentStream<S> {
        #[pin]
        lines: S,
        decoder: FrameDecoder,
        done: bool,
    }
}

impl<S> FragmentStream<S> {
    pub fn new(lines: S) -> Self {
        Self {
            lines,
            decoder: FrameDecoder::new(),
            done: false,
        }
    }

    #[must_use]
    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }
}

impl<S> Stream for FragmentStream<S>
where
    S: Stream<Item = Result<String, GatewayError>>,
{
    type Item = Result<String, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.lines.as_mut().poll_next(cx)) {
                Some(Ok(line)) => {
                    if let Some(fragment) = this.decoder.decode(&line) {
                        return Poll::Ready(Some(Ok(fragment)));
                    }
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    *this.done = true;
                    let stats = this.decoder.stats();
                    debug!(
                        lines = stats.lines,
                        fragments = stats.fragments,
                        control = stats.control,
                        malformed = stats.malformed,
                        "upstream line stream closed"
                    );
                    return Poll::Ready(None);
                }
            }
        }
    }
}
