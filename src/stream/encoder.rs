//! OpenAI `chat.completion.chunk` SSE encoder.

use bytes::Bytes;

use crate::error::GatewayError;
use crate::protocol::error_shapes::openai_error_sse_frame;
use crate::util::{push_json_string_escaped, push_u64_decimal, unix_now_secs};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Nothing sent yet.
    Init,
    /// Role chunk sent; content chunks follow.
    Streaming,
    /// Stop chunk and `[DONE]` sent; further input is ignored.
    Terminal,
}

/// Turns decoded fragments into client SSE frames for one completion.
///
/// The first non-empty fragment is preceded by a single role chunk. `finish`
/// always emits a stop chunk and `[DONE]`, even when no fragment arrived.
pub struct ChunkEncoder {
    id: String,
    model: String,
    state: EncoderState,
    clock: fn() -> u64,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(id: String, model: String) -> Self {
        Self::with_clock(id, model, unix_now_secs)
    }

    /// Encoder with a fixed time source, used by tests and benches.
    #[must_use]
    pub fn with_clock(id: String, model: String, clock: fn() -> u64) -> Self {
        Self {
            id,
            model,
            state: EncoderState::Init,
            clock,
        }
    }

    #[must_use]
    pub fn state(&self) -> EncoderState {
        self.state
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Append the frames for one fragment to `out`.
    pub fn encode_fragment(&mut self, fragment: &str, out: &mut Vec<Bytes>) {
        if fragment.is_empty() {
            return;
        }
        match self.state {
            EncoderState::Terminal => return,
            EncoderState::Init => {
                out.push(Bytes::from(self.role_chunk()));
                self.state = EncoderState::Streaming;
            }
            EncoderState::Streaming => {}
        }
        out.push(Bytes::from(self.content_chunk(fragment)));
    }

    /// Append an in-band error frame. The caller still calls [`finish`].
    ///
    /// [`finish`]: ChunkEncoder::finish
    pub fn encode_error(&mut self, err: &GatewayError, out: &mut Vec<Bytes>) {
        if self.state == EncoderState::Terminal {
            return;
        }
        out.push(Bytes::from(openai_error_sse_frame(
            err.category(),
            &err.to_string(),
        )));
    }

    /// Append the stop chunk and `[DONE]`, then move to `Terminal`.
    pub fn finish(&mut self, out: &mut Vec<Bytes>) {
        if self.state == EncoderState::Terminal {
            return;
        }
        out.push(Bytes::from(self.stop_chunk()));
        out.push(Bytes::from_static(DONE_FRAME.as_bytes()));
        self.state = EncoderState::Terminal;
    }

    fn role_chunk(&self) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n");
        out
    }

    fn content_chunk(&self, fragment: &str) -> String {
        let mut out =
            String::with_capacity(160 + self.id.len() + self.model.len() + fragment.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"content\":");
        push_json_string_escaped(&mut out, fragment);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        out
    }

    fn stop_chunk(&self) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        out
    }

    #[inline]
    fn push_chunk_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, (self.clock)());
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }
}
