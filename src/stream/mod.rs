pub mod encoder;
pub mod frame;
pub mod lines;

pub use encoder::{ChunkEncoder, EncoderState, DONE_FRAME};
pub use frame::{decode_line, DecodeStats, Frame, FragmentStream, FrameDecodeError, FrameDecoder};
pub use lines::LineStream;

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;
use tracing::{debug, warn, Instrument, Span};

use crate::config::StreamErrorMode;
use crate::error::GatewayError;
use crate::observability::{log_request_complete, CompletionStats};

/// FIFO of encoded frames waiting to be handed to the body stream.
struct PendingBytes {
    chunks: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingBytes {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut chunks = SmallVec::new();
        chunks.reserve(capacity);
        Self { chunks, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.chunks.len() {
            return None;
        }
        let chunk = std::mem::take(&mut self.chunks[self.head]);
        self.head += 1;
        if self.head == self.chunks.len() {
            self.chunks.clear();
            self.head = 0;
        }
        Some(chunk)
    }

    #[inline]
    fn extend_from_bytes(&mut self, frame_chunks: &mut Vec<Bytes>) {
        if frame_chunks.is_empty() {
            return;
        }
        self.chunks.reserve(frame_chunks.len());
        self.chunks.extend(frame_chunks.drain(..));
    }
}

/// Logs the outcome of a streamed completion exactly once, including when
/// the client goes away and the body stream is dropped early.
struct CompletionGuard {
    span: Span,
    model: String,
    start_time: Instant,
    stats: CompletionStats,
    outcome: Option<&'static str>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        let outcome = self.outcome.unwrap_or_else(|| {
            debug!(
                fragments = self.stats.fragments,
                "client disconnected before stream finished"
            );
            "cancelled"
        });
        log_request_complete(&self.model, true, outcome, self.stats, self.start_time);
    }
}

struct TranslateState<S> {
    fragments: Pin<Box<S>>,
    encoder: ChunkEncoder,
    error_mode: StreamErrorMode,
    frame_chunks: Vec<Bytes>,
    pending: PendingBytes,
    guard: CompletionGuard,
    done: bool,
}

/// Translate a fragment stream into the client SSE byte stream.
///
/// Clean exhaustion ends with a stop chunk and `[DONE]`. An upstream error
/// is surfaced per `error_mode`: an in-band error frame followed by the
/// normal terminator, or an `Err` item that aborts the response body.
pub fn translate_stream<S>(
    fragments: S,
    encoder: ChunkEncoder,
    error_mode: StreamErrorMode,
    start_time: Instant,
) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send + 'static
where
    S: Stream<Item = Result<String, GatewayError>> + Send + 'static,
{
    let span = Span::current();
    let state = TranslateState {
        fragments: Box::pin(fragments),
        guard: CompletionGuard {
            span: span.clone(),
            model: encoder.model().to_string(),
            start_time,
            stats: CompletionStats::default(),
            outcome: None,
        },
        encoder,
        error_mode,
        frame_chunks: Vec::with_capacity(4),
        pending: PendingBytes::with_capacity(8),
        done: false,
    };

    futures_util::stream::unfold(state, move |mut st| {
        async move {
            loop {
                if let Some(chunk) = st.pending.pop_front() {
                    return Some((Ok(chunk), st));
                }
                if st.done {
                    return None;
                }
                match st.fragments.as_mut().next().await {
                    Some(Ok(fragment)) => {
                        st.guard.stats.record_fragment(&fragment);
                        st.encoder.encode_fragment(&fragment, &mut st.frame_chunks);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, mode = %st.error_mode, "upstream failed mid-stream");
                        st.done = true;
                        match st.error_mode {
                            StreamErrorMode::Event => {
                                st.encoder.encode_error(&err, &mut st.frame_chunks);
                                st.encoder.finish(&mut st.frame_chunks);
                                st.guard.outcome = Some("upstream_error");
                            }
                            StreamErrorMode::Abort => {
                                st.guard.outcome = Some("aborted");
                                return Some((Err(err), st));
                            }
                        }
                    }
                    None => {
                        st.encoder.finish(&mut st.frame_chunks);
                        st.guard.outcome = Some("ok");
                        st.done = true;
                    }
                }
                st.pending.extend_from_bytes(&mut st.frame_chunks);
            }
        }
        .instrument(span.clone())
    })
}

/// Concatenate every fragment in arrival order.
///
/// # Errors
///
/// Returns the first upstream error; partial text is discarded.
pub async fn aggregate_fragments<S>(fragments: S) -> Result<(String, CompletionStats), GatewayError>
where
    S: Stream<Item = Result<String, GatewayError>>,
{
    let mut fragments = std::pin::pin!(fragments);
    let mut content = String::new();
    let mut stats = CompletionStats::default();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        stats.record_fragment(&fragment);
        content.push_str(&fragment);
    }
    Ok((content, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    fn b64_line(text: &str) -> String {
        format!("data:{}", STANDARD.encode(text.as_bytes()))
    }

    fn encoder() -> ChunkEncoder {
        ChunkEncoder::with_clock("chatcmpl-t".to_string(), "spark-lite".to_string(), || 1)
    }

    fn fragments_from(
        lines: Vec<Result<String, GatewayError>>,
    ) -> FragmentStream<impl Stream<Item = Result<String, GatewayError>>> {
        FragmentStream::new(futures_util::stream::iter(lines))
    }

    async fn run(
        lines: Vec<Result<String, GatewayError>>,
        mode: StreamErrorMode,
    ) -> Vec<Result<String, String>> {
        translate_stream(fragments_from(lines), encoder(), mode, Instant::now())
            .map(|item| {
                item.map(|bytes| String::from_utf8(bytes.to_vec()).unwrap())
                    .map_err(|err| err.to_string())
            })
            .collect()
            .await
    }

    fn content_of(frame: &str) -> Option<String> {
        let json: serde_json::Value =
            serde_json::from_str(frame.strip_prefix("data: ")?.trim_end()).ok()?;
        json["choices"][0]["delta"]["content"]
            .as_str()
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_scenario_sid_two_fragments_end() {
        let lines = vec![
            Ok("data: <sid>5f3a".to_string()),
            Ok(b64_line("Hi")),
            Ok(b64_line(" there")),
            Ok("<end>".to_string()),
        ];
        let frames: Vec<String> = run(lines, StreamErrorMode::Event)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(frames.len(), 5);
        assert!(frames[0].contains("\"delta\":{\"role\":\"assistant\"}"));
        assert_eq!(content_of(&frames[1]).as_deref(), Some("Hi"));
        assert_eq!(content_of(&frames[2]).as_deref(), Some(" there"));
        assert!(frames[3].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[4], DONE_FRAME);
    }

    #[tokio::test]
    async fn test_zero_fragments_emit_only_terminator() {
        let lines = vec![Ok("data:<sid>1".to_string()), Ok("data:<end>".to_string())];
        let frames = run(lines, StreamErrorMode::Event).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].as_ref().unwrap().contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[1].as_deref(), Ok(DONE_FRAME));
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_break_stream() {
        let lines = vec![
            Ok(b64_line("a")),
            Ok("data: SGk".to_string()),
            Ok(b64_line("b")),
        ];
        let frames: Vec<String> = run(lines, StreamErrorMode::Event)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let contents: Vec<String> = frames.iter().filter_map(|f| content_of(f)).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
    }

    #[tokio::test]
    async fn test_event_mode_error_frame_precedes_done() {
        let lines = vec![
            Ok(b64_line("partial")),
            Err(GatewayError::upstream("connection reset")),
        ];
        let frames: Vec<String> = run(lines, StreamErrorMode::Event)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(frames.len(), 5);
        assert!(frames[2].starts_with("data: {\"error\":"));
        assert!(frames[2].contains("connection reset"));
        assert!(frames[3].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[4], DONE_FRAME);
        assert_eq!(frames.iter().filter(|f| *f == DONE_FRAME).count(), 1);
    }

    #[tokio::test]
    async fn test_abort_mode_yields_error_without_done() {
        let lines = vec![
            Ok(b64_line("partial")),
            Err(GatewayError::upstream("connection reset")),
        ];
        let items = run(lines, StreamErrorMode::Abort).await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert_eq!(content_of(items[1].as_ref().unwrap()).as_deref(), Some("partial"));
        assert!(items[2].as_ref().unwrap_err().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_aggregate_concatenates_in_order() {
        let lines = vec![
            Ok("data:<sid>x".to_string()),
            Ok(b64_line("你")),
            Ok(b64_line("好")),
            Ok(b64_line("!")),
        ];
        let (content, stats) = aggregate_fragments(fragments_from(lines)).await.unwrap();
        assert_eq!(content, "你好!");
        assert_eq!(stats.fragments, 3);
        assert_eq!(stats.content_bytes, 7);
    }

    #[tokio::test]
    async fn test_aggregate_fails_on_upstream_error() {
        let lines = vec![Ok(b64_line("lost")), Err(GatewayError::upstream("reset"))];
        let err = aggregate_fragments(fragments_from(lines)).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    struct ReleaseFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_body_releases_upstream_lines() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(Arc::clone(&released));
        let lines = futures_util::stream::iter(vec![Ok(b64_line("Hi"))])
            .chain(futures_util::stream::pending())
            .map(move |item: Result<String, GatewayError>| {
                let _held = &flag;
                item
            });
        let mut body = Box::pin(translate_stream(
            FragmentStream::new(lines),
            encoder(),
            StreamErrorMode::Event,
            Instant::now(),
        ));

        let role = body.next().await.unwrap().unwrap();
        assert!(role.starts_with(b"data: {"));
        let content = body.next().await.unwrap().unwrap();
        let content = String::from_utf8(content.to_vec()).unwrap();
        assert_eq!(content_of(&content).as_deref(), Some("Hi"));

        let stalled =
            tokio::time::timeout(std::time::Duration::from_millis(20), body.next()).await;
        assert!(stalled.is_err(), "upstream is still open");
        assert!(!released.load(Ordering::SeqCst));

        drop(body);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pending_bytes_fifo() {
        let mut pending = PendingBytes::with_capacity(2);
        let mut chunks = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        pending.extend_from_bytes(&mut chunks);
        assert!(chunks.is_empty());
        assert_eq!(pending.pop_front().as_deref(), Some(&b"a"[..]));
        chunks.push(Bytes::from_static(b"c"));
        pending.extend_from_bytes(&mut chunks);
        assert_eq!(pending.pop_front().as_deref(), Some(&b"b"[..]));
        assert_eq!(pending.pop_front().as_deref(), Some(&b"c"[..]));
        assert!(pending.pop_front().is_none());
    }
}
