//! Pull-based line splitter over an HTTP body byte stream.
//!
//! Works with any `Stream<Item = Result<Bytes, E>>`, so the decoder never
//! depends on a particular HTTP client.

use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::error::GatewayError;

pin_project! {
    /// Splits a byte stream into text lines.
    ///
    /// Lines end at `\n`, `\r\n` or a bare `\r`. A final unterminated
    /// line is yielded when the source closes cleanly. A source error is
    /// yielded once as [`GatewayError::UpstreamUnavailable`] and ends the
    /// stream; the partial line buffered at that point is discarded.
    pub struct LineStream<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        scan_from: usize,
        finished: bool,
    }
}

impl<S> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(4096),
            scan_from: 0,
            finished: false,
        }
    }
}

fn line_from_bytes(line: BytesMut) -> String {
    match String::from_utf8(line.to_vec()) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Split the next complete line off `buffer`.
///
/// A `\r` at the very end of the buffer stays pending until the next chunk
/// shows whether a `\n` follows, unless the source has finished.
fn take_line(buffer: &mut BytesMut, scan_from: &mut usize, finished: bool) -> Option<BytesMut> {
    let start = (*scan_from).min(buffer.len());
    let Some(rel) = memchr::memchr2(b'\n', b'\r', &buffer[start..]) else {
        *scan_from = buffer.len();
        return None;
    };
    let end = start + rel;
    let consumed = match (buffer[end], buffer.get(end + 1)) {
        (b'\r', Some(b'\n')) => end + 2,
        (b'\r', None) if !finished => {
            *scan_from = end;
            return None;
        }
        _ => end + 1,
    };
    let mut line = buffer.split_to(consumed);
    line.truncate(end);
    *scan_from = 0;
    Some(line)
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<String, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(line) = take_line(this.buffer, this.scan_from, *this.finished) {
                return Poll::Ready(Some(Ok(line_from_bytes(line))));
            }

            if *this.finished {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let tail = this.buffer.split();
                *this.scan_from = 0;
                return Poll::Ready(Some(Ok(line_from_bytes(tail))));
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    *this.finished = true;
                    this.buffer.clear();
                    *this.scan_from = 0;
                    return Poll::Ready(Some(Err(GatewayError::upstream(format!(
                        "upstream stream interrupted: {err}"
                    )))));
                }
                None => *this.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn source(
        chunks: Vec<Result<&'static str, &'static str>>,
    ) -> impl Stream<Item = Result<Bytes, &'static str>> {
        futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes()))),
        )
    }

    async fn collect_lines(
        chunks: Vec<Result<&'static str, &'static str>>,
    ) -> Vec<Result<String, String>> {
        LineStream::new(source(chunks))
            .map(|item| item.map_err(|err| err.to_string()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_splits_lines_across_chunks() {
        let lines = collect_lines(vec![Ok("data:SGk=\nda"), Ok("ta:IHRo"), Ok("ZXJl\n\n")]).await;
        assert_eq!(
            lines,
            vec![
                Ok("data:SGk=".to_string()),
                Ok("data:IHRoZXJl".to_string()),
                Ok(String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let lines = collect_lines(vec![Ok("a\r\nb\r\n")]).await;
        assert_eq!(lines, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_bare_carriage_return_ends_line() {
        let lines = collect_lines(vec![Ok("data:SGk=\rdata:IHRoZXJl\r")]).await;
        assert_eq!(
            lines,
            vec![Ok("data:SGk=".to_string()), Ok("data:IHRoZXJl".to_string())]
        );
    }

    #[tokio::test]
    async fn test_crlf_split_across_chunks_is_one_terminator() {
        let lines = collect_lines(vec![Ok("a\r"), Ok("\nb\r"), Ok("\r\nc")]).await;
        assert_eq!(
            lines,
            vec![
                Ok("a".to_string()),
                Ok("b".to_string()),
                Ok(String::new()),
                Ok("c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_yields_unterminated_tail_on_clean_close() {
        let lines = collect_lines(vec![Ok("first\nsec"), Ok("ond")]).await;
        assert_eq!(
            lines,
            vec![Ok("first".to_string()), Ok("second".to_string())]
        );
    }

    #[tokio::test]
    async fn test_error_ends_stream_and_drops_partial_line() {
        let lines = collect_lines(vec![Ok("kept\npart"), Err("connection reset"), Ok("never\n")])
            .await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], Ok("kept".to_string()));
        let err = lines[1].as_ref().unwrap_err();
        assert!(err.contains("connection reset"), "{err}");
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let bytes = "data:你好\n".as_bytes();
        let (head, tail) = bytes.split_at(7);
        let stream = futures_util::stream::iter(vec![
            Ok::<Bytes, &str>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ]);
        let lines: Vec<_> = LineStream::new(stream).collect().await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_ref().unwrap(), "data:你好");
    }

    #[tokio::test]
    async fn test_empty_source() {
        assert!(collect_lines(vec![]).await.is_empty());
    }
}
