use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use tracing::{info, info_span, Instrument};

use crate::error::{into_axum_response, GatewayError};
use crate::observability::{log_request_complete, CompletionStats};
use crate::protocol::openai_chat::{ChatCompletion, ChatRequest};
use crate::state::AppState;
use crate::stream::{aggregate_fragments, translate_stream, ChunkEncoder, FragmentStream};
use crate::util::unix_now_secs;

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// `POST /v1/chat/completions`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match handler_inner(state, headers, body).await {
        Ok(response) => response,
        Err(err) => into_axum_response(&err),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, GatewayError> {
    state.authenticate(&headers)?;
    let request = ChatRequest::from_slice(&body)?;

    let completion_id = state.next_completion_id();
    let model = request.model_or(&state.config.models.default).to_string();
    let stream = request.is_stream();
    let span = info_span!(
        "chat_completion",
        request_id = %completion_id,
        model = %model,
        stream
    );

    run_completion(state, request, completion_id, model, stream)
        .instrument(span)
        .await
}

async fn run_completion(
    state: Arc<AppState>,
    request: ChatRequest,
    completion_id: String,
    model: String,
    stream: bool,
) -> Result<Response, GatewayError> {
    let start_time = Instant::now();
    let prompt = request.prompt()?;
    info!(messages = request.messages.len(), "chat request received");

    let lines = match state.upstream.open_stream(&prompt).await {
        Ok(lines) => lines,
        Err(err) => {
            log_request_complete(
                &model,
                stream,
                "upstream_error",
                CompletionStats::default(),
                start_time,
            );
            return Err(err);
        }
    };
    let fragments = FragmentStream::new(lines);

    if stream {
        let encoder = ChunkEncoder::new(completion_id, model);
        let body = translate_stream(
            fragments,
            encoder,
            state.config.features.stream_error_mode,
            start_time,
        );
        return Ok(sse_ok_response(Body::from_stream(body)));
    }

    match aggregate_fragments(fragments).await {
        Ok((content, stats)) => {
            log_request_complete(&model, false, "ok", stats, start_time);
            let completion =
                ChatCompletion::assistant_text(completion_id, model, unix_now_secs(), content);
            Ok(Json(completion).into_response())
        }
        Err(err) => {
            log_request_complete(
                &model,
                false,
                "upstream_error",
                CompletionStats::default(),
                start_time,
            );
            Err(err)
        }
    }
}
