use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, http::StatusCode};

use crate::error::into_axum_response;
use crate::state::AppState;

/// List the configured models in `OpenAI` format.
#[must_use]
pub fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return into_axum_response(&err);
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        )],
        Body::from(state.models_response_body()),
    )
        .into_response()
}
