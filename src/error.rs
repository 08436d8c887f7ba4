use crate::protocol::error_shapes::openai_error_payload;

/// Error type shared by the gateway and the translation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream unavailable: {}", upstream_message(*.status, .message))]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

fn upstream_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("status={status}, message={message}"),
        None => message.to_string(),
    }
}

impl GatewayError {
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        GatewayError::UpstreamUnavailable {
            status: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Unauthorized(_) => ErrorCategory::Authentication,
            GatewayError::Forbidden(_) => ErrorCategory::Permission,
            GatewayError::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            GatewayError::Config(_) | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    Upstream,
    ServerError,
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

#[must_use]
pub fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::Upstream => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as (`status_code`, `OpenAI` JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let body = openai_error_payload(cat, &err.to_string());
    (status, body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_status_mapping() {
        let cases = [
            (
                GatewayError::InvalidRequest("x".into()),
                http::StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::Unauthorized("x".into()),
                http::StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::Forbidden("x".into()),
                http::StatusCode::FORBIDDEN,
            ),
            (GatewayError::upstream("reset"), http::StatusCode::BAD_GATEWAY),
            (
                GatewayError::Internal("x".into()),
                http::StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(format_error(&err).0, expected, "{err}");
        }
    }

    #[test]
    fn test_auth_messages_are_verbatim() {
        let err = GatewayError::Forbidden("Forbidden: Invalid API Key.".into());
        let (_, body) = format_error(&err);
        assert_eq!(body["error"]["message"], "Forbidden: Invalid API Key.");
        assert_eq!(body["error"]["type"], "permission_error");
    }

    #[test]
    fn test_upstream_display_includes_status() {
        let err = GatewayError::UpstreamUnavailable {
            status: Some(403),
            message: "token expired".into(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream unavailable: status=403, message=token expired"
        );
        assert_eq!(
            GatewayError::upstream("connection reset").to_string(),
            "Upstream unavailable: connection reset"
        );
    }
}
