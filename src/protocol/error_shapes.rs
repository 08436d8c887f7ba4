use crate::error::ErrorCategory;
use crate::util::push_json_string_escaped;

pub(crate) fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::Upstream => "upstream_unavailable",
        ErrorCategory::ServerError => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::Authentication => "invalid_api_key",
        ErrorCategory::Permission => "permission_denied",
        ErrorCategory::Upstream => "bad_gateway",
        ErrorCategory::ServerError => "server_error",
    }
}

#[must_use]
pub(crate) fn openai_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": openai_error_type(cat),
            "code": openai_error_code(cat),
            "param": null,
        }
    })
}

/// SSE frame carrying an in-band error, sent mid-stream after headers are out.
#[must_use]
pub(crate) fn openai_error_sse_frame(cat: ErrorCategory, message: &str) -> String {
    let error_type = openai_error_type(cat);
    let code = openai_error_code(cat);
    let mut out = String::with_capacity(72 + message.len() + error_type.len() + code.len());
    out.push_str("data: {\"error\":{\"message\":");
    push_json_string_escaped(&mut out, message);
    out.push_str(",\"type\":");
    push_json_string_escaped(&mut out, error_type);
    out.push_str(",\"code\":");
    push_json_string_escaped(&mut out, code);
    out.push_str(",\"param\":null}}\n\n");
    out
}
