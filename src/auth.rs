use crate::config::AppConfig;
use crate::error::GatewayError;
use http::header::AUTHORIZATION;

const MISSING_HEADER: &str = "Unauthorized: Missing Authorization header.";
const INVALID_SCHEME: &str = "Invalid authentication scheme. Use 'Bearer <your_api_key>'.";
const INVALID_KEY: &str = "Forbidden: Invalid API Key.";

/// Client key policy resolved once at startup.
pub enum MasterKey {
    /// No key configured: every request is accepted.
    Disabled,
    Required { raw: Box<str>, bearer: Box<str> },
}

impl MasterKey {
    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self, MasterKey::Required { .. })
    }
}

/// Build the master key policy from config.
#[must_use]
pub fn build_master_key(config: &AppConfig) -> MasterKey {
    match config.master_key() {
        Some(key) => MasterKey::Required {
            bearer: format!("Bearer {key}").into_boxed_str(),
            raw: key.into(),
        },
        None => MasterKey::Disabled,
    }
}

/// Authenticate an incoming request against the master key.
///
/// - no master key: always `Ok`
/// - missing `Authorization`: 401
/// - anything but `<bearer> <token>` (scheme case-insensitive): 401
/// - token mismatch: 403
///
/// # Errors
///
/// Returns [`GatewayError::Unauthorized`] or [`GatewayError::Forbidden`] as above.
pub fn authenticate(headers: &http::HeaderMap, master_key: &MasterKey) -> Result<(), GatewayError> {
    let MasterKey::Required { raw, bearer } = master_key else {
        return Ok(());
    };

    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(GatewayError::Unauthorized(MISSING_HEADER.to_string()));
    };

    // Exact match is the overwhelmingly common shape.
    if value.as_bytes() == bearer.as_bytes() {
        return Ok(());
    }

    let token = parse_bearer_token(value)
        .ok_or_else(|| GatewayError::Unauthorized(INVALID_SCHEME.to_string()))?;
    if token == raw.as_ref() {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(INVALID_KEY.to_string()))
    }
}

fn parse_bearer_token(value: &http::HeaderValue) -> Option<&str> {
    let text = value.to_str().ok()?;
    let mut parts = text.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}
