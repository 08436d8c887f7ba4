use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::util::truncate_for_log;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on the upstream error text carried into client responses.
pub const UPSTREAM_ERROR_MAX_BYTES: usize = 512;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Internal(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client shared by every upstream call.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from the server config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] when the TLS backend cannot be initialised.
    pub fn new(config: &ServerConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let timeout = Duration::from_secs(config.timeout);
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            timeout,
            config.http_use_env_proxy,
        )?;
        Ok(Self { client, timeout })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a form body and return the response with its body unread.
    ///
    /// Non-2xx statuses are turned into [`GatewayError::UpstreamUnavailable`]
    /// carrying the status and a sanitized body excerpt.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamUnavailable`] on connect failure,
    /// timeout, or an unsuccessful status.
    pub async fn send_form_stream<T>(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        form: &T,
    ) -> Result<reqwest::Response, GatewayError>
    where
        T: serde::Serialize + ?Sized,
    {
        let response = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .form(form)
            .send()
            .await
            .map_err(|err| transport_error(&err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.bytes().await {
            Ok(body) => sanitize_upstream_error(&body),
            Err(err) => error_body_read_failure(&err),
        };
        Err(GatewayError::UpstreamUnavailable {
            status: Some(status.as_u16()),
            message,
        })
    }
}

fn error_body_read_failure(err: &dyn std::fmt::Display) -> String {
    let message = format!("failed to read error body: {err}");
    truncate_for_log(&message, UPSTREAM_ERROR_MAX_BYTES).to_string()
}

fn transport_error(err: &reqwest::Error) -> GatewayError {
    let message = if err.is_timeout() {
        "upstream request timed out".to_string()
    } else if err.is_connect() {
        format!("failed to connect to upstream: {err}")
    } else {
        format!("upstream request failed: {err}")
    };
    GatewayError::upstream(message)
}

/// Extract a short human-readable message from an upstream error body.
///
/// Prefers `error.message` or a top-level `message`/`desc` field when the
/// body is JSON; otherwise uses the trimmed text. The result never exceeds
/// [`UPSTREAM_ERROR_MAX_BYTES`].
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| json.get("message"))
            .or_else(|| json.get("desc"))
            .and_then(serde_json::Value::as_str);
        if let Some(message) = message {
            return truncate_for_log(message, UPSTREAM_ERROR_MAX_BYTES).to_string();
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    truncate_for_log(text, UPSTREAM_ERROR_MAX_BYTES).to_string()
}
