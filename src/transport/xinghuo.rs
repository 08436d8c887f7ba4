use bytes::Bytes;
use futures_util::Stream;
use http::header::{HeaderName, HeaderValue, ACCEPT, COOKIE, ORIGIN, REFERER, USER_AGENT};
use tracing::{info, warn};

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::GatewayError;
use crate::stream::LineStream;

use super::http_transport::HttpTransport;

/// Request metadata prepared once at startup: parsed endpoint, browser
/// fingerprint headers, and the fixed form fields.
#[derive(Debug, Clone)]
pub struct UpstreamSession {
    endpoint: url::Url,
    headers: http::HeaderMap,
    fd: String,
    is_bot: String,
    client_type: String,
    capabilities: &'static str,
    chat_id: String,
    gt_token: String,
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value.trim())
        .map_err(|err| GatewayError::Config(format!("{field} is not a valid header value: {err}")))
}

impl UpstreamSession {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the endpoint or any header value
    /// is unusable.
    pub fn from_config(upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        let endpoint = url::Url::parse(&upstream.endpoint).map_err(|err| {
            GatewayError::Config(format!("upstream.endpoint is not a valid URL: {err}"))
        })?;

        let mut headers = http::HeaderMap::with_capacity(5);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let mut cookie = header_value("upstream.cookie", &upstream.cookie)?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);
        let fingerprint: [(HeaderName, &str, &str); 3] = [
            (USER_AGENT, "upstream.user_agent", &upstream.user_agent),
            (ORIGIN, "upstream.origin", &upstream.origin),
            (REFERER, "upstream.referer", &upstream.referer),
        ];
        for (name, field, value) in fingerprint {
            if !value.trim().is_empty() {
                headers.insert(name, header_value(field, value)?);
            }
        }

        Ok(Self {
            endpoint,
            headers,
            fd: upstream.fd.clone(),
            is_bot: upstream.is_bot.clone(),
            client_type: upstream.client_type.clone(),
            capabilities: upstream.capability.as_form_value(),
            chat_id: upstream.chat_id.trim().to_string(),
            gt_token: upstream.gt_token.trim().to_string(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Form body for one chat turn.
    #[must_use]
    pub fn form<'a>(&'a self, prompt: &'a str) -> [(&'static str, &'a str); 7] {
        [
            ("fd", &self.fd),
            ("isBot", &self.is_bot),
            ("clientType", &self.client_type),
            ("text", prompt),
            ("capabilities", self.capabilities),
            ("chatId", &self.chat_id),
            ("GtToken", &self.gt_token),
        ]
    }
}

/// Client for the Xinghuo chat stream endpoint.
pub struct XinghuoClient {
    transport: HttpTransport,
    session: UpstreamSession,
}

impl XinghuoClient {
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the HTTP client or session cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            transport: HttpTransport::new(server)?,
            session: UpstreamSession::from_config(upstream)?,
        })
    }

    #[must_use]
    pub fn session(&self) -> &UpstreamSession {
        &self.session
    }

    /// Send one chat turn and return the raw response lines as they arrive.
    ///
    /// The returned stream owns the upstream connection; dropping it closes
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamUnavailable`] when the request cannot be
    /// sent, times out, or gets a non-2xx status.
    pub async fn open_stream(
        &self,
        prompt: &str,
    ) -> Result<LineStream<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static>, GatewayError>
    {
        let endpoint = self.session.endpoint();
        info!(
            endpoint = %endpoint,
            chat_id = self.session.chat_id(),
            prompt_chars = prompt.chars().count(),
            "sending upstream chat request"
        );

        let response = self
            .transport
            .send_form_stream(endpoint, self.session.headers(), &self.session.form(prompt))
            .await
            .inspect_err(|err| warn!(error = %err, "upstream request failed"))?;

        Ok(LineStream::new(response.bytes_stream()))
    }
}
