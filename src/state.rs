mod models_cache;
mod request_id;

use bytes::Bytes;

use crate::auth::{authenticate, build_master_key, MasterKey};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::transport::XinghuoClient;
use crate::util::unix_now_secs;

use models_cache::ModelsCache;
use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Read-only after startup apart from the request id counter.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: XinghuoClient,
    master_key: MasterKey,
    models_cache: ModelsCache,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Build state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the upstream client cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let upstream = XinghuoClient::new(&config.server, &config.upstream)?;
        let master_key = build_master_key(&config);
        let models_cache = ModelsCache::new(&config, unix_now_secs());
        Ok(Self {
            config,
            upstream,
            master_key,
            models_cache,
            request_ids: RequestIdGenerator::new(),
        })
    }

    /// Authenticate a `/v1/*` request against the configured master key.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] or [`GatewayError::Forbidden`].
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), GatewayError> {
        authenticate(headers, &self.master_key)
    }

    #[must_use]
    pub fn auth_required(&self) -> bool {
        self.master_key.is_required()
    }

    /// Fresh `chatcmpl-<32 hex>` id.
    #[must_use]
    pub fn next_completion_id(&self) -> String {
        self.request_ids.next_completion_id()
    }

    #[must_use]
    pub fn models_response_body(&self) -> Bytes {
        self.models_cache.body()
    }
}
