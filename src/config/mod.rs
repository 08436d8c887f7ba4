pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Missing upstream credential: {0} is not configured (set it in the config file or the environment)")]
    MissingCredential(&'static str),
}

/// Upstream capability flag sent with every chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[default]
    DeepThink,
    None,
}

impl Capability {
    #[must_use]
    pub fn as_form_value(self) -> &'static str {
        match self {
            Capability::DeepThink => "deep_think",
            Capability::None => "",
        }
    }
}

/// How an upstream failure after the SSE response has started is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamErrorMode {
    /// Emit an in-band error frame, then the stop chunk and `[DONE]`.
    #[default]
    Event,
    /// Abort the response body without a terminator.
    Abort,
}

impl fmt::Display for StreamErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamErrorMode::Event => write!(f, "event"),
            StreamErrorMode::Abort => write!(f, "abort"),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Overall upstream call timeout in seconds, streaming included.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(
        default = "default_runtime_max_blocking_threads",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_port() -> u16 {
    8082
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
#[allow(clippy::unnecessary_wraps)]
fn default_runtime_max_blocking_threads() -> Option<usize> {
    Some(8)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: default_runtime_max_blocking_threads(),
            base_path: String::new(),
            http_use_env_proxy: false,
        }
    }
}

/// Application metadata reported by the root endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfoConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    #[serde(default = "default_app_description")]
    pub description: String,
}

fn default_app_name() -> String {
    "Xinghuo Local API".to_string()
}
fn default_app_version() -> String {
    "1.0.0".to_string()
}
fn default_app_description() -> String {
    "OpenAI-compatible local gateway for the Xinghuo chat service.".to_string()
}

impl Default for AppInfoConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            description: default_app_description(),
        }
    }
}

/// Client authentication configuration.
///
/// When `master_key` is unset every request is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    #[serde(default)]
    pub master_key: Option<String>,
}

/// Models advertised on `/v1/models` and echoed in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_supported_models")]
    pub supported: Vec<String>,
    /// Echoed when a request carries no model.
    #[serde(default = "default_model")]
    pub default: String,
}

fn default_supported_models() -> Vec<String> {
    ["spark-3.5-max", "spark-pro", "spark-v2.0", "spark-lite"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}
fn default_model() -> String {
    "spark-3.5-max".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            supported: default_supported_models(),
            default: default_model(),
        }
    }
}

/// Xinghuo backend endpoint, credentials and request fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub gt_token: String,
    /// Conversation the backend appends to; owns all history.
    #[serde(default = "default_chat_id")]
    pub chat_id: String,
    #[serde(default)]
    pub capability: Capability,
    #[serde(default = "default_fd")]
    pub fd: String,
    #[serde(default = "default_is_bot")]
    pub is_bot: String,
    #[serde(default)]
    pub client_type: String,
}

fn default_endpoint() -> String {
    "https://xinghuo.xfyun.cn/iflygpt-chat/u/chat_message/chat".to_string()
}
fn default_origin() -> String {
    "https://xinghuo.xfyun.cn".to_string()
}
fn default_referer() -> String {
    "https://xinghuo.xfyun.cn/desk".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36".to_string()
}
fn default_chat_id() -> String {
    "985818485".to_string()
}
fn default_fd() -> String {
    "775510".to_string()
}
fn default_is_bot() -> String {
    "0".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            origin: default_origin(),
            referer: default_referer(),
            user_agent: default_user_agent(),
            cookie: String::new(),
            gt_token: String::new(),
            chat_id: default_chat_id(),
            capability: Capability::default(),
            fd: default_fd(),
            is_bot: default_is_bot(),
            client_type: String::new(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub stream_error_mode: StreamErrorMode,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            stream_error_mode: StreamErrorMode::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub app: AppInfoConfig,
    #[serde(default)]
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Overlay values from environment-style lookups onto the parsed file.
    ///
    /// Blank values are ignored so an empty variable never clears a file value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when `LISTEN_PORT` is not a valid port.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(port) = get("LISTEN_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("LISTEN_PORT '{port}' is not a valid port"))
            })?;
        }
        if let Some(key) = get("API_MASTER_KEY") {
            self.client_authentication.master_key = Some(key);
        }
        if let Some(cookie) = get("XINGHUO_COOKIE") {
            self.upstream.cookie = cookie;
        }
        if let Some(token) = get("GT_TOKEN") {
            self.upstream.gt_token = token;
        }
        if let Some(chat_id) = get("XINGHUO_CHAT_ID") {
            self.upstream.chat_id = chat_id;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.features.log_level = level;
        }
        Ok(())
    }

    /// Master key with blank values treated as unset.
    #[must_use]
    pub fn master_key(&self) -> Option<&str> {
        self.client_authentication
            .master_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Parse configuration from YAML text without touching the environment.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}

/// Load configuration from a YAML file, overlay the process environment and
/// validate it.
///
/// A missing file is not an error: every section has defaults, and the
/// upstream credentials can come from `XINGHUO_COOKIE` / `GT_TOKEN`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading an existing file fails,
/// [`ConfigError::Yaml`] when parsing fails, [`ConfigError::MissingCredential`]
/// when upstream credentials are absent, or [`ConfigError::Validation`] when
/// semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    let mut config = parse_config(&contents)?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}
