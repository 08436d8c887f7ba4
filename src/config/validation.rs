use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::MissingCredential`] when the upstream cookie or
/// security token is blank, and [`ConfigError::Validation`] when any other
/// configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream_credentials(config)?;
    validate_upstream_endpoint(config)?;
    validate_models(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream_credentials(config: &AppConfig) -> Result<(), ConfigError> {
    if config.upstream.cookie.trim().is_empty() {
        return Err(ConfigError::MissingCredential("XINGHUO_COOKIE"));
    }
    if config.upstream.gt_token.trim().is_empty() {
        return Err(ConfigError::MissingCredential("GT_TOKEN"));
    }
    Ok(())
}

fn validate_upstream_endpoint(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let endpoint = url::Url::parse(&upstream.endpoint).map_err(|err| {
        validation_err(format!(
            "upstream.endpoint '{}' is not a valid URL: {err}",
            upstream.endpoint
        ))
    })?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(validation_err(
            "upstream.endpoint must start with http:// or https://",
        ));
    }
    if upstream.chat_id.trim().is_empty() {
        return Err(validation_err("upstream.chat_id cannot be empty"));
    }
    for (field, value) in [
        ("upstream.origin", &upstream.origin),
        ("upstream.referer", &upstream.referer),
        ("upstream.user_agent", &upstream.user_agent),
        ("upstream.cookie", &upstream.cookie),
    ] {
        if http::HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "{field} contains characters not allowed in an HTTP header"
            )));
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let models = &config.models;
    if models.supported.is_empty() {
        return Err(validation_err("models.supported cannot be empty"));
    }
    let mut seen = HashSet::with_capacity(models.supported.len());
    for model in &models.supported {
        if model.trim().is_empty() {
            return Err(validation_err("models.supported contains an empty model"));
        }
        if !seen.insert(model.as_str()) {
            return Err(validation_err(format!(
                "models.supported lists '{model}' more than once"
            )));
        }
    }
    if models.default.trim().is_empty() {
        return Err(validation_err("models.default cannot be empty"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
