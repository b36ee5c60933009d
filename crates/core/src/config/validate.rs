use super::{Config, ConfigError};

/// Validate configuration beyond what parsing enforces.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port must be non-zero".to_string(),
        ));
    }

    if config.storage.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.data_dir must not be empty".to_string(),
        ));
    }

    if config.worker.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "worker.timeout_secs must be non-zero".to_string(),
        ));
    }

    if let Some(endpoint) = &config.worker.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "worker.endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
    }

    Ok(())
}
