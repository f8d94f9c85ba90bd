use crate::config::types::{
    CatalogConfig, CollectorConfig, Config, IngestConfig, MetricsConfig, StorageConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use std::path::{Component, Path};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_collector_config(&config.collector)?;
    validate_ingest_config(&config.ingest)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_catalog_config(&config.catalog)?;
    validate_storage_config(&config.storage)?;
    validate_metrics_config(&config.metrics)?;
    Ok(())
}

/// Validates polling and cursor configuration
fn validate_collector_config(config: &CollectorConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.poll_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_secs must be >= 1".to_string(),
        ));
    }

    if config.front_cursor.trim().is_empty() {
        return Err(ConfigError::Validation(
            "front_cursor cannot be empty".to_string(),
        ));
    }

    if config.back_cursor.is_some() && config.back_timestamp.is_some() {
        return Err(ConfigError::Validation(
            "back_cursor and back_timestamp are mutually exclusive".to_string(),
        ));
    }

    if let Some(back) = &config.back_cursor {
        if back.trim().is_empty() {
            return Err(ConfigError::Validation(
                "back_cursor cannot be empty".to_string(),
            ));
        }
        if back == &config.front_cursor {
            return Err(ConfigError::Validation(format!(
                "back_cursor must differ from front_cursor '{}'",
                config.front_cursor
            )));
        }
    }

    config.fixed_back_bound()?;

    Ok(())
}

/// Validates attempt budgets and timeouts
fn validate_ingest_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.max_ingest_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_ingest_attempts must be >= 1, got {}",
            config.max_ingest_attempts
        )));
    }

    if config.max_copy_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_copy_attempts must be >= 1, got {}",
            config.max_copy_attempts
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate name: non-empty, alphanumeric + hyphens only
    if config.name.is_empty() {
        return Err(ConfigError::Validation(
            "user agent name cannot be empty".to_string(),
        ));
    }

    if !config.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(ConfigError::Validation(format!(
            "user agent name must contain only alphanumeric characters and hyphens, got '{}'",
            config.name
        )));
    }

    if config.version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user agent version cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}

fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "catalog path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("database_path", &config.database_path),
        ("destination_root", &config.destination_root),
        ("package_root", &config.package_root),
        ("auxiliary_root", &config.auxiliary_root),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    let cache_name = Path::new(&config.cache_name);
    let relative = cache_name
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if config.cache_name.is_empty() || !relative {
        return Err(ConfigError::Validation(format!(
            "cache_name must be a relative path inside auxiliary_root, got '{}'",
            config.cache_name
        )));
    }

    Ok(())
}

fn validate_metrics_config(config: &MetricsConfig) -> Result<(), ConfigError> {
    config.socket_address()?;
    Ok(())
}
