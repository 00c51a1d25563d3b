use crate::config::types::{
    CommunityPlatformConfig, Config, ObjectsConfig, QaPlatformConfig, StorageConfig,
};
use crate::{ConfigError, ConfigResult};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_storage_config(&config.storage)?;
    validate_qa_config(&config.qa)?;
    validate_community_config(&config.community)?;
    validate_objects_config(&config.objects)?;

    if config.user_agent.browser.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent browser cannot be empty".to_string(),
        ));
    }

    if let Some(bark) = &config.notify.bark_url {
        validate_http_url("notify bark-url", bark)?;
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> ConfigResult<()> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_qa_config(config: &QaPlatformConfig) -> ConfigResult<()> {
    validate_http_url("qa api-base", &config.api_base)?;
    validate_page_size("qa", config.page_size)?;
    validate_max_retry("qa", config.max_retry)?;
    validate_request_timeout("qa", config.request_timeout_ms)?;

    if config.signer_failure_streak < 1 {
        return Err(ConfigError::Validation(format!(
            "qa signer-failure-streak must be >= 1, got {}",
            config.signer_failure_streak
        )));
    }

    Ok(())
}

fn validate_community_config(config: &CommunityPlatformConfig) -> ConfigResult<()> {
    validate_http_url("community api-base", &config.api_base)?;
    validate_page_size("community", config.page_size)?;
    validate_max_retry("community", config.max_retry)?;
    validate_request_timeout("community", config.request_timeout_ms)?;
    Ok(())
}

fn validate_objects_config(config: &ObjectsConfig) -> ConfigResult<()> {
    if config.root.is_empty() {
        return Err(ConfigError::Validation(
            "objects root cannot be empty".to_string(),
        ));
    }
    validate_http_url("objects assets-domain", &config.assets_domain)?;

    if config.download_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "objects download-timeout-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_page_size(platform: &str, page_size: u32) -> ConfigResult<()> {
    if !(1..=100).contains(&page_size) {
        return Err(ConfigError::Validation(format!(
            "{} page-size must be between 1 and 100, got {}",
            platform, page_size
        )));
    }
    Ok(())
}

fn validate_max_retry(platform: &str, max_retry: u32) -> ConfigResult<()> {
    if max_retry < 1 {
        return Err(ConfigError::Validation(format!(
            "{} max-retry must be >= 1, got {}",
            platform, max_retry
        )));
    }
    Ok(())
}

fn validate_request_timeout(platform: &str, timeout_ms: u64) -> ConfigResult<()> {
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(format!(
            "{} request-timeout-ms must be > 0",
            platform
        )));
    }
    Ok(())
}

/// Checks that a value is an absolute http(s) URL
fn validate_http_url(field: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}
