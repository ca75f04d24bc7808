use crate::config::types::{Config, FetcherConfig, ModelConfig, SiteEntry, StorageConfig};
use crate::extract::SelectorStrategy;
use crate::url::{parse_http_url, LinkPattern};
use crate::ConfigError;
use std::collections::HashSet;

/// Smallest prompt body worth sending to a model
const MIN_CONTENT_CHARS: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_storage_config(&config.storage)?;
    validate_fetcher_config(&config.fetcher)?;
    if let Some(model) = &config.model {
        validate_model_config(model)?;
    }
    validate_sites(&config.sites)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "fetcher timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

fn validate_model_config(config: &ModelConfig) -> Result<(), ConfigError> {
    parse_http_url(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("model endpoint '{}': {}", config.endpoint, e)))?;

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation("model name cannot be empty".to_string()));
    }

    if config.max_content_chars < MIN_CONTENT_CHARS {
        return Err(ConfigError::Validation(format!(
            "max-content-chars must be >= {}, got {}",
            MIN_CONTENT_CHARS, config.max_content_chars
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "model timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

fn validate_sites(sites: &[SiteEntry]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for site in sites {
        validate_site(site)?;
        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }
    }
    Ok(())
}

/// Validates a single site entry
fn validate_site(site: &SiteEntry) -> Result<(), ConfigError> {
    if site.name.trim().is_empty() {
        return Err(ConfigError::Validation("site name cannot be empty".to_string()));
    }

    parse_http_url(&site.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "site '{}' start-url '{}': {}",
            site.name, site.start_url, e
        ))
    })?;

    if site.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "site '{}': max-pages must be >= 1, got {}",
            site.name, site.max_pages
        )));
    }

    if !site.crawl_delay.is_finite() || site.crawl_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "site '{}': crawl-delay must be a non-negative number, got {}",
            site.name, site.crawl_delay
        )));
    }

    if let Some(pattern) = site.link_pattern.as_deref() {
        LinkPattern::new(pattern)?;
    }

    if let Some(extraction) = &site.extraction {
        SelectorStrategy::new(extraction).map_err(|e| {
            ConfigError::Validation(format!("site '{}' extraction: {}", site.name, e))
        })?;
    }

    Ok(())
}
