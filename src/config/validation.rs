use crate::config::types::{
    BrowserConfig, CommentsConfig, Config, EndpointsConfig, OutputConfig, OverlaysConfig,
    RetryConfig, SearchConfig, SessionConfig, TransportConfig,
};
use crate::url::is_bvid;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_session_config(&config.session)?;
    validate_transport_config(&config.transport)?;
    validate_retry_config(&config.retry)?;
    if let Some(search) = &config.search {
        validate_search_config(search)?;
    }
    validate_comments_config(&config.comments)?;
    validate_overlays_config(&config.overlays)?;
    validate_browser_config(&config.browser)?;
    validate_endpoints_config(&config.endpoints)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.credential_names.is_empty() {
        return Err(ConfigError::Validation(
            "credential-names must name at least one session".to_string(),
        ));
    }

    for name in &config.credential_names {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Validation(format!(
                "credential name must be non-empty and contain only [A-Za-z0-9_], got '{}'",
                name
            )));
        }
    }

    Ok(())
}

/// Validates transport pacing
fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    validate_delay_range(
        "request-delay",
        config.request_delay_min_ms,
        config.request_delay_max_ms,
    )?;
    validate_delay_range(
        "page-delay",
        config.page_delay_min_ms,
        config.page_delay_max_ms,
    )?;
    validate_delay_range(
        "comment-page-delay",
        config.comment_page_delay_min_ms,
        config.comment_page_delay_max_ms,
    )?;

    Ok(())
}

fn validate_delay_range(name: &str, min: u64, max: u64) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::Validation(format!(
            "{}-min-ms ({}) must not exceed {}-max-ms ({})",
            name, min, name, max
        )));
    }
    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) must not exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates the search listing
fn validate_search_config(config: &SearchConfig) -> Result<(), ConfigError> {
    if config.keywords.is_empty() {
        return Err(ConfigError::Validation(
            "search.keywords must contain at least one keyword".to_string(),
        ));
    }

    if config.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "search.keywords cannot contain blank entries".to_string(),
        ));
    }

    let (start, end) = config.window().ok_or_else(|| {
        ConfigError::Validation(format!(
            "start-date and end-date must be YYYY-MM-DD, got '{}' and '{}'",
            config.start_date, config.end_date
        ))
    })?;

    if start > end {
        return Err(ConfigError::Validation(format!(
            "start-date {} is after end-date {}",
            start, end
        )));
    }

    if config.target_count < 1 {
        return Err(ConfigError::Validation(
            "target-count must be >= 1".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 50 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 50, got {}",
            config.page_size
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "search max-pages must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates comment harvesting
fn validate_comments_config(config: &CommentsConfig) -> Result<(), ConfigError> {
    validate_targets("comments", &config.targets)?;

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "comments max-pages must be >= 1".to_string(),
        ));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-failures must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_overlays_config(config: &OverlaysConfig) -> Result<(), ConfigError> {
    validate_targets("overlays", &config.targets)
}

/// Every explicit target must be a well-formed BV id
fn validate_targets(section: &str, targets: &[String]) -> Result<(), ConfigError> {
    for target in targets {
        if !is_bvid(target) {
            return Err(ConfigError::InvalidTarget(format!(
                "{}.targets contains '{}', expected 'BV' followed by 10 alphanumerics",
                section, target
            )));
        }
    }
    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.login_timeout_secs == 0 || config.render_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "browser timeouts must be >= 1 second".to_string(),
        ));
    }

    if let Some(path) = &config.chrome_path {
        if path.is_empty() {
            return Err(ConfigError::Validation(
                "chrome-path cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates endpoint bases
fn validate_endpoints_config(config: &EndpointsConfig) -> Result<(), ConfigError> {
    for (name, base) in [
        ("api-base", &config.api_base),
        ("search-base", &config.search_base),
        ("web-base", &config.web_base),
    ] {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::InvalidUrl(format!(
                "{} must use http or https, got '{}'",
                name, base
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output-dir cannot be empty".to_string(),
        ));
    }

    if config.diagnostics_dir.is_empty() {
        return Err(ConfigError::Validation(
            "diagnostics-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
