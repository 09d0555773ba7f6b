use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use bili_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Sessions: {}", config.session.credential_names.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
///
/// # Arguments
///
/// * `content` - TOML document
///
/// # Returns
///
/// * `Ok(Config)` - Parsed and validated configuration
/// * `Err(ConfigError)` - The document did not parse or failed validation
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Each run records this hash so its artifacts can be traced back to the
/// exact configuration that produced them.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL_CONFIG: &str = r#"
[output]
database-path = "./test.db"
output-dir = "./out"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.session.credential_names, vec!["BILI_COOKIE"]);
        assert!(config.session.require_auth);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.transport.page_delay_min_ms, 3000);
        assert_eq!(config.transport.page_delay_max_ms, 8000);
        assert!(config.search.is_none());
        assert!(!config.browser.enabled);
        assert_eq!(config.endpoints.api_base, "https://api.bilibili.com");
        assert!(config.output.utf8_bom);
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[session]
credential-file = "secrets.env"
credential-names = ["BILI_COOKIE", "BILI_COOKIE_2"]

[transport]
request-delay-min-ms = 100
request-delay-max-ms = 200

[search]
keywords = ["robot", "drone"]
start-date = "2025-10-14"
end-date = "2025-11-09"
target-count = 25
page-size = 10

[comments]
targets = ["BV1xx411c7mD"]
sort = "time"
from-search = true

[overlays]
targets = ["BV1GJ411x7h7"]

[browser]
enabled = true
headless = false

[output]
database-path = "./test.db"
output-dir = "./out"
utf8-bom = false
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.session.credential_names.len(), 2);
        let search = config.search.as_ref().unwrap();
        assert_eq!(search.keywords, vec!["robot", "drone"]);
        assert_eq!(search.page_size, 10);
        assert_eq!(search.max_pages, 50);
        assert_eq!(config.comments.sort, crate::config::CommentSort::Time);
        assert!(config.comments.from_search);
        assert_eq!(config.overlays.targets, vec!["BV1GJ411x7h7"]);
        assert!(config.browser.enabled);
        assert!(!config.browser.headless);
        assert!(!config.output.utf8_bom);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let config_content = "this is not valid TOML {{{";
        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_missing_output_section() {
        let result = parse_config("[retry]\nmax-attempts = 3\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[retry]
max-attempts = 0

[output]
database-path = "./test.db"
output-dir = "./out"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_config_with_bad_target() {
        let config_content = r#"
[comments]
targets = ["not-an-id"]

[output]
database-path = "./test.db"
output-dir = "./out"
"#;

        let result = parse_config(config_content);
        assert!(matches!(result, Err(ConfigError::InvalidTarget(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let config_content = "test content";
        let file = create_temp_config(config_content);

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        // Same content should produce same hash
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
