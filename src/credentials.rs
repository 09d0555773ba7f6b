//! Credential provider
//!
//! Session credentials (browser cookie strings) are looked up by name. The
//! file-backed provider reads a local `KEY=VALUE` file and falls back to the
//! process environment; tests use the static provider.

use std::collections::HashMap;
use std::path::Path;

/// Source of named session credentials
pub trait CredentialProvider: Send + Sync {
    /// Returns the credential stored under `name`, if any
    ///
    /// Blank values are treated as absent.
    fn get_credential(&self, name: &str) -> Option<String>;
}

/// Credentials read from a `KEY=VALUE` file, with environment fallback
#[derive(Debug, Clone, Default)]
pub struct EnvFileCredentials {
    values: HashMap<String, String>,
}

impl EnvFileCredentials {
    /// Loads credentials from `path`
    ///
    /// A missing file is not an error: lookups then fall through to the
    /// process environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the credential file
    ///
    /// # Returns
    ///
    /// * `Ok(EnvFileCredentials)` - Parsed credentials
    /// * `Err(std::io::Error)` - The file exists but could not be read
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    "Credential file {} not found, using environment only",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Parses `KEY=VALUE` lines
    ///
    /// Blank lines and `#` comments are skipped, an `export ` prefix is
    /// accepted, and one layer of matching quotes around the value is removed.
    /// Cookie strings contain `=` themselves, so only the first `=` splits.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }
        Self { values }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

impl CredentialProvider for EnvFileCredentials {
    fn get_credential(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Fixed in-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential, returning the provider for chaining
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_credential(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}

/// Splits a cookie header value into `(name, value)` pairs
///
/// Used when cookies have to be injected into a browser context one by one.
pub fn split_cookie_pairs(cookie: &str) -> Vec<(String, String)> {
    cookie
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
