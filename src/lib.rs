//! bili-harvest: a paced acquisition pipeline for Bilibili content
//!
//! This crate collects video metadata, comment threads and overlay messages
//! from a rate-sensitive public platform. It paces and retries every request,
//! extracts fields through ordered fallback strategies, falls back to a real
//! browser when lightweight requests cannot see a value, and merges results
//! idempotently into a canonical store with tabular artifacts per run.

pub mod api;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod credentials;
pub mod diagnostics;
pub mod extract;
pub mod model;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(crawler::TransportError),

    #[error("Browser error: {0}")]
    Browser(browser::BrowserError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("No credential available for session '{credential}'")]
    AuthMissing { credential: String },

    #[error("Login verification failed: {0}")]
    LoginVerificationFailed(String),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crawler::TransportError> for HarvestError {
    fn from(e: crawler::TransportError) -> Self {
        match e {
            crawler::TransportError::AuthMissing { credential } => Self::AuthMissing { credential },
            other => Self::Transport(other),
        }
    }
}

impl From<browser::BrowserError> for HarvestError {
    fn from(e: browser::BrowserError) -> Self {
        match e {
            browser::BrowserError::LoginVerificationFailed { .. } => {
                Self::LoginVerificationFailed(e.to_string())
            }
            other => Self::Browser(other),
        }
    }
}

impl HarvestError {
    /// Errors that end the whole run rather than one item
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::AuthMissing { .. } | Self::LoginVerificationFailed(_) | Self::Config(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid content id: {0}")]
    InvalidTarget(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{CommentRecord, CommentTier, ContentItem, Counters, OverlayMessage};
pub use state::{AttemptState, FetchAttempt};
