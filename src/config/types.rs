use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for a harvest run
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Keyword search; absent means no listing is paginated
    #[serde(default)]
    pub search: Option<SearchConfig>,

    #[serde(default)]
    pub comments: CommentsConfig,

    #[serde(default)]
    pub overlays: OverlaysConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    pub output: OutputConfig,
}

/// Credential and session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Local `KEY=VALUE` file holding session credentials
    #[serde(rename = "credential-file", default = "default_credential_file")]
    pub credential_file: String,

    /// One independent session is opened per credential name
    #[serde(rename = "credential-names", default = "default_credential_names")]
    pub credential_names: Vec<String>,

    /// Refuse to start when a configured credential is missing
    #[serde(rename = "require-auth", default = "default_true")]
    pub require_auth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_file: default_credential_file(),
            credential_names: default_credential_names(),
            require_auth: true,
        }
    }
}

/// Request pacing and timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Minimum randomized delay between two requests of one session (milliseconds)
    #[serde(rename = "request-delay-min-ms", default = "default_request_delay_min")]
    pub request_delay_min_ms: u64,

    #[serde(rename = "request-delay-max-ms", default = "default_request_delay_max")]
    pub request_delay_max_ms: u64,

    /// Randomized pause between listing pages (milliseconds)
    #[serde(rename = "page-delay-min-ms", default = "default_page_delay_min")]
    pub page_delay_min_ms: u64,

    #[serde(rename = "page-delay-max-ms", default = "default_page_delay_max")]
    pub page_delay_max_ms: u64,

    /// Randomized pause between comment pages (milliseconds)
    #[serde(
        rename = "comment-page-delay-min-ms",
        default = "default_comment_page_delay_min"
    )]
    pub comment_page_delay_min_ms: u64,

    #[serde(
        rename = "comment-page-delay-max-ms",
        default = "default_comment_page_delay_max"
    )]
    pub comment_page_delay_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_delay_min_ms: default_request_delay_min(),
            request_delay_max_ms: default_request_delay_max(),
            page_delay_min_ms: default_page_delay_min(),
            page_delay_max_ms: default_page_delay_max(),
            comment_page_delay_min_ms: default_comment_page_delay_min(),
            comment_page_delay_max_ms: default_comment_page_delay_max(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap of the exponential backoff (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Keyword search listing
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub keywords: Vec<String>,

    /// First day of the publish window (inclusive, `YYYY-MM-DD`)
    #[serde(rename = "start-date")]
    pub start_date: String,

    /// Last day of the publish window (inclusive, `YYYY-MM-DD`)
    #[serde(rename = "end-date")]
    pub end_date: String,

    /// Items to collect per keyword
    #[serde(rename = "target-count")]
    pub target_count: u32,

    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    #[serde(rename = "max-pages", default = "default_search_max_pages")]
    pub max_pages: u32,
}

impl SearchConfig {
    /// Parses the configured window; validation guarantees both dates parse
    pub fn window(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&self.end_date, "%Y-%m-%d").ok()?;
        Some((start, end))
    }
}

/// Sort order of comment pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommentSort {
    #[default]
    Hot,
    Time,
}

impl CommentSort {
    /// Provider query value for this ordering
    pub fn query_value(&self) -> &'static str {
        match self {
            Self::Hot => "0",
            Self::Time => "2",
        }
    }
}

/// Comment harvesting
#[derive(Debug, Clone, Deserialize)]
pub struct CommentsConfig {
    #[serde(default)]
    pub targets: Vec<String>,

    /// Also harvest comments of every item found by the search listing
    #[serde(rename = "from-search", default)]
    pub from_search: bool,

    #[serde(rename = "max-pages", default = "default_comment_max_pages")]
    pub max_pages: u32,

    #[serde(default)]
    pub sort: CommentSort,

    /// Consecutive skipped pages after which a thread is abandoned
    #[serde(
        rename = "max-consecutive-failures",
        default = "default_max_consecutive_failures"
    )]
    pub max_consecutive_failures: u32,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            from_search: false,
            max_pages: default_comment_max_pages(),
            sort: CommentSort::default(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Overlay message harvesting
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlaysConfig {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(rename = "from-search", default)]
    pub from_search: bool,
}

/// Browser-automation fallback
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(rename = "chrome-path", default)]
    pub chrome_path: Option<String>,

    /// How long to wait for the signed-in marker after injecting cookies
    #[serde(rename = "login-timeout-secs", default = "default_login_timeout")]
    pub login_timeout_secs: u64,

    /// How long one page render may take
    #[serde(rename = "render-timeout-secs", default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
            chrome_path: None,
            login_timeout_secs: default_login_timeout(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

/// Endpoint bases, overridable so tests can point at a mock server
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(rename = "api-base", default = "default_api_base")]
    pub api_base: String,

    #[serde(rename = "search-base", default = "default_search_base")]
    pub search_base: String,

    #[serde(rename = "web-base", default = "default_web_base")]
    pub web_base: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            search_base: default_search_base(),
            web_base: default_web_base(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the canonical SQLite store
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving run and final CSV artifacts
    #[serde(rename = "output-dir")]
    pub output_dir: String,

    /// Directory receiving raw payload dumps of skipped items
    #[serde(rename = "diagnostics-dir", default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,

    /// Prefix CSV files with a UTF-8 byte order mark
    #[serde(rename = "utf8-bom", default = "default_true")]
    pub utf8_bom: bool,
}

fn default_true() -> bool {
    true
}

fn default_credential_file() -> String {
    ".env".to_string()
}

fn default_credential_names() -> Vec<String> {
    vec!["BILI_COOKIE".to_string()]
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_delay_min() -> u64 {
    500
}

fn default_request_delay_max() -> u64 {
    3500
}

fn default_page_delay_min() -> u64 {
    3000
}

fn default_page_delay_max() -> u64 {
    8000
}

fn default_comment_page_delay_min() -> u64 {
    1500
}

fn default_comment_page_delay_max() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    30
}

fn default_search_max_pages() -> u32 {
    50
}

fn default_comment_max_pages() -> u32 {
    200
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_login_timeout() -> u64 {
    20
}

fn default_render_timeout() -> u64 {
    30
}

fn default_api_base() -> String {
    crate::url::DEFAULT_API_BASE.to_string()
}

fn default_search_base() -> String {
    crate::url::DEFAULT_SEARCH_BASE.to_string()
}

fn default_web_base() -> String {
    crate::url::DEFAULT_WEB_BASE.to_string()
}

fn default_diagnostics_dir() -> String {
    "diagnostics".to_string()
}
