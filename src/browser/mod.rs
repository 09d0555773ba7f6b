//! Browser-automation fallback
//!
//! Used when the lightweight transport cannot see a value, typically the
//! exact publish time of a search result. Rendering goes through a
//! [`RenderBackend`]; the production backend drives Chrome over the DevTools
//! protocol and gives every render its own throwaway browsing context.
//!
//! Before the first render the session is bootstrapped: the home page is
//! opened, the stored cookies injected, the page reloaded, and the signed-in
//! marker awaited. Not seeing the marker is `LoginVerificationFailed`.

mod chrome;

pub use chrome::ChromeBackend;

use crate::api::item_from_page;
use crate::config::BrowserConfig;
use crate::credentials::split_cookie_pairs;
use crate::crawler::{Classify, Outcome, RetryController, SessionRestarter};
use crate::extract::{field, Extracted};
use crate::model::ContentItem;
use crate::state::{FailureClass, OperationKind};
use crate::url::video_url;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Elements that only render for a signed-in visitor
pub const LOGIN_MARKER_SELECTOR: &str = ".header-avatar, .h-avatar, .avatar";

/// Elements present once a video page has rendered its metadata
pub const VIDEO_READY_SELECTOR: &str = "h1.video-title, .video-info-title, meta[itemprop='datePublished']";

/// Largest rendered document kept for a diagnostic dump
const MAX_DIAGNOSTIC_HTML: usize = 256 * 1024;

/// Browser-level failures
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Invalid browser configuration: {0}")]
    Config(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out rendering {url}")]
    Timeout { url: String },

    #[error("Browser session unusable: {0}")]
    Driver(String),

    #[error("No signed-in marker on {home} within {waited_secs}s")]
    LoginVerificationFailed { home: String, waited_secs: u64 },

    #[error("Rendered {url} still lacks {missing:?}")]
    FieldsMissing {
        url: String,
        missing: Vec<&'static str>,
        html: String,
    },
}

impl Classify for BrowserError {
    fn failure_class(&self) -> FailureClass {
        match self {
            Self::Navigation { .. } | Self::Timeout { .. } => FailureClass::DelayedRetry,
            Self::Driver(_) | Self::LoginVerificationFailed { .. } => FailureClass::RestartSession,
            Self::FieldsMissing { .. } => FailureClass::ImmediateRetry,
            Self::Launch(_) | Self::Config(_) => FailureClass::Unclassified,
        }
    }

    /// A browser that cannot start or be configured will not recover by retrying
    fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Config(_))
    }

    /// A login that fails on a freshly restarted browser will not recover
    fn is_fatal_after_restart(&self) -> bool {
        matches!(self, Self::LoginVerificationFailed { .. })
    }

    fn diagnostic_payload(&self) -> Option<&str> {
        match self {
            Self::FieldsMissing { html, .. } => Some(html),
            _ => None,
        }
    }
}

/// Cookies to inject into every browsing context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    /// Cookie domain, e.g. `.bilibili.com`
    pub domain: String,
    pub pairs: Vec<(String, String)>,
}

impl CookieJar {
    /// Splits a cookie header and scopes it to the registrable domain of `web_base`
    pub fn from_header(header: &str, web_base: &str) -> Self {
        Self {
            domain: cookie_domain(web_base),
            pairs: split_cookie_pairs(header),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// `https://www.bilibili.com` → `.bilibili.com`; hosts without a dot are kept as-is
fn cookie_domain(web_base: &str) -> String {
    let host = url::Url::parse(web_base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 && host.parse::<std::net::IpAddr>().is_err() {
        format!(".{}", labels[labels.len() - 2..].join("."))
    } else {
        host
    }
}

/// Something that can render pages in isolated browsing contexts
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Opens `home`, injects `cookies`, reloads, and waits for `marker`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The marker appeared within `timeout`
    /// * `Err(BrowserError::LoginVerificationFailed)` - It did not
    async fn verify_login(
        &self,
        home: &str,
        cookies: &CookieJar,
        marker: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Renders `url` in a fresh context and returns the document HTML
    ///
    /// The context is torn down before returning, on success and on error.
    async fn render(
        &self,
        url: &str,
        cookies: &CookieJar,
        ready: Option<&str>,
        timeout: Duration,
    ) -> Result<String, BrowserError>;

    /// Tears the browser down and starts a new one
    async fn restart(&self) -> Result<(), BrowserError>;

    async fn shutdown(&self);
}

/// Renders video pages when lightweight extraction left gaps
pub struct BrowserFallback {
    backend: Box<dyn RenderBackend>,
    cookies: CookieJar,
    web_base: String,
    login_timeout: Duration,
    render_timeout: Duration,
    /// Whether the current browser session passed login verification
    verified: Mutex<bool>,
}

impl BrowserFallback {
    pub fn new(
        backend: Box<dyn RenderBackend>,
        cookie: Option<&str>,
        web_base: &str,
        config: &BrowserConfig,
    ) -> Self {
        Self {
            backend,
            cookies: cookie
                .map(|c| CookieJar::from_header(c, web_base))
                .unwrap_or_default(),
            web_base: web_base.trim_end_matches('/').to_string(),
            login_timeout: Duration::from_secs(config.login_timeout_secs),
            render_timeout: Duration::from_secs(config.render_timeout_secs),
            verified: Mutex::new(false),
        }
    }

    /// Verifies the session is signed in, once per browser session
    pub async fn bootstrap(&self) -> Result<(), BrowserError> {
        let mut verified = self.verified.lock().await;
        if *verified {
            return Ok(());
        }

        if self.cookies.is_empty() {
            tracing::warn!("Browser fallback has no credential; rendering anonymously");
        } else {
            let home = format!("{}/", self.web_base);
            self.backend
                .verify_login(&home, &self.cookies, LOGIN_MARKER_SELECTOR, self.login_timeout)
                .await?;
            tracing::info!("Browser session verified as signed in");
        }
        *verified = true;
        Ok(())
    }

    /// Renders the video page of `bvid` and extracts it
    ///
    /// Fails with `FieldsMissing` when the rendered page still has no
    /// second-precision publish time, which is the value the fallback is
    /// consulted for.
    pub async fn render_item(&self, bvid: &str) -> Result<(ContentItem, Extracted), BrowserError> {
        self.bootstrap().await?;

        let url = video_url(&self.web_base, bvid);
        let html = self
            .backend
            .render(&url, &self.cookies, Some(VIDEO_READY_SELECTOR), self.render_timeout)
            .await?;
        let (item, extracted) = item_from_page(bvid, &self.web_base, &html);

        if item.needs_precise_publish_time() {
            let mut html = html;
            if html.len() > MAX_DIAGNOSTIC_HTML {
                let mut end = MAX_DIAGNOSTIC_HTML;
                while !html.is_char_boundary(end) {
                    end -= 1;
                }
                html.truncate(end);
            }
            return Err(BrowserError::FieldsMissing {
                url,
                missing: vec![field::PUBLISHED],
                html,
            });
        }
        Ok((item, extracted))
    }

    /// Fills the gaps of `item` from its rendered page
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Extracted))` - The page rendered; `item` was updated
    /// * `Ok(None)` - Rendering was skipped after retries; `item` is unchanged
    /// * `Err(BrowserError)` - The browser session is unusable for the run
    pub async fn refine(
        &self,
        controller: &RetryController,
        item: &mut ContentItem,
    ) -> Result<Option<Extracted>, BrowserError> {
        let bvid = item.bvid.clone();
        let outcome = controller
            .execute(
                OperationKind::BrowserRender,
                &bvid,
                Some(self as &dyn SessionRestarter<BrowserError>),
                |_| self.render_item(&bvid),
            )
            .await;

        match outcome {
            Outcome::Success((rendered, extracted)) => {
                item.fill_from(&rendered);
                tracing::debug!("{}: refined from rendered page", bvid);
                Ok(Some(extracted))
            }
            Outcome::Skipped(report) => {
                tracing::warn!(
                    "{}: keeping day-precision publish time ({})",
                    bvid,
                    report.reason
                );
                Ok(None)
            }
            Outcome::Fatal(e) => Err(e),
        }
    }

    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}

#[async_trait]
impl SessionRestarter<BrowserError> for BrowserFallback {
    async fn restart(&self) -> Result<(), BrowserError> {
        self.backend.restart().await?;
        *self.verified.lock().await = false;
        self.bootstrap().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::RetryPolicy;
    use crate::model::{PublishTime, TimePrecision};
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const RENDERED: &str = r#"<html><head>
        <meta itemprop="datePublished" content="2024-01-01 10:30:00">
        <meta name="author" content="UP">
        </head><body><h1 class="video-title" title="标题">标题</h1></body></html>"#;

    #[derive(Default)]
    struct Calls {
        logins: AtomicU32,
        renders: AtomicU32,
        restarts: AtomicU32,
    }

    /// Backend replaying scripted login and render results
    struct ScriptedBackend {
        logins: std::sync::Mutex<VecDeque<Result<(), BrowserError>>>,
        renders: std::sync::Mutex<VecDeque<Result<String, BrowserError>>>,
        calls: Arc<Calls>,
    }

    impl ScriptedBackend {
        fn create_test_backend(
            logins: Vec<Result<(), BrowserError>>,
            renders: Vec<Result<String, BrowserError>>,
        ) -> (Self, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            (
                Self {
                    logins: std::sync::Mutex::new(logins.into()),
                    renders: std::sync::Mutex::new(renders.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl RenderBackend for ScriptedBackend {
        async fn verify_login(
            &self,
            home: &str,
            _cookies: &CookieJar,
            _marker: &str,
            timeout: Duration,
        ) -> Result<(), BrowserError> {
            self.calls.logins.fetch_add(1, Ordering::SeqCst);
            self.logins.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(BrowserError::LoginVerificationFailed {
                    home: home.to_string(),
                    waited_secs: timeout.as_secs(),
                })
            })
        }

        async fn render(
            &self,
            url: &str,
            _cookies: &CookieJar,
            _ready: Option<&str>,
            _timeout: Duration,
        ) -> Result<String, BrowserError> {
            self.calls.renders.fetch_add(1, Ordering::SeqCst);
            self.renders
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BrowserError::Timeout { url: url.to_string() }))
        }

        async fn restart(&self) -> Result<(), BrowserError> {
            self.calls.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn create_test_fallback(backend: ScriptedBackend) -> BrowserFallback {
        BrowserFallback::new(
            Box::new(backend),
            Some("SESSDATA=abc; bili_jct=def"),
            "https://www.bilibili.com",
            &BrowserConfig::default(),
        )
    }

    fn create_test_controller() -> RetryController {
        RetryController::new(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO))
    }

    fn day_only_item() -> ContentItem {
        let mut item = ContentItem::new("BV1xx411c7mD");
        item.published_at = Some(PublishTime::day(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ));
        item
    }

    #[test]
    fn test_cookie_jar() {
        let jar = CookieJar::from_header("SESSDATA=abc; bili_jct=def", "https://www.bilibili.com");
        assert_eq!(jar.domain, ".bilibili.com");
        assert_eq!(jar.pairs.len(), 2);
        assert_eq!(cookie_domain("http://127.0.0.1:8080"), "127.0.0.1");
        assert_eq!(cookie_domain("http://localhost"), "localhost");
    }

    #[test]
    fn test_classification() {
        let driver = BrowserError::Driver("ws closed".into());
        assert_eq!(driver.failure_class(), FailureClass::RestartSession);

        let missing = BrowserError::FieldsMissing {
            url: "u".into(),
            missing: vec![field::PUBLISHED],
            html: "<html/>".into(),
        };
        assert_eq!(missing.failure_class(), FailureClass::ImmediateRetry);
        assert_eq!(missing.diagnostic_payload(), Some("<html/>"));

        assert!(BrowserError::Launch("no chrome".into()).is_fatal());
        assert!(!BrowserError::Timeout { url: "u".into() }.is_fatal());

        let login = BrowserError::LoginVerificationFailed {
            home: "h".into(),
            waited_secs: 20,
        };
        assert!(login.is_fatal_after_restart());
        assert!(!driver.is_fatal_after_restart());
    }

    #[tokio::test]
    async fn test_refine_sets_precise_time() {
        let (backend, calls) =
            ScriptedBackend::create_test_backend(vec![Ok(())], vec![Ok(RENDERED.to_string())]);
        let fallback = create_test_fallback(backend);
        let mut item = day_only_item();

        let extracted = fallback
            .refine(&create_test_controller(), &mut item)
            .await
            .unwrap();

        assert!(extracted.is_some());
        let published = item.published_at.unwrap();
        assert_eq!(published.precision, TimePrecision::Second);
        assert_eq!(published.to_display_string(), "2024-01-01 10:30:00");
        assert_eq!(item.title.as_deref(), Some("标题"));
        assert_eq!(calls.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let (backend, calls) = ScriptedBackend::create_test_backend(
            vec![Ok(())],
            vec![Ok(RENDERED.to_string()), Ok(RENDERED.to_string())],
        );
        let fallback = create_test_fallback(backend);
        fallback.render_item("BV1xx411c7mD").await.unwrap();
        fallback.render_item("BV1GJ411x7h7").await.unwrap();
        assert_eq!(calls.logins.load(Ordering::SeqCst), 1);
        assert_eq!(calls.renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_failure_restarts_once_then_is_fatal() {
        let (backend, calls) = ScriptedBackend::create_test_backend(vec![], vec![]);
        let fallback = create_test_fallback(backend);
        let mut item = day_only_item();

        let result = fallback.refine(&create_test_controller(), &mut item).await;

        assert!(matches!(
            result,
            Err(BrowserError::LoginVerificationFailed { .. })
        ));
        assert_eq!(calls.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(calls.logins.load(Ordering::SeqCst), 2);
        assert_eq!(calls.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_recovers_after_restart() {
        let (backend, calls) = ScriptedBackend::create_test_backend(
            vec![
                Err(BrowserError::LoginVerificationFailed {
                    home: "h".into(),
                    waited_secs: 20,
                }),
                Ok(()),
            ],
            vec![Ok(RENDERED.to_string())],
        );
        let fallback = create_test_fallback(backend);
        let mut item = day_only_item();

        let result = fallback.refine(&create_test_controller(), &mut item).await;

        assert!(matches!(result, Ok(Some(_))));
        assert_eq!(calls.restarts.load(Ordering::SeqCst), 1);
        assert!(item.published_at.unwrap().is_precise());
    }

    #[tokio::test]
    async fn test_page_without_time_is_skipped() {
        let bare = "<html><body><h1 class=\"video-title\">t</h1></body></html>".to_string();
        let (backend, calls) = ScriptedBackend::create_test_backend(
            vec![Ok(())],
            vec![Ok(bare.clone()), Ok(bare.clone()), Ok(bare)],
        );
        let fallback = create_test_fallback(backend);
        let mut item = day_only_item();

        let result = fallback
            .refine(&create_test_controller(), &mut item)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(calls.renders.load(Ordering::SeqCst), 3);
        assert_eq!(item.published_at.unwrap().precision, TimePrecision::Day);
        assert!(item.title.is_none());
    }
}
