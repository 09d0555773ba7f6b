//! Chrome DevTools render backend

use super::{BrowserError, CookieJar, RenderBackend};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A launched browser and its event handler task
///
/// The handler is aborted on drop so it never outlives the browser.
struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn from_cdp(url: &str, e: CdpError) -> BrowserError {
    match e {
        CdpError::Timeout => BrowserError::Timeout {
            url: url.to_string(),
        },
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            BrowserError::Driver(e.to_string())
        }
        other => BrowserError::Navigation {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

async fn launch(config: &BrowserConfig) -> Result<BrowserWrapper, BrowserError> {
    let mut builder = LaunchConfig::builder()
        .request_timeout(Duration::from_secs(config.render_timeout_secs))
        .window_size(1920, 1080)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio");
    if !config.headless {
        builder = builder.with_head();
    }
    if let Some(path) = &config.chrome_path {
        builder = builder.chrome_executable(path);
    }
    let launch_config = builder.build().map_err(BrowserError::Config)?;

    tracing::info!("Launching browser (headless: {})", config.headless);
    let (browser, mut handler) = Browser::launch(launch_config)
        .await
        .map_err(|e| BrowserError::Launch(e.to_string()))?;

    let handler = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("Browser handler error: {:?}", e);
            }
        }
    });

    Ok(BrowserWrapper { browser, handler })
}

fn cookie_params(cookies: &CookieJar) -> Result<Vec<CookieParam>, BrowserError> {
    cookies
        .pairs
        .iter()
        .map(|(name, value)| {
            CookieParam::builder()
                .name(name.as_str())
                .value(value.as_str())
                .domain(cookies.domain.as_str())
                .path("/")
                .build()
                .map_err(BrowserError::Config)
        })
        .collect()
}

/// Polls for `selector` until it appears or `timeout` elapses
async fn wait_for(page: &Page, selector: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if page.find_element(selector).await.is_ok() {
            tracing::trace!("{} appeared after {:?}", selector, start.elapsed());
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn open_page(browser: &Browser, context: &BrowserContextId) -> Result<Page, BrowserError> {
    let params = CreateTargetParams::builder()
        .url("about:blank")
        .browser_context_id(context.clone())
        .build()
        .map_err(BrowserError::Config)?;
    browser
        .new_page(params)
        .await
        .map_err(|e| from_cdp("about:blank", e))
}

/// Which steps run inside one throwaway context
enum Visit<'a> {
    /// home → cookies → reload → marker
    Login { marker: &'a str, timeout: Duration },
    /// cookies → url → optional ready marker → HTML
    Render {
        ready: Option<&'a str>,
        timeout: Duration,
    },
}

async fn visit(
    browser: &Browser,
    context: &BrowserContextId,
    url: &str,
    cookies: &CookieJar,
    visit: Visit<'_>,
) -> Result<Option<String>, BrowserError> {
    let page = open_page(browser, context).await?;
    let cookies = cookie_params(cookies)?;

    let result = match visit {
        Visit::Login { marker, timeout } => {
            page.goto(url).await.map_err(|e| from_cdp(url, e))?;
            if !cookies.is_empty() {
                page.set_cookies(cookies).await.map_err(|e| from_cdp(url, e))?;
            }
            page.reload().await.map_err(|e| from_cdp(url, e))?;
            if !wait_for(&page, marker, timeout).await {
                return Err(BrowserError::LoginVerificationFailed {
                    home: url.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }
            None
        }
        Visit::Render { ready, timeout } => {
            if !cookies.is_empty() {
                page.set_cookies(cookies).await.map_err(|e| from_cdp(url, e))?;
            }
            page.goto(url).await.map_err(|e| from_cdp(url, e))?;
            page.wait_for_navigation().await.map_err(|e| from_cdp(url, e))?;
            if let Some(ready) = ready {
                if !wait_for(&page, ready, timeout).await {
                    tracing::debug!("{}: ready marker never appeared", url);
                }
            }
            Some(page.content().await.map_err(|e| from_cdp(url, e))?)
        }
    };

    if let Err(e) = page.close().await {
        tracing::debug!("Closing page for {} failed: {}", url, e);
    }
    Ok(result)
}

/// Render backend driving a local Chrome
///
/// The browser is launched lazily. Every visit gets its own browser
/// context, disposed unconditionally afterwards, so cookies, storage and
/// crashed renderers never leak from one item into the next.
pub struct ChromeBackend {
    config: BrowserConfig,
    wrapper: Mutex<Option<BrowserWrapper>>,
}

impl ChromeBackend {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            wrapper: Mutex::new(None),
        }
    }

    /// Runs one visit inside a throwaway context
    async fn in_context(
        &self,
        url: &str,
        cookies: &CookieJar,
        step: Visit<'_>,
        limit: Duration,
    ) -> Result<Option<String>, BrowserError> {
        let mut guard = self.wrapper.lock().await;
        if guard.is_none() {
            *guard = Some(launch(&self.config).await?);
        }
        let Some(wrapper) = guard.as_mut() else {
            return Err(BrowserError::Driver("browser not running".to_string()));
        };

        let context = wrapper
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| from_cdp(url, e))?;

        let result = match tokio::time::timeout(
            limit,
            visit(&wrapper.browser, &context, url, cookies, step),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
            }),
        };

        if let Err(e) = wrapper.browser.dispose_browser_context(context).await {
            tracing::warn!("Failed to dispose browser context for {}: {}", url, e);
        }
        result
    }

    async fn close(&self) {
        let Some(mut wrapper) = self.wrapper.lock().await.take() else {
            return;
        };
        if let Err(e) = wrapper.browser.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        if let Err(e) = wrapper.browser.wait().await {
            tracing::debug!("Waiting for browser exit failed: {}", e);
        }
    }
}

#[async_trait]
impl RenderBackend for ChromeBackend {
    async fn verify_login(
        &self,
        home: &str,
        cookies: &CookieJar,
        marker: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        // navigation and reload get their own allowance on top of the marker wait
        let limit = timeout + Duration::from_secs(self.config.render_timeout_secs);
        self.in_context(home, cookies, Visit::Login { marker, timeout }, limit)
            .await
            .map(|_| ())
    }

    async fn render(
        &self,
        url: &str,
        cookies: &CookieJar,
        ready: Option<&str>,
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        self.in_context(url, cookies, Visit::Render { ready, timeout }, timeout)
            .await?
            .ok_or_else(|| BrowserError::Driver(format!("no document for {}", url)))
    }

    async fn restart(&self) -> Result<(), BrowserError> {
        tracing::warn!("Restarting browser");
        self.close().await;
        let wrapper = launch(&self.config).await?;
        *self.wrapper.lock().await = Some(wrapper);
        Ok(())
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}
