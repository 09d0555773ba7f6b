//! Rate-limited HTTP transport
//!
//! This module handles all lightweight requests to the provider, including:
//! - Building the HTTP client with timeouts and compression
//! - Rotating the client identity per request
//! - Serializing requests per session with a randomized minimum gap
//! - Failing fast when a required credential is absent
//! - Classifying failures for the retry controller

use crate::config::{EndpointsConfig, TransportConfig};
use crate::crawler::identity::{build_headers, pick_user_agent, RequestIdentity};
use crate::crawler::retry::Classify;
use crate::crawler::scheduler::Pacer;
use crate::state::{FailureClass, SessionState};
use crate::url::{endpoint_url, video_url};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

/// Largest body kept on an error for diagnostic dumps
const MAX_DIAGNOSTIC_BODY: usize = 64 * 1024;

/// Provider error codes that signal throttling or risk control
const THROTTLE_CODES: &[i64] = &[-352, -412, -509, -799];

/// Shape of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Json,
    Xml,
    Html,
}

/// Provider endpoints reachable through the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Video metadata and counters
    VideoView,
    /// Pinned comment of a thread
    PinnedComments,
    /// One page of root comments with nested replies
    CommentPage,
    /// Overlay messages of one part
    OverlayList,
    /// Rendered search results page
    SearchListing,
    /// Public video page
    VideoPage,
}

impl Endpoint {
    pub fn body_kind(&self) -> BodyKind {
        match self {
            Self::VideoView | Self::PinnedComments | Self::CommentPage => BodyKind::Json,
            Self::OverlayList => BodyKind::Xml,
            Self::SearchListing | Self::VideoPage => BodyKind::Html,
        }
    }

    /// Whether the endpoint refuses anonymous clients
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Self::PinnedComments | Self::CommentPage | Self::SearchListing
        )
    }
}

/// One request: an endpoint, its query, and the video it concerns
#[derive(Debug, Clone)]
pub struct Request {
    pub endpoint: Endpoint,
    pub query: Vec<(&'static str, String)>,
    /// Video the request concerns; drives the referer and the page path
    pub subject: Option<String>,
}

impl Request {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            query: Vec::new(),
            subject: None,
        }
    }

    /// Appends one query pair
    pub fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    /// Marks the video this request concerns
    pub fn about(mut self, bvid: &str) -> Self {
        self.subject = Some(bvid.to_string());
        self
    }
}

/// Decoded body of a successful response
#[derive(Debug, Clone)]
pub enum Payload {
    /// Parsed JSON; the envelope `code` was already checked to be 0
    Json(Value),
    /// Markup (HTML or XML) as text
    Text(String),
}

/// A successful response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub payload: Payload,
}

impl RawResponse {
    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            Payload::Json(_) => None,
        }
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No credential for session '{credential}'")]
    AuthMissing { credential: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection error for {url}: {message}")]
    Connection { url: String, message: String },

    #[error("HTTP {code} for {url}")]
    HttpStatus { url: String, code: u16, body: String },

    #[error("Malformed body from {url}: {message}")]
    MalformedBody {
        url: String,
        message: String,
        body: String,
    },

    #[error("Provider returned code {code} for {url}: {message}")]
    Api {
        url: String,
        code: i64,
        message: String,
        body: String,
    },

    #[error("Request error for {url}: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    /// Raw payload attached to the failure, if any
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { body, .. }
            | Self::MalformedBody { body, .. }
            | Self::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// A 2xx response missing a value the caller cannot do without
    pub fn malformed(url: &str, message: impl Into<String>, body: &str) -> Self {
        Self::MalformedBody {
            url: url.to_string(),
            message: message.into(),
            body: truncate_body(body.to_string()),
        }
    }

    /// Returns the provider code of an `Api` failure
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if e.is_connect() || e.is_body() || e.is_decode() {
            Self::Connection {
                url: url.to_string(),
                message: e.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

impl Classify for TransportError {
    fn failure_class(&self) -> FailureClass {
        match self {
            Self::MalformedBody { .. } => FailureClass::ImmediateRetry,
            Self::Timeout { .. } | Self::Connection { .. } => FailureClass::DelayedRetry,
            Self::HttpStatus { code, .. } if *code == 412 || *code == 429 || *code >= 500 => {
                FailureClass::DelayedRetry
            }
            Self::Api { code, .. } if THROTTLE_CODES.contains(code) => FailureClass::DelayedRetry,
            _ => FailureClass::Unclassified,
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthMissing { .. })
    }

    fn diagnostic_payload(&self) -> Option<&str> {
        self.raw_body()
    }
}

/// A paced request stream bound to one session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of the session (the credential name)
    fn session(&self) -> &str;

    /// Performs one request
    ///
    /// # Returns
    ///
    /// * `Ok(RawResponse)` - 2xx response whose body matches the endpoint's kind
    /// * `Err(TransportError)` - Classified failure; `AuthMissing` is returned
    ///   before any network activity
    async fn fetch(&self, request: &Request) -> Result<RawResponse, TransportError>;
}

/// Builds the HTTP client shared by all requests of one session
///
/// The user agent is set per request, not on the client.
pub fn build_http_client(config: &TransportConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}

/// Transport backed by `reqwest`
pub struct HttpTransport {
    client: Client,
    session: String,
    cookie: Option<String>,
    endpoints: EndpointsConfig,
    pacer: Pacer,
    /// Held for the whole request, so a session never has two in flight
    state: Mutex<SessionState>,
}

impl HttpTransport {
    /// Creates a transport for one session
    ///
    /// # Arguments
    ///
    /// * `session` - Credential name identifying the session
    /// * `cookie` - The credential, if one was found
    /// * `transport` - Timeouts
    /// * `endpoints` - Endpoint bases
    /// * `pacer` - Delay ranges
    pub fn new(
        session: &str,
        cookie: Option<String>,
        transport: &TransportConfig,
        endpoints: EndpointsConfig,
        pacer: Pacer,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(transport)?,
            session: session.to_string(),
            cookie,
            endpoints,
            pacer,
            state: Mutex::new(SessionState::new()),
        })
    }

    /// Number of requests this session has issued
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }

    fn resolve_url(&self, request: &Request) -> Result<url::Url, TransportError> {
        let (base, path) = match request.endpoint {
            Endpoint::VideoView => (&self.endpoints.api_base, "/x/web-interface/view".to_string()),
            Endpoint::PinnedComments => (&self.endpoints.api_base, "/x/v2/reply/main".to_string()),
            Endpoint::CommentPage => (&self.endpoints.api_base, "/x/v2/reply".to_string()),
            Endpoint::OverlayList => (&self.endpoints.api_base, "/x/v1/dm/list.so".to_string()),
            Endpoint::SearchListing => (&self.endpoints.search_base, "/all".to_string()),
            Endpoint::VideoPage => {
                let bvid = request.subject.as_deref().unwrap_or_default();
                (&self.endpoints.web_base, format!("/video/{}", bvid))
            }
        };
        endpoint_url(base, &path, &request.query).map_err(|e| TransportError::Request {
            url: format!("{}{}", base, path),
            message: e.to_string(),
        })
    }

    async fn send(&self, url: &url::Url, request: &Request) -> Result<RawResponse, TransportError> {
        let url_str = url.to_string();
        let web_base = self.endpoints.web_base.trim_end_matches('/');
        let referer = match &request.subject {
            Some(bvid) => video_url(web_base, bvid),
            None => format!("{}/", web_base),
        };
        let user_agent = pick_user_agent(&mut rand::thread_rng());
        let kind = request.endpoint.body_kind();
        let headers = build_headers(
            &RequestIdentity {
                user_agent,
                referer: &referer,
                origin: web_base,
                cookie: self.cookie.as_deref(),
            },
            kind,
        );

        tracing::debug!("[{}] GET {}", self.session, url_str);

        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url_str, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&url_str, e))?;

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                url: url_str,
                code: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let payload = match kind {
            BodyKind::Json => Payload::Json(decode_envelope(&url_str, body)?),
            BodyKind::Xml | BodyKind::Html => Payload::Text(body),
        };

        Ok(RawResponse {
            url: url_str,
            status: status.as_u16(),
            payload,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn session(&self) -> &str {
        &self.session
    }

    async fn fetch(&self, request: &Request) -> Result<RawResponse, TransportError> {
        if request.endpoint.requires_auth() && self.cookie.is_none() {
            return Err(TransportError::AuthMissing {
                credential: self.session.clone(),
            });
        }

        let url = self.resolve_url(request)?;

        let mut state = self.state.lock().await;
        let gap = self.pacer.request_gap();
        if let Some(wait) = state.time_until_next_request(gap, Instant::now()) {
            tracing::trace!("[{}] waiting {:?} before next request", self.session, wait);
            tokio::time::sleep(wait).await;
        }

        let result = self.send(&url, request).await;
        state.record_request(Instant::now());
        result
    }
}

/// Parses a JSON envelope and checks its `code`
///
/// A body that is not JSON is `MalformedBody`; an envelope whose `code` is
/// present and non-zero is `Api`.
pub fn decode_envelope(url: &str, body: String) -> Result<Value, TransportError> {
    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return Err(TransportError::MalformedBody {
                url: url.to_string(),
                message: e.to_string(),
                body: truncate_body(body),
            })
        }
    };

    let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(TransportError::Api {
            url: url.to_string(),
            code,
            message,
            body: truncate_body(body),
        });
    }

    Ok(value)
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_DIAGNOSTIC_BODY {
        let mut end = MAX_DIAGNOSTIC_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
