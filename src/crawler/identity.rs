//! Client identity rotation
//!
//! Each request presents a user agent drawn at random from a fixed pool of
//! current desktop browsers, plus the header set a browser on the provider's
//! site would send.

use crate::crawler::fetcher::BodyKind;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, ORIGIN, REFERER, USER_AGENT,
};

/// Desktop browser user agents presented to the provider
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Picks a user agent from the pool
pub fn pick_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Everything that identifies one outbound request
#[derive(Debug, Clone)]
pub struct RequestIdentity<'a> {
    pub user_agent: &'a str,
    /// Page the request claims to come from
    pub referer: &'a str,
    /// Site origin, sent alongside the referer
    pub origin: &'a str,
    pub cookie: Option<&'a str>,
}

/// Builds the header set for one request
///
/// Values that cannot be represented as header values (a cookie with a raw
/// newline, say) are dropped with a warning instead of failing the request.
pub fn build_headers(identity: &RequestIdentity<'_>, kind: BodyKind) -> HeaderMap {
    let mut headers = HeaderMap::new();

    insert(&mut headers, USER_AGENT, identity.user_agent);
    insert(&mut headers, REFERER, identity.referer);
    insert(&mut headers, ORIGIN, identity.origin);
    insert(&mut headers, ACCEPT, accept_for(kind));
    insert(&mut headers, ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE);
    if let Some(cookie) = identity.cookie {
        insert(&mut headers, COOKIE, cookie);
    }

    headers
}

fn accept_for(kind: BodyKind) -> &'static str {
    match kind {
        BodyKind::Json => "application/json, text/plain, */*",
        BodyKind::Xml => "application/xml, text/xml, */*",
        BodyKind::Html => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    }
}

fn insert(headers: &mut HeaderMap, name: reqwest::header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!("Dropping unrepresentable {} header", name),
    }
}
