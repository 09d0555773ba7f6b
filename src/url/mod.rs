//! URL and identifier handling
//!
//! This module knows the shape of provider identifiers ("BV" ids) and how to
//! build the canonical URLs the rest of the crate requests or persists.

mod bvid;

pub use bvid::{extract_bvid, is_bvid};

use crate::{UrlError, UrlResult};
use url::Url;

/// Default base for JSON/XML endpoints
pub const DEFAULT_API_BASE: &str = "https://api.bilibili.com";

/// Default base for the search listing surface
pub const DEFAULT_SEARCH_BASE: &str = "https://search.bilibili.com";

/// Default base for public video pages
pub const DEFAULT_WEB_BASE: &str = "https://www.bilibili.com";

/// Builds the canonical page URL of a video
///
/// # Arguments
///
/// * `web_base` - Base of the public site (e.g. `DEFAULT_WEB_BASE`)
/// * `bvid` - The video identifier
///
/// # Examples
///
/// ```
/// use bili_harvest::url::{video_url, DEFAULT_WEB_BASE};
///
/// assert_eq!(
///     video_url(DEFAULT_WEB_BASE, "BV1xx411c7mD"),
///     "https://www.bilibili.com/video/BV1xx411c7mD"
/// );
/// ```
pub fn video_url(web_base: &str, bvid: &str) -> String {
    format!("{}/video/{}", web_base.trim_end_matches('/'), bvid)
}

/// Joins an absolute endpoint path onto a base URL and appends query pairs
///
/// # Arguments
///
/// * `base` - Scheme and host (any path on the base is replaced)
/// * `path` - Absolute path of the endpoint, e.g. `/x/v2/reply`
/// * `query` - Query pairs, appended in order
///
/// # Returns
///
/// * `Ok(Url)` - The full request URL
/// * `Err(UrlError)` - The base or path did not parse
pub fn endpoint_url(base: &str, path: &str, query: &[(&str, String)]) -> UrlResult<Url> {
    let base = Url::parse(base).map_err(|e| UrlError::Parse(format!("{}: {}", base, e)))?;
    if base.cannot_be_a_base() {
        return Err(UrlError::Malformed(base.to_string()));
    }
    let mut url = base
        .join(path)
        .map_err(|e| UrlError::Parse(format!("{}: {}", path, e)))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_url_trims_trailing_slash() {
        assert_eq!(
            video_url("http://127.0.0.1:8080/", "BV1xx411c7mD"),
            "http://127.0.0.1:8080/video/BV1xx411c7mD"
        );
    }

    #[test]
    fn test_endpoint_url_with_query() {
        let url = endpoint_url(
            DEFAULT_API_BASE,
            "/x/v2/reply",
            &[("pn", "2".to_string()), ("oid", "170001".to_string())],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.bilibili.com/x/v2/reply?pn=2&oid=170001"
        );
    }

    #[test]
    fn test_endpoint_url_encodes_keyword() {
        let url = endpoint_url(
            DEFAULT_SEARCH_BASE,
            "/all",
            &[("keyword", "机器人 比赛".to_string())],
        )
        .unwrap();
        assert!(url.as_str().starts_with("https://search.bilibili.com/all?keyword="));
        assert!(!url.as_str().contains(' '));
    }

    #[test]
    fn test_endpoint_url_rejects_bad_base() {
        assert!(endpoint_url("not a url", "/x", &[]).is_err());
        assert!(endpoint_url("mailto:someone@example.com", "/x", &[]).is_err());
    }
}
