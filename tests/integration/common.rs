//! Shared fixtures: configuration, provider payloads and mock responders

use bili_harvest::config::{parse_config, Config};
use serde_json::json;
use std::path::Path;
use wiremock::{Request, Respond, ResponseTemplate};

pub const COOKIE: &str = "SESSDATA=test; bili_jct=token";

/// Publish time of every mocked video: 2024-01-01 08:00:00 provider-local
pub const PUBDATE: i64 = 1_704_067_200;

/// Builds a configuration pointing every endpoint at `base`
///
/// Delays are zero and retries immediate so the tests run quickly.
/// `extra` is appended verbatim and may add any other section.
pub fn create_test_config(base: &str, dir: &Path, sessions: &[&str], extra: &str) -> Config {
    let names = sessions
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");
    let content = format!(
        r#"
[session]
credential-names = [{names}]
require-auth = false

[transport]
timeout-secs = 5
request-delay-min-ms = 0
request-delay-max-ms = 0
page-delay-min-ms = 0
page-delay-max-ms = 0
comment-page-delay-min-ms = 0
comment-page-delay-max-ms = 0

[retry]
max-attempts = 2
base-delay-ms = 0
max-delay-ms = 0

[endpoints]
api-base = "{base}"
search-base = "{base}"
web-base = "{base}"

[output]
database-path = "{db}"
output-dir = "{out}"
diagnostics-dir = "{diag}"

{extra}
"#,
        names = names,
        base = base,
        db = dir.join("store.db").display(),
        out = dir.join("out").display(),
        diag = dir.join("diagnostics").display(),
        extra = extra,
    );
    parse_config(&content).expect("test config should parse")
}

/// A well-formed test id for index `i`
pub fn test_bvid(i: usize) -> String {
    format!("BV1test{:05}", i)
}

/// Archive id the view responder assigns to a test id
pub fn aid_for(bvid: &str) -> u64 {
    170_000 + bvid.bytes().map(u64::from).sum::<u64>()
}

/// Part id the view responder assigns to a test id
pub fn cid_for(bvid: &str) -> u64 {
    aid_for(bvid) + 100_000
}

/// One search results page listing `ids`
pub fn search_page(ids: &[String]) -> String {
    let cards: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="bili-video-card"><div class="bili-video-card__info--right">
                <a href="//www.bilibili.com/video/{id}/"><h3 class="bili-video-card__info--tit" title="card {id}">card {id}</h3></a>
                <span class="bili-video-card__info--author">up</span>
                <span class="bili-video-card__info--date">· 2024-01-01</span>
                </div></div>"#,
                id = id
            )
        })
        .collect();
    format!(
        r#"<html><body><div class="video-list">{}</div></body></html>"#,
        cards
    )
}

/// Answers the view endpoint for whatever `bvid` the request names
pub struct ViewResponder;

impl Respond for ViewResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let bvid = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "bvid")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "0",
            "data": {
                "bvid": bvid,
                "aid": aid_for(&bvid),
                "cid": cid_for(&bvid),
                "title": format!("title of {}", bvid),
                "pubdate": PUBDATE,
                "owner": {"name": "uploader"},
                "stat": {
                    "view": 1200, "danmaku": 3, "like": 45, "coin": 6,
                    "favorite": 7, "share": 8, "reply": 3
                }
            }
        }))
    }
}

/// Pinned comment payload with one pinned root
pub fn pinned_payload() -> serde_json::Value {
    json!({
        "code": 0,
        "data": {
            "top": {
                "upper": {
                    "rpid": 1, "like": 50, "rcount": 0, "ctime": PUBDATE,
                    "member": {"uname": "uploader"},
                    "content": {"message": "pinned notice"}
                }
            }
        }
    })
}

/// First comment page: the pinned root again, one root and its reply
pub fn comment_page_one() -> serde_json::Value {
    json!({
        "code": 0,
        "data": {
            "page": {"num": 1, "size": 20, "count": 2},
            "replies": [
                {
                    "rpid": 1, "like": 50, "rcount": 0, "ctime": PUBDATE,
                    "member": {"uname": "uploader"},
                    "content": {"message": "pinned notice"}
                },
                {
                    "rpid": 100, "root": 0, "like": 9, "rcount": 1, "ctime": PUBDATE,
                    "member": {"uname": "alice"},
                    "content": {"message": "first, with a comma"},
                    "replies": [
                        {"rpid": 101, "root": 100, "parent": 100, "like": 1,
                         "ctime": PUBDATE + 60,
                         "member": {"uname": "bob"},
                         "content": {"message": "a reply\non two lines"}}
                    ]
                }
            ]
        }
    })
}

/// A comment page past the end of the thread
pub fn empty_comment_page() -> serde_json::Value {
    json!({"code": 0, "data": {"page": {"num": 2, "size": 20, "count": 2}, "replies": []}})
}

/// Overlay list with three messages, two in the same second
pub fn overlay_document(cid: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<i><chatserver>chat.bilibili.com</chatserver><chatid>{cid}</chatid>
<d p="12.5,1,25,16777215,1704067300,0,abc,1003">third</d>
<d p="3.25,1,25,16777215,1704067200,0,abc,1001">first</d>
<d p="3.75,1,25,16777215,1704067260,0,abc,1002">second</d>
</i>"#,
        cid = cid
    )
}
