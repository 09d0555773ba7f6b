//! Comment threads: the pinned comment and numbered comment pages
//!
//! A thread is harvested in two steps. The pinned comment is fetched once
//! from its own endpoint; numbered pages follow until a page has no root
//! comments or the provider answers with a non-zero code.

use crate::config::CommentSort;
use crate::crawler::{
    Classify, Endpoint, ListingPage, Outcome, PageSource, Paginator, Request, RetryController,
    StopReason, Transport, TransportError,
};
use crate::model::{local_from_epoch, CommentRecord, CommentTier};
use crate::state::{FailureClass, OperationKind};
use crate::HarvestError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Where the pinned comment may sit in the `reply/main` payload, in order
const PINNED_POINTERS: &[&str] = &["/data/top/upper", "/data/upper/top", "/data/upper"];

/// One parsed comment page
#[derive(Debug, Clone, Default)]
pub struct CommentPage {
    /// Roots in page order, each followed by its nested replies
    pub records: Vec<CommentRecord>,
    /// Number of root comments on the page
    pub roots: usize,
    /// Total the provider declares for the whole thread
    pub declared_total: Option<u64>,
}

fn parse_comment(
    value: &Value,
    content_id: &str,
    tier: CommentTier,
    parent_id: Option<u64>,
) -> Option<CommentRecord> {
    let comment_id = value.get("rpid").and_then(Value::as_u64).or_else(|| {
        value
            .get("rpid_str")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    })?;
    let text = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let number = |key: &str| value.get(key).and_then(Value::as_u64).unwrap_or(0);

    Some(CommentRecord {
        content_id: content_id.to_string(),
        comment_id,
        parent_id,
        tier,
        author: text("/member/uname"),
        body: text("/content/message"),
        likes: number("like"),
        reply_count: if tier == CommentTier::Reply {
            0
        } else {
            number("rcount")
        },
        created_at: value
            .get("ctime")
            .and_then(Value::as_i64)
            .filter(|t| *t > 0)
            .and_then(local_from_epoch),
    })
}

/// Parses a root (or pinned) comment followed by its nested replies
fn parse_thread_head(value: &Value, content_id: &str, tier: CommentTier) -> Vec<CommentRecord> {
    let Some(head) = parse_comment(value, content_id, tier, None) else {
        tracing::debug!("{}: dropping comment without rpid", content_id);
        return Vec::new();
    };
    let root_id = head.comment_id;
    let mut records = vec![head];

    if let Some(replies) = value.get("replies").and_then(Value::as_array) {
        for reply in replies {
            // a reply names its thread root in `root`; fall back to the container
            let parent = reply
                .get("root")
                .and_then(Value::as_u64)
                .filter(|r| *r != 0)
                .unwrap_or(root_id);
            if let Some(record) = parse_comment(reply, content_id, CommentTier::Reply, Some(parent)) {
                records.push(record);
            }
        }
    }
    records
}

/// Extracts the pinned comment, trying each known payload location in order
pub fn parse_pinned(payload: &Value, content_id: &str) -> Vec<CommentRecord> {
    for pointer in PINNED_POINTERS {
        let Some(candidate) = payload.pointer(pointer) else {
            continue;
        };
        if candidate.get("rpid").and_then(Value::as_u64).is_some_and(|id| id != 0) {
            tracing::trace!("{}: pinned comment found at {}", content_id, pointer);
            return parse_thread_head(candidate, content_id, CommentTier::Pinned);
        }
    }
    Vec::new()
}

/// Parses one numbered comment page
pub fn parse_comment_page(payload: &Value, content_id: &str) -> CommentPage {
    let roots = payload
        .pointer("/data/replies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut page = CommentPage {
        records: Vec::new(),
        roots: 0,
        declared_total: payload.pointer("/data/page/count").and_then(Value::as_u64),
    };

    for root in roots {
        let tier = if root.get("is_up_top").and_then(Value::as_bool).unwrap_or(false) {
            CommentTier::Pinned
        } else {
            CommentTier::Root
        };
        let records = parse_thread_head(root, content_id, tier);
        if !records.is_empty() {
            page.roots += 1;
            page.records.extend(records);
        }
    }
    page
}

pub fn pinned_request(bvid: &str, aid: u64) -> Request {
    Request::new(Endpoint::PinnedComments)
        .param("next", 0)
        .param("type", 1)
        .param("oid", aid)
        .param("mode", 3)
        .about(bvid)
}

pub fn comment_page_request(bvid: &str, aid: u64, page: u32, sort: CommentSort) -> Request {
    Request::new(Endpoint::CommentPage)
        .param("pn", page)
        .param("type", 1)
        .param("oid", aid)
        .param("sort", sort.query_value())
        .about(bvid)
}

pub async fn fetch_pinned(
    transport: &dyn Transport,
    bvid: &str,
    aid: u64,
) -> Result<Vec<CommentRecord>, TransportError> {
    let response = transport.fetch(&pinned_request(bvid, aid)).await?;
    Ok(response
        .json()
        .map(|payload| parse_pinned(payload, bvid))
        .unwrap_or_default())
}

pub async fn fetch_comment_page(
    transport: &dyn Transport,
    bvid: &str,
    aid: u64,
    page: u32,
    sort: CommentSort,
) -> Result<CommentPage, TransportError> {
    let response = transport
        .fetch(&comment_page_request(bvid, aid, page, sort))
        .await?;
    let payload = response.json().ok_or_else(|| {
        TransportError::malformed(&response.url, "comment page is not JSON", "")
    })?;
    Ok(parse_comment_page(payload, bvid))
}

/// Numbered comment pages of one thread, as a paginator source
pub struct CommentThread<'a> {
    transport: &'a dyn Transport,
    controller: &'a RetryController,
    bvid: String,
    aid: u64,
    sort: CommentSort,
    pinned: HashSet<u64>,
    /// Roots seen so far; replies must point at one of them
    roots: Mutex<HashSet<u64>>,
}

impl<'a> CommentThread<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        controller: &'a RetryController,
        bvid: &str,
        aid: u64,
        sort: CommentSort,
        pinned: &[CommentRecord],
    ) -> Self {
        let pinned: HashSet<u64> = pinned
            .iter()
            .filter(|c| c.tier == CommentTier::Pinned)
            .map(|c| c.comment_id)
            .collect();
        Self {
            transport,
            controller,
            bvid: bvid.to_string(),
            aid,
            sort,
            roots: Mutex::new(pinned.clone()),
            pinned,
        }
    }

    /// Keeps pinned tiers stable and drops replies whose root was never seen
    async fn reconcile(&self, records: Vec<CommentRecord>) -> Vec<CommentRecord> {
        let mut roots = self.roots.lock().await;
        let mut kept = Vec::with_capacity(records.len());
        for mut record in records {
            match record.tier {
                CommentTier::Pinned | CommentTier::Root => {
                    if self.pinned.contains(&record.comment_id) {
                        record.tier = CommentTier::Pinned;
                    }
                    roots.insert(record.comment_id);
                    kept.push(record);
                }
                CommentTier::Reply => {
                    if record.parent_id.is_some_and(|p| roots.contains(&p)) {
                        kept.push(record);
                    } else {
                        tracing::debug!(
                            "{}: dropping reply {} to unseen root {:?}",
                            self.bvid,
                            record.comment_id,
                            record.parent_id
                        );
                    }
                }
            }
        }
        kept
    }
}

#[async_trait]
impl PageSource for CommentThread<'_> {
    type Entry = CommentRecord;
    type Item = CommentRecord;
    type Error = HarvestError;

    fn describe(&self) -> String {
        format!("comments {}", self.bvid)
    }

    async fn fetch_page(
        &self,
        page: u32,
        _page_size: u32,
    ) -> Outcome<ListingPage<CommentRecord>, HarvestError> {
        let item_id = format!("{}#p{}", self.bvid, page);
        let outcome = self
            .controller
            .execute(OperationKind::CommentPage, &item_id, None, |_| async move {
                match fetch_comment_page(self.transport, &self.bvid, self.aid, page, self.sort).await
                {
                    Ok(parsed) if parsed.roots == 0 => Ok(ListingPage::Entries(Vec::new())),
                    Ok(parsed) => Ok(ListingPage::Entries(parsed.records)),
                    // throttling codes are retried; any other code ends the thread
                    Err(e)
                        if e.api_code().is_some()
                            && e.failure_class() != FailureClass::DelayedRetry =>
                    {
                        Ok(ListingPage::Exhausted {
                            reason: e.to_string(),
                        })
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(HarvestError::from);

        match outcome {
            Outcome::Success(ListingPage::Entries(records)) => {
                Outcome::Success(ListingPage::Entries(self.reconcile(records).await))
            }
            other => other,
        }
    }

    async fn resolve(&self, entry: CommentRecord) -> Outcome<CommentRecord, HarvestError> {
        Outcome::Success(entry)
    }
}

/// Everything harvested from one thread
#[derive(Debug)]
pub struct ThreadHarvest {
    pub records: Vec<CommentRecord>,
    pub pages_fetched: u32,
    pub skipped_pages: usize,
    pub stop: StopReason,
}

/// Harvests one thread: the pinned comment first, then numbered pages
///
/// # Arguments
///
/// * `transport` - Session the thread is fetched with
/// * `controller` - Retry controller shared by the run
/// * `paginator` - Page walk settings (cap, pause, failure limit)
/// * `bvid` / `aid` - The video whose thread is harvested
/// * `sort` - Page ordering
///
/// # Returns
///
/// * `Ok(ThreadHarvest)` - Records in fetch order, pinned first
/// * `Err(HarvestError)` - A fatal failure (missing credential)
pub async fn harvest_thread(
    transport: &dyn Transport,
    controller: &RetryController,
    paginator: &Paginator,
    bvid: &str,
    aid: u64,
    sort: CommentSort,
) -> Result<ThreadHarvest, HarvestError> {
    let pinned = match controller
        .execute(OperationKind::PinnedComments, bvid, None, |_| {
            fetch_pinned(transport, bvid, aid)
        })
        .await
    {
        Outcome::Success(pinned) => pinned,
        Outcome::Skipped(report) => {
            tracing::warn!(
                "{}: continuing without pinned comment ({})",
                bvid,
                report.reason
            );
            Vec::new()
        }
        Outcome::Fatal(e) => return Err(e.into()),
    };

    let thread = CommentThread::new(transport, controller, bvid, aid, sort, &pinned);
    let collected = paginator.collect(&thread, None).await?;

    let mut records = pinned;
    records.extend(collected.items);

    Ok(ThreadHarvest {
        records,
        pages_fetched: collected.pages_fetched,
        skipped_pages: collected.skipped_pages.len(),
        stop: collected.stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_page() -> Value {
        json!({
            "code": 0,
            "data": {
                "page": {"num": 1, "size": 20, "count": 57},
                "replies": [
                    {
                        "rpid": 100, "root": 0, "parent": 0, "like": 9, "rcount": 2,
                        "ctime": 1704067200,
                        "member": {"uname": "alice"},
                        "content": {"message": "first"},
                        "replies": [
                            {"rpid": 101, "root": 100, "parent": 100, "like": 1,
                             "member": {"uname": "bob"}, "content": {"message": "re"}},
                            {"rpid": 102, "root": 100, "parent": 101,
                             "member": {"uname": "carol"}, "content": {"message": "re re"}}
                        ]
                    },
                    {
                        "rpid": 200, "member": {"uname": "dave"},
                        "content": {"message": "second"}, "replies": null
                    },
                    {"member": {"uname": "no id"}}
                ]
            }
        })
    }

    #[test]
    fn test_parse_comment_page() {
        let page = parse_comment_page(&create_test_page(), "BV1xx411c7mD");

        assert_eq!(page.roots, 2);
        assert_eq!(page.declared_total, Some(57));
        assert_eq!(page.records.len(), 4);

        let root = &page.records[0];
        assert_eq!(root.tier, CommentTier::Root);
        assert_eq!(root.reply_count, 2);
        assert_eq!(
            crate::model::format_local(&root.created_at.unwrap()),
            "2024-01-01 08:00:00"
        );

        // a reply to a reply still hangs off the thread root
        assert_eq!(page.records[2].parent_id, Some(100));
        assert!(page.records.iter().all(|c| c.is_well_formed()));
    }

    #[test]
    fn test_parse_empty_page() {
        let page = parse_comment_page(&json!({"code": 0, "data": {"replies": []}}), "BV1");
        assert_eq!(page.roots, 0);
        let page = parse_comment_page(&json!({"code": 0, "data": {"replies": null}}), "BV1");
        assert_eq!(page.roots, 0);
    }

    #[test]
    fn test_parse_pinned_strategies() {
        let top_upper = json!({"data": {"top": {"upper": {"rpid": 7, "content": {"message": "pin"}}}}});
        let pinned = parse_pinned(&top_upper, "BV1");
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].tier, CommentTier::Pinned);
        assert_eq!(pinned[0].comment_id, 7);

        let upper_top = json!({"data": {"top": {"upper": null}, "upper": {"mid": 1, "top": {"rpid": 8}}}});
        assert_eq!(parse_pinned(&upper_top, "BV1")[0].comment_id, 8);

        let upper = json!({"data": {"upper": {"rpid": 9, "replies": [{"rpid": 10, "root": 9}]}}});
        let pinned = parse_pinned(&upper, "BV1");
        assert_eq!(pinned.len(), 2);
        assert_eq!(pinned[1].parent_id, Some(9));

        let none = json!({"data": {"top": {"upper": null}, "upper": {"mid": 1, "top": null}}});
        assert!(parse_pinned(&none, "BV1").is_empty());
    }

    #[test]
    fn test_requests() {
        let request = comment_page_request("BV1xx411c7mD", 170001, 3, CommentSort::Time);
        assert_eq!(request.endpoint, Endpoint::CommentPage);
        assert!(request.query.contains(&("pn", "3".to_string())));
        assert!(request.query.contains(&("sort", "2".to_string())));
        assert!(request.query.contains(&("oid", "170001".to_string())));

        let request = pinned_request("BV1xx411c7mD", 170001);
        assert!(request.query.contains(&("mode", "3".to_string())));
    }
}
