//! Video metadata: the view endpoint and the public video page

use crate::crawler::{Endpoint, Outcome, Request, RetryController, Transport, TransportError};
use crate::extract::{
    extract_all, field, Extracted, Source, VIDEO_PAGE_FIELDS, VIDEO_VIEW_FIELDS,
};
use crate::model::{ContentItem, Counters};
use crate::state::OperationKind;
use crate::url::video_url;
use scraper::Html;

/// Builds a content item from extracted fields
///
/// Works for every catalog since they share field names; fields a catalog
/// does not define simply stay empty.
pub fn item_from_extracted(bvid: &str, web_base: &str, extracted: &Extracted) -> ContentItem {
    let bvid = extracted.text(field::BVID).unwrap_or_else(|| bvid.to_string());
    ContentItem {
        url: video_url(web_base, &bvid),
        aid: extracted.count(field::AID),
        cid: extracted.count(field::CID),
        title: extracted.text(field::TITLE),
        author: extracted.text(field::AUTHOR),
        published_at: extracted.time(field::PUBLISHED),
        keyword: String::new(),
        counters: Counters {
            views: extracted.count(field::VIEWS),
            overlays: extracted.count(field::OVERLAYS),
            likes: extracted.count(field::LIKES),
            coins: extracted.count(field::COINS),
            bookmarks: extracted.count(field::BOOKMARKS),
            shares: extracted.count(field::SHARES),
            comments: extracted.count(field::COMMENTS),
        },
        bvid,
    }
}

pub fn view_request(bvid: &str) -> Request {
    Request::new(Endpoint::VideoView)
        .param("bvid", bvid)
        .about(bvid)
}

/// Fetches metadata and counters of one video
///
/// A payload without a `data` object is malformed; individual fields that
/// are absent are left empty and reported through the returned
/// [`Extracted`].
pub async fn fetch_view(
    transport: &dyn Transport,
    bvid: &str,
    web_base: &str,
) -> Result<(ContentItem, Extracted), TransportError> {
    let response = transport.fetch(&view_request(bvid)).await?;
    let payload = response
        .json()
        .filter(|v| v.get("data").is_some_and(|d| d.is_object()))
        .ok_or_else(|| {
            TransportError::malformed(
                &response.url,
                "view payload has no data object",
                &response.json().map(|v| v.to_string()).unwrap_or_default(),
            )
        })?;

    let extracted = extract_all(VIDEO_VIEW_FIELDS, &Source::json(payload));
    for name in extracted.missing() {
        tracing::debug!("{}: view payload lacks {}", bvid, name);
    }
    Ok((item_from_extracted(bvid, web_base, &extracted), extracted))
}

/// Extracts a content item from rendered video page HTML
pub fn item_from_page(bvid: &str, web_base: &str, html: &str) -> (ContentItem, Extracted) {
    let document = Html::parse_document(html);
    let extracted = extract_all(VIDEO_PAGE_FIELDS, &Source::html(&document));
    (item_from_extracted(bvid, web_base, &extracted), extracted)
}

/// Fetches the public video page without a browser
///
/// The page is server-rendered with `__INITIAL_STATE__`, which is often
/// enough to fill gaps the view payload left.
pub async fn fetch_video_page(
    transport: &dyn Transport,
    bvid: &str,
    web_base: &str,
) -> Result<(ContentItem, Extracted), TransportError> {
    let request = Request::new(Endpoint::VideoPage).about(bvid);
    let response = transport.fetch(&request).await?;
    let html = response.text().unwrap_or_default();
    Ok(item_from_page(bvid, web_base, html))
}

/// Fills the gaps of `item` from the public video page
///
/// Runs under `controller` like any other detail fetch. A skipped page
/// leaves `item` unchanged and returns `Ok(None)`; values already present
/// on `item` are never overwritten.
pub async fn fill_from_page(
    transport: &dyn Transport,
    controller: &RetryController,
    item: &mut ContentItem,
    web_base: &str,
) -> Result<Option<Extracted>, TransportError> {
    let bvid = item.bvid.clone();
    let outcome = controller
        .execute(OperationKind::ContentDetail, &bvid, None, |_| {
            fetch_video_page(transport, &bvid, web_base)
        })
        .await;

    match outcome {
        Outcome::Success((page, extracted)) => {
            item.fill_from(&page);
            Ok(Some(extracted))
        }
        Outcome::Skipped(report) => {
            tracing::debug!("{}: video page skipped ({})", bvid, report.reason);
            Ok(None)
        }
        Outcome::Fatal(e) => Err(e),
    }
}
