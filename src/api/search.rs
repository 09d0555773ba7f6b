//! Keyword search listing
//!
//! The rendered search page lists `.bili-video-card` elements. Each card
//! yields a partial item (id, title, author, often a day-only publish
//! date); resolving a card fetches the view payload for counters and the
//! exact publish time, then the plain video page for whatever is still
//! missing, with the browser fallback as a last resort.

use crate::api::video::{fetch_view, fill_from_page, item_from_extracted};
use crate::browser::BrowserFallback;
use crate::crawler::{
    Endpoint, ListingPage, Outcome, PageSource, Request, RetryController, Transport,
    TransportError,
};
use crate::extract::{extract_all, field, ExtractionStats, Source, SEARCH_CARD_FIELDS};
use crate::model::{ContentItem, LOCAL_OFFSET_SECS};
use crate::state::OperationKind;
use crate::HarvestError;
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio::sync::Mutex;

const CARD_SELECTOR: &str = ".bili-video-card";

/// Converts an inclusive day window into provider epoch bounds
///
/// The window starts at 00:00:00 of `start` and ends at 23:59:59 of `end`,
/// both in provider-local time (UTC+8).
pub fn window_epochs(start: NaiveDate, end: NaiveDate) -> Option<(i64, i64)> {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECS)?;
    let begin = offset
        .from_local_datetime(&start.and_time(NaiveTime::MIN))
        .single()?;
    let finish = offset
        .from_local_datetime(&end.and_hms_opt(23, 59, 59)?)
        .single()?;
    Some((begin.timestamp(), finish.timestamp()))
}

pub fn search_request(keyword: &str, page: u32, window: Option<(NaiveDate, NaiveDate)>) -> Request {
    let mut request = Request::new(Endpoint::SearchListing)
        .param("keyword", keyword)
        .param("order", "pubdate")
        .param("page", page);
    if let Some((begin, end)) = window.and_then(|(s, e)| window_epochs(s, e)) {
        request = request
            .param("pubtime_begin_s", begin)
            .param("pubtime_end_s", end);
    }
    request
}

/// A listing card, resolved into a partial item
#[derive(Debug, Clone)]
pub struct SearchCard {
    pub item: ContentItem,
    pub missing: Vec<&'static str>,
}

/// Parses every card of a search results page
///
/// Cards without a recognizable id are dropped; everything else is kept
/// even when other fields are missing.
pub fn parse_search_page(
    html: &str,
    keyword: &str,
    web_base: &str,
    stats: &mut ExtractionStats,
) -> Vec<SearchCard> {
    let Ok(selector) = Selector::parse(CARD_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter_map(|card| {
            let fragment = Html::parse_fragment(&card.html());
            let extracted = extract_all(SEARCH_CARD_FIELDS, &Source::html(&fragment));
            stats.record("card", &extracted);

            let Some(bvid) = extracted.text(field::BVID) else {
                tracing::debug!("Dropping search card without a video id");
                return None;
            };
            let mut item = item_from_extracted(&bvid, web_base, &extracted);
            item.keyword = keyword.to_string();
            Some(SearchCard {
                item,
                missing: extracted.missing(),
            })
        })
        .collect()
}

/// One keyword's search listing, as a paginator source
pub struct SearchListing<'a> {
    transport: &'a dyn Transport,
    controller: &'a RetryController,
    fallback: Option<&'a BrowserFallback>,
    keyword: String,
    window: Option<(NaiveDate, NaiveDate)>,
    web_base: String,
    seen: Mutex<HashSet<String>>,
    stats: Mutex<ExtractionStats>,
}

impl<'a> SearchListing<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        controller: &'a RetryController,
        keyword: &str,
        window: Option<(NaiveDate, NaiveDate)>,
        web_base: &str,
    ) -> Self {
        Self {
            transport,
            controller,
            fallback: None,
            keyword: keyword.to_string(),
            window,
            web_base: web_base.to_string(),
            seen: Mutex::new(HashSet::new()),
            stats: Mutex::new(ExtractionStats::new()),
        }
    }

    /// Renders items whose publish time is only known to the day
    pub fn with_fallback(mut self, fallback: &'a BrowserFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Extraction statistics gathered so far
    pub async fn stats(&self) -> ExtractionStats {
        self.stats.lock().await.clone()
    }

    async fn fetch_cards(&self, page: u32) -> Result<Vec<SearchCard>, TransportError> {
        let response = self
            .transport
            .fetch(&search_request(&self.keyword, page, self.window))
            .await?;
        let html = response.text().unwrap_or_default();
        let mut stats = self.stats.lock().await;
        Ok(parse_search_page(html, &self.keyword, &self.web_base, &mut stats))
    }
}

#[async_trait]
impl PageSource for SearchListing<'_> {
    type Entry = ContentItem;
    type Item = ContentItem;
    type Error = HarvestError;

    fn describe(&self) -> String {
        format!("search '{}'", self.keyword)
    }

    async fn fetch_page(
        &self,
        page: u32,
        _page_size: u32,
    ) -> Outcome<ListingPage<ContentItem>, HarvestError> {
        let item_id = format!("{}#p{}", self.keyword, page);
        let cards = match self
            .controller
            .execute(OperationKind::SearchPage, &item_id, None, |_| self.fetch_cards(page))
            .await
        {
            Outcome::Success(cards) => cards,
            Outcome::Skipped(report) => return Outcome::Skipped(report),
            Outcome::Fatal(e) => return Outcome::Fatal(e.into()),
        };

        // the listing may repeat an item across pages; keep the first sighting
        let mut seen = self.seen.lock().await;
        let items = cards
            .into_iter()
            .filter(|card| seen.insert(card.item.bvid.clone()))
            .map(|card| card.item)
            .collect();
        Outcome::Success(ListingPage::Entries(items))
    }

    async fn resolve(&self, card: ContentItem) -> Outcome<ContentItem, HarvestError> {
        let outcome = self
            .controller
            .execute(OperationKind::ContentDetail, &card.bvid, None, |_| {
                fetch_view(self.transport, &card.bvid, &self.web_base)
            })
            .await;

        let mut item = match outcome {
            Outcome::Success((detail, extracted)) => {
                self.stats.lock().await.record("view", &extracted);
                detail
            }
            Outcome::Skipped(report) => return Outcome::Skipped(report),
            Outcome::Fatal(e) => return Outcome::Fatal(e.into()),
        };
        item.fill_from(&card);
        item.keyword = card.keyword;

        if item.lacks_detail() {
            let page = fill_from_page(self.transport, self.controller, &mut item, &self.web_base);
            match page.await {
                Ok(Some(extracted)) => self.stats.lock().await.record("page", &extracted),
                Ok(None) => {}
                Err(e) => return Outcome::Fatal(e.into()),
            }
        }

        if let Some(fallback) = self.fallback {
            if item.needs_precise_publish_time() {
                match fallback.refine(self.controller, &mut item).await {
                    Ok(Some(extracted)) => self.stats.lock().await.record("page", &extracted),
                    Ok(None) => {}
                    Err(e) => return Outcome::Fatal(e.into()),
                }
            }
        }

        Outcome::Success(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::DEFAULT_WEB_BASE;

    const PAGE: &str = r#"<html><body><div class="video-list">
      <div class="bili-video-card">
        <div class="bili-video-card__info--right">
          <a href="//www.bilibili.com/video/BV1GJ411x7h7/"><h3 class="bili-video-card__info--tit" title="机器人">机器人</h3></a>
          <span class="bili-video-card__info--author">甲</span>
          <span class="bili-video-card__info--date">· 2024-01-01</span>
        </div>
      </div>
      <div class="bili-video-card"><span class="bili-video-card__info--author">no id</span></div>
      <div class="bili-video-card" data-loc-id="BV1xx411c7mD">
        <h3 class="bili-video-card__info--tit" title="第二">第二</h3>
      </div>
    </div></body></html>"#;

    #[test]
    fn test_window_epochs() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let (begin, finish) = window_epochs(start, end).unwrap();
        // 2024-01-01 00:00:00 +08:00
        assert_eq!(begin, 1_704_038_400);
        assert_eq!(finish, 1_704_038_400 + 2 * 86_400 - 1);
    }

    #[test]
    fn test_search_request() {
        let window = Some((
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ));
        let request = search_request("机器人", 2, window);
        assert_eq!(request.endpoint, Endpoint::SearchListing);
        assert!(request.query.contains(&("page", "2".to_string())));
        assert!(request.query.contains(&("order", "pubdate".to_string())));
        assert!(request
            .query
            .contains(&("pubtime_begin_s", "1704038400".to_string())));
        assert!(request.subject.is_none());

        let request = search_request("机器人", 1, None);
        assert_eq!(request.query.len(), 3);
    }

    #[test]
    fn test_parse_search_page() {
        let mut stats = ExtractionStats::new();
        let cards = parse_search_page(PAGE, "机器人", DEFAULT_WEB_BASE, &mut stats);

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].item.bvid, "BV1GJ411x7h7");
        assert_eq!(cards[0].item.keyword, "机器人");
        assert_eq!(cards[0].item.author.as_deref(), Some("甲"));
        assert!(cards[0].item.needs_precise_publish_time());
        assert_eq!(cards[1].item.bvid, "BV1xx411c7mD");
        assert!(cards[1].missing.contains(&field::AUTHOR));

        let bvid_stats = stats.field("card.bvid").unwrap();
        assert_eq!(bvid_stats.total_hits(), 2);
        assert_eq!(bvid_stats.misses, 1);
    }

    #[test]
    fn test_parse_page_without_cards() {
        let mut stats = ExtractionStats::new();
        let cards = parse_search_page(
            "<html><body><div class=\"search-nothing\"></div></body></html>",
            "x",
            DEFAULT_WEB_BASE,
            &mut stats,
        );
        assert!(cards.is_empty());
        assert!(stats.is_empty());
    }
}
