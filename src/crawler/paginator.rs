//! Target-bounded pagination
//!
//! A [`PageSource`] knows how to fetch one listing page and how to resolve
//! a listing entry into a full item. The [`Paginator`] walks pages in
//! order until one of these holds:
//!
//! - the target number of items has been collected (even mid-page)
//! - the page cap `min(max_pages, ceil(target / page_size))` is reached
//! - a page comes back empty, or the source reports the listing exhausted
//! - too many consecutive pages were skipped
//! - the run was cancelled
//!
//! Pages are never fetched past the point where the target is met.

use crate::crawler::retry::{Outcome, SkipReport};
use crate::crawler::scheduler::{CancelToken, DelayRange, Pacer};
use async_trait::async_trait;
use std::fmt;

/// One fetched listing page
#[derive(Debug, Clone, PartialEq)]
pub enum ListingPage<E> {
    Entries(Vec<E>),
    /// The provider signalled there is nothing more to read
    Exhausted { reason: String },
}

/// A paged listing whose entries resolve into items
#[async_trait]
pub trait PageSource: Send + Sync {
    type Entry: Send;
    type Item: Send;
    type Error: Send;

    /// Short label used in logs ("search 'robot'", "comments BV...")
    fn describe(&self) -> String;

    /// Fetches page `page` (1-indexed)
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Outcome<ListingPage<Self::Entry>, Self::Error>;

    /// Resolves one listing entry into an item
    async fn resolve(&self, entry: Self::Entry) -> Outcome<Self::Item, Self::Error>;
}

/// Why a walk stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    PageCap,
    EmptyPage { page: u32 },
    Exhausted { page: u32, reason: String },
    TooManyFailures { consecutive: u32 },
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target reached"),
            Self::PageCap => write!(f, "page cap reached"),
            Self::EmptyPage { page } => write!(f, "page {} was empty", page),
            Self::Exhausted { page, reason } => {
                write!(f, "listing exhausted at page {}: {}", page, reason)
            }
            Self::TooManyFailures { consecutive } => {
                write!(f, "{} consecutive pages failed", consecutive)
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything a walk produced
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub pages_fetched: u32,
    pub skipped_pages: Vec<SkipReport>,
    pub skipped_items: Vec<SkipReport>,
    pub stop: StopReason,
}

impl<T> Collected<T> {
    pub fn was_cancelled(&self) -> bool {
        self.stop == StopReason::Cancelled
    }
}

/// Number of pages needed to reach `target` items, capped at `max_pages`
///
/// # Examples
///
/// ```
/// use bili_harvest::crawler::planned_pages;
///
/// assert_eq!(planned_pages(Some(25), 10, 50), 3);
/// assert_eq!(planned_pages(Some(25), 10, 2), 2);
/// assert_eq!(planned_pages(None, 20, 7), 7);
/// ```
pub fn planned_pages(target: Option<usize>, page_size: u32, max_pages: u32) -> u32 {
    match target {
        None => max_pages,
        Some(target) => {
            let page_size = page_size.max(1) as usize;
            let needed = target.div_ceil(page_size);
            needed.min(max_pages as usize) as u32
        }
    }
}

/// Walks a [`PageSource`] page by page
#[derive(Debug, Clone)]
pub struct Paginator {
    max_pages: u32,
    page_size: u32,
    page_pause: DelayRange,
    max_consecutive_skips: Option<u32>,
    pacer: Pacer,
    cancel: CancelToken,
}

impl Paginator {
    /// Creates a paginator
    ///
    /// # Arguments
    ///
    /// * `max_pages` - Hard cap on pages fetched
    /// * `page_size` - Entries the provider returns per page
    /// * `page_pause` - Pause drawn between consecutive pages
    /// * `cancel` - Checked between pages and between items
    pub fn new(max_pages: u32, page_size: u32, page_pause: DelayRange, cancel: CancelToken) -> Self {
        Self {
            max_pages,
            page_size: page_size.max(1),
            page_pause,
            max_consecutive_skips: None,
            pacer: Pacer::immediate(),
            cancel,
        }
    }

    /// Abandons the walk after `limit` consecutive skipped pages
    pub fn with_max_consecutive_skips(mut self, limit: u32) -> Self {
        self.max_consecutive_skips = Some(limit.max(1));
        self
    }

    /// Collects up to `target` items (`None` walks until exhaustion or the cap)
    ///
    /// # Returns
    ///
    /// * `Ok(Collected)` - Items gathered and why the walk stopped
    /// * `Err(S::Error)` - A fatal failure from the source
    pub async fn collect<S: PageSource + ?Sized>(
        &self,
        source: &S,
        target: Option<usize>,
    ) -> Result<Collected<S::Item>, S::Error> {
        let pages = planned_pages(target, self.page_size, self.max_pages);
        let label = source.describe();
        let mut collected = Collected {
            items: Vec::new(),
            pages_fetched: 0,
            skipped_pages: Vec::new(),
            skipped_items: Vec::new(),
            stop: StopReason::PageCap,
        };

        if target == Some(0) {
            collected.stop = StopReason::TargetReached;
            return Ok(collected);
        }

        tracing::debug!("{}: walking up to {} page(s)", label, pages);
        let mut consecutive_skips = 0u32;

        'pages: for page in 1..=pages {
            if self.cancel.is_cancelled() {
                collected.stop = StopReason::Cancelled;
                break;
            }
            if page > 1 && !self.pacer.pause(self.page_pause, &self.cancel).await {
                collected.stop = StopReason::Cancelled;
                break;
            }

            let entries = match source.fetch_page(page, self.page_size).await {
                Outcome::Success(ListingPage::Entries(entries)) => entries,
                Outcome::Success(ListingPage::Exhausted { reason }) => {
                    collected.pages_fetched += 1;
                    collected.stop = StopReason::Exhausted { page, reason };
                    break;
                }
                Outcome::Skipped(report) => {
                    collected.skipped_pages.push(report);
                    consecutive_skips += 1;
                    if self
                        .max_consecutive_skips
                        .is_some_and(|limit| consecutive_skips >= limit)
                    {
                        collected.stop = StopReason::TooManyFailures {
                            consecutive: consecutive_skips,
                        };
                        break;
                    }
                    continue;
                }
                Outcome::Fatal(e) => return Err(e),
            };

            consecutive_skips = 0;
            collected.pages_fetched += 1;

            if entries.is_empty() {
                collected.stop = StopReason::EmptyPage { page };
                break;
            }

            tracing::debug!("{}: page {} has {} entries", label, page, entries.len());

            for entry in entries {
                if target.is_some_and(|t| collected.items.len() >= t) {
                    break;
                }
                if self.cancel.is_cancelled() {
                    collected.stop = StopReason::Cancelled;
                    break 'pages;
                }
                match source.resolve(entry).await {
                    Outcome::Success(item) => collected.items.push(item),
                    Outcome::Skipped(report) => collected.skipped_items.push(report),
                    Outcome::Fatal(e) => return Err(e),
                }
            }

            if target.is_some_and(|t| collected.items.len() >= t) {
                collected.stop = StopReason::TargetReached;
                break;
            }
        }

        tracing::info!(
            "{}: {} item(s) from {} page(s), stopped: {}",
            label,
            collected.items.len(),
            collected.pages_fetched,
            collected.stop
        );

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::TransportError;
    use crate::state::{FailureClass, OperationKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves fixed pages; entry `n` resolves to `n * 10`
    struct FixedSource {
        pages: Vec<Option<Vec<u32>>>,
        fetches: AtomicU32,
        resolves: AtomicU32,
        skip_entry: Option<u32>,
    }

    impl FixedSource {
        fn new(sizes: &[usize]) -> Self {
            let mut next = 0u32;
            let pages = sizes
                .iter()
                .map(|&n| {
                    let page: Vec<u32> = (next..next + n as u32).collect();
                    next += n as u32;
                    Some(page)
                })
                .collect();
            Self {
                pages,
                fetches: AtomicU32::new(0),
                resolves: AtomicU32::new(0),
                skip_entry: None,
            }
        }

        fn skip_report(item: &str) -> SkipReport {
            SkipReport {
                operation: OperationKind::SearchPage,
                item_id: item.to_string(),
                attempts: 3,
                last_class: Some(FailureClass::DelayedRetry),
                reason: "timed out".to_string(),
                last_error: "timed out".to_string(),
                diagnostic: None,
            }
        }
    }

    #[async_trait]
    impl PageSource for FixedSource {
        type Entry = u32;
        type Item = u32;
        type Error = TransportError;

        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn fetch_page(
            &self,
            page: u32,
            _page_size: u32,
        ) -> Outcome<ListingPage<u32>, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(page as usize - 1) {
                Some(Some(entries)) => Outcome::Success(ListingPage::Entries(entries.clone())),
                Some(None) => Outcome::Skipped(Self::skip_report(&format!("page {}", page))),
                None => Outcome::Success(ListingPage::Entries(Vec::new())),
            }
        }

        async fn resolve(&self, entry: u32) -> Outcome<u32, TransportError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if self.skip_entry == Some(entry) {
                return Outcome::Skipped(Self::skip_report(&entry.to_string()));
            }
            Outcome::Success(entry * 10)
        }
    }

    fn create_test_paginator(max_pages: u32, page_size: u32) -> Paginator {
        Paginator::new(max_pages, page_size, DelayRange::zero(), CancelToken::new())
    }

    #[test]
    fn test_planned_pages() {
        assert_eq!(planned_pages(Some(25), 10, 50), 3);
        assert_eq!(planned_pages(Some(30), 10, 50), 3);
        assert_eq!(planned_pages(Some(31), 10, 50), 4);
        assert_eq!(planned_pages(Some(1000), 30, 5), 5);
        assert_eq!(planned_pages(Some(0), 10, 50), 0);
        assert_eq!(planned_pages(None, 10, 9), 9);
    }

    #[tokio::test]
    async fn test_target_met_exactly_without_extra_fetch() {
        let source = FixedSource::new(&[10, 10, 5]);
        let paginator = create_test_paginator(50, 10);

        let collected = paginator.collect(&source, Some(25)).await.unwrap();

        assert_eq!(collected.items.len(), 25);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(collected.pages_fetched, 3);
        assert_eq!(collected.stop, StopReason::TargetReached);
    }

    #[tokio::test]
    async fn test_stops_mid_page_at_target() {
        let source = FixedSource::new(&[10, 10, 10]);
        let paginator = create_test_paginator(50, 10);

        let collected = paginator.collect(&source, Some(15)).await.unwrap();

        assert_eq!(collected.items.len(), 15);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(source.resolves.load(Ordering::SeqCst), 15);
        assert_eq!(collected.items[14], 140);
    }

    #[tokio::test]
    async fn test_empty_page_stops_walk() {
        let source = FixedSource::new(&[10, 4]);
        let paginator = create_test_paginator(50, 10);

        let collected = paginator.collect(&source, Some(100)).await.unwrap();

        assert_eq!(collected.items.len(), 14);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(collected.stop, StopReason::EmptyPage { page: 3 });
    }

    #[tokio::test]
    async fn test_page_cap_bounds_walk() {
        let source = FixedSource::new(&[10, 10, 10, 10]);
        let paginator = create_test_paginator(2, 10);

        let collected = paginator.collect(&source, Some(40)).await.unwrap();

        assert_eq!(collected.items.len(), 20);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(collected.stop, StopReason::PageCap);
    }

    #[tokio::test]
    async fn test_skipped_page_and_item_do_not_stop_walk() {
        let mut source = FixedSource::new(&[10, 10, 10]);
        source.pages[1] = None;
        source.skip_entry = Some(3);
        let paginator = create_test_paginator(50, 10);

        let collected = paginator.collect(&source, Some(30)).await.unwrap();

        assert_eq!(collected.items.len(), 19);
        assert_eq!(collected.skipped_pages.len(), 1);
        assert_eq!(collected.skipped_items.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_consecutive_skips_abandon_walk() {
        let mut source = FixedSource::new(&[10, 10, 10, 10]);
        source.pages[1] = None;
        source.pages[2] = None;
        let paginator = create_test_paginator(50, 10).with_max_consecutive_skips(2);

        let collected = paginator.collect(&source, None).await.unwrap();

        assert_eq!(collected.items.len(), 10);
        assert_eq!(
            collected.stop,
            StopReason::TooManyFailures { consecutive: 2 }
        );
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let source = FixedSource::new(&[10]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let paginator = Paginator::new(50, 10, DelayRange::zero(), cancel);

        let collected = paginator.collect(&source, Some(10)).await.unwrap();

        assert!(collected.was_cancelled());
        assert!(collected.items.is_empty());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_listing() {
        struct Done;

        #[async_trait]
        impl PageSource for Done {
            type Entry = u32;
            type Item = u32;
            type Error = TransportError;

            fn describe(&self) -> String {
                "done".to_string()
            }

            async fn fetch_page(&self, _: u32, _: u32) -> Outcome<ListingPage<u32>, TransportError> {
                Outcome::Success(ListingPage::Exhausted {
                    reason: "code -404".to_string(),
                })
            }

            async fn resolve(&self, entry: u32) -> Outcome<u32, TransportError> {
                Outcome::Success(entry)
            }
        }

        let collected = create_test_paginator(50, 20)
            .collect(&Done, None)
            .await
            .unwrap();
        assert!(matches!(collected.stop, StopReason::Exhausted { page: 1, .. }));
        assert_eq!(collected.pages_fetched, 1);
    }
}
