//! Pacing and cancellation between units of work
//!
//! This module handles:
//! - Randomized delay ranges ("jitter") for requests, listing pages and
//!   comment pages
//! - Cancellation that is observed between items and between pages, and
//!   that cuts an in-progress pause short

use crate::config::TransportConfig;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// An inclusive range from which delays are drawn uniformly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    /// Creates a range from millisecond bounds (swapped if given reversed)
    pub fn from_millis(min: u64, max: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// A range that never waits
    pub fn zero() -> Self {
        Self::from_millis(0, 0)
    }

    /// Draws one delay from the range
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rng.gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Delay ranges used by one run
///
/// Page-level pauses are deliberately larger than request-level gaps so that
/// a listing walk looks like a reader turning pages.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    /// Gap between consecutive requests of one session
    pub request: DelayRange,
    /// Pause between listing pages
    pub listing_page: DelayRange,
    /// Pause between comment pages
    pub comment_page: DelayRange,
}

impl Pacer {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            request: DelayRange::from_millis(
                config.request_delay_min_ms,
                config.request_delay_max_ms,
            ),
            listing_page: DelayRange::from_millis(
                config.page_delay_min_ms,
                config.page_delay_max_ms,
            ),
            comment_page: DelayRange::from_millis(
                config.comment_page_delay_min_ms,
                config.comment_page_delay_max_ms,
            ),
        }
    }

    /// A pacer that never waits (tests, dry runs)
    pub fn immediate() -> Self {
        Self {
            request: DelayRange::zero(),
            listing_page: DelayRange::zero(),
            comment_page: DelayRange::zero(),
        }
    }

    /// Draws the gap to keep before the next request
    pub fn request_gap(&self) -> Duration {
        self.request.draw(&mut rand::thread_rng())
    }

    /// Sleeps for a delay drawn from `range`, returning early on cancellation
    ///
    /// # Returns
    ///
    /// `false` if the pause was cut short by cancellation.
    pub async fn pause(&self, range: DelayRange, cancel: &CancelToken) -> bool {
        let delay = range.draw(&mut rand::thread_rng());
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tracing::trace!("Pausing for {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
            _ = cancel.cancelled() => false,
        }
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared by every task of a run
///
/// Work is never interrupted mid-request; loops check the token between
/// items and between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every pending pause
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_delay_range_draw_within_bounds() {
        let range = DelayRange::from_millis(100, 300);
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = range.draw(&mut rng);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_delay_range_swaps_reversed_bounds() {
        let range = DelayRange::from_millis(500, 100);
        assert_eq!(range.min, Duration::from_millis(100));
        assert_eq!(range.max, Duration::from_millis(500));
    }

    #[test]
    fn test_page_delays_exceed_request_delays_by_default() {
        let pacer = Pacer::from_config(&TransportConfig::default());
        assert!(pacer.listing_page.min > pacer.request.min);
        assert!(pacer.listing_page.max > pacer.request.max);
    }

    #[tokio::test]
    async fn test_pause_cut_short_by_cancel() {
        let pacer = Pacer::immediate();
        let cancel = CancelToken::new();
        let range = DelayRange::from_millis(10_000, 10_000);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let completed = pacer.pause(range, &cancel).await;
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pause_zero_reports_cancellation_state() {
        let pacer = Pacer::immediate();
        let cancel = CancelToken::new();
        assert!(pacer.pause(DelayRange::zero(), &cancel).await);
        cancel.cancel();
        assert!(!pacer.pause(DelayRange::zero(), &cancel).await);
    }
}
