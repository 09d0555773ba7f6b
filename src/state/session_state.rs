use std::time::{Duration, Instant};

/// Tracks the pacing state of one session
///
/// A session is one credential's independent request stream. The transport
/// consults this before every request so that consecutive requests of the
/// same session are separated by at least the drawn gap.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Number of requests issued by this session
    pub request_count: u64,

    /// When the previous request of this session completed
    pub last_request_time: Option<Instant>,

    /// Number of times this session's browser context was rebuilt
    pub restarts: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates how long to wait before the next request
    ///
    /// # Arguments
    ///
    /// * `gap` - The minimum gap drawn for this request
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// None if a request can be made now, otherwise the remaining wait.
    pub fn time_until_next_request(&self, gap: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < gap {
            Some(gap - elapsed)
        } else {
            None
        }
    }

    /// Records that a request finished at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    pub fn record_restart(&mut self) {
        self.restarts += 1;
    }
}
