/// Attempt state definitions for retried operations
///
/// Every outbound operation (a listing page, a detail lookup, a comment page,
/// a browser render) is driven through these states by the retry controller.
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Kind of operation being attempted, used in logs and diagnostic file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SearchPage,
    ContentDetail,
    PinnedComments,
    CommentPage,
    OverlayList,
    BrowserRender,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchPage => "search_page",
            Self::ContentDetail => "content_detail",
            Self::PinnedComments => "pinned_comments",
            Self::CommentPage => "comment_page",
            Self::OverlayList => "overlay_list",
            Self::BrowserRender => "browser_render",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failure, deciding what the retry controller does next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Retry at once (missing element, malformed body)
    ImmediateRetry,
    /// Retry after an exponential backoff (timeouts, throttling)
    DelayedRetry,
    /// Tear down and rebuild the browser session, then retry once
    RestartSession,
    /// Anything else; retried until attempts run out
    Unclassified,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImmediateRetry => "immediate_retry",
            Self::DelayedRetry => "delayed_retry",
            Self::RestartSession => "restart_session",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents where a retried operation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    // ===== Active States =====
    /// An attempt is in flight
    Attempting,

    /// The last attempt failed and another will follow
    Retrying,

    /// The session is being rebuilt before one more attempt
    Restarting,

    // ===== Terminal States =====
    /// The operation produced a value
    Success,

    /// The operation was abandoned; the run continues without it
    Skipped,
}

impl AttemptState {
    /// Returns true if no further attempts will be made
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Returns true if the transition `self -> next` is allowed
    ///
    /// Only `Attempting` may resolve; `Retrying` and `Restarting` always lead
    /// back to `Attempting` (or straight to `Skipped` when a restart fails).
    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Attempting, Success)
                | (Attempting, Retrying)
                | (Attempting, Restarting)
                | (Attempting, Skipped)
                | (Retrying, Attempting)
                | (Restarting, Attempting)
                | (Restarting, Skipped)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Attempting => "attempting",
            Self::Retrying => "retrying",
            Self::Restarting => "restarting",
            Self::Success => "success",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A transition the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid attempt transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AttemptState,
    pub to: AttemptState,
}

/// Bookkeeping for one retried operation on one item
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub operation: OperationKind,
    pub item_id: String,
    /// Attempts started so far (1 after the first attempt begins)
    pub attempt: u32,
    pub last_failure: Option<FailureClass>,
    /// Whether the single session restart for this item was spent
    pub restarted: bool,
    pub state: AttemptState,
    started_at: Instant,
}

impl FetchAttempt {
    /// Starts tracking the first attempt of `operation` on `item_id`
    pub fn new(operation: OperationKind, item_id: &str) -> Self {
        Self {
            operation,
            item_id: item_id.to_string(),
            attempt: 1,
            last_failure: None,
            restarted: false,
            state: AttemptState::Attempting,
            started_at: Instant::now(),
        }
    }

    /// Moves to `next`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, next: AttemptState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == AttemptState::Attempting {
            self.attempt += 1;
        }
        self.state = next;
        Ok(())
    }

    /// Records the classification of the failure that just happened
    pub fn record_failure(&mut self, class: FailureClass) {
        self.last_failure = Some(class);
    }

    /// Time spent on this operation across all attempts
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
