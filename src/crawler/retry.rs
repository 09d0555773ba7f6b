//! Retry and backoff control
//!
//! Every outbound operation runs through [`RetryController::execute`]. A
//! failure is classified (see [`Classify`]) and the controller decides:
//!
//! | Class          | Decision                                                  |
//! |----------------|-----------------------------------------------------------|
//! | ImmediateRetry | retry at once                                             |
//! | DelayedRetry   | wait `min(base * 2^attempt, max)` then retry              |
//! | RestartSession | rebuild the session once per item, then retry once        |
//! | Unclassified   | retry with backoff until attempts run out                 |
//!
//! When attempts run out the item is skipped: a raw-payload dump is written
//! (if the failure carried one) and the run continues. Fatal failures (a
//! missing credential, a session that cannot be rebuilt, a login that fails
//! again after the restart) end the operation immediately and are handed
//! back to the caller.

use crate::config::RetryConfig;
use crate::diagnostics::DiagnosticSink;
use crate::state::{AttemptState, FailureClass, FetchAttempt, OperationKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default attempts per operation, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Failure classification consumed by the retry controller
pub trait Classify {
    fn failure_class(&self) -> FailureClass;

    /// Fatal failures are never retried and are returned to the caller
    fn is_fatal(&self) -> bool {
        false
    }

    /// Failures that end the run once the item's session restart is spent
    fn is_fatal_after_restart(&self) -> bool {
        false
    }

    /// Raw payload worth dumping when the item is skipped
    fn diagnostic_payload(&self) -> Option<&str> {
        None
    }
}

/// Rebuilds a session whose state has become unusable
#[async_trait]
pub trait SessionRestarter<E>: Send + Sync {
    async fn restart(&self) -> Result<(), E>;
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`
    Retry { delay: Duration },
    /// Rebuild the session, then try once more
    RestartSession,
    /// Give up on this item
    Skip { reason: String },
}

/// Attempt limits and backoff shape
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after the failed attempt number `attempt` (1-indexed)
    ///
    /// With the defaults this is `min(2^attempt, 30)` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decides what follows the failed attempt number `attempt`
    ///
    /// # Arguments
    ///
    /// * `class` - Classification of the failure
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `restarted` - Whether this item already spent its session restart
    pub fn decide(&self, class: FailureClass, attempt: u32, restarted: bool) -> RetryDecision {
        if restarted {
            return RetryDecision::Skip {
                reason: format!("failed again ({}) after session restart", class),
            };
        }

        if class == FailureClass::RestartSession {
            return RetryDecision::RestartSession;
        }

        if attempt >= self.max_attempts {
            return RetryDecision::Skip {
                reason: format!("{} after {} attempts", class, attempt),
            };
        }

        match class {
            FailureClass::ImmediateRetry => RetryDecision::Retry {
                delay: Duration::ZERO,
            },
            FailureClass::DelayedRetry | FailureClass::Unclassified => RetryDecision::Retry {
                delay: self.backoff(attempt),
            },
            FailureClass::RestartSession => RetryDecision::RestartSession,
        }
    }
}

/// Record of an abandoned item
#[derive(Debug, Clone)]
pub struct SkipReport {
    pub operation: OperationKind,
    pub item_id: String,
    pub attempts: u32,
    pub last_class: Option<FailureClass>,
    pub reason: String,
    pub last_error: String,
    /// Raw payload dump, if one was written
    pub diagnostic: Option<PathBuf>,
}

/// Result of a controlled operation
#[derive(Debug)]
pub enum Outcome<T, E> {
    Success(T),
    Skipped(SkipReport),
    /// Unrecoverable; the caller decides whether the run can continue
    Fatal(E),
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Maps the success value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Success(v) => Outcome::Success(f(v)),
            Self::Skipped(report) => Outcome::Skipped(report),
            Self::Fatal(e) => Outcome::Fatal(e),
        }
    }

    /// Converts the fatal error
    pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> Outcome<T, F> {
        match self {
            Self::Success(v) => Outcome::Success(v),
            Self::Skipped(report) => Outcome::Skipped(report),
            Self::Fatal(e) => Outcome::Fatal(f(e)),
        }
    }
}

/// Drives operations through classification, backoff and skipping
pub struct RetryController {
    policy: RetryPolicy,
    diagnostics: Option<DiagnosticSink>,
    /// Items whose single session restart was spent during this run
    restarted_items: Mutex<HashSet<String>>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            diagnostics: None,
            restarted_items: Mutex::new(HashSet::new()),
        }
    }

    /// Writes a raw-payload dump for every skipped item to `sink`
    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, is skipped, or fails fatally
    ///
    /// `op` receives the 1-indexed attempt number. A session restart is
    /// only possible when `restarter` is given, and at most once per item
    /// per run.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: OperationKind,
        item_id: &str,
        restarter: Option<&dyn SessionRestarter<E>>,
        mut op: F,
    ) -> Outcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = FetchAttempt::new(operation, item_id);

        loop {
            let error = match op(attempt.attempt).await {
                Ok(value) => {
                    self.advance(&mut attempt, AttemptState::Success);
                    if attempt.attempt > 1 {
                        debug!(
                            "{} {} succeeded on attempt {} after {:?}",
                            operation,
                            item_id,
                            attempt.attempt,
                            attempt.elapsed()
                        );
                    }
                    return Outcome::Success(value);
                }
                Err(e) => e,
            };

            if error.is_fatal() {
                warn!("{} {} failed fatally: {}", operation, item_id, error);
                self.advance(&mut attempt, AttemptState::Skipped);
                return Outcome::Fatal(error);
            }

            let class = error.failure_class();
            attempt.record_failure(class);

            if attempt.restarted && error.is_fatal_after_restart() {
                return self.escalate(&mut attempt, error);
            }

            match self.policy.decide(class, attempt.attempt, attempt.restarted) {
                RetryDecision::Retry { delay } => {
                    debug!(
                        "{} {} attempt {} failed ({}): {}; retrying in {:?}",
                        operation, item_id, attempt.attempt, class, error, delay
                    );
                    self.advance(&mut attempt, AttemptState::Retrying);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    self.advance(&mut attempt, AttemptState::Attempting);
                }
                RetryDecision::RestartSession => {
                    let Some(restarter) = restarter else {
                        return self.skip(&mut attempt, "no session to restart", &error);
                    };
                    if !self.claim_restart(item_id).await {
                        if error.is_fatal_after_restart() {
                            return self.escalate(&mut attempt, error);
                        }
                        return self.skip(
                            &mut attempt,
                            "session restart already used for this item",
                            &error,
                        );
                    }

                    warn!(
                        "{} {} needs a fresh session ({}); restarting",
                        operation, item_id, error
                    );
                    self.advance(&mut attempt, AttemptState::Restarting);
                    attempt.restarted = true;

                    if let Err(restart_error) = restarter.restart().await {
                        warn!(
                            "Session restart for {} {} failed: {}",
                            operation, item_id, restart_error
                        );
                        self.advance(&mut attempt, AttemptState::Skipped);
                        return Outcome::Fatal(restart_error);
                    }
                    self.advance(&mut attempt, AttemptState::Attempting);
                }
                RetryDecision::Skip { reason } => {
                    return self.skip(&mut attempt, &reason, &error);
                }
            }
        }
    }

    /// Marks `item_id` as restarted; false if it already was this run
    async fn claim_restart(&self, item_id: &str) -> bool {
        self.restarted_items
            .lock()
            .await
            .insert(item_id.to_string())
    }

    fn escalate<T, E: Display>(&self, attempt: &mut FetchAttempt, error: E) -> Outcome<T, E> {
        warn!(
            "{} {} failed after its session restart: {}",
            attempt.operation, attempt.item_id, error
        );
        self.advance(attempt, AttemptState::Skipped);
        Outcome::Fatal(error)
    }

    fn skip<T, E: Classify + Display>(
        &self,
        attempt: &mut FetchAttempt,
        reason: &str,
        error: &E,
    ) -> Outcome<T, E> {
        self.advance(attempt, AttemptState::Skipped);

        let diagnostic = match (&self.diagnostics, error.diagnostic_payload()) {
            (Some(sink), Some(payload)) => sink.dump(
                attempt.operation,
                &attempt.item_id,
                attempt.attempt,
                &error.to_string(),
                payload,
            ),
            _ => None,
        };

        warn!(
            "Skipping {} {} after {} attempt(s): {} (last error: {})",
            attempt.operation, attempt.item_id, attempt.attempt, reason, error
        );

        Outcome::Skipped(SkipReport {
            operation: attempt.operation,
            item_id: attempt.item_id.clone(),
            attempts: attempt.attempt,
            last_class: attempt.last_failure,
            reason: reason.to_string(),
            last_error: error.to_string(),
            diagnostic,
        })
    }

    fn advance(&self, attempt: &mut FetchAttempt, next: AttemptState) {
        if let Err(e) = attempt.transition(next) {
            warn!("{} {}: {}", attempt.operation, attempt.item_id, e);
        }
    }
}
