//! State tracking for fetch attempts and sessions
//!
//! # Components
//!
//! - `AttemptState` / `FetchAttempt`: the life of one retried operation
//!   (`Attempting → {Success, Retrying, Restarting, Skipped}`)
//! - `FailureClass`: how the last failure of an attempt was classified
//! - `SessionState`: per-session request pacing bookkeeping

mod attempt;
mod session_state;

// Re-export main types
pub use attempt::{AttemptState, FailureClass, FetchAttempt, InvalidTransition, OperationKind};
pub use session_state::SessionState;
