//! Crawler module for paced, retried acquisition
//!
//! This module contains the core acquisition logic, including:
//! - The rate-limited transport and its client identity pool
//! - Pacing jitter and cooperative cancellation
//! - The retry/backoff controller
//! - Target-bounded pagination
//! - Overall run coordination

mod coordinator;
mod fetcher;
pub mod identity;
mod paginator;
mod retry;
mod scheduler;

pub use coordinator::{assign_round_robin, Harvester, RunPlan, RunSummary};
pub use fetcher::{
    build_http_client, decode_envelope, BodyKind, Endpoint, HttpTransport, Payload, RawResponse,
    Request, Transport, TransportError,
};
pub use paginator::{
    planned_pages, Collected, ListingPage, PageSource, Paginator, StopReason,
};
pub use retry::{
    Classify, Outcome, RetryController, RetryDecision, RetryPolicy, SessionRestarter, SkipReport,
    DEFAULT_MAX_ATTEMPTS,
};
pub use scheduler::{CancelToken, DelayRange, Pacer};

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::HarvestError;

/// Runs a complete harvest
///
/// This is the main entry point for starting a run. It will:
/// 1. Open one session per configured credential
/// 2. Record a new run in the canonical store
/// 3. Walk the search listing for every keyword
/// 4. Harvest comment threads and overlay messages of every target
/// 5. Checkpoint run artifacts after every job
/// 6. Export the final artifacts from the canonical store
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `config_hash` - Hash of the configuration file, recorded on the run
/// * `credentials` - Where session credentials are looked up
/// * `cancel` - Cancelling stops the run between items and pages
///
/// # Returns
///
/// * `Ok(RunSummary)` - The run finished (completed or interrupted)
/// * `Err(HarvestError)` - The run failed fatally
pub async fn harvest(
    config: Config,
    config_hash: &str,
    credentials: &dyn CredentialProvider,
    cancel: CancelToken,
) -> Result<RunSummary, HarvestError> {
    let harvester = Harvester::new(config, config_hash, credentials, cancel)?;
    harvester.run().await
}
