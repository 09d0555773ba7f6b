//! Harvest coordinator - run orchestration
//!
//! This module ties the pipeline together for one run:
//! - Opening one paced session per configured credential
//! - Walking the search listing of every keyword
//! - Harvesting comment threads and overlay messages of every target,
//!   with targets distributed round-robin across sessions
//! - Merging every job's records into the canonical store
//! - Checkpointing run artifacts after every job
//! - Marking the run completed, interrupted or failed

use crate::api::{fetch_overlays, fetch_view, fill_from_page, harvest_thread, SearchListing};
use crate::browser::{BrowserFallback, ChromeBackend, RenderBackend};
use crate::config::{Config, SearchConfig};
use crate::credentials::CredentialProvider;
use crate::crawler::fetcher::{HttpTransport, Transport};
use crate::crawler::paginator::{planned_pages, Paginator};
use crate::crawler::retry::{Outcome, RetryController, RetryPolicy};
use crate::crawler::scheduler::{CancelToken, Pacer};
use crate::diagnostics::DiagnosticSink;
use crate::extract::ExtractionStats;
use crate::model::{CommentRecord, ContentItem};
use crate::output::{export_final, write_run_artifacts, ArtifactCounts, ArtifactLayout, CsvSink};
use crate::state::OperationKind;
use crate::storage::{
    open_storage, CanonicalSet, OverlayBatch, RunStatus, SqliteStorage, Storage,
};
use crate::HarvestError;
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Root comments the provider returns per numbered page
const COMMENT_PAGE_SIZE: u32 = 20;

/// Splits `targets` across `sessions` workers, round-robin
///
/// Worker `i` receives targets `i`, `i + sessions`, `i + 2 * sessions`, ...
pub fn assign_round_robin<T: Clone>(targets: &[T], sessions: usize) -> Vec<Vec<T>> {
    let sessions = sessions.max(1);
    let mut assigned = vec![Vec::new(); sessions];
    for (i, target) in targets.iter().enumerate() {
        assigned[i % sessions].push(target.clone());
    }
    assigned
}

/// Work to do for one video after the search phase
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    bvid: String,
    comments: bool,
    overlays: bool,
}

/// Merges explicit targets and searched items into one job per video
///
/// Jobs keep first-seen order: comment targets, overlay targets, then
/// searched items.
fn plan_targets(config: &Config, searched: &[ContentItem]) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut add = |bvid: &str, comments: bool, overlays: bool| {
        if !comments && !overlays {
            return;
        }
        match index.get(bvid) {
            Some(&i) => {
                targets[i].comments |= comments;
                targets[i].overlays |= overlays;
            }
            None => {
                index.insert(bvid.to_string(), targets.len());
                targets.push(Target {
                    bvid: bvid.to_string(),
                    comments,
                    overlays,
                });
            }
        }
    };

    for bvid in &config.comments.targets {
        add(bvid, true, false);
    }
    for bvid in &config.overlays.targets {
        add(bvid, false, true);
    }
    for item in searched {
        add(
            &item.bvid,
            config.comments.from_search,
            config.overlays.from_search,
        );
    }

    targets
}

/// What a run would do, for `--dry-run`
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub sessions: Vec<String>,
    /// Keyword and the number of listing pages planned for it
    pub keywords: Vec<(String, u32)>,
    pub target_count: Option<u32>,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub comment_targets: usize,
    pub overlay_targets: usize,
    pub comments_from_search: bool,
    pub overlays_from_search: bool,
    pub browser_fallback: bool,
}

impl RunPlan {
    pub fn from_config(config: &Config) -> Self {
        let keywords: Vec<(String, u32)> = config
            .search
            .as_ref()
            .map(|search| {
                let pages = planned_pages(
                    Some(search.target_count as usize),
                    search.page_size,
                    search.max_pages,
                );
                search.keywords.iter().map(|k| (k.clone(), pages)).collect()
            })
            .unwrap_or_default();

        Self {
            sessions: config.session.credential_names.clone(),
            keywords,
            target_count: config.search.as_ref().map(|s| s.target_count),
            window: config.search.as_ref().and_then(SearchConfig::window),
            comment_targets: config.comments.targets.len(),
            overlay_targets: config.overlays.targets.len(),
            comments_from_search: config.comments.from_search,
            overlays_from_search: config.overlays.from_search,
            browser_fallback: config.browser.enabled,
        }
    }
}

/// Outcome of a run that was not fatal
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub run_dir: PathBuf,
    /// Rows in the run artifacts
    pub artifacts: ArtifactCounts,
    /// Items and pages abandoned after retries
    pub skipped: usize,
    pub elapsed: Duration,
    pub extraction: ExtractionStats,
}

/// Records collected by the current run, de-duplicated by key
#[derive(Default)]
struct RunBuffer {
    items: CanonicalSet<ContentItem>,
    comments: CanonicalSet<CommentRecord>,
    overlays: CanonicalSet<OverlayBatch>,
}

/// Main harvest coordinator
pub struct Harvester {
    config: Config,
    config_hash: String,
    sessions: Vec<HttpTransport>,
    browser_cookie: Option<String>,
    controller: RetryController,
    pacer: Pacer,
    cancel: CancelToken,
    fallback: Option<BrowserFallback>,
    storage: Mutex<SqliteStorage>,
    sink: CsvSink,
    layout: ArtifactLayout,
    buffer: Mutex<RunBuffer>,
    stats: Mutex<ExtractionStats>,
    skipped: AtomicUsize,
}

impl Harvester {
    /// Creates a harvester
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Recorded on the run
    /// * `credentials` - Looked up once per configured credential name
    /// * `cancel` - Shared cancellation token
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Sessions and store are ready
    /// * `Err(HarvestError)` - `AuthMissing` when a credential is absent and
    ///   `require-auth` is set, or the store could not be opened
    pub fn new(
        config: Config,
        config_hash: &str,
        credentials: &dyn CredentialProvider,
        cancel: CancelToken,
    ) -> Result<Self, HarvestError> {
        let pacer = Pacer::from_config(&config.transport);

        let mut sessions = Vec::with_capacity(config.session.credential_names.len());
        let mut browser_cookie = None;
        for name in &config.session.credential_names {
            let cookie = credentials.get_credential(name);
            match &cookie {
                Some(_) => tracing::debug!("Session '{}' has a credential", name),
                None if config.session.require_auth => {
                    return Err(HarvestError::AuthMissing {
                        credential: name.clone(),
                    });
                }
                None => tracing::warn!(
                    "No credential for session '{}'; auth-gated endpoints will be skipped",
                    name
                ),
            }
            if browser_cookie.is_none() {
                browser_cookie = cookie.clone();
            }
            sessions.push(HttpTransport::new(
                name,
                cookie,
                &config.transport,
                config.endpoints.clone(),
                pacer,
            )?);
        }

        let storage = open_storage(Path::new(&config.output.database_path))?;
        let controller = RetryController::new(RetryPolicy::from_config(&config.retry))
            .with_diagnostics(DiagnosticSink::new(&config.output.diagnostics_dir));

        let fallback = config.browser.enabled.then(|| {
            BrowserFallback::new(
                Box::new(ChromeBackend::new(config.browser.clone())),
                browser_cookie.as_deref(),
                &config.endpoints.web_base,
                &config.browser,
            )
        });

        Ok(Self {
            sink: CsvSink::new(config.output.utf8_bom),
            layout: ArtifactLayout::new(&config.output.output_dir),
            config_hash: config_hash.to_string(),
            sessions,
            browser_cookie,
            controller,
            pacer,
            cancel,
            fallback,
            storage: Mutex::new(storage),
            buffer: Mutex::new(RunBuffer::default()),
            stats: Mutex::new(ExtractionStats::new()),
            skipped: AtomicUsize::new(0),
            config,
        })
    }

    /// Uses `backend` for the browser fallback, enabling it
    pub fn with_render_backend(mut self, backend: Box<dyn RenderBackend>) -> Self {
        self.fallback = Some(BrowserFallback::new(
            backend,
            self.browser_cookie.as_deref(),
            &self.config.endpoints.web_base,
            &self.config.browser,
        ));
        self
    }

    /// Runs the harvest and records its final status
    ///
    /// The run's artifacts are flushed and its status recorded whatever the
    /// outcome; the final artifacts are re-exported unless the run failed.
    pub async fn run(&self) -> Result<RunSummary, HarvestError> {
        let run_id = self.storage.lock().await.create_run(&self.config_hash)?;
        let started = Instant::now();
        tracing::info!(
            "Starting harvest run {} with {} session(s)",
            run_id,
            self.sessions.len()
        );

        let result = self.harvest(run_id).await;

        let status = match &result {
            Err(_) => RunStatus::Failed,
            Ok(()) if self.cancel.is_cancelled() => RunStatus::Interrupted,
            Ok(()) => RunStatus::Completed,
        };

        if let Some(fallback) = &self.fallback {
            fallback.shutdown().await;
        }

        let flushed = self.checkpoint(run_id).await;
        self.storage
            .lock()
            .await
            .update_run_status(run_id, status)?;

        let extraction = self.stats.lock().await.clone();
        extraction.log_summary();

        if let Err(e) = result {
            tracing::error!("Run {} failed: {}", run_id, e);
            return Err(e);
        }
        let artifacts = flushed?;

        {
            let storage = self.storage.lock().await;
            export_final(&*storage, &self.sink, &self.layout)?;
        }

        let summary = RunSummary {
            run_id,
            status,
            run_dir: self.layout.run_dir(run_id),
            artifacts,
            skipped: self.skipped.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            extraction,
        };
        tracing::info!(
            "Run {} {}: {} item(s), {} comment(s), {} overlay message(s), {} skipped, {:.1}s",
            run_id,
            status.to_db_string(),
            summary.artifacts.content_items,
            summary.artifacts.comments,
            summary.artifacts.overlays,
            summary.skipped,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    async fn harvest(&self, run_id: i64) -> Result<(), HarvestError> {
        let searched = match &self.config.search {
            Some(search) => self.search_phase(run_id, search).await?,
            None => Vec::new(),
        };

        let targets = plan_targets(&self.config, &searched);
        if targets.is_empty() || self.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::info!("Harvesting {} target(s)", targets.len());
        self.target_phase(run_id, &targets).await
    }

    async fn search_phase(
        &self,
        run_id: i64,
        search: &SearchConfig,
    ) -> Result<Vec<ContentItem>, HarvestError> {
        let assigned = assign_round_robin(&search.keywords, self.sessions.len());
        let workers = self
            .sessions
            .iter()
            .zip(assigned)
            .map(|(session, keywords)| async move {
                let mut found = Vec::new();
                for keyword in keywords {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    match self.search_keyword(run_id, session, search, &keyword).await {
                        Ok(items) => found.extend(items),
                        Err(e) => self.absorb_job_error(session.session(), &keyword, e)?,
                    }
                }
                Ok::<_, HarvestError>(found)
            });

        let mut searched = Vec::new();
        for result in join_all(workers).await {
            searched.extend(result?);
        }
        Ok(searched)
    }

    async fn search_keyword(
        &self,
        run_id: i64,
        transport: &dyn Transport,
        search: &SearchConfig,
        keyword: &str,
    ) -> Result<Vec<ContentItem>, HarvestError> {
        let paginator = Paginator::new(
            search.max_pages,
            search.page_size,
            self.pacer.listing_page,
            self.cancel.clone(),
        );
        let mut listing = SearchListing::new(
            transport,
            &self.controller,
            keyword,
            search.window(),
            &self.config.endpoints.web_base,
        );
        if let Some(fallback) = &self.fallback {
            listing = listing.with_fallback(fallback);
        }

        let result = paginator
            .collect(&listing, Some(search.target_count as usize))
            .await;
        self.stats.lock().await.absorb(&listing.stats().await);
        let collected = result?;

        self.skipped.fetch_add(
            collected.skipped_pages.len() + collected.skipped_items.len(),
            Ordering::Relaxed,
        );
        self.commit(run_id, collected.items.clone(), Vec::new(), Vec::new())
            .await?;
        Ok(collected.items)
    }

    async fn target_phase(&self, run_id: i64, targets: &[Target]) -> Result<(), HarvestError> {
        let assigned = assign_round_robin(targets, self.sessions.len());
        let workers = self
            .sessions
            .iter()
            .zip(assigned)
            .map(|(session, jobs)| async move {
                for (i, target) in jobs.iter().enumerate() {
                    if i > 0 && !self.pacer.pause(self.pacer.request, &self.cancel).await {
                        break;
                    }
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.harvest_target(run_id, session, target).await {
                        self.absorb_job_error(session.session(), &target.bvid, e)?;
                    }
                }
                Ok::<(), HarvestError>(())
            });

        join_all(workers).await.into_iter().collect()
    }

    async fn harvest_target(
        &self,
        run_id: i64,
        transport: &dyn Transport,
        target: &Target,
    ) -> Result<(), HarvestError> {
        let Some(item) = self.resolve_target(run_id, transport, &target.bvid).await? else {
            return Ok(());
        };

        let mut comments = Vec::new();
        if target.comments {
            match item.aid {
                Some(aid) => {
                    let thread = harvest_thread(
                        transport,
                        &self.controller,
                        &self.comment_paginator(),
                        &item.bvid,
                        aid,
                        self.config.comments.sort,
                    )
                    .await?;
                    self.skipped
                        .fetch_add(thread.skipped_pages, Ordering::Relaxed);
                    tracing::info!(
                        "{}: {} comment(s) from {} page(s), stopped: {}",
                        item.bvid,
                        thread.records.len(),
                        thread.pages_fetched,
                        thread.stop
                    );
                    comments = thread.records;
                }
                None => {
                    tracing::warn!("{}: no archive id, skipping comments", item.bvid);
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let mut overlays = Vec::new();
        if target.overlays && !self.cancel.is_cancelled() {
            match item.cid {
                Some(cid) => {
                    let outcome = self
                        .controller
                        .execute(OperationKind::OverlayList, &item.bvid, None, |_| {
                            fetch_overlays(transport, &item.bvid, cid)
                        })
                        .await;
                    match outcome {
                        Outcome::Success(messages) => {
                            tracing::info!(
                                "{}: {} overlay message(s)",
                                item.bvid,
                                messages.len()
                            );
                            overlays.push(OverlayBatch {
                                content_id: item.bvid.clone(),
                                messages,
                            });
                        }
                        Outcome::Skipped(_) => {
                            self.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Outcome::Fatal(e) => return Err(e.into()),
                    }
                }
                None => {
                    tracing::warn!("{}: no part id, skipping overlay messages", item.bvid);
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.commit(run_id, Vec::new(), comments, overlays).await
    }

    /// Returns the item with the identifiers the comment and overlay
    /// endpoints need, fetching its view payload when the run has not
    /// seen them yet
    async fn resolve_target(
        &self,
        run_id: i64,
        transport: &dyn Transport,
        bvid: &str,
    ) -> Result<Option<ContentItem>, HarvestError> {
        let known = self.buffer.lock().await.items.get(&bvid.to_string()).cloned();
        if known
            .as_ref()
            .is_some_and(|item| item.aid.is_some() && item.cid.is_some())
        {
            return Ok(known);
        }

        let web_base = &self.config.endpoints.web_base;
        let outcome = self
            .controller
            .execute(OperationKind::ContentDetail, bvid, None, |_| {
                fetch_view(transport, bvid, web_base)
            })
            .await;

        match outcome {
            Outcome::Success((mut item, extracted)) => {
                self.stats.lock().await.record("view", &extracted);
                if let Some(known) = known {
                    item.fill_from(&known);
                    item.keyword = known.keyword;
                }
                if item.lacks_detail() {
                    if let Some(extracted) =
                        fill_from_page(transport, &self.controller, &mut item, web_base).await?
                    {
                        self.stats.lock().await.record("page", &extracted);
                    }
                }
                self.commit(run_id, vec![item.clone()], Vec::new(), Vec::new())
                    .await?;
                Ok(Some(item))
            }
            Outcome::Skipped(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Outcome::Fatal(e) => Err(e.into()),
        }
    }

    fn comment_paginator(&self) -> Paginator {
        Paginator::new(
            self.config.comments.max_pages,
            COMMENT_PAGE_SIZE,
            self.pacer.comment_page,
            self.cancel.clone(),
        )
        .with_max_consecutive_skips(self.config.comments.max_consecutive_failures)
    }

    /// Decides whether a failed job ends the run
    ///
    /// A missing credential only skips the job when sessions may run
    /// anonymously, and acquisition failures skip it. Persistence failures
    /// and fatal errors stop every worker.
    fn absorb_job_error(
        &self,
        session: &str,
        job: &str,
        error: HarvestError,
    ) -> Result<(), HarvestError> {
        match error {
            HarvestError::AuthMissing { credential } if !self.config.session.require_auth => {
                tracing::warn!(
                    "[{}] skipping {}: session '{}' has no credential",
                    session,
                    job,
                    credential
                );
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            error @ (HarvestError::Transport(_) | HarvestError::Browser(_))
                if !error.is_fatal_to_run() =>
            {
                tracing::warn!("[{}] skipping {}: {}", session, job, error);
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            error => {
                tracing::error!("[{}] {} failed: {}", session, job, error);
                self.cancel.cancel();
                Err(error)
            }
        }
    }

    /// Merges one job's records into the store and the run buffer, then
    /// checkpoints the run artifacts
    async fn commit(
        &self,
        run_id: i64,
        items: Vec<ContentItem>,
        comments: Vec<CommentRecord>,
        overlays: Vec<OverlayBatch>,
    ) -> Result<(), HarvestError> {
        if items.is_empty() && comments.is_empty() && overlays.is_empty() {
            return Ok(());
        }

        {
            let mut storage = self.storage.lock().await;
            if !items.is_empty() {
                storage.upsert_content_items(run_id, &items)?;
            }
            if !comments.is_empty() {
                storage.upsert_comments(run_id, &comments)?;
            }
            if !overlays.is_empty() {
                storage.replace_overlays(run_id, &overlays)?;
            }
        }

        {
            let mut buffer = self.buffer.lock().await;
            buffer.items.merge_batch(items);
            buffer.comments.merge_batch(comments);
            buffer.overlays.merge_batch(overlays);
        }

        self.checkpoint(run_id).await.map(|_| ())
    }

    async fn checkpoint(&self, run_id: i64) -> Result<ArtifactCounts, HarvestError> {
        let buffer = self.buffer.lock().await;
        let counts = write_run_artifacts(
            &self.sink,
            &self.layout.run_dir(run_id),
            buffer.items.as_slice(),
            buffer.comments.as_slice(),
            buffer.overlays.as_slice(),
        )?;
        Ok(counts)
    }
}
