//! bili-harvest main entry point
//!
//! This is the command-line interface for the bili-harvest pipeline.

use anyhow::Context;
use bili_harvest::config::{load_config_with_hash, Config};
use bili_harvest::crawler::{harvest, CancelToken, RunPlan};
use bili_harvest::credentials::EnvFileCredentials;
use bili_harvest::output::{
    export_final, import_run, load_statistics, print_extraction_stats, print_statistics,
    ArtifactLayout, CsvSink,
};
use bili_harvest::storage::{open_storage, RunStatus, SqliteStorage};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// bili-harvest: a paced harvester for video metadata, comments and
/// overlay messages
///
/// bili-harvest walks keyword search listings, comment threads and overlay
/// lists while pacing and retrying every request, merges the results into
/// a canonical SQLite store and writes CSV artifacts per run.
#[derive(Parser, Debug)]
#[command(name = "bili-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A paced harvester for Bilibili content", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with_all = ["stats", "export", "import_run"])]
    dry_run: bool,

    /// Show statistics from the canonical store and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export", "import_run"])]
    stats: bool,

    /// Rewrite the final artifacts from the canonical store and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "import_run"])]
    export: bool,

    /// Merge an earlier run-<id> directory into the canonical store
    #[arg(long, value_name = "DIR", conflicts_with_all = ["dry_run", "stats", "export"])]
    import_run: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.export {
        handle_export(&config)?;
    } else if let Some(dir) = &cli.import_run {
        handle_import(&config, dir)?;
    } else {
        handle_harvest(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("bili_harvest=info,warn"),
            1 => EnvFilter::new("bili_harvest=debug,info"),
            2 => EnvFilter::new("bili_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStorage> {
    open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))
}

/// Handles the --dry-run mode: validates config and shows the run plan
fn handle_dry_run(config: &Config) {
    let plan = RunPlan::from_config(config);

    println!("=== bili-harvest Dry Run ===\n");

    println!("Sessions ({}):", plan.sessions.len());
    for name in &plan.sessions {
        println!("  - {}", name);
    }
    println!(
        "  Credential file: {} (auth {})",
        config.session.credential_file,
        if config.session.require_auth {
            "required"
        } else {
            "optional"
        }
    );

    println!("\nPacing:");
    println!(
        "  Request delay: {}-{}ms",
        config.transport.request_delay_min_ms, config.transport.request_delay_max_ms
    );
    println!(
        "  Listing page delay: {}-{}ms",
        config.transport.page_delay_min_ms, config.transport.page_delay_max_ms
    );
    println!(
        "  Comment page delay: {}-{}ms",
        config.transport.comment_page_delay_min_ms, config.transport.comment_page_delay_max_ms
    );
    println!("  Max attempts: {}", config.retry.max_attempts);

    println!("\nSearch ({} keyword(s)):", plan.keywords.len());
    if let (Some(target), Some((start, end))) = (plan.target_count, plan.window) {
        println!("  Target: {} item(s) per keyword, {} to {}", target, start, end);
    }
    for (keyword, pages) in &plan.keywords {
        println!("  - {} (up to {} page(s))", keyword, pages);
    }

    println!("\nComments:");
    println!("  Explicit targets: {}", plan.comment_targets);
    println!("  From search: {}", plan.comments_from_search);
    println!("  Max pages per thread: {}", config.comments.max_pages);

    println!("\nOverlays:");
    println!("  Explicit targets: {}", plan.overlay_targets);
    println!("  From search: {}", plan.overlays_from_search);

    println!("\nBrowser fallback: {}", plan.browser_fallback);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Artifacts: {}", config.output.output_dir);
    println!("  Diagnostics: {}", config.output.diagnostics_dir);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the canonical store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_store(config)?;
    let stats = load_statistics(&storage).context("failed to load statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: rewrites the final artifacts
fn handle_export(config: &Config) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let layout = ArtifactLayout::new(&config.output.output_dir);

    let counts = export_final(&storage, &CsvSink::new(config.output.utf8_bom), &layout)
        .context("failed to export final artifacts")?;

    println!(
        "✓ Exported {} item(s), {} comment(s), {} overlay message(s) to {}",
        counts.content_items,
        counts.comments,
        counts.overlays,
        layout.final_dir().display()
    );
    Ok(())
}

/// Handles the --import-run mode: merges a run directory, then re-exports
fn handle_import(config: &Config, dir: &Path) -> anyhow::Result<()> {
    let mut storage = open_store(config)?;

    let summary = import_run(&mut storage, dir)
        .with_context(|| format!("failed to import {}", dir.display()))?;
    println!(
        "✓ Imported run {}: {} item(s), {} comment(s), {} overlay set(s)",
        summary.run_id,
        summary.content_items.inserted + summary.content_items.replaced,
        summary.comments.inserted + summary.comments.replaced,
        summary.overlays.inserted + summary.overlays.replaced
    );

    let layout = ArtifactLayout::new(&config.output.output_dir);
    export_final(&storage, &CsvSink::new(config.output.utf8_bom), &layout)
        .context("failed to export final artifacts")?;
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: &str) -> anyhow::Result<()> {
    let credentials = EnvFileCredentials::load(Path::new(&config.session.credential_file))
        .with_context(|| format!("failed to read {}", config.session.credential_file))?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current request");
            on_interrupt.cancel();
        }
    });

    let summary = harvest(config, config_hash, &credentials, cancel)
        .await
        .context("harvest failed")?;

    if summary.status == RunStatus::Interrupted {
        tracing::warn!(
            "Run {} interrupted; partial artifacts are in {}",
            summary.run_id,
            summary.run_dir.display()
        );
    }
    print_extraction_stats(&summary.extraction);
    println!(
        "✓ Run {} {}: {} item(s), {} comment(s), {} overlay message(s), {} skipped",
        summary.run_id,
        summary.status.to_db_string(),
        summary.artifacts.content_items,
        summary.artifacts.comments,
        summary.artifacts.overlays,
        summary.skipped
    );
    Ok(())
}
