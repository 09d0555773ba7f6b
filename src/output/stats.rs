//! Statistics generation from the canonical store
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::extract::{ExtractionStats, StrategyKind};
use crate::model::CommentTier;
use crate::storage::{RunRecord, Storage, StoreCounts};
use crate::HarvestError;
use std::collections::HashMap;

const TOP_COMMENTED_LIMIT: usize = 10;

/// Canonical store statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Every recorded run, oldest first
    pub runs: Vec<RunRecord>,

    /// Canonical row counts
    pub totals: StoreCounts,

    /// Comment counts per tier
    pub comments_by_tier: HashMap<CommentTier, u64>,

    /// Content items with the most stored comments
    pub top_commented: Vec<(String, u64)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        runs: storage.list_runs()?,
        totals: storage.counts()?,
        comments_by_tier: storage.count_comments_by_tier()?,
        top_commented: storage.top_commented(TOP_COMMENTED_LIMIT)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Content items: {}", stats.totals.content_items);
    println!("  Comments: {}", stats.totals.comments);
    println!("  Overlay messages: {}", stats.totals.overlays);
    println!();

    if stats.totals.comments > 0 {
        println!("Comments by Tier:");
        for tier in [CommentTier::Pinned, CommentTier::Root, CommentTier::Reply] {
            let count = stats.comments_by_tier.get(&tier).copied().unwrap_or(0);
            let percentage = (count as f64 / stats.totals.comments as f64) * 100.0;
            println!("  {}: {} ({:.1}%)", tier, count, percentage);
        }
        println!();
    }

    if !stats.top_commented.is_empty() {
        println!("Most Commented ({}):", stats.top_commented.len());
        for (bvid, count) in &stats.top_commented {
            println!("  - {}: {}", bvid, count);
        }
        println!();
    }

    println!("Runs ({}):", stats.runs.len());
    for run in &stats.runs {
        println!(
            "  #{} {} started {} finished {}",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-")
        );
    }
}

/// Prints which strategy satisfied each field during a run
pub fn print_extraction_stats(stats: &ExtractionStats) {
    if stats.is_empty() {
        return;
    }

    println!("=== Field Extraction ===\n");
    for (field, counts) in stats.iter() {
        let attempts = counts.total_hits() + counts.misses;
        let hit_rate = if attempts > 0 {
            (counts.total_hits() as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };
        let via = StrategyKind::ALL
            .iter()
            .filter(|kind| counts.hits_via(**kind) > 0)
            .map(|kind| format!("{} {}", kind, counts.hits_via(*kind)))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {}: {:.1}% found ({}), {} missing",
            field,
            hit_rate,
            if via.is_empty() { "-" } else { via.as_str() },
            counts.misses
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RunStatus, SqliteStorage};

    #[test]
    fn test_load_statistics_from_empty_store() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("h").unwrap();
        storage.update_run_status(run_id, RunStatus::Interrupted).unwrap();

        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.totals, StoreCounts::default());
        assert_eq!(stats.runs.len(), 1);
        assert_eq!(stats.runs[0].status, RunStatus::Interrupted);
        assert!(stats.top_commented.is_empty());
    }
}
