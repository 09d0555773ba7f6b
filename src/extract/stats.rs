//! Which strategy satisfied each field, aggregated over a run

use crate::extract::strategy::{Extracted, Extraction, StrategyKind};
use std::collections::BTreeMap;

/// Hit and miss counts for one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStats {
    pub hits: BTreeMap<StrategyKind, u64>,
    pub misses: u64,
}

impl FieldStats {
    pub fn hits_via(&self, kind: StrategyKind) -> u64 {
        self.hits.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.values().sum()
    }
}

/// Extraction statistics keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    fields: BTreeMap<String, FieldStats>,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of every field in `extracted`
    ///
    /// `scope` prefixes field names so that the same field extracted from
    /// different source shapes ("card.title", "view.title") is counted apart.
    pub fn record(&mut self, scope: &str, extracted: &Extracted) {
        for (name, extraction) in extracted.iter() {
            let entry = self
                .fields
                .entry(format!("{}.{}", scope, name))
                .or_default();
            match extraction {
                Extraction::Found { via, .. } => *entry.hits.entry(*via).or_insert(0) += 1,
                Extraction::Missing => entry.misses += 1,
            }
        }
    }

    /// Adds every count of `other` into this set
    pub fn absorb(&mut self, other: &ExtractionStats) {
        for (name, stats) in &other.fields {
            let entry = self.fields.entry(name.clone()).or_default();
            for (kind, hits) in &stats.hits {
                *entry.hits.entry(*kind).or_insert(0) += hits;
            }
            entry.misses += stats.misses;
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldStats)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Logs one line per field
    pub fn log_summary(&self) {
        for (name, stats) in self.iter() {
            let hits = StrategyKind::ALL
                .iter()
                .map(|kind| format!("{}={}", kind, stats.hits_via(*kind)))
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!("Field {}: {} missing={}", name, hits, stats.misses);
        }
    }
}
