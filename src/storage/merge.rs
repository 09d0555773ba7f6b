//! Keyed last-write-wins merge
//!
//! `merge(existing, batch)` replaces every record of `existing` whose key
//! appears in `batch` with the batch's record (no field-level merge) and
//! appends the rest. Merging the same batch twice gives the same set as
//! merging it once.

use crate::model::{CommentRecord, ContentItem, OverlayMessage};
use std::collections::HashMap;
use std::hash::Hash;

/// A record with a natural identity
pub trait Keyed {
    type Key: Eq + Hash + Clone + std::fmt::Debug;

    fn key(&self) -> Self::Key;
}

impl Keyed for ContentItem {
    type Key = String;

    fn key(&self) -> String {
        self.bvid.clone()
    }
}

impl Keyed for CommentRecord {
    type Key = (String, u64);

    fn key(&self) -> (String, u64) {
        CommentRecord::key(self)
    }
}

/// All overlay messages of one content item
///
/// Overlay messages have no stable identity of their own, so they are
/// merged as a set per content item: a newer set replaces the older one.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBatch {
    pub content_id: String,
    pub messages: Vec<OverlayMessage>,
}

impl Keyed for OverlayBatch {
    type Key = String;

    fn key(&self) -> String {
        self.content_id.clone()
    }
}

/// What a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
}

impl MergeSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn absorb(&mut self, other: MergeSummary) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
    }
}

/// Records de-duplicated by key, in first-seen order
///
/// A replaced record keeps the position of the record it replaced.
#[derive(Debug, Clone)]
pub struct CanonicalSet<T: Keyed> {
    records: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Keyed> Default for CanonicalSet<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed + PartialEq> PartialEq for CanonicalSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl<T: Keyed> CanonicalSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one record
    pub fn upsert(&mut self, record: T) -> MergeSummary {
        match self.index.get(&record.key()) {
            Some(&position) => {
                self.records[position] = record;
                MergeSummary {
                    inserted: 0,
                    replaced: 1,
                }
            }
            None => {
                self.index.insert(record.key(), self.records.len());
                self.records.push(record);
                MergeSummary {
                    inserted: 1,
                    replaced: 0,
                }
            }
        }
    }

    /// Merges `batch` into this set in place
    pub fn merge_batch(&mut self, batch: impl IntoIterator<Item = T>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in batch {
            summary.absorb(self.upsert(record));
        }
        summary
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

impl<T: Keyed> FromIterator<T> for CanonicalSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.merge_batch(iter);
        set
    }
}

/// Returns `existing` updated with `batch`, last write winning per key
pub fn merge<T: Keyed + Clone>(existing: &CanonicalSet<T>, batch: &[T]) -> CanonicalSet<T> {
    let mut updated = existing.clone();
    updated.merge_batch(batch.iter().cloned());
    updated
}
