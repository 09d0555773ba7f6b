//! Field Extractor
//!
//! Raw responses (JSON payloads, rendered HTML) are turned into typed field
//! values by trying an ordered list of strategies per field:
//!
//! 1. Structured lookup (a JSON key, a metadata tag)
//! 2. Secondary lookup (the same value under another page variant)
//! 3. Script-derived value (`__INITIAL_STATE__`, `data-*` attributes)
//! 4. Pattern match on display text, with magnitude normalization
//!
//! A field no strategy can satisfy is `Missing`; extraction never fails.

pub mod catalog;
mod normalize;
mod stats;
mod strategy;

pub use catalog::{
    field, find_field, SEARCH_CARD_FIELDS, VIDEO_PAGE_FIELDS, VIDEO_VIEW_FIELDS,
};
pub use normalize::{clean_text, normalize_count, parse_timestamp};
pub use stats::{ExtractionStats, FieldStats};
pub use strategy::{
    extract, extract_all, Extracted, Extraction, FieldKind, FieldSpec, FieldValue, Locator,
    Source, Strategy, StrategyKind,
};
