//! Records produced by a harvest run
//!
//! Three entity types flow through the pipeline:
//!
//! - `ContentItem`: one published video with its engagement counters
//! - `CommentRecord`: one comment (pinned, root or reply) under a video
//! - `OverlayMessage`: one time-anchored overlay message ("danmu")
//!
//! All provider timestamps are rendered as wall-clock time in the provider's
//! home offset (UTC+8).

mod comment;
mod content;
mod overlay;

pub use comment::{CommentRecord, CommentTier};
pub use content::{
    format_local, local_from_epoch, ContentItem, Counters, PublishTime, TimePrecision,
    LOCAL_OFFSET_SECS, TIMESTAMP_FORMAT,
};
pub use overlay::{annotate_overlays, format_hms, AnnotatedOverlay, OverlayMessage};
