use chrono::NaiveDateTime;
use std::fmt;

/// Position of a comment in its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentTier {
    /// Pinned by the uploader; fetched before any regular page
    Pinned,
    /// Top-level comment
    Root,
    /// Reply nested under a root
    Reply,
}

impl CommentTier {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Root => "root",
            Self::Reply => "reply",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pinned" => Some(Self::Pinned),
            "root" => Some(Self::Root),
            "reply" => Some(Self::Reply),
            _ => None,
        }
    }
}

impl fmt::Display for CommentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// One comment under a content item
///
/// Identity is the pair `(content_id, comment_id)`. A `Reply` always carries
/// the id of its root in `parent_id`; pinned and root comments never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub content_id: String,
    pub comment_id: u64,
    pub parent_id: Option<u64>,
    pub tier: CommentTier,
    pub author: String,
    pub body: String,
    pub likes: u64,
    /// Declared number of replies under this comment
    pub reply_count: u64,
    pub created_at: Option<NaiveDateTime>,
}

impl CommentRecord {
    /// Composite identity used for de-duplication
    pub fn key(&self) -> (String, u64) {
        (self.content_id.clone(), self.comment_id)
    }

    /// Returns true if the parent relationship matches the tier
    pub fn is_well_formed(&self) -> bool {
        match self.tier {
            CommentTier::Reply => self.parent_id.is_some(),
            CommentTier::Pinned | CommentTier::Root => self.parent_id.is_none(),
        }
    }
}
