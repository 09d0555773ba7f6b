use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

/// Offset of the provider's home timezone (UTC+8), in seconds
pub const LOCAL_OFFSET_SECS: i32 = 8 * 3600;

/// Canonical rendering of a second-precision timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Converts a unix timestamp into provider-local wall-clock time
///
/// Returns None for timestamps chrono cannot represent.
pub fn local_from_epoch(secs: i64) -> Option<NaiveDateTime> {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECS)?;
    offset
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.naive_local())
}

/// Formats a local timestamp with `TIMESTAMP_FORMAT`
pub fn format_local(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// How much of a publish timestamp is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePrecision {
    /// Full wall-clock second
    Second,
    /// Only the calendar day (listing cards often show just a date)
    Day,
}

/// A publish timestamp together with its precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishTime {
    pub at: NaiveDateTime,
    pub precision: TimePrecision,
}

impl PublishTime {
    /// Creates a second-precision publish time
    pub fn exact(at: NaiveDateTime) -> Self {
        Self {
            at,
            precision: TimePrecision::Second,
        }
    }

    /// Creates a day-precision publish time (midnight of `date`)
    pub fn day(date: NaiveDate) -> Self {
        Self {
            at: date.and_time(chrono::NaiveTime::MIN),
            precision: TimePrecision::Day,
        }
    }

    /// Creates a second-precision publish time from a unix timestamp
    pub fn from_epoch(secs: i64) -> Option<Self> {
        local_from_epoch(secs).map(Self::exact)
    }

    /// Returns true if the timestamp is known to the second
    pub fn is_precise(&self) -> bool {
        self.precision == TimePrecision::Second
    }

    /// Renders the timestamp for persistence
    ///
    /// Day-precision values render as a bare date so readers never mistake
    /// midnight for a real publish time.
    pub fn to_display_string(&self) -> String {
        match self.precision {
            TimePrecision::Second => format_local(&self.at),
            TimePrecision::Day => self.at.format(DATE_FORMAT).to_string(),
        }
    }

    /// Parses the persisted rendering back (inverse of `to_display_string`)
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(at) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
            return Some(Self::exact(at));
        }
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .ok()
            .map(Self::day)
    }
}

/// Engagement counters of a content item
///
/// `None` means the counter could not be extracted; it is never conflated
/// with a genuine zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub views: Option<u64>,
    pub overlays: Option<u64>,
    pub likes: Option<u64>,
    pub coins: Option<u64>,
    pub bookmarks: Option<u64>,
    pub shares: Option<u64>,
    pub comments: Option<u64>,
}

impl Counters {
    /// Number of counters that are still missing
    pub fn missing_count(&self) -> usize {
        [
            self.views,
            self.overlays,
            self.likes,
            self.coins,
            self.bookmarks,
            self.shares,
            self.comments,
        ]
        .iter()
        .filter(|c| c.is_none())
        .count()
    }

    /// Fills every missing counter from `other`, keeping values already present
    pub fn fill_from(&mut self, other: &Counters) {
        self.views = self.views.or(other.views);
        self.overlays = self.overlays.or(other.overlays);
        self.likes = self.likes.or(other.likes);
        self.coins = self.coins.or(other.coins);
        self.bookmarks = self.bookmarks.or(other.bookmarks);
        self.shares = self.shares.or(other.shares);
        self.comments = self.comments.or(other.comments);
    }
}

/// One published video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Provider identifier ("BV" + 10 alphanumerics), unique within a run
    pub bvid: String,

    /// Numeric archive id; required by the comment endpoints
    pub aid: Option<u64>,

    /// Id of the first part; required by the overlay endpoint
    pub cid: Option<u64>,

    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<PublishTime>,

    /// Canonical page URL
    pub url: String,

    /// Search keyword that surfaced this item (empty for explicit targets)
    pub keyword: String,

    pub counters: Counters,
}

impl ContentItem {
    /// Creates an item with only its identity known
    pub fn new(bvid: &str) -> Self {
        Self {
            bvid: bvid.to_string(),
            aid: None,
            cid: None,
            title: None,
            author: None,
            published_at: None,
            url: crate::url::video_url(crate::url::DEFAULT_WEB_BASE, bvid),
            keyword: String::new(),
            counters: Counters::default(),
        }
    }

    /// Returns true if the publish time still lacks second precision
    pub fn needs_precise_publish_time(&self) -> bool {
        !self.published_at.map(|p| p.is_precise()).unwrap_or(false)
    }

    /// Returns true if an identifier, the title or a precise publish time is missing
    pub fn lacks_detail(&self) -> bool {
        self.aid.is_none()
            || self.cid.is_none()
            || self.title.is_none()
            || self.needs_precise_publish_time()
    }

    /// Overlays values from a later extraction onto this item
    ///
    /// Values already present are kept; only gaps are filled.
    pub fn fill_from(&mut self, other: &ContentItem) {
        self.aid = self.aid.or(other.aid);
        self.cid = self.cid.or(other.cid);
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.author.is_none() {
            self.author = other.author.clone();
        }
        match (self.published_at, other.published_at) {
            (None, Some(p)) => self.published_at = Some(p),
            (Some(mine), Some(theirs)) if !mine.is_precise() && theirs.is_precise() => {
                self.published_at = Some(theirs)
            }
            _ => {}
        }
        self.counters.fill_from(&other.counters);
    }
}
