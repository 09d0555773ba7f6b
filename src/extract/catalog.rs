//! Field catalogs for each source shape the provider serves
//!
//! Strategies are listed in the order they are tried. When the provider's
//! markup or payload shape drifts, this is the file to touch.

use crate::extract::strategy::{FieldKind, FieldSpec, Locator, Strategy};

/// Field names shared by the catalogs
pub mod field {
    pub const BVID: &str = "bvid";
    pub const AID: &str = "aid";
    pub const CID: &str = "cid";
    pub const TITLE: &str = "title";
    pub const AUTHOR: &str = "author";
    pub const PUBLISHED: &str = "published_at";
    pub const VIEWS: &str = "views";
    pub const OVERLAYS: &str = "overlays";
    pub const LIKES: &str = "likes";
    pub const COINS: &str = "coins";
    pub const BOOKMARKS: &str = "bookmarks";
    pub const SHARES: &str = "shares";
    pub const COMMENTS: &str = "comments";
}

use crate::extract::strategy::StrategyKind::{DisplayText, ScriptDerived, Secondary, Structured};

const BVID_PATTERN: &str = r"BV[0-9A-Za-z]{10}";

/// `/data/<path>` in the flat view payload, `/data/View/<path>` in the
/// detail payload served to some cohorts
macro_rules! view_field {
    ($name:expr, $kind:expr, $path:literal) => {
        FieldSpec {
            name: $name,
            kind: $kind,
            strategies: &[
                Strategy::new(Structured, Locator::Pointer(concat!("/data/", $path))),
                Strategy::new(Secondary, Locator::Pointer(concat!("/data/View/", $path))),
            ],
        }
    };
}

/// Video view JSON (`/x/web-interface/view`)
pub static VIDEO_VIEW_FIELDS: &[FieldSpec] = &[
    view_field!(field::BVID, FieldKind::BvId, "bvid"),
    view_field!(field::AID, FieldKind::Count, "aid"),
    FieldSpec {
        name: field::CID,
        kind: FieldKind::Count,
        strategies: &[
            Strategy::new(Structured, Locator::Pointer("/data/cid")),
            Strategy::new(Secondary, Locator::Pointer("/data/View/cid")),
            Strategy::new(Secondary, Locator::Pointer("/data/pages/0/cid")),
        ],
    },
    view_field!(field::TITLE, FieldKind::Text, "title"),
    view_field!(field::AUTHOR, FieldKind::Text, "owner/name"),
    FieldSpec {
        name: field::PUBLISHED,
        kind: FieldKind::Timestamp,
        strategies: &[
            Strategy::new(Structured, Locator::Pointer("/data/pubdate")),
            Strategy::new(Secondary, Locator::Pointer("/data/View/pubdate")),
            Strategy::new(Secondary, Locator::Pointer("/data/ctime")),
        ],
    },
    view_field!(field::VIEWS, FieldKind::Count, "stat/view"),
    view_field!(field::OVERLAYS, FieldKind::Count, "stat/danmaku"),
    view_field!(field::LIKES, FieldKind::Count, "stat/like"),
    view_field!(field::COINS, FieldKind::Count, "stat/coin"),
    view_field!(field::BOOKMARKS, FieldKind::Count, "stat/favorite"),
    view_field!(field::SHARES, FieldKind::Count, "stat/share"),
    view_field!(field::COMMENTS, FieldKind::Count, "stat/reply"),
];

/// One `.bili-video-card` on the search listing
pub static SEARCH_CARD_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: field::BVID,
        kind: FieldKind::BvId,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: ".bili-video-card__info--right a[href]",
                    attr: "href",
                },
            ),
            Strategy::new(
                Secondary,
                Locator::Attr {
                    selector: ".bili-video-card__image--link",
                    attr: "href",
                },
            ),
            Strategy::new(
                ScriptDerived,
                Locator::Attr {
                    selector: "[data-loc-id]",
                    attr: "data-loc-id",
                },
            ),
            Strategy::new(
                DisplayText,
                Locator::Pattern {
                    selector: "[href*='BV']",
                    attr: Some("href"),
                    pattern: BVID_PATTERN,
                },
            ),
            Strategy::new(
                DisplayText,
                Locator::Pattern {
                    selector: "[title*='BV']",
                    attr: Some("title"),
                    pattern: BVID_PATTERN,
                },
            ),
        ],
    },
    FieldSpec {
        name: field::TITLE,
        kind: FieldKind::Text,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: ".bili-video-card__info--tit",
                    attr: "title",
                },
            ),
            Strategy::new(DisplayText, Locator::Text(".bili-video-card__info--tit")),
        ],
    },
    FieldSpec {
        name: field::AUTHOR,
        kind: FieldKind::Text,
        strategies: &[
            Strategy::new(Structured, Locator::Text(".bili-video-card__info--author")),
            Strategy::new(
                Secondary,
                Locator::Attr {
                    selector: ".bili-video-card__info--author",
                    attr: "title",
                },
            ),
        ],
    },
    FieldSpec {
        name: field::PUBLISHED,
        kind: FieldKind::Timestamp,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: ".bili-video-card__info--date",
                    attr: "title",
                },
            )
            .precise(),
            Strategy::new(
                ScriptDerived,
                Locator::Attr {
                    selector: ".bili-video-card__info--date",
                    attr: "data-time",
                },
            ),
            Strategy::new(DisplayText, Locator::Text(".bili-video-card__info--date")),
        ],
    },
    FieldSpec {
        name: field::VIEWS,
        kind: FieldKind::Count,
        strategies: &[Strategy::new(
            DisplayText,
            Locator::Text(".bili-video-card__stats--item:nth-child(1)"),
        )],
    },
    FieldSpec {
        name: field::OVERLAYS,
        kind: FieldKind::Count,
        strategies: &[Strategy::new(
            DisplayText,
            Locator::Text(".bili-video-card__stats--item:nth-child(2)"),
        )],
    },
];

/// `__INITIAL_STATE__.videoData.stat.<key>` then the rendered display text
macro_rules! page_counter {
    ($name:expr, $key:literal, $selector:literal) => {
        FieldSpec {
            name: $name,
            kind: FieldKind::Count,
            strategies: &[
                Strategy::new(
                    ScriptDerived,
                    Locator::InitialState(concat!("/videoData/stat/", $key)),
                ),
                Strategy::new(DisplayText, Locator::Text($selector)),
            ],
        }
    };
}

/// A rendered video page (`/video/<bvid>`)
pub static VIDEO_PAGE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: field::BVID,
        kind: FieldKind::BvId,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: "meta[itemprop='url']",
                    attr: "content",
                },
            ),
            Strategy::new(ScriptDerived, Locator::InitialState("/bvid")),
            Strategy::new(ScriptDerived, Locator::InitialState("/videoData/bvid")),
        ],
    },
    FieldSpec {
        name: field::AID,
        kind: FieldKind::Count,
        strategies: &[
            Strategy::new(ScriptDerived, Locator::InitialState("/aid")),
            Strategy::new(ScriptDerived, Locator::InitialState("/videoData/aid")),
        ],
    },
    FieldSpec {
        name: field::CID,
        kind: FieldKind::Count,
        strategies: &[Strategy::new(
            ScriptDerived,
            Locator::InitialState("/videoData/cid"),
        )],
    },
    FieldSpec {
        name: field::TITLE,
        kind: FieldKind::Text,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: "h1.video-title",
                    attr: "title",
                },
            ),
            Strategy::new(ScriptDerived, Locator::InitialState("/videoData/title")),
            Strategy::new(DisplayText, Locator::Text("h1.video-title")),
        ],
    },
    FieldSpec {
        name: field::AUTHOR,
        kind: FieldKind::Text,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: "meta[name='author']",
                    attr: "content",
                },
            ),
            Strategy::new(ScriptDerived, Locator::InitialState("/upData/name")),
            Strategy::new(ScriptDerived, Locator::InitialState("/videoData/owner/name")),
            Strategy::new(DisplayText, Locator::Text(".up-name")),
        ],
    },
    FieldSpec {
        name: field::PUBLISHED,
        kind: FieldKind::Timestamp,
        strategies: &[
            Strategy::new(
                Structured,
                Locator::Attr {
                    selector: "meta[itemprop='datePublished']",
                    attr: "content",
                },
            )
            .precise(),
            Strategy::new(
                Secondary,
                Locator::Attr {
                    selector: "meta[itemprop='uploadDate']",
                    attr: "content",
                },
            )
            .precise(),
            Strategy::new(ScriptDerived, Locator::InitialState("/videoData/pubdate")),
            Strategy::new(
                DisplayText,
                Locator::Text(".pubdate-ip-text, .video-info-ctime, .pubdate-text"),
            ),
        ],
    },
    page_counter!(field::VIEWS, "view", ".view-text"),
    page_counter!(field::OVERLAYS, "danmaku", ".dm-text"),
    page_counter!(field::LIKES, "like", ".video-like-info"),
    page_counter!(field::COINS, "coin", ".video-coin-info"),
    page_counter!(field::BOOKMARKS, "favorite", ".video-fav-info"),
    page_counter!(field::SHARES, "share", ".video-share-info"),
    page_counter!(field::COMMENTS, "reply", ".total-reply"),
];

/// Looks a field up by name in a catalog
pub fn find_field(catalog: &[FieldSpec], name: &str) -> Option<FieldSpec> {
    catalog.iter().find(|f| f.name == name).copied()
}
