//! Provider endpoints: request builders, payload parsers, and paginator sources
//!
//! # Components
//!
//! - `video`: the view payload and the public video page
//! - `comments`: pinned comment and numbered comment pages
//! - `overlay`: the overlay message list of one part
//! - `search`: keyword search listing

mod comments;
mod overlay;
mod search;
mod video;

pub use comments::{
    comment_page_request, fetch_comment_page, fetch_pinned, harvest_thread, parse_comment_page,
    parse_pinned, pinned_request, CommentPage, CommentThread, ThreadHarvest,
};
pub use overlay::{fetch_overlays, overlay_request, parse_overlay_list};
pub use search::{
    parse_search_page, search_request, window_epochs, SearchCard, SearchListing,
};
pub use video::{
    fetch_video_page, fetch_view, fill_from_page, item_from_extracted, item_from_page, view_request,
};
