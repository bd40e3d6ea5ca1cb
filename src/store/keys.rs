//! Canonical storage keys.
//!
//! One scheme per platform: `<platform>_token`, `<platform>_refresh_token`,
//! `<platform>_token_expiry`. Historical aliases (`twitter_token`,
//! `x_token_timestamp`) are not read or written.

// Reddit credential triple
pub const REDDIT_TOKEN: &str = "reddit_token";
pub const REDDIT_REFRESH_TOKEN: &str = "reddit_refresh_token";
pub const REDDIT_TOKEN_EXPIRY: &str = "reddit_token_expiry";

// X credential triple
pub const X_TOKEN: &str = "x_token";
pub const X_REFRESH_TOKEN: &str = "x_refresh_token";
pub const X_TOKEN_EXPIRY: &str = "x_token_expiry";

/// JSON array of normalized posts; the Reddit-origin merge target.
pub const REDDIT_SAVED_POSTS: &str = "reddit_saved_posts";

/// JSON object keyed by post id; the X-origin cache/fallback target.
pub const X_BOOKMARKS_STORAGE: &str = "x_bookmarks_storage";

/// JSON array of tag strings, most-recent-first.
pub const USER_TAGS: &str = "user_tags";

/// JSON object: bookmark key -> array of tag strings.
pub const BOOKMARK_TAG_MAP: &str = "bookmark_tag_map";

/// Unix-millis string: last successful X fetch (fetch-cooldown bookkeeping).
pub const X_CACHE_TIME: &str = "x_cache_time";

/// Unix-millis string: moment of X disconnect (reconnect-lockout bookkeeping).
pub const X_DISCONNECTED_AT: &str = "x_disconnected_at";

// UI settings; owned by the presentation layer, listed for keyspace
// completeness.
pub const AUTOPLAY_VIDEOS: &str = "autoplay_videos";
pub const THEME_PREFERENCE: &str = "theme_preference";
