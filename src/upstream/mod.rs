//! Access to the ComicK API.
//!
//! - [`fetcher`] - single GET with bounded exponential backoff and jitter
//! - [`client`] - typed endpoints (recent chapters, genres, titles, chapter lists)
//! - [`types`] - chapter/title/genre types shared with the rest of the crate

mod client;
mod fetcher;
mod types;

pub use client::{ComickClient, GenreCache, DEFAULT_API_BASE};
pub use fetcher::{FetchError, Fetcher, RetryPolicy};
pub use types::{
    cover_url, is_supported_language, language_name, parse_chapter_number, Chapter, ChapterQuery,
    ComicInfo, ContentType, Cover, Genre, RecentChapter, RecentComic, TitleRef, LANGUAGES,
};
