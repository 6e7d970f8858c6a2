//! Feed assembly on top of the upstream client and the chapter cache.
//!
//! - [`aggregator`] - merges several titles into one ordered chapter list
//! - [`warmer`] - fills the chapter cache ahead of requests

mod aggregator;
mod warmer;

pub use aggregator::{
    compare_chapters, distinct_slugs, sort_chapters, Aggregator, TitleError,
    DEFAULT_CHAPTERS_PER_TITLE, DEFAULT_CONCURRENCY,
};
pub use warmer::{CacheWarmer, WarmReport};
