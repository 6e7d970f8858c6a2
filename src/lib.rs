//! Chapter-release feeds built from the ComicK API.
//!
//! The crate fetches chapter data from an unreliable upstream with bounded
//! retries, keeps subscription mappings and per-title chapter lists in an
//! expiring key-value store, and merges several titles into one ordered
//! chapter list. Rendering the result (RSS/XML, HTML) is left to the caller.
//!
//! ```ignore
//! use chapterfeed::{config::Config, service::FeedService, storage::SqliteStore};
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let store = Arc::new(SqliteStore::open("feeds.db")?);
//! let service = FeedService::from_config(&config, store)?;
//!
//! let feed_id = service.create_feed(&["one-piece", "berserk"], "en").await?;
//! let feed = service.feed_chapters(&feed_id).await?;
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod service;
pub mod storage;
pub mod upstream;

pub use error::FeedError;
