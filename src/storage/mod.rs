mod chapter_cache;
mod mappings;
mod memory;
mod sqlite;
mod types;

pub use chapter_cache::{ChapterCache, DEFAULT_CHAPTER_TTL};
pub use mappings::{feed_id, normalize, MappingStore, DEFAULT_RETENTION};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{FeedMapping, KvStore, StorageError};
