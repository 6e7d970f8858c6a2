use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::types::{KvStore, StorageError};
use crate::upstream::Chapter;

/// Default TTL for cached chapter lists (1 hour)
pub const DEFAULT_CHAPTER_TTL: Duration = Duration::from_secs(60 * 60);

const KEY_PREFIX: &str = "chapters:";

/// Per-title chapter lists keyed by (slug, lang).
///
/// Shares a backend with [`MappingStore`](super::MappingStore) but lives in
/// its own key namespace with its own TTL.
#[derive(Clone)]
pub struct ChapterCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ChapterCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(slug: &str, lang: &str) -> String {
        format!("{}{}:{}", KEY_PREFIX, lang, slug)
    }

    /// Cached chapters for one title.
    ///
    /// An entry that no longer decodes is treated as a miss so it gets refetched.
    pub async fn get(&self, slug: &str, lang: &str) -> Result<Option<Vec<Chapter>>, StorageError> {
        let Some(raw) = self.kv.get(&Self::key(slug, lang)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(chapters) => Ok(Some(chapters)),
            Err(e) => {
                tracing::warn!(slug = %slug, lang = %lang, error = %e, "Discarding undecodable chapter cache entry");
                Ok(None)
            }
        }
    }

    /// Cached chapters for every slug that has a fresh entry.
    pub async fn get_many(
        &self,
        slugs: &[String],
        lang: &str,
    ) -> Result<HashMap<String, Vec<Chapter>>, StorageError> {
        let mut hits = HashMap::new();
        for slug in self.cached_slugs(slugs, lang).await? {
            if let Some(chapters) = self.get(&slug, lang).await? {
                hits.insert(slug, chapters);
            }
        }
        Ok(hits)
    }

    pub async fn put(&self, slug: &str, lang: &str, chapters: &[Chapter]) -> Result<(), StorageError> {
        let value = serde_json::to_string(chapters)?;
        self.kv.set(&Self::key(slug, lang), &value, self.ttl).await
    }

    /// Write several titles' chapter lists in one atomic batch.
    pub async fn put_many(
        &self,
        lang: &str,
        lists: &[(String, Vec<Chapter>)],
    ) -> Result<(), StorageError> {
        let entries = lists
            .iter()
            .map(|(slug, chapters)| -> Result<(String, String), StorageError> {
                Ok((Self::key(slug, lang), serde_json::to_string(chapters)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.kv.set_many(&entries, self.ttl).await
    }

    /// Slugs (in input order) that currently have a fresh entry.
    pub async fn cached_slugs(&self, slugs: &[String], lang: &str) -> Result<Vec<String>, StorageError> {
        let keys: Vec<String> = slugs.iter().map(|s| Self::key(s, lang)).collect();
        let live = self.kv.live_keys(&keys).await?;
        Ok(slugs
            .iter()
            .zip(keys.iter())
            .filter(|(_, key)| live.contains(*key))
            .map(|(slug, _)| slug.clone())
            .collect())
    }

    /// Slugs (in input order) without a fresh entry.
    pub async fn missing_slugs(&self, slugs: &[String], lang: &str) -> Result<Vec<String>, StorageError> {
        let cached = self.cached_slugs(slugs, lang).await?;
        Ok(slugs
            .iter()
            .filter(|s| !cached.contains(*s))
            .cloned()
            .collect())
    }
}
