use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::types::{FeedMapping, KvStore, StorageError};
use crate::error::FeedError;

/// Default retention for unread mappings (30 days)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const KEY_PREFIX: &str = "feed:";

/// Hex characters kept from the SHA-256 digest.
const FEED_ID_LEN: usize = 16;

/// Trim, drop empties, sort and dedupe slugs; trim and lowercase the language.
///
/// # Errors
///
/// [`FeedError::InvalidInput`] when no slug survives or the language is blank.
pub fn normalize<S: AsRef<str>>(slugs: &[S], lang: &str) -> Result<(Vec<String>, String), FeedError> {
    let mut normalized: Vec<String> = slugs
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    normalized.sort();
    normalized.dedup();

    if normalized.is_empty() {
        return Err(FeedError::InvalidInput("at least one slug is required".into()));
    }

    let lang = lang.trim().to_ascii_lowercase();
    if lang.is_empty() {
        return Err(FeedError::InvalidInput("language is required".into()));
    }

    Ok((normalized, lang))
}

/// Deterministic identifier for already-normalized input.
///
/// Every field is hashed with a length prefix, so slugs containing `,` or `:`
/// cannot make two different subscriptions hash alike.
pub fn feed_id(slugs: &[String], lang: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((slugs.len() as u64).to_be_bytes());
    for field in slugs.iter().map(String::as_str).chain(std::iter::once(lang)) {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FEED_ID_LEN);
    hex
}

/// Maps feed identifiers to subscriptions, with sliding expiration.
#[derive(Clone)]
pub struct MappingStore {
    kv: Arc<dyn KvStore>,
    retention: Duration,
}

impl MappingStore {
    pub fn new(kv: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { kv, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn key(feed_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, feed_id)
    }

    /// Store (or refresh) the mapping for `slugs` + `lang`, returning its identifier.
    ///
    /// Equivalent inputs always produce the same identifier; storing again
    /// overwrites the record and restarts the retention window.
    pub async fn put<S: AsRef<str>>(&self, slugs: &[S], lang: &str) -> Result<FeedMapping, FeedError> {
        let (slugs, lang) = normalize(slugs, lang)?;
        let mapping = FeedMapping {
            feed_id: feed_id(&slugs, &lang),
            slugs,
            lang,
            created_at: Utc::now(),
        };

        let value = serde_json::to_string(&mapping).map_err(StorageError::from)?;
        self.kv
            .set(&Self::key(&mapping.feed_id), &value, self.retention)
            .await?;

        tracing::debug!(feed_id = %mapping.feed_id, slugs = mapping.slugs.len(), lang = %mapping.lang, "Stored feed mapping");
        Ok(mapping)
    }

    /// Look up a mapping; a hit restarts its retention window.
    ///
    /// Returns `Ok(None)` for unknown or expired identifiers. Backend failures
    /// are returned, never treated as a miss.
    pub async fn get(&self, feed_id: &str) -> Result<Option<FeedMapping>, StorageError> {
        let key = Self::key(feed_id.trim());
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        let mapping: FeedMapping = serde_json::from_str(&raw)?;

        if !self.kv.expire(&key, self.retention).await? {
            // Expired between the read and the refresh
            tracing::debug!(feed_id = %feed_id, "Feed mapping expired during lookup");
            return Ok(None);
        }

        Ok(Some(mapping))
    }

    /// Drop expired records from the backend.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.kv.purge_expired().await
    }
}
