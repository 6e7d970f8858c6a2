use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use super::aggregator::{distinct_slugs, Aggregator};
use crate::storage::StorageError;

/// Outcome of a [`CacheWarmer::warm`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Slugs fetched and written to the cache
    pub warmed: Vec<String>,
    /// Slugs that already had a fresh entry
    pub already_fresh: Vec<String>,
    /// Slugs that could not be fetched, with the reason
    pub failed: Vec<(String, String)>,
}

/// Fills per-title chapter cache entries ahead of feed requests.
pub struct CacheWarmer {
    aggregator: Arc<Aggregator>,
}

impl CacheWarmer {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    /// Slugs (deduplicated, input order) that lack a fresh cache entry.
    pub async fn check_cache_status<S: AsRef<str>>(
        &self,
        slugs: &[S],
        lang: &str,
    ) -> Result<Vec<String>, StorageError> {
        let slugs = distinct_slugs(slugs);
        self.aggregator.cache().missing_slugs(&slugs, lang).await
    }

    /// Fetch and cache every slug that is missing a fresh entry.
    ///
    /// Fetch failures and empty chapter lists are isolated per slug and
    /// reported in [`WarmReport::failed`]. All successful fetches are written
    /// in one batch; a failure of that write is returned.
    pub async fn warm<S: AsRef<str>>(&self, slugs: &[S], lang: &str) -> Result<WarmReport, StorageError> {
        let slugs = distinct_slugs(slugs);
        let cache = self.aggregator.cache();
        let missing = cache.missing_slugs(&slugs, lang).await?;

        let mut report = WarmReport {
            already_fresh: slugs
                .iter()
                .filter(|s| !missing.contains(*s))
                .cloned()
                .collect(),
            ..WarmReport::default()
        };

        if missing.is_empty() {
            tracing::debug!(lang = %lang, titles = slugs.len(), "Chapter cache already warm");
            return Ok(report);
        }

        let aggregator = &self.aggregator;
        let results: Vec<_> = stream::iter(missing)
            .map(|slug| async move {
                let result = aggregator.fetch_title(&slug, lang).await;
                (slug, result)
            })
            .buffer_unordered(aggregator.concurrency())
            .collect()
            .await;

        let mut fresh = Vec::with_capacity(results.len());
        for (slug, result) in results {
            match result {
                Ok(chapters) if chapters.is_empty() => {
                    tracing::warn!(slug = %slug, lang = %lang, "Title returned no chapters, not caching");
                    report.failed.push((slug, "no chapters returned".to_string()));
                }
                Ok(chapters) => fresh.push((slug, chapters)),
                Err(e) => {
                    tracing::warn!(slug = %slug, lang = %lang, error = %e, "Failed to warm title");
                    report.failed.push((slug, e.to_string()));
                }
            }
        }

        if !fresh.is_empty() {
            cache.put_many(lang, &fresh).await?;
        }

        report.warmed = fresh.into_iter().map(|(slug, _)| slug).collect();
        report.warmed.sort();
        report.failed.sort();

        tracing::info!(
            lang = %lang,
            warmed = report.warmed.len(),
            fresh = report.already_fresh.len(),
            failed = report.failed.len(),
            "Chapter cache warm complete"
        );
        Ok(report)
    }
}
