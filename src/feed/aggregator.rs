use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{ChapterCache, StorageError};
use crate::upstream::{Chapter, ChapterQuery, ComickClient, FetchError};

/// Default number of titles fetched at the same time
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of chapters requested per title
pub const DEFAULT_CHAPTERS_PER_TITLE: u32 = 20;

/// Why a single title produced no chapter list.
#[derive(Debug, Error)]
pub enum TitleError {
    #[error("Title '{0}' could not be resolved")]
    NotFound(String),
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

/// Newest/highest chapter first: chapter number descending (numeric), then
/// publish time descending.
pub fn compare_chapters(a: &Chapter, b: &Chapter) -> Ordering {
    b.number()
        .total_cmp(&a.number())
        .then_with(|| b.published_at.cmp(&a.published_at))
}

pub fn sort_chapters(chapters: &mut [Chapter]) {
    chapters.sort_by(compare_chapters);
}

/// Trimmed, non-empty slugs with duplicates removed, first occurrence kept.
pub fn distinct_slugs<S: AsRef<str>>(slugs: &[S]) -> Vec<String> {
    let mut seen = Vec::with_capacity(slugs.len());
    for slug in slugs {
        let slug = slug.as_ref().trim();
        if !slug.is_empty() && !seen.iter().any(|s: &String| s == slug) {
            seen.push(slug.to_string());
        }
    }
    seen
}

/// Merges several titles' chapters into one ordered feed.
pub struct Aggregator {
    client: Arc<ComickClient>,
    cache: ChapterCache,
    chapters_per_title: u32,
    concurrency: usize,
}

impl Aggregator {
    pub fn new(
        client: Arc<ComickClient>,
        cache: ChapterCache,
        chapters_per_title: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            cache,
            chapters_per_title: chapters_per_title.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &ChapterCache {
        &self.cache
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolve `slug` and list its chapters straight from upstream.
    pub async fn fetch_title(&self, slug: &str, lang: &str) -> Result<Vec<Chapter>, TitleError> {
        let title = self
            .client
            .resolve_title(slug)
            .await?
            .ok_or_else(|| TitleError::NotFound(slug.to_string()))?;

        let query = ChapterQuery {
            limit: self.chapters_per_title,
            lang: lang.to_string(),
        };
        let chapters = self.client.list_chapters(&title.hid, slug, &query).await?;
        Ok(chapters)
    }

    /// All chapters of `slugs` in `lang`, ordered by [`compare_chapters`].
    ///
    /// Fresh chapter cache entries are used as-is; other titles are fetched
    /// with bounded concurrency and written back to the cache in one batch;
    /// empty lists are not cached. A title that fails to resolve or fetch is skipped. An empty result is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Only chapter cache read failures are returned. A failed cache write is
    /// logged and the merged chapters are still returned.
    pub async fn merge_chapters_for_titles<S: AsRef<str>>(
        &self,
        slugs: &[S],
        lang: &str,
    ) -> Result<Vec<Chapter>, StorageError> {
        let slugs = distinct_slugs(slugs);
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        let mut cached = self.cache.get_many(&slugs, lang).await?;
        let to_fetch: Vec<String> = slugs
            .iter()
            .filter(|s| !cached.contains_key(s.as_str()))
            .cloned()
            .collect();

        if !cached.is_empty() {
            tracing::debug!(lang = %lang, hits = cached.len(), misses = to_fetch.len(), "Chapter cache lookup");
        }

        let results: Vec<(String, Result<Vec<Chapter>, TitleError>)> = stream::iter(to_fetch)
            .map(|slug| async move {
                let result = self.fetch_title(&slug, lang).await;
                (slug, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fresh = Vec::with_capacity(results.len());
        for (slug, result) in results {
            match result {
                Ok(chapters) => fresh.push((slug, chapters)),
                Err(e) => {
                    tracing::warn!(slug = %slug, lang = %lang, error = %e, "Skipping title");
                }
            }
        }

        // An empty list may come from a degraded upstream response; refetch it next time
        let cacheable: Vec<(String, Vec<Chapter>)> = fresh
            .iter()
            .filter(|(_, chapters)| !chapters.is_empty())
            .cloned()
            .collect();
        if !cacheable.is_empty() {
            if let Err(e) = self.cache.put_many(lang, &cacheable).await {
                tracing::warn!(lang = %lang, error = %e, "Failed to write chapter cache");
            }
        }

        let mut fresh: HashMap<String, Vec<Chapter>> = fresh.into_iter().collect();
        let mut chapters = Vec::new();
        for slug in &slugs {
            if let Some(list) = cached.remove(slug).or_else(|| fresh.remove(slug)) {
                chapters.extend(list);
            }
        }

        sort_chapters(&mut chapters);
        Ok(chapters)
    }
}
