use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

use super::fetcher::{FetchError, Fetcher};
use super::types::{
    first_timestamp, opt_string_or_number, parse_chapter_number, Chapter, ChapterQuery, ComicInfo,
    ContentType, Genre, RecentChapter, TitleRef,
};

pub const DEFAULT_API_BASE: &str = "https://api.comick.fun/";

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ComicEnvelope {
    comic: Option<ComicPayload>,
}

#[derive(Debug, Deserialize)]
struct ComicPayload {
    #[serde(default)]
    hid: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    md_covers: Option<Vec<CoverPayload>>,
}

#[derive(Debug, Deserialize)]
struct CoverPayload {
    #[serde(default)]
    b2key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    id: Option<String>,
    #[serde(default)]
    hid: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    chap: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    publish_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl RawChapter {
    /// Build a [`Chapter`], or `None` when the entry lacks an id, a parseable
    /// chapter number, or any parseable timestamp.
    fn into_chapter(self, comic: &ComicInfo) -> Option<Chapter> {
        let id = self
            .hid
            .filter(|h| !h.trim().is_empty())
            .or(self.id.filter(|i| !i.trim().is_empty()))?;
        let chapter_number = self.chap.map(|c| c.trim().to_string())?;
        parse_chapter_number(&chapter_number)?;
        let published_at = first_timestamp([
            self.publish_at.as_deref(),
            self.created_at.as_deref(),
            self.updated_at.as_deref(),
        ])?;
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chapter {}", chapter_number));

        Some(Chapter {
            id,
            chapter_number,
            title,
            published_at,
            comic: comic.clone(),
        })
    }
}

// ============================================================================
// Genre memo
// ============================================================================

/// Process-lifetime memo of the upstream genre list.
///
/// Only successful, non-empty loads are stored.
#[derive(Debug, Default)]
pub struct GenreCache {
    genres: RwLock<Option<Arc<Vec<Genre>>>>,
}

impl GenreCache {
    pub async fn get(&self) -> Option<Arc<Vec<Genre>>> {
        self.genres.read().await.clone()
    }

    pub async fn set(&self, genres: Vec<Genre>) -> Arc<Vec<Genre>> {
        let genres = Arc::new(genres);
        *self.genres.write().await = Some(Arc::clone(&genres));
        genres
    }

    pub async fn invalidate(&self) {
        *self.genres.write().await = None;
    }
}

// ============================================================================
// Client
// ============================================================================

/// Typed access to the ComicK API.
#[derive(Debug)]
pub struct ComickClient {
    fetcher: Fetcher,
    base_url: Url,
    genres: GenreCache,
}

impl ComickClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.comick.fun/`).
    pub fn new(fetcher: Fetcher, base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        // Normalize to a directory-style base; endpoints are appended below it
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            fetcher,
            base_url,
            genres: GenreCache::default(),
        })
    }

    pub fn genre_cache(&self) -> &GenreCache {
        &self.genres
    }

    /// Append `segments` below the base path, percent-encoding each one.
    ///
    /// A `/`, `?` or `#` inside a segment is escaped, so caller-supplied slugs
    /// cannot move the request to another endpoint.
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Malformed(format!("base URL '{}' cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments.iter().copied());
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Latest chapters across all titles for a language.
    ///
    /// A body that is not a JSON list degrades to an empty result; entries
    /// that do not match the expected shape are skipped. Transport failures
    /// (after retries) are returned.
    pub async fn recent_chapters(
        &self,
        lang: &str,
        content: ContentType,
        page: u32,
    ) -> Result<Vec<RecentChapter>, FetchError> {
        let page = page.max(1).to_string();
        let erotic = content.accepts_erotic_content().to_string();
        let url = self.endpoint(
            &["chapter"],
            &[
                ("lang", lang),
                ("page", &page),
                ("order", "new"),
                ("accept_erotic_content", &erotic),
            ],
        )?;

        let body: Value = match self.fetcher.get_json(url.as_str()).await {
            Ok(body) => body,
            Err(FetchError::Malformed(e)) => {
                tracing::warn!(lang = %lang, error = %e, "Recent chapters response is not JSON");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let Value::Array(entries) = body else {
            tracing::warn!(lang = %lang, "Unexpected recent chapters response format, expected a list");
            return Ok(Vec::new());
        };

        let total = entries.len();
        let chapters: Vec<RecentChapter> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();

        if chapters.len() < total {
            tracing::debug!(
                lang = %lang,
                skipped = total - chapters.len(),
                "Skipped malformed recent chapter entries"
            );
        }

        Ok(chapters)
    }

    /// All genres, memoized after the first successful load.
    ///
    /// Failures return an empty list, which means "names unavailable", not
    /// "no genres".
    pub async fn genres(&self) -> Arc<Vec<Genre>> {
        if let Some(genres) = self.genres.get().await {
            return genres;
        }

        let url = match self.endpoint(&["genre"], &[]) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build genre endpoint");
                return Arc::new(Vec::new());
            }
        };

        match self.fetcher.get_json::<Vec<Genre>>(url.as_str()).await {
            Ok(genres) if !genres.is_empty() => {
                tracing::debug!(count = genres.len(), "Loaded genre list");
                self.genres.set(genres).await
            }
            Ok(_) => {
                tracing::warn!("Upstream returned an empty genre list");
                Arc::new(Vec::new())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load genres");
                Arc::new(Vec::new())
            }
        }
    }

    /// Resolve a slug to its internal handle.
    ///
    /// `Ok(None)` when upstream answers 404 or the response carries no usable
    /// handle; other failures are returned.
    pub async fn resolve_title(&self, slug: &str) -> Result<Option<TitleRef>, FetchError> {
        let comic = match self.fetch_comic(slug).await {
            Ok(Some(comic)) => comic,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(FetchError::Malformed(e)) => {
                tracing::warn!(slug = %slug, error = %e, "Malformed comic response");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(hid) = comic.hid.filter(|h| !h.trim().is_empty()) else {
            tracing::debug!(slug = %slug, "Comic response has no handle");
            return Ok(None);
        };

        Ok(Some(TitleRef {
            slug: comic.slug.unwrap_or_else(|| slug.to_string()),
            hid,
            title: comic.title.unwrap_or_else(|| slug.to_string()),
        }))
    }

    /// Chapters for one title, newest upstream order preserved.
    ///
    /// Makes two calls: title metadata (display title, cover) and the chapter
    /// list. A metadata failure degrades to the slug as title; a chapter list
    /// without the expected shape degrades to an empty result. Entries without
    /// an id, chapter number or timestamp are dropped.
    pub async fn list_chapters(
        &self,
        hid: &str,
        slug: &str,
        query: &ChapterQuery,
    ) -> Result<Vec<Chapter>, FetchError> {
        if !is_path_segment(hid) {
            return Err(FetchError::Malformed(format!("unusable title handle '{hid}'")));
        }

        let comic = match self.fetch_comic(slug).await {
            Ok(Some(payload)) => ComicInfo {
                title: payload.title.unwrap_or_else(|| slug.to_string()),
                slug: slug.to_string(),
                cover_key: payload
                    .md_covers
                    .unwrap_or_default()
                    .into_iter()
                    .find_map(|c| c.b2key),
            },
            Ok(None) => fallback_comic(slug),
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Failed to load comic metadata, using slug as title");
                fallback_comic(slug)
            }
        };

        let limit = query.limit.max(1).to_string();
        let url = self.endpoint(
            &["comic", hid, "chapters"],
            &[("lang", query.lang.as_str()), ("limit", limit.as_str())],
        )?;

        let body: Value = match self.fetcher.get_json(url.as_str()).await {
            Ok(body) => body,
            Err(FetchError::Malformed(e)) => {
                tracing::warn!(slug = %slug, error = %e, "Chapter list response is not JSON");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(chapters_from_body(body, &comic))
    }

    async fn fetch_comic(&self, slug: &str) -> Result<Option<ComicPayload>, FetchError> {
        if !is_path_segment(slug) {
            tracing::debug!(slug = %slug, "Slug cannot name a title");
            return Ok(None);
        }
        let url = self.endpoint(&["comic", slug, ""], &[])?;
        let envelope: ComicEnvelope = self.fetcher.get_json(url.as_str()).await?;
        Ok(envelope.comic)
    }
}

/// Values that would be dropped or resolved as dot-segments never reach a path.
fn is_path_segment(value: &str) -> bool {
    !matches!(value.trim(), "" | "." | "..")
}

fn fallback_comic(slug: &str) -> ComicInfo {
    ComicInfo {
        title: slug.to_string(),
        slug: slug.to_string(),
        cover_key: None,
    }
}

/// Extract usable chapters from a `{"chapters": [...]}` body.
fn chapters_from_body(body: Value, comic: &ComicInfo) -> Vec<Chapter> {
    let entries = match body {
        Value::Object(mut map) => match map.remove("chapters") {
            Some(Value::Array(entries)) => entries,
            _ => {
                tracing::warn!(slug = %comic.slug, "Chapter list response has no chapters array");
                return Vec::new();
            }
        },
        _ => {
            tracing::warn!(slug = %comic.slug, "Unexpected chapter list response format");
            return Vec::new();
        }
    };

    let total = entries.len();
    let chapters: Vec<Chapter> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawChapter>(entry).ok())
        .filter_map(|raw| raw.into_chapter(comic))
        .collect();

    if chapters.len() < total {
        tracing::debug!(
            slug = %comic.slug,
            dropped = total - chapters.len(),
            "Dropped unusable chapter entries"
        );
    }

    chapters
}
