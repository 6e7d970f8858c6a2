//! Boundary operations consumed by the routing/rendering layer.
//!
//! Everything here returns [`FeedError`]; callers map `InvalidInput` to a 400,
//! `NotFound`/`NoChapters` to a 404 and the rest to a 5xx.
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::FeedError;
use crate::feed::{Aggregator, CacheWarmer, WarmReport};
use crate::storage::{ChapterCache, FeedMapping, KvStore, MappingStore};
use crate::upstream::{
    is_supported_language, Chapter, ComickClient, ContentType, Fetcher, Genre, RecentChapter,
};

/// Tunables for [`FeedService::new`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub chapters_per_title: u32,
    pub concurrency: usize,
    pub mapping_retention: Duration,
    pub chapter_cache_ttl: Duration,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            chapters_per_title: config.chapters_per_title,
            concurrency: config.fetch_concurrency,
            mapping_retention: config.mapping_retention(),
            chapter_cache_ttl: config.chapter_cache_ttl(),
        }
    }
}

/// A stored feed together with its merged chapters.
#[derive(Debug, Clone, Serialize)]
pub struct FeedChapters {
    pub mapping: FeedMapping,
    pub chapters: Vec<Chapter>,
}

pub struct FeedService {
    client: Arc<ComickClient>,
    aggregator: Arc<Aggregator>,
    warmer: CacheWarmer,
    mappings: MappingStore,
    kv: Arc<dyn KvStore>,
}

fn validate_language(lang: &str) -> Result<String, FeedError> {
    let lang = lang.trim().to_ascii_lowercase();
    if !is_supported_language(&lang) {
        return Err(FeedError::InvalidInput(format!("unsupported language '{lang}'")));
    }
    Ok(lang)
}

impl FeedService {
    pub fn new(client: Arc<ComickClient>, kv: Arc<dyn KvStore>, settings: &ServiceSettings) -> Self {
        let cache = ChapterCache::new(Arc::clone(&kv), settings.chapter_cache_ttl);
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&client),
            cache,
            settings.chapters_per_title,
            settings.concurrency,
        ));
        Self {
            client,
            warmer: CacheWarmer::new(Arc::clone(&aggregator)),
            aggregator,
            mappings: MappingStore::new(Arc::clone(&kv), settings.mapping_retention),
            kv,
        }
    }

    /// Build the HTTP client, upstream client and service from `config`.
    pub fn from_config(config: &Config, kv: Arc<dyn KvStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;
        let fetcher = Fetcher::new(http, config.retry_policy(), config.request_timeout());
        let client = ComickClient::new(fetcher, &config.api_base_url)
            .with_context(|| format!("Invalid api_base_url '{}'", config.api_base_url))?;
        Ok(Self::new(Arc::new(client), kv, &ServiceSettings::from(config)))
    }

    /// Store a subscription and return its identifier.
    ///
    /// # Errors
    ///
    /// - [`FeedError::InvalidInput`] - no usable slug, or unsupported language
    /// - [`FeedError::Storage`] - mapping store unavailable
    pub async fn create_feed<S: AsRef<str>>(&self, slugs: &[S], lang: &str) -> Result<String, FeedError> {
        let lang = validate_language(lang)?;
        let mapping = self.mappings.put(slugs, &lang).await?;
        tracing::info!(feed_id = %mapping.feed_id, titles = mapping.slugs.len(), lang = %mapping.lang, "Created feed");
        Ok(mapping.feed_id)
    }

    /// Look up a stored subscription, refreshing its retention window.
    pub async fn resolve_feed(&self, feed_id: &str) -> Result<FeedMapping, FeedError> {
        self.mappings.get(feed_id).await?.ok_or(FeedError::NotFound)
    }

    /// Merged chapters for an explicit slug list. May be empty.
    pub async fn aggregated_chapters<S: AsRef<str>>(
        &self,
        slugs: &[S],
        lang: &str,
    ) -> Result<Vec<Chapter>, FeedError> {
        let lang = validate_language(lang)?;
        if slugs.iter().all(|s| s.as_ref().trim().is_empty()) {
            return Err(FeedError::InvalidInput("at least one slug is required".into()));
        }
        Ok(self.aggregator.merge_chapters_for_titles(slugs, &lang).await?)
    }

    /// Resolve a stored feed and merge its chapters.
    ///
    /// Partial results are returned as-is; [`FeedError::NoChapters`] only when
    /// no title produced anything.
    pub async fn feed_chapters(&self, feed_id: &str) -> Result<FeedChapters, FeedError> {
        let mapping = self.resolve_feed(feed_id).await?;
        let chapters = self
            .aggregator
            .merge_chapters_for_titles(&mapping.slugs, &mapping.lang)
            .await?;

        if chapters.is_empty() {
            tracing::info!(feed_id = %feed_id, "No chapters found for any title in feed");
            return Err(FeedError::NoChapters);
        }

        Ok(FeedChapters { mapping, chapters })
    }

    /// Latest chapters across all titles, straight from upstream.
    pub async fn recent_chapters(
        &self,
        lang: &str,
        content: ContentType,
        page: u32,
    ) -> Result<Vec<RecentChapter>, FeedError> {
        let lang = validate_language(lang)?;
        Ok(self.client.recent_chapters(&lang, content, page).await?)
    }

    /// Genre list; empty means names are unavailable.
    pub async fn genres(&self) -> Arc<Vec<Genre>> {
        self.client.genres().await
    }

    /// Slugs that have no fresh chapter cache entry.
    pub async fn check_cache_status<S: AsRef<str>>(
        &self,
        slugs: &[S],
        lang: &str,
    ) -> Result<Vec<String>, FeedError> {
        let lang = validate_language(lang)?;
        Ok(self.warmer.check_cache_status(slugs, &lang).await?)
    }

    pub async fn warm<S: AsRef<str>>(&self, slugs: &[S], lang: &str) -> Result<WarmReport, FeedError> {
        let lang = validate_language(lang)?;
        Ok(self.warmer.warm(slugs, &lang).await?)
    }

    /// Warm the chapter cache for every title of a stored feed.
    pub async fn warm_feed(&self, feed_id: &str) -> Result<WarmReport, FeedError> {
        let mapping = self.resolve_feed(feed_id).await?;
        Ok(self.warmer.warm(&mapping.slugs, &mapping.lang).await?)
    }

    /// Remove expired mappings and chapter cache entries.
    pub async fn purge_expired(&self) -> Result<u64, FeedError> {
        let purged = self.kv.purge_expired().await?;
        tracing::info!(purged = purged, "Purged expired records");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError};
    use crate::upstream::RetryPolicy;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Backend whose every call fails as if the server were unreachable.
    struct UnreachableStore;

    fn unreachable() -> StorageError {
        StorageError::Unavailable("connection refused".into())
    }

    #[async_trait]
    impl KvStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(unreachable())
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StorageError> {
            Err(unreachable())
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StorageError> {
            Err(unreachable())
        }
        async fn set_many(&self, _entries: &[(String, String)], _ttl: Duration) -> Result<(), StorageError> {
            Err(unreachable())
        }
        async fn live_keys(&self, _keys: &[String]) -> Result<Vec<String>, StorageError> {
            Err(unreachable())
        }
        async fn purge_expired(&self) -> Result<u64, StorageError> {
            Err(unreachable())
        }
    }

    fn service_for(server: &MockServer) -> FeedService {
        service_with_store(server, Arc::new(MemoryStore::new()))
    }

    fn service_with_store(server: &MockServer, kv: Arc<dyn KvStore>) -> FeedService {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_jitter: Duration::ZERO,
        };
        let fetcher = Fetcher::new(reqwest::Client::new(), policy, Duration::from_secs(5));
        let client = ComickClient::new(fetcher, &server.uri()).unwrap();
        let settings = ServiceSettings {
            chapters_per_title: 10,
            concurrency: 2,
            mapping_retention: Duration::from_secs(3600),
            chapter_cache_ttl: Duration::from_secs(600),
        };
        FeedService::new(Arc::new(client), kv, &settings)
    }

    async fn mount_title(server: &MockServer, slug: &str, hid: &str, chapters: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/comic/{slug}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "comic": {"hid": hid, "title": slug.to_uppercase()}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/comic/{hid}/chapters")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "chapters": chapters })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_feed_rejects_bad_input() {
        let server = MockServer::start().await;
        let service = service_for(&server);

        let empty: [&str; 0] = [];
        assert!(matches!(
            service.create_feed(&empty, "en").await,
            Err(FeedError::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_feed(&["  "], "en").await,
            Err(FeedError::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_feed(&["a"], "klingon").await,
            Err(FeedError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_create_then_resolve() {
        let server = MockServer::start().await;
        let service = service_for(&server);

        let id = service.create_feed(&["b", "a", "a"], "EN").await.unwrap();
        let again = service.create_feed(&["a", "b"], "en").await.unwrap();
        assert_eq!(id, again);

        let mapping = service.resolve_feed(&id).await.unwrap();
        assert_eq!(mapping.slugs, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(mapping.lang, "en");

        assert!(matches!(
            service.resolve_feed("0000000000000000").await,
            Err(FeedError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_feed_chapters_skips_unknown_titles() {
        let server = MockServer::start().await;
        mount_title(
            &server,
            "known",
            "h1",
            json!([
                {"hid": "c1", "chap": "1", "publish_at": "2024-01-01T00:00:00Z"},
                {"hid": "c2", "chap": "2", "publish_at": "2024-01-02T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/comic/ghost/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let service = service_for(&server);
        let id = service.create_feed(&["known", "ghost"], "en").await.unwrap();
        let feed = service.feed_chapters(&id).await.unwrap();

        let numbers: Vec<_> = feed.chapters.iter().map(|c| c.chapter_number.as_str()).collect();
        assert_eq!(numbers, vec!["2", "1"]);
        assert_eq!(feed.mapping.feed_id, id);
    }

    #[tokio::test]
    async fn test_feed_chapters_with_nothing_is_no_chapters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let service = service_for(&server);
        let id = service.create_feed(&["ghost"], "en").await.unwrap();
        assert!(matches!(service.feed_chapters(&id).await, Err(FeedError::NoChapters)));

        // The explicit-list form returns an empty list instead.
        let chapters = service.aggregated_chapters(&["ghost"], "en").await.unwrap();
        assert!(chapters.is_empty());
    }

    #[tokio::test]
    async fn test_warm_feed_fills_cache() {
        let server = MockServer::start().await;
        mount_title(
            &server,
            "known",
            "h1",
            json!([{"hid": "c1", "chap": "1", "publish_at": "2024-01-01T00:00:00Z"}]),
        )
        .await;

        let service = service_for(&server);
        let id = service.create_feed(&["known"], "en").await.unwrap();

        assert_eq!(service.check_cache_status(&["known"], "en").await.unwrap(), vec!["known"]);
        let report = service.warm_feed(&id).await.unwrap();
        assert_eq!(report.warmed, vec!["known".to_string()]);
        assert!(service.check_cache_status(&["known"], "en").await.unwrap().is_empty());

        let report = service.warm_feed(&id).await.unwrap();
        assert!(report.warmed.is_empty());
        assert_eq!(report.already_fresh, vec!["known".to_string()]);
    }

    #[tokio::test]
    async fn test_recent_chapters_validates_language() {
        let server = MockServer::start().await;
        let service = service_for(&server);
        let err = service
            .recent_chapters("xx", ContentType::Sfw, 1)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_not_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let service = service_with_store(&server, Arc::new(UnreachableStore));

        assert!(matches!(
            service.resolve_feed("0123456789abcdef").await,
            Err(FeedError::Storage(StorageError::Unavailable(_)))
        ));
        assert!(matches!(
            service.create_feed(&["alpha"], "en").await,
            Err(FeedError::Storage(StorageError::Unavailable(_)))
        ));
        assert!(matches!(
            service.feed_chapters("0123456789abcdef").await,
            Err(FeedError::Storage(StorageError::Unavailable(_)))
        ));

        // A failed cache read stops the merge before any upstream call
        assert!(matches!(
            service.aggregated_chapters(&["alpha"], "en").await,
            Err(FeedError::Storage(StorageError::Unavailable(_)))
        ));
        assert!(matches!(
            service.warm(&["alpha"], "en").await,
            Err(FeedError::Storage(StorageError::Unavailable(_)))
        ));
        assert!(!service.resolve_feed("0123456789abcdef").await.unwrap_err().is_client_error());
    }

    #[tokio::test]
    async fn test_slug_separators_do_not_merge_feeds() {
        let server = MockServer::start().await;
        let service = service_for(&server);

        let joined = service.create_feed(&["a,b"], "en").await.unwrap();
        let split = service.create_feed(&["a", "b"], "en").await.unwrap();
        assert_ne!(joined, split);
        assert_eq!(service.resolve_feed(&joined).await.unwrap().slugs, vec!["a,b".to_string()]);
        assert_eq!(
            service.resolve_feed(&split).await.unwrap().slugs,
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
