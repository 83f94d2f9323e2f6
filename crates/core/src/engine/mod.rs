//! The cache engine: save/remove pipelines over the blob and metadata
//! stores, change notifications, and permanent-response lookup.
//!
//! All metadata writes funnel through the MetaDb connection thread, so no
//! two link/unlink operations ever interleave. Blob writes for different
//! keys run concurrently; same-key writes are idempotent under "already
//! exists", which makes concurrent saves of shared assets converge instead
//! of conflict.

use std::path::Path;

use tokio::sync::broadcast;
use url::Url;

use crate::AppConfig;
use crate::blob::{BlobStore, PutOutcome};
use crate::error::Error;
use crate::key::{self, ResourceKind};
use crate::meta::MetaDb;
use crate::tasks::TaskTracker;

/// Capacity of the change-notification channel. Slow observers that lag
/// behind this many events see a `Lagged` gap and should reload wholesale.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notification: one group's cached state flipped.
///
/// Consumers treat this as "reload".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub group_key: String,
    pub cached: bool,
}

/// A permanently persisted response, reconstructed for the HTTP cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub url: Url,
    pub mime: Option<String>,
    pub body: Vec<u8>,
}

/// Outcome of a `remove` call.
///
/// The metadata unlink always committed by the time this is returned; blob
/// cleanup is best-effort and reported separately so the two phases are
/// never conflated.
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Orphan keys whose blob and row were deleted.
    pub deleted: Vec<String>,
    /// Orphan keys whose blob deletion failed; their rows are retained for
    /// a later sweep.
    pub retained: Vec<String>,
}

/// Orchestrates key derivation, blob storage, metadata, task cancellation,
/// and change notifications.
///
/// Constructed once and passed by reference to its consumers; there is no
/// process-wide instance.
#[derive(Debug)]
pub struct CacheEngine {
    blobs: BlobStore,
    meta: MetaDb,
    tasks: TaskTracker,
    events: broadcast::Sender<CacheEvent>,
}

impl CacheEngine {
    /// Open the engine over the stores described by `config`.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let meta = MetaDb::open(config.db_path()).await?;
        Ok(Self::with_stores(BlobStore::new(config.cache_root.join("blobs")), meta))
    }

    /// Assemble an engine from already-opened stores.
    pub fn with_stores(blobs: BlobStore, meta: MetaDb) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { blobs, meta, tasks: TaskTracker::new(), events }
    }

    /// Subscribe to cache-updated notifications.
    ///
    /// Events are delivered through the channel, never synchronously on the
    /// writer, so observers cannot re-enter the engine mid-write.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// The tracker the fetch collaborator registers in-flight downloads
    /// with, keyed by the owning article's group key.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Blob store accessor, for the read-through adapter.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Metadata accessor, for observation and tests.
    pub fn meta(&self) -> &MetaDb {
        &self.meta
    }

    /// Whether a group exists for the article's URL.
    ///
    /// Read-only; queues behind at most one in-flight metadata call, never
    /// behind a whole pipeline.
    pub async fn is_cached(&self, article_url: &Url) -> Result<bool, Error> {
        self.meta.group_exists(&key::group_key(article_url)).await
    }

    /// The write pipeline: persist one downloaded resource and link it to
    /// its article's group.
    ///
    /// The blob move happens first; a blob write failure aborts before any
    /// metadata is touched, so a metadata row can never reference a missing
    /// file. An already-present blob is not an error, the membership link
    /// is still recorded. Safe to call concurrently for any mix of
    /// resources and articles; all saves for one article converge on a
    /// single group.
    pub async fn save(
        &self,
        resource_url: &Url,
        kind: Option<ResourceKind>,
        article_url: &Url,
        staged: &Path,
        mime: Option<&str>,
    ) -> Result<PutOutcome, Error> {
        let item_key = key::item_key(resource_url, kind);
        let group_key = key::group_key(article_url);

        let outcome = self.blobs.put(staged, &item_key, mime).await?;
        self.meta.link_item_to_group(&item_key, &group_key).await?;

        tracing::info!(item_key, group_key, ?outcome, "resource saved");
        let _ = self.events.send(CacheEvent { group_key, cached: true });

        Ok(outcome)
    }

    /// The delete pipeline: drop an article's group and everything only it
    /// referenced.
    ///
    /// In-flight fetches for the article are cancelled before any storage
    /// is touched, so a completing download cannot resurrect the group
    /// mid-deletion. A save callback that already passed cancellation can
    /// still race into the metadata writer and recreate the group; that
    /// eventual-consistency window is accepted, not papered over.
    ///
    /// Blob cleanup is best-effort: a missing file counts as deleted, any
    /// other failure retains the item row for [`sweep_orphans`] to retry.
    ///
    /// [`sweep_orphans`]: CacheEngine::sweep_orphans
    pub async fn remove(&self, article_url: &Url) -> Result<RemoveOutcome, Error> {
        let group_key = key::group_key(article_url);

        self.tasks.cancel_all(&group_key);

        let orphans = self.meta.unlink_and_collect_orphans(&group_key).await?;

        let mut outcome = RemoveOutcome::default();
        for item_key in orphans {
            match self.blobs.delete(&item_key).await {
                Ok(()) => {
                    self.meta.delete_item(&item_key).await?;
                    outcome.deleted.push(item_key);
                }
                Err(e) => {
                    tracing::warn!(item_key, error = %e, "orphan blob deletion failed, retaining row");
                    outcome.retained.push(item_key);
                }
            }
        }

        tracing::info!(
            group_key,
            deleted = outcome.deleted.len(),
            retained = outcome.retained.len(),
            "article removed from cache"
        );
        let _ = self.events.send(CacheEvent { group_key, cached: false });

        Ok(outcome)
    }

    /// Resolve a request URL to a permanently persisted response.
    ///
    /// Tries the resource-specific key first; for width-specific image
    /// URLs, falls back to the variant-less key so a differently-sized
    /// request for an already-cached image still hits.
    pub async fn cached_response(&self, url: &Url) -> Option<CachedResponse> {
        let item_key = key::item_key(url, None);
        if let Some(body) = self.blobs.read(&item_key).await {
            let mime = self.blobs.mime(&item_key).await;
            return Some(CachedResponse { url: url.clone(), mime, body });
        }

        let fallback = key::variantless_item_key(url)?;
        let body = self.blobs.read(&fallback).await?;
        let mime = self.blobs.mime(&fallback).await;
        Some(CachedResponse { url: url.clone(), mime, body })
    }

    /// Retry pass for orphans whose blob deletion previously failed.
    ///
    /// Returns the number of orphans fully cleaned up. Leftovers degrade to
    /// extra disk usage, never to premature deletion of referenced blobs.
    pub async fn sweep_orphans(&self) -> Result<usize, Error> {
        let mut cleaned = 0;
        for item_key in self.meta.orphaned_item_keys().await? {
            match self.blobs.delete(&item_key).await {
                Ok(()) => {
                    self.meta.delete_item(&item_key).await?;
                    cleaned += 1;
                }
                Err(e) => {
                    tracing::warn!(item_key, error = %e, "orphan sweep failed for item");
                }
            }
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn engine_in(dir: &TempDir) -> CacheEngine {
        let meta = MetaDb::open_in_memory().await.unwrap();
        CacheEngine::with_stores(BlobStore::new(dir.path().join("blobs")), meta)
    }

    async fn stage(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn dog() -> Url {
        url("https://en.wikipedia.org/api/rest_v1/page/mobile-html/Dog")
    }

    fn cat() -> Url {
        url("https://en.wikipedia.org/api/rest_v1/page/mobile-html/Cat")
    }

    #[tokio::test]
    async fn test_dog_article_converges_on_one_group() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let article = dog();

        let resources: [(&str, Option<ResourceKind>, &str); 4] = [
            ("https://en.wikipedia.org/api/rest_v1/page/mobile-html/Dog", None, "html"),
            ("https://meta.wikimedia.org/api/rest_v1/data/javascript/mobile/pagelib", None, "js"),
            ("https://upload.wikimedia.org/wikipedia/commons/a/a0/DogPhoto", None, "img"),
            (
                "https://upload.wikimedia.org/wikipedia/commons/thumb/a/a0/320px-DogPhoto",
                None,
                "img320",
            ),
        ];

        for (resource, kind, name) in resources {
            let staged = stage(&dir, name, name.as_bytes()).await;
            engine
                .save(&url(resource), kind, &article, &staged, None)
                .await
                .unwrap();
        }

        assert!(engine.is_cached(&article).await.unwrap());
        let items = engine.meta().item_keys_in_group("en.wikipedia.org__Dog").await.unwrap();
        assert_eq!(
            items,
            vec![
                "en.wikipedia.org__mobile-html__Dog",
                "pagelib__js",
                "upload.wikimedia.org__DogPhoto",
                "upload.wikimedia.org__DogPhoto__320",
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_asset_survives_one_owner_removal() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let js = url("https://meta.wikimedia.org/api/rest_v1/data/javascript/mobile/pagelib");

        let staged = stage(&dir, "js1", b"pagelib();").await;
        engine.save(&js, None, &dog(), &staged, Some("text/javascript")).await.unwrap();

        let staged = stage(&dir, "js2", b"pagelib();").await;
        let outcome = engine.save(&js, None, &cat(), &staged, Some("text/javascript")).await.unwrap();
        assert_eq!(outcome, PutOutcome::AlreadyExists);

        // Removing Dog leaves the shared blob and row in place.
        let removed = engine.remove(&dog()).await.unwrap();
        assert!(removed.deleted.is_empty());
        assert!(engine.blobs().exists("pagelib__js").await);
        assert!(engine.meta().find_item("pagelib__js").await.unwrap().is_some());
        assert!(!engine.is_cached(&dog()).await.unwrap());
        assert!(engine.is_cached(&cat()).await.unwrap());

        // Removing the last owner deletes blob and row.
        let removed = engine.remove(&cat()).await.unwrap();
        assert_eq!(removed.deleted, vec!["pagelib__js"]);
        assert!(!engine.blobs().exists("pagelib__js").await);
        assert!(engine.meta().find_item("pagelib__js").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_save_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let article = dog();

        let staged = stage(&dir, "html1", b"<html>Dog</html>").await;
        assert_eq!(
            engine.save(&article, None, &article, &staged, Some("text/html")).await.unwrap(),
            PutOutcome::Created
        );

        let staged = stage(&dir, "html2", b"<html>Dog v2</html>").await;
        assert_eq!(
            engine.save(&article, None, &article, &staged, Some("text/html")).await.unwrap(),
            PutOutcome::AlreadyExists
        );

        // No duplicate rows, original bytes kept.
        let items = engine.meta().item_keys_in_group("en.wikipedia.org__Dog").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            engine.blobs().read("en.wikipedia.org__mobile-html__Dog").await.unwrap(),
            b"<html>Dog</html>"
        );
    }

    #[tokio::test]
    async fn test_blob_failure_leaves_metadata_untouched() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let article = dog();

        let err = engine
            .save(&article, None, &article, &dir.path().join("missing"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StagedFileMissing(_)));
        assert!(!engine.is_cached(&article).await.unwrap());
        assert!(
            engine
                .meta()
                .find_item("en.wikipedia.org__mobile-html__Dog")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_save_round_trips_bytes_and_mime() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let article = dog();

        let body = b"<html><body>Dog</body></html>";
        let staged = stage(&dir, "html", body).await;
        engine.save(&article, None, &article, &staged, Some("text/html")).await.unwrap();

        let response = engine.cached_response(&article).await.unwrap();
        assert_eq!(response.body, body);
        assert_eq!(response.mime.as_deref(), Some("text/html"));
        assert_eq!(response.url, article);
    }

    #[tokio::test]
    async fn test_cached_response_image_width_fallback() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let original = url("https://upload.wikimedia.org/wikipedia/commons/a/a0/DogPhoto");
        let staged = stage(&dir, "img", b"jpeg-bytes").await;
        engine.save(&original, None, &dog(), &staged, Some("image/jpeg")).await.unwrap();

        // A width-specific request hits the variant-less blob.
        let sized = url("https://upload.wikimedia.org/wikipedia/commons/thumb/a/a0/640px-DogPhoto");
        let response = engine.cached_response(&sized).await.unwrap();
        assert_eq!(response.body, b"jpeg-bytes");
        assert_eq!(response.mime.as_deref(), Some("image/jpeg"));

        // An unrelated image is a true miss.
        let other = url("https://upload.wikimedia.org/wikipedia/commons/a/a0/CatPhoto");
        assert!(engine.cached_response(&other).await.is_none());
    }

    #[tokio::test]
    async fn test_events_fire_on_save_and_remove() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let mut events = engine.subscribe();
        let article = dog();

        let staged = stage(&dir, "html", b"<html/>").await;
        engine.save(&article, None, &article, &staged, None).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent { group_key: "en.wikipedia.org__Dog".into(), cached: true }
        );

        engine.remove(&article).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent { group_key: "en.wikipedia.org__Dog".into(), cached: false }
        );
    }

    #[tokio::test]
    async fn test_remove_cancels_in_flight_fetches_first() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        let article = dog();

        let mut joins = Vec::new();
        for task_key in ["mobile-html", "pagelib-js", "image-320"] {
            let handle = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
            engine.tasks().track("en.wikipedia.org__Dog", task_key, handle.abort_handle());
            joins.push(handle);
        }

        engine.remove(&article).await.unwrap();

        for join in joins {
            assert!(join.await.unwrap_err().is_cancelled());
        }
        assert_eq!(engine.tasks().task_count("en.wikipedia.org__Dog"), 0);
        assert!(!engine.is_cached(&article).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_one_article_all_link() {
        let dir = TempDir::new().unwrap();
        let engine = std::sync::Arc::new(engine_in(&dir).await);
        let article = dog();

        let resources = [
            "https://en.wikipedia.org/api/rest_v1/page/mobile-html/Dog",
            "https://en.wikipedia.org/api/rest_v1/page/references/Dog",
            "https://meta.wikimedia.org/api/rest_v1/data/css/mobile/base",
            "https://en.wikipedia.org/api/rest_v1/data/css/mobile/site",
            "https://meta.wikimedia.org/api/rest_v1/data/javascript/mobile/pagelib",
        ];

        let mut handles = Vec::new();
        for (i, resource) in resources.into_iter().enumerate() {
            let engine = engine.clone();
            let article = article.clone();
            let staged = stage(&dir, &format!("res{i}"), resource.as_bytes()).await;
            handles.push(tokio::spawn(async move {
                engine.save(&url(resource), None, &article, &staged, None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let items = engine.meta().item_keys_in_group("en.wikipedia.org__Dog").await.unwrap();
        assert_eq!(items.len(), 5);
        assert!(engine.is_cached(&article).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_cleans_retained_orphans() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        // Manufacture the post-failure state: an item row with no owning
        // group but a blob still on disk.
        let staged = stage(&dir, "css", b"body {}").await;
        engine.blobs().put(&staged, "base__css", None).await.unwrap();
        engine.meta().link_item_to_group("base__css", "en.wikipedia.org__Dog").await.unwrap();
        engine.meta().unlink_and_collect_orphans("en.wikipedia.org__Dog").await.unwrap();

        assert_eq!(engine.sweep_orphans().await.unwrap(), 1);
        assert!(!engine.blobs().exists("base__css").await);
        assert!(engine.meta().find_item("base__css").await.unwrap().is_none());
        assert_eq!(engine.sweep_orphans().await.unwrap(), 0);
    }
}
