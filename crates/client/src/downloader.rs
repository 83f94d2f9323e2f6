//! Concurrent download of an article's offline resource set.
//!
//! One task per resource, no global lock on downloads. Each task's abort
//! handle is registered in the engine's task tracker under the article's
//! group key before the download proceeds, so `remove` can cancel the
//! whole article at once. Per-resource failures are tolerated; siblings
//! keep going and the article stays partially cached.

use std::sync::Arc;

use url::Url;

use permacache_core::{CacheEngine, Error, ResourceKind, group_key, item_key};

use crate::fetch::ResourceFetcher;

/// Hosts serving the assets shared by every article.
const SHARED_ASSET_HOST: &str = "meta.wikimedia.org";

/// Result counts for one article download.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Resources fetched and linked into the article's group.
    pub saved: usize,
    /// Resources that failed to fetch or save.
    pub failed: usize,
    /// Resources cancelled mid-flight, typically by `remove`.
    pub cancelled: usize,
}

/// Drives the save pipeline for every resource an article needs offline.
pub struct ArticleDownloader {
    fetcher: Arc<dyn ResourceFetcher>,
    engine: Arc<CacheEngine>,
}

impl ArticleDownloader {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, engine: Arc<CacheEngine>) -> Self {
        Self { fetcher, engine }
    }

    /// The fixed resource set an article needs to render offline: its
    /// mobile-html page, the shared base/pagelib CSS and pagelib JS, and
    /// the host's site CSS. Image URLs are discovered from page content by
    /// the rendering layer and saved through the same pipeline.
    pub fn offline_resources(article_url: &Url) -> Vec<(Url, Option<ResourceKind>)> {
        let Some(host) = article_url.host_str() else {
            return vec![(article_url.clone(), None)];
        };
        let Some(title) = article_url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|t| !t.is_empty())
        else {
            return vec![(article_url.clone(), None)];
        };

        let candidates = [
            (
                format!("https://{host}/api/rest_v1/page/mobile-html/{title}"),
                Some(ResourceKind::PageHtml),
            ),
            (format!("https://{host}/api/rest_v1/data/css/mobile/site"), Some(ResourceKind::Css)),
            (
                format!("https://{SHARED_ASSET_HOST}/api/rest_v1/data/css/mobile/base"),
                Some(ResourceKind::Css),
            ),
            (
                format!("https://{SHARED_ASSET_HOST}/api/rest_v1/data/css/mobile/pagelib"),
                Some(ResourceKind::Css),
            ),
            (
                format!("https://{SHARED_ASSET_HOST}/api/rest_v1/data/javascript/mobile/pagelib"),
                Some(ResourceKind::Js),
            ),
        ];

        candidates
            .into_iter()
            .filter_map(|(url, kind)| Url::parse(&url).ok().map(|u| (u, kind)))
            .collect()
    }

    /// Download and cache everything in [`offline_resources`] for one
    /// article, concurrently.
    ///
    /// Never fails as a whole: the summary reports per-resource outcomes.
    ///
    /// [`offline_resources`]: ArticleDownloader::offline_resources
    pub async fn download_article(&self, article_url: &Url) -> DownloadSummary {
        let group_key = group_key(article_url);
        let mut joins = Vec::new();

        for (resource_url, kind) in Self::offline_resources(article_url) {
            let fetcher = self.fetcher.clone();
            let engine = self.engine.clone();
            let article_url = article_url.clone();
            let task_key = item_key(&resource_url, kind);

            let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
            let handle = tokio::spawn(async move {
                // Hold until the abort handle is in the tracker, so a
                // concurrent `remove` can never miss this task.
                if registered_rx.await.is_err() {
                    return Ok(());
                }
                let download = fetcher.download(&resource_url).await?;
                engine
                    .save(
                        &resource_url,
                        kind,
                        &article_url,
                        download.staged_path(),
                        download.content_type.as_deref(),
                    )
                    .await?;
                Ok::<(), Error>(())
            });

            self.engine.tasks().track(&group_key, &task_key, handle.abort_handle());
            let _ = registered_tx.send(());
            joins.push((task_key, handle));
        }

        let mut summary = DownloadSummary::default();
        for (task_key, handle) in joins {
            match handle.await {
                Ok(Ok(())) => summary.saved += 1,
                Ok(Err(e)) => {
                    tracing::warn!(group_key, task_key, error = %e, "resource save failed");
                    summary.failed += 1;
                }
                Err(e) if e.is_cancelled() => summary.cancelled += 1,
                Err(e) => {
                    tracing::warn!(group_key, task_key, error = %e, "resource task panicked");
                    summary.failed += 1;
                }
            }
            self.engine.tasks().untrack(&group_key, &task_key);
        }

        tracing::info!(group_key, ?summary, "article download settled");
        summary
    }
}
