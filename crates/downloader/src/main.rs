//! permacache downloader entry point.
//!
//! Caches the article URLs passed as arguments for offline use, printing a
//! per-article summary. Logging goes to stderr so stdout stays scriptable.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use permacache_client::{
    ArticleDownloader, FetchClient, FetchConfig, PermanentCachePolicy, ReadThroughCache, canonicalize,
};
use permacache_core::{AppConfig, CacheEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: permacache <article-url>...");
    }

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(cache_root = %config.cache_root.display(), "opening cache");

    let engine = Arc::new(CacheEngine::open(&config).await?);
    let fetcher = Arc::new(FetchClient::new(FetchConfig {
        user_agent: config.user_agent.clone(),
        max_bytes: config.max_bytes,
        timeout: Duration::from_millis(config.timeout_ms),
        ..FetchConfig::default()
    })?);
    let downloader = ArticleDownloader::new(fetcher, engine.clone());
    let reader = ReadThroughCache::new(engine.clone(), config.transient_capacity);

    for arg in &args {
        let article_url = canonicalize(arg).with_context(|| format!("invalid article URL: {arg}"))?;
        let summary = downloader.download_article(&article_url).await;
        let cached = engine.is_cached(&article_url).await?;

        // Confirm the page actually comes back out of the permanent store.
        let page_url = canonicalize(&format!(
            "{}://{}/api/rest_v1/page/mobile-html/{}",
            article_url.scheme(),
            article_url.host_str().unwrap_or_default(),
            article_url.path_segments().and_then(|mut s| s.next_back()).unwrap_or_default()
        ))?;
        let readable = reader
            .lookup(&page_url, PermanentCachePolicy::UsePermanent)
            .await
            .is_some();

        println!(
            "{article_url}: saved {} failed {} cancelled {} cached={cached} readable={readable}",
            summary.saved, summary.failed, summary.cancelled
        );
    }

    let swept = engine.sweep_orphans().await?;
    if swept > 0 {
        tracing::info!(swept, "cleaned up leftover orphans");
    }

    Ok(())
}
