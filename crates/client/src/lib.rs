//! Client code for permacache.
//!
//! This crate provides the HTTP fetch collaborator, the transient response
//! cache with its read-through adapter over the permanent store, and the
//! article downloader that drives concurrent resource saves.

pub mod downloader;
pub mod fetch;
pub mod readthrough;
pub mod transient;

pub use downloader::{ArticleDownloader, DownloadSummary};
pub use fetch::{Download, FetchClient, FetchConfig, ResourceFetcher, canonicalize};
pub use readthrough::{PermanentCachePolicy, ReadThroughCache};
pub use transient::TransientCache;
