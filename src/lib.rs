//! shellcache - offline-first asset caching for a web application shell.
//!
//! This library keeps a local cache synchronized with a declared manifest of
//! versioned assets and serves requests from cache with network
//! fallback/refresh, abstracted from any specific storage or transport.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellcache::{
//!     AssetManifest, CacheController, DiskStore, HttpFetcher, WorkerConfig,
//! };
//!
//! # async fn example() -> shellcache::Result<()> {
//! // Load the manifest emitted by the build step
//! let manifest = AssetManifest::load("build/web/asset_manifest.json".as_ref())?;
//!
//! // Wire up storage and the asset source
//! let store = Arc::new(DiskStore::new("/var/cache/shellcache"));
//! let fetcher = Arc::new(HttpFetcher::new("https://app.example.com"));
//!
//! let controller = CacheController::new(
//!     manifest,
//!     "https://app.example.com",
//!     WorkerConfig::default(),
//!     store,
//!     fetcher,
//! );
//!
//! // Drive the lifecycle, then offer requests to the controller
//! controller.install().await?;
//! controller.activate().await?;
//! let response = controller
//!     .handle_fetch(&reqwest::Method::GET, "https://app.example.com/app.js")
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod manifest;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;
pub mod store;
pub mod url;

// Re-export main types for convenience
pub use config::{AppConfig, PathConfig, ServerConfig, WorkerConfig};
pub use controller::{
    CONTENT_PARTITION, CacheController, MANIFEST_PARTITION, MSG_DOWNLOAD_OFFLINE,
    MSG_SKIP_WAITING, Phase, STAGING_PARTITION,
};
pub use error::{Error, Result};
pub use fetch::{AssetFetcher, DiskFetcher, HttpFetcher};
pub use manifest::{AssetManifest, ManifestRecord};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{CacheStore, CachedResponse, DiskStore, MemoryStore};
