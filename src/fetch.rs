//! Asset retrieval behind the cache: HTTP origin and built-output sources.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};

use crate::error::Result;
use crate::store::CachedResponse;

/// Resolves logical cache keys to fresh responses.
///
/// Keys are the manifest's origin-relative paths (`/` for the entry
/// document). The fetcher owns the base it resolves against, so callers
/// never reach for ambient origin state.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetches the asset for a logical key.
    async fn fetch(&self, key: &str) -> Result<CachedResponse>;

    /// Fetches the asset while bypassing intermediary HTTP caches.
    ///
    /// Used during install so the core shell is always freshly retrieved.
    /// Sources without intermediary caches fall back to a plain fetch.
    async fn fetch_fresh(&self, key: &str) -> Result<CachedResponse> {
        self.fetch(key).await
    }
}

/// Fetches assets from an HTTP origin with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: String,
}

impl HttpFetcher {
    /// Creates a fetcher resolving keys against `base` (an origin such as
    /// `https://app.example.com`).
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    /// Creates a fetcher with a caller-supplied client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { client, base }
    }

    /// The origin this fetcher resolves against.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn url_for(&self, key: &str) -> String {
        if key == "/" {
            format!("{}/", self.base)
        } else {
            format!("{}/{key}", self.base)
        }
    }

    async fn into_cached(response: reqwest::Response) -> Result<CachedResponse> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(CachedResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, key: &str) -> Result<CachedResponse> {
        let response = self.client.get(self.url_for(key)).send().await?;
        Self::into_cached(response).await
    }

    async fn fetch_fresh(&self, key: &str) -> Result<CachedResponse> {
        let response = self
            .client
            .get(self.url_for(key))
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;
        Self::into_cached(response).await
    }
}

/// Serves assets straight from a built-output directory.
///
/// The authoritative source when this process hosts the build itself: `/`
/// maps to `index.html`, every other key maps to the file of the same
/// relative path.
#[derive(Debug, Clone)]
pub struct DiskFetcher {
    root: PathBuf,
}

impl DiskFetcher {
    /// Creates a fetcher rooted at the built-output directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> std::io::Result<PathBuf> {
        let relative = if key == "/" { "index.html" } else { key };
        let relative = Path::new(relative);
        // Keys come from request paths; never let them climb out of root.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("refusing non-normal path {key:?}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetFetcher for DiskFetcher {
    async fn fetch(&self, key: &str) -> Result<CachedResponse> {
        let path = self.resolve(key)?;
        let body = tokio::fs::read(&path).await?;
        let mut response = CachedResponse::ok(body);
        if let Some(content_type) = content_type_for(&path) {
            response = response.with_content_type(content_type);
        }
        Ok(response)
    }
}

/// Content type by file extension, covering the asset kinds a web build
/// output actually contains.
fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    let content_type = match ext {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "txt" => "text/plain; charset=utf-8",
        _ => return None,
    };
    Some(content_type)
}
