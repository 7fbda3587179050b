//! Configuration types for the cache controller and its host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for the cache controller itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent fetches while staging the core shell.
    pub install_concurrency: usize,
    /// Number of concurrent fetches during full offline prefetch.
    pub prefetch_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            install_concurrency: 4,
            prefetch_concurrency: 4,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the install-time fetch concurrency.
    #[must_use]
    pub const fn with_install_concurrency(mut self, concurrency: usize) -> Self {
        self.install_concurrency = concurrency;
        self
    }

    /// Sets the prefetch concurrency.
    #[must_use]
    pub const fn with_prefetch_concurrency(mut self, concurrency: usize) -> Self {
        self.prefetch_concurrency = concurrency;
        self
    }
}

/// Path configuration for the cache root and build output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Directory holding the cache partitions.
    pub cache_dir: PathBuf,
    /// Path to the asset manifest JSON emitted by the build.
    pub manifest_path: PathBuf,
    /// Directory containing the built web output.
    pub public_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: cache_root.join("shellcache"),
            manifest_path: PathBuf::from("build/web/asset_manifest.json"),
            public_dir: PathBuf::from("build/web"),
        }
    }
}

/// Hosting HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5173,
        }
    }
}

impl ServerConfig {
    /// The origin this server answers for.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Complete application configuration combining worker, path, and server
/// settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache controller configuration.
    pub worker: WorkerConfig,
    /// Path configuration.
    pub paths: PathConfig,
    /// Hosting server configuration.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file, or defaults when the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.install_concurrency, 4);
        assert_eq!(config.prefetch_concurrency, 4);
    }

    #[test]
    fn worker_config_builder_pattern() {
        let config = WorkerConfig::new()
            .with_install_concurrency(8)
            .with_prefetch_concurrency(2);
        assert_eq!(config.install_concurrency, 8);
        assert_eq!(config.prefetch_concurrency, 2);
    }

    #[test]
    fn default_server_config_matches_dev_server() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5173);
        assert_eq!(config.origin(), "http://127.0.0.1:5173");
    }

    #[test]
    fn default_path_config() {
        let config = PathConfig::default();
        assert!(config.cache_dir.to_string_lossy().contains("shellcache"));
        assert_eq!(config.public_dir, PathBuf::from("build/web"));
    }

    #[test]
    fn app_config_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let loaded: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.worker.install_concurrency, config.worker.install_concurrency);
        assert_eq!(loaded.paths.public_dir, config.paths.public_dir);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/shellcache.toml")).unwrap();
        assert_eq!(config.server.port, 5173);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 8080\nhost = \"0.0.0.0\"\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.prefetch_concurrency, 4);
    }
}
