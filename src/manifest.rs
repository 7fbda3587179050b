//! Resource manifest types: the versioned asset list for one build.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The versioned asset set for one deployed build.
///
/// Maps each cacheable request path to a content-hash token, and carries the
/// core shell list: the ordered subset of paths required for minimal offline
/// bootstrap. The manifest is immutable per build; the (out-of-scope) build
/// step regenerates it wholesale on every deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetManifest {
    resources: BTreeMap<String, String>,
    core: Vec<String>,
}

impl AssetManifest {
    /// Creates a manifest from a resource map and core shell list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if any core shell path is missing from
    /// the resource map.
    pub fn new(resources: BTreeMap<String, String>, core: Vec<String>) -> Result<Self> {
        let manifest = Self { resources, core };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parses a manifest from its JSON document form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the core shell list
    /// references unknown paths.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads a manifest from a JSON file emitted by the build step.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<()> {
        for path in &self.core {
            if !self.resources.contains_key(path) {
                return Err(Error::Manifest(format!(
                    "core shell path {path:?} is not in the resource map"
                )));
            }
        }
        Ok(())
    }

    /// Returns the content hash for a path, if the path is cacheable.
    #[must_use]
    pub fn hash(&self, key: &str) -> Option<&str> {
        self.resources.get(key).map(String::as_str)
    }

    /// Returns true if the path is part of this build's asset set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    /// Iterates over all cacheable paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// The core shell list: paths fetched eagerly during install.
    #[must_use]
    pub fn core(&self) -> &[String] {
        &self.core
    }

    /// Number of cacheable paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the manifest lists no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Builds the persistence record for this manifest.
    #[must_use]
    pub fn to_record(&self) -> ManifestRecord {
        ManifestRecord {
            resources: self.resources.clone(),
            installed_at: Utc::now(),
        }
    }
}

/// The previously installed manifest, persisted across deploys.
///
/// Stored as the single record of the manifest partition and read back on
/// the next activation to decide which cached entries survive the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Path → content hash mapping of the installed build.
    pub resources: BTreeMap<String, String>,
    /// When the build was installed.
    pub installed_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Returns the recorded content hash for a path.
    #[must_use]
    pub fn hash(&self, key: &str) -> Option<&str> {
        self.resources.get(key).map(String::as_str)
    }
}
