//! Build cache.
//!
//! Maps a build fingerprint to a previously produced artifact and decides
//! whether a rebuild is required. Only `Success` records are ever reused;
//! `Failed` records are retained for diagnostics and overwritten on retry.
//!
//! The manifest persists as JSON in the cache directory. Loading is
//! fail-safe: a corrupt or version-mismatched manifest means starting
//! fresh, never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use crate::types::{PackageName, Version};

/// Manifest format version. Bump when the on-disk shape changes; older
/// manifests are discarded on load.
const MANIFEST_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode cache manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Terminal status of a recorded build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed { error: String },
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One completed build, keyed by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub fingerprint: Fingerprint,
    pub package: PackageName,
    pub version: Version,
    #[serde(flatten)]
    pub status: BuildStatus,
    /// Staged artifact directory. Meaningful only for `Success` records.
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    records: BTreeMap<String, ArtifactRecord>,
}

impl Manifest {
    fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// Fingerprint-keyed store of completed builds.
#[derive(Debug)]
pub struct BuildCache {
    cache_dir: PathBuf,
    manifest: Manifest,
}

impl BuildCache {
    /// Load the cache from `cache_dir`, or start fresh.
    ///
    /// Any problem with the existing manifest (unreadable, unparsable,
    /// wrong version) results in an empty cache rather than an error.
    pub fn load_or_create(cache_dir: &Path) -> Self {
        let manifest_path = cache_dir.join(MANIFEST_FILE);
        let manifest = std::fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|content| serde_json::from_str::<Manifest>(&content).ok())
            .filter(|m| m.version == MANIFEST_VERSION)
            .unwrap_or_else(|| {
                if manifest_path.exists() {
                    warn!(path = %manifest_path.display(), "discarding unreadable cache manifest");
                }
                Manifest::new()
            });

        Self {
            cache_dir: cache_dir.to_path_buf(),
            manifest,
        }
    }

    /// Look up a reusable artifact for `fingerprint`.
    ///
    /// Returns a hit only for `Success` records whose artifact directory
    /// still exists on disk; a record whose output was deleted out from
    /// under us is a miss, forcing a rebuild. `Failed` records never hit.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&ArtifactRecord> {
        let record = self.manifest.records.get(fingerprint.as_str())?;
        if !record.status.is_success() {
            debug!(package = %record.package, "cache holds failed record, rebuilding");
            return None;
        }
        if !record.path.is_dir() {
            debug!(
                package = %record.package,
                path = %record.path.display(),
                "cached artifact missing on disk, rebuilding"
            );
            return None;
        }
        Some(record)
    }

    /// The prior record for `fingerprint`, including failed ones.
    ///
    /// For diagnostics only; use [`Self::lookup`] for rebuild decisions.
    pub fn last_outcome(&self, fingerprint: &Fingerprint) -> Option<&ArtifactRecord> {
        self.manifest.records.get(fingerprint.as_str())
    }

    /// Record a completed job, overwriting any stale prior record for the
    /// same fingerprint, and persist the manifest.
    pub fn record(&mut self, record: ArtifactRecord) -> Result<(), CacheError> {
        self.manifest
            .records
            .insert(record.fingerprint.as_str().to_string(), record);
        self.save()
    }

    /// Number of records, including failed ones.
    pub fn len(&self) -> usize {
        self.manifest.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.records.is_empty()
    }

    /// All records in fingerprint order.
    pub fn records(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.manifest.records.values()
    }

    /// Drop every record and persist the empty manifest. Artifact
    /// directories in the store are left in place.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.manifest.records.clear();
        self.save()
    }

    /// Write the manifest atomically: serialize to a sibling temp file,
    /// then rename over the old manifest.
    fn save(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|source| CacheError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;

        let content = serde_json::to_string_pretty(&self.manifest)?;
        let tmp = self.cache_dir.join(format!("{MANIFEST_FILE}.tmp"));
        let manifest_path = self.cache_dir.join(MANIFEST_FILE);

        std::fs::write(&tmp, content).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &manifest_path).map_err(|source| CacheError::Io {
            path: manifest_path,
            source,
        })?;
        Ok(())
    }
}
