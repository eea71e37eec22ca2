//! Package descriptor store.
//!
//! Loads recipe files into an immutable in-memory catalog. The catalog is
//! constructed once, then passed by reference into the resolver and
//! orchestrator; nothing mutates it during a run.

mod loader;

pub use loader::load_dir;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Blake3Hash, PackageName, Version, is_newer};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid recipe {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Duplicate recipe for {name}@{version}")]
    Duplicate { name: PackageName, version: Version },
}

/// An acceptable-version predicate attached to a dependency reference.
///
/// Used only during resolution; once a version is selected the constraint
/// is not retained.
#[derive(Debug, Clone)]
pub enum VersionConstraint {
    /// Any version is acceptable; the newest is selected.
    Any,
    /// Exactly this version string.
    Exact(Version),
    /// A semver requirement (`^1.2`, `~1.2`, `>=1.0, <2.0`).
    Req(semver::VersionReq),
}

impl VersionConstraint {
    /// Parse a constraint from the version part of a spec string.
    ///
    /// `latest` and `*` mean any version. Operator-bearing strings are
    /// parsed as semver requirements; everything else pins an exact
    /// version string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "latest" || raw == "*" {
            return Self::Any;
        }

        let has_operator = raw.contains([',', '^', '~', '>', '<', '=', '*']);
        if has_operator {
            if let Ok(req) = semver::VersionReq::parse(raw) {
                return Self::Req(req);
            }
        }

        Self::Exact(Version::new(raw))
    }

    /// Check whether `version` satisfies this constraint.
    ///
    /// Semver requirements only match versions that parse as (possibly
    /// zero-padded) semantic versions; a `^1.2` constraint can never match
    /// a `nightly` version.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => v == version,
            Self::Req(req) => lenient_semver(version).is_some_and(|v| req.matches(&v)),
        }
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Req(req) => write!(f, "{req}"),
        }
    }
}

/// Parse a version leniently, zero-padding missing segments (`1.2` -> `1.2.0`).
fn lenient_semver(version: &Version) -> Option<semver::Version> {
    if let Some(v) = version.as_semver() {
        return Some(v);
    }

    let segments = version.as_str().split('.').count();
    if segments >= 3 {
        return None;
    }
    let padded = format!("{}{}", version.as_str(), ".0".repeat(3 - segments));
    semver::Version::parse(&padded).ok()
}

/// A single dependency reference as declared in a recipe.
#[derive(Debug, Clone)]
pub struct DependencyRef {
    pub name: PackageName,
    pub constraint: VersionConstraint,
    /// The spec string as written in the recipe, kept for diagnostics.
    pub raw: String,
}

/// Archive format of a package source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArtifactFormat {
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.zst")]
    TarZst,
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "zip")]
    Zip,
}

impl ArtifactFormat {
    /// Infer the archive format from a source URL, defaulting to tar.gz.
    pub fn infer_from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".tar.zst") {
            Self::TarZst
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else {
            Self::TarGz
        }
    }
}

/// Source locator plus integrity checksum for one package.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub url: String,
    pub blake3: Blake3Hash,
    pub format: ArtifactFormat,
    /// Leading path components stripped after extraction (tarball top dirs).
    pub strip_components: u32,
}

/// Declarative metadata for one installable package.
///
/// Immutable once loaded; owned by the [`Catalog`] and shared via `Arc`.
#[derive(Debug)]
pub struct PackageDescriptor {
    pub name: PackageName,
    pub version: Version,
    pub summary: String,
    pub homepage: String,
    /// Dependency references in declaration order. Order matters: it breaks
    /// ties between independent subtrees in the resolved build order.
    pub deps: Vec<DependencyRef>,
    pub source: SourceSpec,
    /// Shell build steps, run in order inside the job working directory.
    pub steps: Vec<String>,
    /// Recipe-declared build options. Merged with run-level options, which
    /// take precedence.
    pub options: BTreeMap<String, String>,
}

/// In-memory catalog of package descriptors, keyed by name.
///
/// Versions for a name are kept newest-first so "latest" selection is a
/// front lookup.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: BTreeMap<PackageName, Vec<Arc<PackageDescriptor>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, keeping versions sorted newest-first.
    pub fn insert(&mut self, descriptor: PackageDescriptor) -> Result<(), CatalogError> {
        let versions = self.packages.entry(descriptor.name.clone()).or_default();

        if versions.iter().any(|d| d.version == descriptor.version) {
            return Err(CatalogError::Duplicate {
                name: descriptor.name,
                version: descriptor.version,
            });
        }

        versions.push(Arc::new(descriptor));
        versions.sort_by(|a, b| {
            if is_newer(&b.version, &a.version) {
                std::cmp::Ordering::Less
            } else if is_newer(&a.version, &b.version) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        Ok(())
    }

    /// All known versions of a package, newest first.
    pub fn find(&self, name: &PackageName) -> Option<&[Arc<PackageDescriptor>]> {
        self.packages.get(name).map(Vec::as_slice)
    }

    /// The newest version of a package satisfying `constraint`.
    pub fn select(
        &self,
        name: &PackageName,
        constraint: &VersionConstraint,
    ) -> Option<Arc<PackageDescriptor>> {
        self.find(name)?
            .iter()
            .find(|d| constraint.matches(&d.version))
            .cloned()
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    /// Number of distinct package names.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Package names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.packages.keys()
    }
}
