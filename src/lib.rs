//! pkgsmith - a source package build orchestrator
//!
//! Builds third-party libraries and tools from source, resolving their
//! transitive dependency graphs and driving each package through a
//! fetch → verify → extract → build → install pipeline.
//!
//! # Architecture
//!
//! - **Immutable catalog**: recipes are loaded once into a [`catalog::Catalog`]
//!   and passed by reference into resolution and orchestration; there is no
//!   ambient registry state.
//! - **Arena graph**: the resolver produces a [`resolver::ResolutionGraph`]
//!   of nodes addressed by integer ids, so diamond dependencies share a node
//!   instead of an ownership cycle.
//! - **Content-derived cache keys**: a [`fingerprint::Fingerprint`] hashes a
//!   package's identity, resolved dependency fingerprints, build options, and
//!   recipe content. Equal fingerprints are substitutable builds.
//! - **Trait seams**: network access ([`io::fetch::Fetcher`]), build step
//!   execution ([`runner::StepRunner`]), and progress output
//!   ([`ui::Reporter`]) are injected, so tests swap them for scripted fakes.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.pkgsmith/
//! ├── recipes/    # Package descriptor files (*.toml)
//! ├── store/      # Staged artifacts by name/version-fingerprint
//! ├── cache/      # Build cache manifest
//! ├── logs/       # Per-job build logs
//! └── tmp/        # Job working directories (same volume as store)
//! ```

pub mod cache;
pub mod catalog;
pub mod executor;
pub mod fingerprint;
pub mod io;
pub mod ops;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod types;
pub mod ui;

#[cfg(test)]
pub(crate) mod testsupport;

// Re-exports for convenience
pub use cache::BuildCache;
pub use catalog::Catalog;
pub use report::Report;
pub use types::{PackageName, Version};

use std::path::PathBuf;

use dirs::home_dir;

/// Returns the primary configuration directory, or None if the user's home cannot be resolved.
pub fn try_smith_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("PKGSMITH_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".pkgsmith"))
}

/// Returns the canonical pkgsmith home directory (`~/.pkgsmith`).
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn smith_home() -> PathBuf {
    try_smith_home().expect("Could not determine home directory")
}

/// Recipe directory: ~/.pkgsmith/recipes
pub fn recipes_path() -> PathBuf {
    smith_home().join("recipes")
}

/// Artifact store path: ~/.pkgsmith/store
pub fn store_path() -> PathBuf {
    smith_home().join("store")
}

/// Build cache path: ~/.pkgsmith/cache
pub fn cache_path() -> PathBuf {
    smith_home().join("cache")
}

/// Logs directory: ~/.pkgsmith/logs
pub fn log_dir() -> PathBuf {
    smith_home().join("logs")
}

/// Temp path: ~/.pkgsmith/tmp (guaranteed same volume as store)
pub fn tmp_path() -> PathBuf {
    smith_home().join("tmp")
}

/// Extract the filename from a URL.
///
/// # Example
///
/// ```
/// use pkgsmith::filename_from_url;
///
/// assert_eq!(filename_from_url("https://example.com/path/to/file.tar.gz"), "file.tar.gz");
/// assert_eq!(filename_from_url(""), "");
/// ```
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// User Agent string
pub const USER_AGENT: &str = concat!("pkgsmith/", env!("CARGO_PKG_VERSION"));
