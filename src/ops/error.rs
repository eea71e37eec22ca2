//! Domain-specific errors for run setup.
//!
//! Everything here is fatal before any build starts. Per-job execution
//! errors never surface as `OpsError`; they are captured in the final
//! [`crate::report::Report`].

use thiserror::Error;

use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::io::fetch::FetchError;
use crate::resolver::ResolveError;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Invalid package spec: {0}")]
    Spec(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetcher setup failed: {0}")]
    Fetcher(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
