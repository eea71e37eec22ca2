//! Source acquisition.
//!
//! The [`Fetcher`] trait is the narrow seam between the build executor and
//! the network. The default implementation dispatches on the locator
//! scheme: `http`/`https` stream through reqwest, `file://` URLs and bare
//! paths copy from the local filesystem. Tests substitute scripted fetchers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported locator scheme in '{0}'")]
    UnsupportedScheme(String),
}

impl FetchError {
    /// Whether retrying the fetch could plausibly succeed.
    ///
    /// Connection failures, timeouts, and server-side errors are transient;
    /// missing sources and malformed locators are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::Interrupted
            ),
            Self::NotFound(_) | Self::UnsupportedScheme(_) => false,
        }
    }
}

/// Acquires a package source by locator, writing it to `dest`.
///
/// Returns the number of bytes written. Implementations must leave no
/// partial file behind on failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Streams HTTP(S) sources to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(locator)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        let result: Result<(), FetchError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tokio::fs::remove_file(dest).await.ok();
            return Err(e);
        }

        debug!(locator, bytes = written, "fetched");
        Ok(written)
    }
}

/// Copies local sources (`file://` URLs or bare paths).
#[derive(Debug, Clone, Default)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, FetchError> {
        let path = PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator));
        if !path.is_file() {
            return Err(FetchError::NotFound(path.display().to_string()));
        }
        let written = tokio::fs::copy(&path, dest).await?;
        debug!(locator, bytes = written, "copied local source");
        Ok(written)
    }
}

/// Scheme-dispatching fetcher used by the default executor wiring.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().tcp_nodelay(true).build()?;
        Ok(Self {
            http: HttpFetcher::new(client),
            file: FileFetcher,
        })
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, FetchError> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            self.http.fetch(locator, dest).await
        } else if locator.starts_with("file://") || !locator.contains("://") {
            self.file.fetch(locator, dest).await
        } else {
            Err(FetchError::UnsupportedScheme(locator.to_string()))
        }
    }
}
