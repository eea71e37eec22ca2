//! Shared fakes and fixture builders for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::catalog::{
    ArtifactFormat, Catalog, DependencyRef, PackageDescriptor, SourceSpec,
};
use crate::io::fetch::{FetchError, Fetcher};
use crate::runner::{ShellStepRunner, StepContext, StepError, StepRunner};
use crate::types::{Blake3Hash, PackageName, PackageSpec, Version};

/// Build a small tar.gz archive in memory.
pub(crate) fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Canonical source archive for a test package: one marker file under a
/// single top-level directory (stripped on extraction).
pub(crate) fn source_archive(name: &str, version: &str) -> Vec<u8> {
    tar_gz(&[(
        &format!("{name}-{version}/marker.txt"),
        &format!("{name}-{version}\n"),
    )])
}

/// Serves one in-memory archive for any locator; fails the first
/// `failures` calls with a transient error.
pub(crate) struct ScriptedFetcher {
    pub archive: Vec<u8>,
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedFetcher {
    pub fn new(archive: Vec<u8>, failures: u32) -> Self {
        Self {
            archive,
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _locator: &str, dest: &Path) -> Result<u64, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(FetchError::Io(std::io::Error::from(
                std::io::ErrorKind::TimedOut,
            )));
        }
        std::fs::write(dest, &self.archive)?;
        Ok(self.archive.len() as u64)
    }
}

/// Serves per-locator archives, counting fetches per locator.
pub(crate) struct MapFetcher {
    archives: HashMap<String, Vec<u8>>,
    pub calls: Arc<std::sync::Mutex<HashMap<String, u32>>>,
}

impl MapFetcher {
    pub fn new(archives: HashMap<String, Vec<u8>>) -> Self {
        Self {
            archives,
            calls: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default() += 1;

        let archive = self
            .archives
            .get(locator)
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))?;
        std::fs::write(dest, archive)?;
        Ok(archive.len() as u64)
    }
}

/// Shell runner that counts executed steps.
pub(crate) struct CountingRunner {
    inner: ShellStepRunner,
    pub calls: Arc<AtomicU32>,
}

impl CountingRunner {
    pub fn new() -> Self {
        Self {
            inner: ShellStepRunner,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl StepRunner for CountingRunner {
    async fn run(&self, step: &str, ctx: &StepContext<'_>) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(step, ctx).await
    }
}

/// A test package whose archive is addressed as `mem://name-version`.
pub(crate) fn mem_package(
    name: &str,
    version: &str,
    deps: &[&str],
    steps: &[&str],
) -> (PackageDescriptor, String, Vec<u8>) {
    let locator = format!("mem://{name}-{version}");
    let archive = source_archive(name, version);

    let descriptor = PackageDescriptor {
        name: PackageName::new(name),
        version: Version::new(version),
        summary: String::new(),
        homepage: String::new(),
        deps: deps
            .iter()
            .map(|spec| {
                let parsed = PackageSpec::parse(spec).unwrap();
                DependencyRef {
                    name: parsed.name,
                    constraint: parsed.constraint,
                    raw: (*spec).to_string(),
                }
            })
            .collect(),
        source: SourceSpec {
            url: locator.clone(),
            blake3: Blake3Hash::of_bytes(&archive),
            format: ArtifactFormat::TarGz,
            strip_components: 1,
        },
        steps: steps.iter().map(|s| (*s).to_string()).collect(),
        options: BTreeMap::new(),
    };

    (descriptor, locator, archive)
}

/// Catalog plus a [`MapFetcher`] serving every package's archive.
pub(crate) fn universe(packages: &[(&str, &str, &[&str], &[&str])]) -> (Catalog, MapFetcher) {
    let mut catalog = Catalog::new();
    let mut archives = HashMap::new();

    for (name, version, deps, steps) in packages {
        let (descriptor, locator, archive) = mem_package(name, version, deps, steps);
        archives.insert(locator, archive);
        catalog.insert(descriptor).unwrap();
    }

    (catalog, MapFetcher::new(archives))
}
