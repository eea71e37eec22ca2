//! The plan operation: resolve-only preview of a build.

use crate::cache::BuildCache;
use crate::fingerprint::{self, Fingerprint};
use crate::types::{PackageName, PackageSpec, Version};
use crate::{catalog, resolver};

use super::{BuildOptions, OpsError};

/// One entry of a resolved build plan, in build order.
#[derive(Debug, Clone)]
pub struct PlannedPackage {
    pub name: PackageName,
    pub version: Version,
    pub fingerprint: Fingerprint,
    /// Direct dependencies, in declaration order.
    pub deps: Vec<PackageName>,
    /// Whether the build cache already holds a reusable artifact.
    pub cached: bool,
}

/// Resolve `spec` and report what a build would do, without building.
pub fn plan(spec: &str, opts: &BuildOptions) -> Result<Vec<PlannedPackage>, OpsError> {
    let spec = PackageSpec::parse(spec).map_err(|e| OpsError::Spec(e.to_string()))?;

    let catalog = catalog::load_dir(&opts.recipes())?;
    let resolution = resolver::resolve(&spec, &catalog)?;
    let fingerprints =
        fingerprint::compute_all(&resolution.graph, &resolution.order, &opts.options);

    let cache = BuildCache::load_or_create(&opts.home_dir().join("cache"));

    Ok(resolution
        .order
        .iter()
        .map(|&id| {
            let node = resolution.graph.node(id);
            PlannedPackage {
                name: node.descriptor.name.clone(),
                version: node.descriptor.version.clone(),
                fingerprint: fingerprints[id].clone(),
                deps: node
                    .deps
                    .iter()
                    .map(|&dep| resolution.graph.node(dep).descriptor.name.clone())
                    .collect(),
                cached: cache.lookup(&fingerprints[id]).is_some(),
            }
        })
        .collect())
}
