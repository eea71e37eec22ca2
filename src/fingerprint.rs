//! Content-derived build identities.
//!
//! A [`Fingerprint`] is a BLAKE3 digest over everything that determines a
//! build's output: package identity, the fingerprints of its resolved
//! dependencies, the effective build options, and the recipe content
//! (source locator, checksum, and step list). Two builds with identical
//! fingerprints are substitutable, which makes the fingerprint the build
//! cache key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::PackageDescriptor;
use crate::resolver::{NodeId, ResolutionGraph};

/// A 64-hex-character BLAKE3 build identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in store paths and log file names.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of every node in the graph.
///
/// Returns a vector indexed by [`NodeId`]. `order` must be a topological
/// build order (dependencies first), which guarantees each node's
/// dependency fingerprints exist before they are consumed.
///
/// Run-level `options` are merged over each recipe's own options before
/// hashing, mirroring the environment the build steps will actually see.
pub fn compute_all(
    graph: &ResolutionGraph,
    order: &[NodeId],
    options: &BTreeMap<String, String>,
) -> Vec<Fingerprint> {
    let mut fingerprints: Vec<Option<Fingerprint>> = vec![None; graph.len()];

    for &id in order {
        let node = graph.node(id);

        // Dependency fingerprints sorted by name: permuting an equivalent
        // dependency list must not change the result.
        let mut dep_pairs: Vec<(&str, &str)> = node
            .deps
            .iter()
            .map(|&dep| {
                let fp = fingerprints[dep]
                    .as_ref()
                    .expect("order must place dependencies first");
                (graph.node(dep).descriptor.name.as_str(), fp.as_str())
            })
            .collect();
        dep_pairs.sort();

        let effective = effective_options(&node.descriptor, options);
        fingerprints[id] = Some(compute_one(&node.descriptor, &dep_pairs, &effective));
    }

    fingerprints.into_iter().map(Option::unwrap).collect()
}

/// Recipe options merged with run-level options; run-level wins.
pub fn effective_options(
    descriptor: &PackageDescriptor,
    run_options: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = descriptor.options.clone();
    for (k, v) in run_options {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

fn compute_one(
    descriptor: &PackageDescriptor,
    dep_pairs: &[(&str, &str)],
    options: &BTreeMap<String, String>,
) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();

    field(&mut hasher, b"name", descriptor.name.as_str().as_bytes());
    field(&mut hasher, b"version", descriptor.version.as_str().as_bytes());

    for (name, fp) in dep_pairs {
        field(&mut hasher, b"dep", name.as_bytes());
        field(&mut hasher, b"dep-fp", fp.as_bytes());
    }

    for (key, value) in options {
        field(&mut hasher, b"opt-key", key.as_bytes());
        field(&mut hasher, b"opt-val", value.as_bytes());
    }

    field(&mut hasher, b"source-url", descriptor.source.url.as_bytes());
    field(
        &mut hasher,
        b"source-sum",
        descriptor.source.blake3.as_str().as_bytes(),
    );
    field(
        &mut hasher,
        b"strip",
        &descriptor.source.strip_components.to_le_bytes(),
    );

    for step in &descriptor.steps {
        field(&mut hasher, b"step", step.as_bytes());
    }

    Fingerprint(hasher.finalize().to_hex().to_string())
}

/// Length-prefixed, tagged field write. The tag and length prefix keep
/// adjacent fields from aliasing each other (`ab` + `c` vs `a` + `bc`).
fn field(hasher: &mut blake3::Hasher, tag: &[u8], value: &[u8]) {
    hasher.update(&(tag.len() as u64).to_le_bytes());
    hasher.update(tag);
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value);
}
