//! Dependency resolution.
//!
//! Given a root package spec and the catalog, computes a directed acyclic
//! graph over the transitive dependency set and a deterministic topological
//! build order (dependencies before dependents).
//!
//! The graph is an arena: nodes live in a flat `Vec` and reference each
//! other by index, so diamond dependencies share one node and traversal
//! never fights the borrow checker over ownership cycles.
//!
//! Resolution is all-or-nothing. Cycles, unknown packages, and version
//! conflicts abort the whole run before any build starts.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{Catalog, PackageDescriptor, VersionConstraint};
use crate::types::{PackageName, PackageSpec};

/// Stable index of a node within a [`ResolutionGraph`].
pub type NodeId = usize;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Package '{name}' not found in catalog (required by {requested_by})")]
    UnknownPackage {
        name: PackageName,
        requested_by: String,
    },

    #[error(
        "No version of '{name}' satisfies '{constraint}' (required by {requested_by}; available: {available})"
    )]
    NoMatchingVersion {
        name: PackageName,
        constraint: String,
        requested_by: String,
        available: String,
    },

    #[error("Circular dependency detected: {}", cycle_display(.path))]
    CyclicDependency { path: Vec<PackageName> },

    #[error(
        "Version conflict for '{name}': {first_requester} requires '{first_constraint}' but {second_requester} requires '{second_constraint}'"
    )]
    VersionConflict {
        name: PackageName,
        first_requester: String,
        first_constraint: String,
        second_requester: String,
        second_constraint: String,
    },
}

fn cycle_display(path: &[PackageName]) -> String {
    path.iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One resolved package in the graph.
#[derive(Debug)]
pub struct ResolvedNode {
    pub id: NodeId,
    pub descriptor: Arc<PackageDescriptor>,
    /// Direct dependencies, in the recipe's declaration order.
    pub deps: Vec<NodeId>,
}

/// Directed acyclic graph over the resolved dependency set.
///
/// Edge A→B (B listed in A's `deps`) means "A depends on B; B builds first".
#[derive(Debug, Default)]
pub struct ResolutionGraph {
    nodes: Vec<ResolvedNode>,
}

impl ResolutionGraph {
    pub fn node(&self, id: NodeId) -> &ResolvedNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Output of a successful resolution: the graph, a topological build order
/// over it, and the root node.
#[derive(Debug)]
pub struct Resolution {
    pub graph: ResolutionGraph,
    /// Build order: for every edge A→B, B appears before A. Ties between
    /// independent subtrees follow declaration order, so the order is
    /// byte-identical across runs over an unchanged catalog.
    pub order: Vec<NodeId>,
    pub root: NodeId,
}

/// Resolve the transitive dependency graph for a root package spec.
pub fn resolve(spec: &PackageSpec, catalog: &Catalog) -> Result<Resolution, ResolveError> {
    let mut state = ResolveState {
        catalog,
        nodes: Vec::new(),
        selected: HashMap::new(),
        path: Vec::new(),
        order: Vec::new(),
    };

    let root = state.visit(&spec.name, &spec.constraint, "command line")?;

    Ok(Resolution {
        graph: ResolutionGraph { nodes: state.nodes },
        order: state.order,
        root,
    })
}

struct Selected {
    node: NodeId,
    constraint: String,
    requested_by: String,
}

struct ResolveState<'a> {
    catalog: &'a Catalog,
    nodes: Vec<ResolvedNode>,
    /// One selected version per package name for the whole resolution.
    selected: HashMap<PackageName, Selected>,
    /// Current DFS path, for cycle reporting.
    path: Vec<PackageName>,
    /// Reverse-postorder accumulator: a node is pushed after its deps.
    order: Vec<NodeId>,
}

impl ResolveState<'_> {
    fn visit(
        &mut self,
        name: &PackageName,
        constraint: &VersionConstraint,
        requested_by: &str,
    ) -> Result<NodeId, ResolveError> {
        if let Some(prior) = self.selected.get(name) {
            if self.path.contains(name) {
                let start = self.path.iter().position(|p| p == name).unwrap_or(0);
                let mut cycle: Vec<PackageName> = self.path[start..].to_vec();
                cycle.push(name.clone());
                return Err(ResolveError::CyclicDependency { path: cycle });
            }

            let node = prior.node;
            let selected_version = self.nodes[node].descriptor.version.clone();
            if !constraint.matches(&selected_version) {
                return Err(ResolveError::VersionConflict {
                    name: name.clone(),
                    first_requester: prior.requested_by.clone(),
                    first_constraint: prior.constraint.clone(),
                    second_requester: requested_by.to_string(),
                    second_constraint: constraint.to_string(),
                });
            }
            return Ok(node);
        }

        let available = self
            .catalog
            .find(name)
            .ok_or_else(|| ResolveError::UnknownPackage {
                name: name.clone(),
                requested_by: requested_by.to_string(),
            })?;

        let descriptor = self.catalog.select(name, constraint).ok_or_else(|| {
            ResolveError::NoMatchingVersion {
                name: name.clone(),
                constraint: constraint.to_string(),
                requested_by: requested_by.to_string(),
                available: available
                    .iter()
                    .map(|d| d.version.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;

        let id = self.nodes.len();
        self.nodes.push(ResolvedNode {
            id,
            descriptor: descriptor.clone(),
            deps: Vec::new(),
        });
        self.selected.insert(
            name.clone(),
            Selected {
                node: id,
                constraint: constraint.to_string(),
                requested_by: requested_by.to_string(),
            },
        );

        self.path.push(name.clone());
        let requester = format!("{}@{}", descriptor.name, descriptor.version);

        let mut dep_ids = Vec::with_capacity(descriptor.deps.len());
        for dep in &descriptor.deps {
            let dep_id = self.visit(&dep.name, &dep.constraint, &requester)?;
            dep_ids.push(dep_id);
        }

        self.path.pop();
        self.nodes[id].deps = dep_ids;
        self.order.push(id);

        Ok(id)
    }
}
