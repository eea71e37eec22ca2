//! Final build run report.
//!
//! One entry per package in build order, each with a terminal outcome. The
//! root package's outcome determines the process exit status.

use std::path::PathBuf;

use crate::types::{PackageName, Version};

/// Terminal outcome of one package in a run.
#[derive(Debug, Clone)]
pub enum PackageOutcome {
    /// Built successfully, or reused from the cache.
    Done { cached: bool, artifact: PathBuf },
    /// The package's own job failed.
    Failed { error: String },
    /// Never started because a dependency failed (or the run halted). The
    /// cause names the deepest proximate failure, not just "dependency
    /// failed".
    Skipped { cause: String },
}

impl PackageOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Short status label for summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Done { cached: true, .. } => "done (cached)",
            Self::Done { cached: false, .. } => "done",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One package's entry in the final report.
#[derive(Debug, Clone)]
pub struct PackageReport {
    pub name: PackageName,
    pub version: Version,
    pub outcome: PackageOutcome,
}

/// Outcome of a whole orchestrated run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Entries in build order (dependencies before dependents).
    pub packages: Vec<PackageReport>,
    /// Index of the root package within `packages`.
    root: usize,
}

impl Report {
    pub fn new(packages: Vec<PackageReport>, root: usize) -> Self {
        debug_assert!(root < packages.len());
        Self { packages, root }
    }

    /// The requested package's entry.
    pub fn root(&self) -> &PackageReport {
        &self.packages[self.root]
    }

    /// True when the root package reached `Done`.
    ///
    /// With continue-on-error, sibling failures do not mask a successful
    /// root; they remain visible in the per-package entries.
    pub fn is_success(&self) -> bool {
        self.root().outcome.is_done()
    }

    /// Process exit status: 0 only on a successful root.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    pub fn done_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|p| p.outcome.is_done())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|p| matches!(p.outcome, PackageOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|p| matches!(p.outcome, PackageOutcome::Skipped { .. }))
            .count()
    }
}
