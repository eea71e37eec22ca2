//! Reporter trait for dependency injection.
//!
//! Lets the orchestration core report progress and status without being
//! coupled to a specific output implementation. The CLI uses
//! [`ConsoleReporter`]; tests use [`NullReporter`].

use crate::report::{PackageOutcome, Report};
use crate::types::{PackageName, Version};

pub trait Reporter: Send + Sync {
    /// Announce the resolved build plan before any job starts.
    fn planned(&self, packages: &[(PackageName, Version)]);

    /// A package's source is being fetched.
    fn fetching(&self, name: &PackageName, version: &Version);

    /// A package's build step `step` of `total` is running.
    fn building(&self, name: &PackageName, version: &Version, step: usize, total: usize);

    /// A package was satisfied from the build cache.
    fn cached(&self, name: &PackageName, version: &Version);

    /// A package finished building and its artifact is staged.
    fn done(&self, name: &PackageName, version: &Version);

    /// A package's job failed.
    fn failed(&self, name: &PackageName, version: &Version, reason: &str);

    /// A package was skipped because of a failure elsewhere.
    fn skipped(&self, name: &PackageName, version: &Version, cause: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display the final per-package report.
    fn summary(&self, report: &Report, elapsed_secs: f64);
}

/// Plain line-per-event console output.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    pub quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn planned(&self, packages: &[(PackageName, Version)]) {
        if self.quiet {
            return;
        }
        println!("Build plan ({} packages):", packages.len());
        for (name, version) in packages {
            println!("  {name}@{version}");
        }
    }

    fn fetching(&self, name: &PackageName, version: &Version) {
        if !self.quiet {
            println!("  fetch    {name}@{version}");
        }
    }

    fn building(&self, name: &PackageName, version: &Version, step: usize, total: usize) {
        if !self.quiet {
            println!("  build    {name}@{version} [{step}/{total}]");
        }
    }

    fn cached(&self, name: &PackageName, version: &Version) {
        if !self.quiet {
            println!("  cached   {name}@{version}");
        }
    }

    fn done(&self, name: &PackageName, version: &Version) {
        if !self.quiet {
            println!("  done     {name}@{version}");
        }
    }

    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        eprintln!("  failed   {name}@{version}: {reason}");
    }

    fn skipped(&self, name: &PackageName, version: &Version, cause: &str) {
        eprintln!("  skipped  {name}@{version}: {cause}");
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("error: {msg}");
    }

    fn summary(&self, report: &Report, elapsed_secs: f64) {
        println!();
        for pkg in &report.packages {
            let detail = match &pkg.outcome {
                PackageOutcome::Done { artifact, .. } => artifact.display().to_string(),
                PackageOutcome::Failed { error } => error.clone(),
                PackageOutcome::Skipped { cause } => cause.clone(),
            };
            println!(
                "{:<14} {}@{}  {}",
                pkg.outcome.label(),
                pkg.name,
                pkg.version,
                detail
            );
        }
        println!(
            "\n{} done, {} failed, {} skipped in {elapsed_secs:.1}s",
            report.done_count(),
            report.failed_count(),
            report.skipped_count(),
        );
    }
}

/// Discards all events. Used by tests and library embedders.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn planned(&self, _packages: &[(PackageName, Version)]) {}
    fn fetching(&self, _name: &PackageName, _version: &Version) {}
    fn building(&self, _name: &PackageName, _version: &Version, _step: usize, _total: usize) {}
    fn cached(&self, _name: &PackageName, _version: &Version) {}
    fn done(&self, _name: &PackageName, _version: &Version) {}
    fn failed(&self, _name: &PackageName, _version: &Version, _reason: &str) {}
    fn skipped(&self, _name: &PackageName, _version: &Version, _cause: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn summary(&self, _report: &Report, _elapsed_secs: f64) {}
}
