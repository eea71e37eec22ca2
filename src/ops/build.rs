//! The build operation: resolve, fingerprint, orchestrate, report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::BuildCache;
use crate::executor::{BackoffPolicy, Executor, ExecutorDirs};
use crate::io::fetch::DefaultFetcher;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::report::Report;
use crate::runner::ShellStepRunner;
use crate::types::PackageSpec;
use crate::ui::Reporter;
use crate::{catalog, fingerprint, resolver};

use super::OpsError;

/// Configuration for one build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Root directory for store/cache/logs/tmp. Defaults to `~/.pkgsmith`.
    pub home: Option<PathBuf>,
    /// Recipe directory. Defaults to `<home>/recipes`.
    pub recipes_dir: Option<PathBuf>,
    /// Parallel job bound; 0 means one per logical CPU.
    pub jobs: usize,
    /// Keep building unaffected subtrees after a failure.
    pub keep_going: bool,
    /// Run-level build options, overriding recipe options of the same name.
    pub options: BTreeMap<String, String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            home: None,
            recipes_dir: None,
            jobs: 0,
            keep_going: false,
            options: BTreeMap::new(),
        }
    }
}

impl BuildOptions {
    pub(crate) fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(crate::smith_home)
    }

    pub(crate) fn recipes(&self) -> PathBuf {
        self.recipes_dir
            .clone()
            .unwrap_or_else(|| self.home_dir().join("recipes"))
    }
}

/// Resolve `spec` against the recipe catalog and build it, returning the
/// per-package report.
///
/// Resolution errors (unknown package, cycle, version conflict) fail fast
/// before any job starts. Execution failures do not error here; they are
/// captured per package in the report, and [`Report::exit_code`] follows
/// the root package's outcome.
pub async fn build(
    spec: &str,
    opts: BuildOptions,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) -> Result<Report, OpsError> {
    let spec = PackageSpec::parse(spec).map_err(|e| OpsError::Spec(e.to_string()))?;
    let home = opts.home_dir();

    let catalog = catalog::load_dir(&opts.recipes())?;
    info!(packages = catalog.len(), "catalog loaded");

    let resolution = Arc::new(resolver::resolve(&spec, &catalog)?);
    info!(nodes = resolution.graph.len(), "dependency graph resolved");

    let planned: Vec<_> = resolution
        .order
        .iter()
        .map(|&id| {
            let d = &resolution.graph.node(id).descriptor;
            (d.name.clone(), d.version.clone())
        })
        .collect();
    reporter.planned(&planned);

    let run_options = Arc::new(opts.options.clone());
    let fingerprints = Arc::new(fingerprint::compute_all(
        &resolution.graph,
        &resolution.order,
        &run_options,
    ));

    let cache = Arc::new(Mutex::new(BuildCache::load_or_create(&home.join("cache"))));
    let executor = Arc::new(Executor::new(
        Arc::new(DefaultFetcher::new()?),
        Arc::new(ShellStepRunner),
        BackoffPolicy::default(),
        ExecutorDirs {
            store: home.join("store"),
            tmp: home.join("tmp"),
            logs: home.join("logs"),
        },
    ));

    let config = OrchestratorConfig {
        max_jobs: if opts.jobs == 0 {
            num_cpus::get()
        } else {
            opts.jobs
        },
        keep_going: opts.keep_going,
    };

    let orchestrator = Orchestrator::new(executor, cache);
    let report = orchestrator
        .run(
            resolution,
            fingerprints,
            run_options,
            config,
            reporter,
            cancel,
        )
        .await;

    Ok(report)
}
