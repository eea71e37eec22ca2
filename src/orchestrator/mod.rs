//! Build orchestration.
//!
//! Executes a resolved build order with bounded parallelism. One task per
//! graph node; a semaphore bounds simultaneous executor runs; each node
//! publishes its terminal outcome on a watch channel that its dependents
//! await. The orchestrator is the only component that starts jobs.
//!
//! Each fingerprint builds at most once per run: a shared dependency is a
//! single graph node, and later requesters wait on the first builder's
//! outcome instead of duplicating work.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{ArtifactRecord, BuildCache, BuildStatus};
use crate::executor::{BuildError, BuildJob, Executor};
use crate::fingerprint::{self, Fingerprint};
use crate::report::{PackageOutcome, PackageReport, Report};
use crate::resolver::{NodeId, Resolution};
use crate::runner::DepArtifact;
use crate::types::{PackageName, Version};
use crate::ui::Reporter;

/// Failure that caused a package to be skipped: the deepest proximate
/// cause, forwarded unchanged through skip chains.
#[derive(Debug, Clone)]
pub struct SkipCause {
    pub package: PackageName,
    pub version: Version,
    pub error: String,
}

/// Terminal outcome of one node, published on its watch channel.
#[derive(Debug, Clone)]
enum JobOutcome {
    Done { artifact: PathBuf, cached: bool },
    Failed { error: Arc<BuildError> },
    Skipped { cause: SkipCause },
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on simultaneously executing jobs.
    pub max_jobs: usize,
    /// Continue building unaffected subtrees after a failure. When false,
    /// the first failure halts all further job starts; in-flight jobs run
    /// to completion.
    pub keep_going: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_jobs: num_cpus::get(),
            keep_going: false,
        }
    }
}

/// Drives the resolved build order through the executor.
pub struct Orchestrator {
    executor: Arc<Executor>,
    cache: Arc<Mutex<BuildCache>>,
}

impl Orchestrator {
    pub fn new(executor: Arc<Executor>, cache: Arc<Mutex<BuildCache>>) -> Self {
        Self { executor, cache }
    }

    /// Run every node in the resolution to a terminal state and report.
    ///
    /// The resolution and fingerprints are computed before this call and
    /// shared read-only across workers; nothing mutates the graph during
    /// execution.
    pub async fn run(
        &self,
        resolution: Arc<Resolution>,
        fingerprints: Arc<Vec<Fingerprint>>,
        run_options: Arc<BTreeMap<String, String>>,
        config: OrchestratorConfig,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Report {
        let semaphore = Arc::new(Semaphore::new(config.max_jobs.max(1)));
        let halt: Arc<OnceLock<SkipCause>> = Arc::new(OnceLock::new());

        let mut receivers: HashMap<NodeId, watch::Receiver<Option<JobOutcome>>> = HashMap::new();
        let mut set = JoinSet::new();

        // Dependencies appear before dependents in the order, so every
        // dependency's receiver exists by the time its dependent spawns.
        for &id in &resolution.order {
            let (tx, rx) = watch::channel(None);
            let deps: Vec<(NodeId, watch::Receiver<Option<JobOutcome>>)> = resolution
                .graph
                .node(id)
                .deps
                .iter()
                .map(|&dep| (dep, receivers[&dep].clone()))
                .collect();
            receivers.insert(id, rx);

            let worker = NodeWorker {
                id,
                resolution: resolution.clone(),
                fingerprints: fingerprints.clone(),
                run_options: run_options.clone(),
                executor: self.executor.clone(),
                cache: self.cache.clone(),
                semaphore: semaphore.clone(),
                halt: halt.clone(),
                keep_going: config.keep_going,
                reporter: reporter.clone(),
                cancel: cancel.clone(),
            };
            set.spawn(async move {
                let outcome = worker.execute_node(deps).await;
                worker.report_terminal(&outcome);
                let _ = tx.send(Some(outcome));
            });
        }

        while set.join_next().await.is_some() {}

        self.collect_report(&resolution, &receivers)
    }

    fn collect_report(
        &self,
        resolution: &Resolution,
        receivers: &HashMap<NodeId, watch::Receiver<Option<JobOutcome>>>,
    ) -> Report {
        let packages = resolution
            .order
            .iter()
            .map(|&id| {
                let node = resolution.graph.node(id);
                let outcome = receivers[&id].borrow().clone().unwrap_or_else(|| {
                    JobOutcome::Failed {
                        error: Arc::new(BuildError::Internal(
                            "builder task exited without reporting".to_string(),
                        )),
                    }
                });

                let outcome = match outcome {
                    JobOutcome::Done { artifact, cached } => {
                        PackageOutcome::Done { cached, artifact }
                    }
                    JobOutcome::Failed { error } => PackageOutcome::Failed {
                        error: error.to_string(),
                    },
                    JobOutcome::Skipped { cause } => PackageOutcome::Skipped {
                        cause: if cause.package == node.descriptor.name {
                            cause.error
                        } else {
                            format!(
                                "{}@{} failed: {}",
                                cause.package, cause.version, cause.error
                            )
                        },
                    },
                };

                PackageReport {
                    name: node.descriptor.name.clone(),
                    version: node.descriptor.version.clone(),
                    outcome,
                }
            })
            .collect();

        let root = resolution
            .order
            .iter()
            .position(|&id| id == resolution.root)
            .expect("root is part of its own resolution order");
        Report::new(packages, root)
    }
}

struct NodeWorker {
    id: NodeId,
    resolution: Arc<Resolution>,
    fingerprints: Arc<Vec<Fingerprint>>,
    run_options: Arc<BTreeMap<String, String>>,
    executor: Arc<Executor>,
    cache: Arc<Mutex<BuildCache>>,
    semaphore: Arc<Semaphore>,
    halt: Arc<OnceLock<SkipCause>>,
    keep_going: bool,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl NodeWorker {
    fn descriptor(&self) -> &Arc<crate::catalog::PackageDescriptor> {
        &self.resolution.graph.node(self.id).descriptor
    }

    fn skip_self(&self, error: &str) -> JobOutcome {
        JobOutcome::Skipped {
            cause: SkipCause {
                package: self.descriptor().name.clone(),
                version: self.descriptor().version.clone(),
                error: error.to_string(),
            },
        }
    }

    async fn execute_node(
        &self,
        deps: Vec<(NodeId, watch::Receiver<Option<JobOutcome>>)>,
    ) -> JobOutcome {
        // A node starts only after every dependency is terminal.
        let mut dep_artifacts = Vec::with_capacity(deps.len());
        for (dep_id, mut rx) in deps {
            let dep_node = self.resolution.graph.node(dep_id);
            match wait_terminal(&mut rx).await {
                JobOutcome::Done { artifact, .. } => dep_artifacts.push(DepArtifact {
                    name: dep_node.descriptor.name.clone(),
                    path: artifact,
                }),
                JobOutcome::Failed { error } => {
                    return JobOutcome::Skipped {
                        cause: SkipCause {
                            package: dep_node.descriptor.name.clone(),
                            version: dep_node.descriptor.version.clone(),
                            error: error.to_string(),
                        },
                    };
                }
                // Forward the original cause, not the intermediate skip.
                JobOutcome::Skipped { cause } => return JobOutcome::Skipped { cause },
            }
        }

        if self.cancel.is_cancelled() {
            return self.skip_self("run cancelled");
        }
        if let Some(cause) = self.halt.get() {
            return JobOutcome::Skipped {
                cause: cause.clone(),
            };
        }

        let fingerprint = &self.fingerprints[self.id];

        // Cache hits short-circuit the executor entirely.
        let hit = {
            let cache = self.cache.lock().await;
            cache.lookup(fingerprint).map(|record| record.path.clone())
        };
        if let Some(artifact) = hit {
            debug!(package = %self.descriptor().name, %fingerprint, "cache hit");
            return JobOutcome::Done {
                artifact,
                cached: true,
            };
        }

        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return self.skip_self("run cancelled");
        };

        // Both gates can have closed while waiting for a slot.
        if self.cancel.is_cancelled() {
            return self.skip_self("run cancelled");
        }
        if let Some(cause) = self.halt.get() {
            return JobOutcome::Skipped {
                cause: cause.clone(),
            };
        }

        let descriptor = self.descriptor().clone();
        let job = BuildJob {
            fingerprint: fingerprint.clone(),
            deps: dep_artifacts,
            options: fingerprint::effective_options(&descriptor, &self.run_options),
            descriptor,
        };

        let result = self
            .executor
            .execute(&job, self.reporter.as_ref(), &self.cancel)
            .await;
        drop(permit);

        match result {
            Ok(artifact) => {
                self.record(BuildStatus::Success, artifact.clone()).await;
                JobOutcome::Done {
                    artifact,
                    cached: false,
                }
            }
            Err(BuildError::Cancelled) => JobOutcome::Failed {
                error: Arc::new(BuildError::Cancelled),
            },
            Err(error) => {
                self.record(
                    BuildStatus::Failed {
                        error: error.to_string(),
                    },
                    PathBuf::new(),
                )
                .await;

                let cause = SkipCause {
                    package: self.descriptor().name.clone(),
                    version: self.descriptor().version.clone(),
                    error: error.to_string(),
                };
                if !self.keep_going {
                    let _ = self.halt.set(cause);
                }
                JobOutcome::Failed {
                    error: Arc::new(error),
                }
            }
        }
    }

    async fn record(&self, status: BuildStatus, path: PathBuf) {
        let record = ArtifactRecord {
            fingerprint: self.fingerprints[self.id].clone(),
            package: self.descriptor().name.clone(),
            version: self.descriptor().version.clone(),
            status,
            path,
        };
        let mut cache = self.cache.lock().await;
        if let Err(e) = cache.record(record) {
            warn!(package = %self.descriptor().name, error = %e, "failed to persist cache record");
        }
    }

    fn report_terminal(&self, outcome: &JobOutcome) {
        let name = &self.descriptor().name;
        let version = &self.descriptor().version;
        match outcome {
            JobOutcome::Done { cached: true, .. } => self.reporter.cached(name, version),
            JobOutcome::Done { cached: false, .. } => self.reporter.done(name, version),
            JobOutcome::Failed { error } => {
                self.reporter.failed(name, version, &error.to_string());
            }
            JobOutcome::Skipped { cause } => {
                let rendered = if cause.package == *name {
                    cause.error.clone()
                } else {
                    format!("{}@{} failed: {}", cause.package, cause.version, cause.error)
                };
                self.reporter.skipped(name, version, &rendered);
            }
        }
    }
}

/// Wait until a node's watch channel holds a terminal outcome.
async fn wait_terminal(rx: &mut watch::Receiver<Option<JobOutcome>>) -> JobOutcome {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return JobOutcome::Failed {
                error: Arc::new(BuildError::Internal(
                    "builder task exited without reporting".to_string(),
                )),
            };
        }
    }
}
