//! Build executor.
//!
//! Drives one package from source to a staged, installed artifact. Each
//! job moves through an explicit state machine:
//!
//! ```text
//! Pending → Fetching → Verifying → Extracting → Running(step) → Staging → Done
//!                └──────────┴───────────┴────────────┴────────────┴→ Failed
//! ```
//!
//! Side effects are confined to a job-private working directory until the
//! final atomic move into the artifact store, so a crashed or cancelled job
//! never corrupts a previously staged artifact. Cancellation is checked
//! between states and between build steps.

mod backoff;

pub use backoff::BackoffPolicy;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::PackageDescriptor;
use crate::fingerprint::Fingerprint;
use crate::io::extract::{self, ExtractError};
use crate::io::fetch::{FetchError, Fetcher};
use crate::runner::{DepArtifact, StepContext, StepError, StepRunner};
use crate::ui::Reporter;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Build step {index}/{total} `{step}` failed: {source}")]
    Step {
        /// 1-based index of the failed step.
        index: usize,
        total: usize,
        step: String,
        #[source]
        source: StepError,
    },

    #[error("Failed to stage artifact: {0}")]
    Stage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Job progress states, used for logging and progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fetching,
    Verifying,
    Extracting,
    Running { step: usize },
    Staging,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Verifying => write!(f, "verifying"),
            Self::Extracting => write!(f, "extracting"),
            Self::Running { step } => write!(f, "running step {step}"),
            Self::Staging => write!(f, "staging"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of work: a resolved package plus its dependencies' staged
/// artifacts. Created per graph node by the orchestrator and dropped once
/// the job reaches a terminal state.
#[derive(Debug)]
pub struct BuildJob {
    pub descriptor: Arc<PackageDescriptor>,
    pub fingerprint: Fingerprint,
    pub deps: Vec<DepArtifact>,
    /// Effective build options (recipe options merged with run options).
    pub options: BTreeMap<String, String>,
}

/// Filesystem roots the executor works against.
#[derive(Debug, Clone)]
pub struct ExecutorDirs {
    /// Final artifact store; jobs move their stage output here.
    pub store: PathBuf,
    /// Parent for job-private working directories. Must live on the same
    /// volume as the store so the final rename is atomic.
    pub tmp: PathBuf,
    /// Per-job build logs, kept after failures for diagnostics.
    pub logs: PathBuf,
}

/// Executes build jobs. One executor is shared by all orchestrator workers;
/// per-job state lives on the stack of [`Executor::execute`].
pub struct Executor {
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn StepRunner>,
    backoff: BackoffPolicy,
    dirs: ExecutorDirs,
}

impl Executor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn StepRunner>,
        backoff: BackoffPolicy,
        dirs: ExecutorDirs,
    ) -> Self {
        Self {
            fetcher,
            runner,
            backoff,
            dirs,
        }
    }

    /// Run one job to completion, returning the staged artifact path.
    ///
    /// On any error the job-private working directory is dropped and the
    /// store is left untouched; only the build log survives for diagnosis.
    pub async fn execute(
        &self,
        job: &BuildJob,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, BuildError> {
        self.transition(job, JobState::Pending);
        let result = self.run_pipeline(job, reporter, cancel).await;
        if result.is_err() {
            self.transition(job, JobState::Failed);
        }
        result
    }

    async fn run_pipeline(
        &self,
        job: &BuildJob,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, BuildError> {
        let name = &job.descriptor.name;
        let version = &job.descriptor.version;

        std::fs::create_dir_all(&self.dirs.tmp)?;
        std::fs::create_dir_all(&self.dirs.logs)?;

        let workdir = tempfile::Builder::new()
            .prefix("smith-")
            .tempdir_in(&self.dirs.tmp)?;

        let log_path = self.dirs.logs.join(format!(
            "build-{name}-{version}-{}.log",
            job.fingerprint.short()
        ));
        // Truncate any log left over from a previous attempt.
        std::fs::write(&log_path, "")?;

        self.transition(job, JobState::Fetching);
        reporter.fetching(name, version);
        let archive_path = workdir.path().join("download").join(source_filename(job));
        std::fs::create_dir_all(archive_path.parent().expect("download dir has a parent"))?;
        self.fetch_with_retry(job, &archive_path, cancel).await?;

        self.transition(job, JobState::Verifying);
        verify_checksum(job, &archive_path).await?;

        check_cancelled(cancel)?;
        self.transition(job, JobState::Extracting);
        let src_dir = workdir.path().join("src");
        extract_source(job, &archive_path, &src_dir).await?;

        let stage_dir = workdir.path().join("stage");
        std::fs::create_dir_all(&stage_dir)?;
        let env = crate::runner::job_env(&stage_dir, workdir.path(), &job.deps, &job.options);

        let total = job.descriptor.steps.len();
        for (i, step) in job.descriptor.steps.iter().enumerate() {
            check_cancelled(cancel)?;
            self.transition(job, JobState::Running { step: i + 1 });
            reporter.building(name, version, i + 1, total);

            let ctx = StepContext {
                workdir: &src_dir,
                env: &env,
                log_path: &log_path,
                cancel,
            };
            match self.runner.run(step, &ctx).await {
                Ok(()) => {}
                Err(StepError::Cancelled) => return Err(BuildError::Cancelled),
                Err(source) => {
                    return Err(BuildError::Step {
                        index: i + 1,
                        total,
                        step: step.clone(),
                        source,
                    });
                }
            }
        }

        check_cancelled(cancel)?;
        self.transition(job, JobState::Staging);
        let artifact = self.stage_artifact(job, stage_dir).await?;

        self.transition(job, JobState::Done);
        debug!(package = %name, artifact = %artifact.display(), "job complete");
        Ok(artifact)
    }

    fn transition(&self, job: &BuildJob, state: JobState) {
        debug!(
            package = %job.descriptor.name,
            version = %job.descriptor.version,
            %state,
            "state transition"
        );
    }

    async fn fetch_with_retry(
        &self,
        job: &BuildJob,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, BuildError> {
        let url = &job.descriptor.source.url;
        let mut attempt: u32 = 0;

        loop {
            check_cancelled(cancel)?;

            match self.fetcher.fetch(url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt + 1 < self.backoff.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        package = %job.descriptor.name,
                        url = %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch failure, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return Err(BuildError::Cancelled),
                    }
                }
                Err(source) => {
                    return Err(BuildError::Fetch {
                        attempts: attempt + 1,
                        source,
                    });
                }
            }
        }
    }

    /// Move the stage directory into the store. Rename is atomic on the
    /// shared volume; the copy fallback covers exotic setups where the tmp
    /// dir was redirected elsewhere.
    async fn stage_artifact(&self, job: &BuildJob, stage_dir: PathBuf) -> Result<PathBuf, BuildError> {
        let artifact = self
            .dirs
            .store
            .join(job.descriptor.name.as_str())
            .join(format!(
                "{}-{}",
                job.descriptor.version,
                job.fingerprint.short()
            ));

        let result = tokio::task::spawn_blocking(move || -> Result<PathBuf, String> {
            if artifact.exists() {
                std::fs::remove_dir_all(&artifact).map_err(|e| e.to_string())?;
            }
            let parent = artifact.parent().expect("artifact path has a parent");
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;

            if std::fs::rename(&stage_dir, &artifact).is_err() {
                copy_dir_all(&stage_dir, &artifact).map_err(|e| e.to_string())?;
            }
            Ok(artifact)
        })
        .await
        .map_err(|e| BuildError::Internal(format!("staging task panicked: {e}")))?;

        result.map_err(BuildError::Stage)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }
    Ok(())
}

fn source_filename(job: &BuildJob) -> String {
    let name = crate::filename_from_url(&job.descriptor.source.url);
    if name.is_empty() {
        "source".to_string()
    } else {
        name.to_string()
    }
}

async fn verify_checksum(job: &BuildJob, archive_path: &Path) -> Result<(), BuildError> {
    let expected = job.descriptor.source.blake3.clone();
    let url = job.descriptor.source.url.clone();
    let path = archive_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let actual = crate::types::Blake3Hash::of_file(&path)?;
        if actual != expected {
            std::fs::remove_file(&path).ok();
            return Err(BuildError::Integrity {
                url,
                expected: expected.as_str().to_string(),
                actual: actual.as_str().to_string(),
            });
        }
        Ok(())
    })
    .await
    .map_err(|e| BuildError::Internal(format!("verify task panicked: {e}")))?
}

async fn extract_source(
    job: &BuildJob,
    archive_path: &Path,
    src_dir: &Path,
) -> Result<(), BuildError> {
    let archive = archive_path.to_path_buf();
    let dest = src_dir.to_path_buf();
    let format = job.descriptor.source.format;
    let strip = job.descriptor.source.strip_components;

    tokio::task::spawn_blocking(move || extract::extract_archive(&archive, &dest, format, strip))
        .await
        .map_err(|e| BuildError::Internal(format!("extract task panicked: {e}")))?
        .map_err(BuildError::from)
}

/// Recursively copy a directory tree from `src` to `dst`.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> anyhow::Result<()> {
    fs_extra::dir::copy(
        src,
        dst,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| anyhow::anyhow!("Copy failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::catalog::testutil::{catalog_of, descriptor};
    use crate::runner::ShellStepRunner;
    use crate::testsupport::{ScriptedFetcher, tar_gz};
    use crate::types::Blake3Hash;
    use crate::ui::NullReporter;

    struct Fixture {
        _tmp: tempfile::TempDir,
        dirs: ExecutorDirs,
        job: BuildJob,
        archive: Vec<u8>,
    }

    fn fixture(steps: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ExecutorDirs {
            store: tmp.path().join("store"),
            tmp: tmp.path().join("tmp"),
            logs: tmp.path().join("logs"),
        };

        let archive = tar_gz(&[("pkg-1.0/hello.txt", "hi\n")]);

        let mut d = descriptor("widget", "1.0.0", &[]);
        d.source.blake3 = Blake3Hash::of_bytes(&archive);
        d.steps = steps.iter().map(|s| (*s).to_string()).collect();

        let catalog = catalog_of(vec![d]);
        let spec = crate::types::PackageSpec::parse("widget").unwrap();
        let resolution = crate::resolver::resolve(&spec, &catalog).unwrap();
        let fps = crate::fingerprint::compute_all(
            &resolution.graph,
            &resolution.order,
            &BTreeMap::new(),
        );

        let job = BuildJob {
            descriptor: resolution.graph.node(resolution.root).descriptor.clone(),
            fingerprint: fps[resolution.root].clone(),
            deps: Vec::new(),
            options: BTreeMap::new(),
        };

        Fixture {
            _tmp: tmp,
            dirs,
            job,
            archive,
        }
    }

    fn executor(fetcher: ScriptedFetcher, dirs: &ExecutorDirs) -> Executor {
        Executor::new(
            Arc::new(fetcher),
            Arc::new(ShellStepRunner),
            BackoffPolicy {
                initial: std::time::Duration::from_millis(1),
                jitter: 0.0,
                ..BackoffPolicy::default()
            },
            dirs.clone(),
        )
    }

    #[tokio::test]
    async fn test_full_pipeline_stages_artifact() {
        let fx = fixture(&["cp hello.txt $PREFIX/hello.txt"]);
        let exec = executor(ScriptedFetcher::new(fx.archive.clone(), 0), &fx.dirs);

        let artifact = exec
            .execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap();

        assert!(artifact.starts_with(&fx.dirs.store));
        assert_eq!(
            std::fs::read_to_string(artifact.join("hello.txt")).unwrap(),
            "hi\n"
        );
        // The job working directory is gone.
        assert_eq!(std::fs::read_dir(&fx.dirs.tmp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_failures_are_retried() {
        let fx = fixture(&["true"]);
        let fetcher = ScriptedFetcher::new(fx.archive.clone(), 2);
        let exec = executor(fetcher, &fx.dirs);

        exec.execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_retries_exhausted() {
        let fx = fixture(&["true"]);
        let exec = executor(ScriptedFetcher::new(fx.archive.clone(), 10), &fx.dirs);

        let err = exec
            .execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            BuildError::Fetch { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected Fetch, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_fatal_and_not_retried() {
        let mut fx = fixture(&["true"]);
        // Corrupt the served bytes; the declared checksum no longer matches.
        fx.archive.push(0);
        let fetcher = ScriptedFetcher::new(fx.archive.clone(), 0);
        let calls = fetcher.calls.clone();
        let exec = executor(fetcher, &fx.dirs);

        let err = exec
            .execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Integrity { .. }));
        // Exactly one fetch: integrity failures must never trigger a retry.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Nothing was staged.
        assert!(!fx.dirs.store.exists() || std::fs::read_dir(&fx.dirs.store).unwrap().count() == 0);
    }

    #[tokio::test]
    async fn test_step_failure_reports_index_and_tail() {
        let fx = fixture(&["true", "echo nope >&2; exit 7", "true"]);
        let exec = executor(ScriptedFetcher::new(fx.archive.clone(), 0), &fx.dirs);

        let err = exec
            .execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            BuildError::Step {
                index,
                total,
                source: StepError::Failed { code, tail },
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(total, 3);
                assert_eq!(code, Some(7));
                assert!(tail.contains("nope"));
            }
            other => panic!("expected Step, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_dependency_artifacts_exposed_to_steps() {
        let mut fx = fixture(&["cat $DEP_ZLIB/include/zlib.h > $PREFIX/copied.h"]);

        let dep_dir = fx.dirs.store.join("zlib/1.3.1-deadbeef");
        std::fs::create_dir_all(dep_dir.join("include")).unwrap();
        std::fs::write(dep_dir.join("include/zlib.h"), "zlib header\n").unwrap();
        fx.job.deps.push(DepArtifact {
            name: crate::types::PackageName::new("zlib"),
            path: dep_dir,
        });

        let exec = executor(ScriptedFetcher::new(fx.archive.clone(), 0), &fx.dirs);
        let artifact = exec
            .execute(&fx.job, &NullReporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(artifact.join("copied.h")).unwrap(),
            "zlib header\n"
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_job_never_fetches() {
        let fx = fixture(&["true"]);
        let fetcher = ScriptedFetcher::new(fx.archive.clone(), 0);
        let calls = fetcher.calls.clone();
        let exec = executor(fetcher, &fx.dirs);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .execute(&fx.job, &NullReporter, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
