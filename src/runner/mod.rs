//! Build step execution.
//!
//! Each recipe declares its build as an ordered list of shell steps. The
//! [`StepRunner`] trait executes one step inside a job working directory;
//! the shell implementation runs `/bin/sh -c <step>` with a sanitised
//! environment and output captured to the job's log file.
//!
//! ## Environment contract
//!
//! Build steps receive exactly these variables (nothing more):
//!
//! | Variable | Value |
//! |---|---|
//! | `PATH` | Dependency `bin/` dirs, then `/usr/bin:/bin:/usr/sbin:/sbin` |
//! | `HOME` | Job working directory (prevents reading host dotfiles) |
//! | `TERM` | `dumb` |
//! | `LANG` | `en_US.UTF-8` |
//! | `CC` / `CXX` | `cc` / `c++` |
//! | `PREFIX` / `OUTPUT` | Install destination (the job's stage directory) |
//! | `DESTDIR` | Empty string |
//! | `JOBS` | Logical CPU count |
//! | `DEP_<NAME>` | Per-dependency staged artifact path |
//! | `OPT_<KEY>` | Per-build-option value |
//! | `CFLAGS` / `CPPFLAGS` | `-I` flags for each dependency's `include/` |
//! | `LDFLAGS` | `-L` flags for each dependency's `lib/` |
//! | `CPATH`, `C_INCLUDE_PATH`, `CPLUS_INCLUDE_PATH` | Colon-separated include paths |
//! | `LIBRARY_PATH`, `LD_LIBRARY_PATH` | Colon-separated library paths |
//! | `PKG_CONFIG_PATH` | Colon-separated `lib/pkgconfig` paths |
//! | `SOURCE_DATE_EPOCH` | `0` (epoch zero for reproducible timestamps) |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::PackageName;

/// Fixed epoch for `SOURCE_DATE_EPOCH`. Zero keeps embedded timestamps
/// identical across builds regardless of when the build actually ran.
const SOURCE_DATE_EPOCH: &str = "0";

/// Lines of captured output attached to a step failure.
const FAILURE_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("exit status {code:?}; last output:\n{tail}")]
    Failed { code: Option<i32>, tail: String },

    #[error("Step cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A dependency's staged artifact, exposed to build steps.
#[derive(Debug, Clone)]
pub struct DepArtifact {
    pub name: PackageName,
    pub path: PathBuf,
}

/// Everything a runner needs to execute one step.
pub struct StepContext<'a> {
    /// Working directory the step runs in (the job's extracted source tree).
    pub workdir: &'a Path,
    /// Full environment; the host environment is never inherited.
    pub env: &'a [(String, String)],
    /// Log file receiving the step's stdout and stderr, appended.
    pub log_path: &'a Path,
    pub cancel: &'a CancellationToken,
}

/// Executes one declared build step inside a working directory.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &str, ctx: &StepContext<'_>) -> Result<(), StepError>;
}

/// Runs steps via `/bin/sh -c`, killing the child on cancellation.
#[derive(Debug, Clone, Default)]
pub struct ShellStepRunner;

#[async_trait]
impl StepRunner for ShellStepRunner {
    async fn run(&self, step: &str, ctx: &StepContext<'_>) -> Result<(), StepError> {
        use std::io::Write;

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(ctx.log_path)?;
        writeln!(log, "+ {step}")?;

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(step)
            .current_dir(ctx.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);

        // Start from a blank slate so host env vars never leak in.
        cmd.env_clear();
        for (key, value) in ctx.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let status = tokio::select! {
            status = child.wait() => status?,
            () = ctx.cancel.cancelled() => {
                child.kill().await.ok();
                debug!(step, "step killed by cancellation");
                return Err(StepError::Cancelled);
            }
        };

        if !status.success() {
            return Err(StepError::Failed {
                code: status.code(),
                tail: read_last_lines(ctx.log_path, FAILURE_TAIL_LINES).unwrap_or_default(),
            });
        }

        Ok(())
    }
}

/// Assemble the per-job step environment. The same environment is used for
/// every step of a job.
pub fn job_env(
    stage_dir: &Path,
    home_dir: &Path,
    deps: &[DepArtifact],
    options: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();

    let mut path_dirs = vec![
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ];

    let mut include_paths: Vec<String> = Vec::new();
    let mut library_paths: Vec<String> = Vec::new();
    let mut pkg_config_paths: Vec<String> = Vec::new();
    let mut cflags: Vec<String> = Vec::new();
    let mut ldflags: Vec<String> = Vec::new();

    for dep in deps {
        env.push((
            format!("DEP_{}", dep.name.env_key()),
            dep.path.to_string_lossy().to_string(),
        ));

        // Tool discovery (autoconf, cmake, and friends built as deps).
        let bin = dep.path.join("bin");
        if bin.is_dir() {
            path_dirs.insert(0, bin.to_string_lossy().to_string());
        }
        let include = dep.path.join("include");
        if include.is_dir() {
            cflags.push(format!("-I{}", include.display()));
            include_paths.push(include.to_string_lossy().to_string());
        }
        let lib = dep.path.join("lib");
        if lib.is_dir() {
            ldflags.push(format!("-L{}", lib.display()));
            library_paths.push(lib.to_string_lossy().to_string());
        }
        let pkgconfig = dep.path.join("lib/pkgconfig");
        if pkgconfig.is_dir() {
            pkg_config_paths.push(pkgconfig.to_string_lossy().to_string());
        }
    }

    env.push(("PATH".to_string(), path_dirs.join(":")));
    env.push(("HOME".to_string(), home_dir.to_string_lossy().to_string()));
    env.push(("TERM".to_string(), "dumb".to_string()));
    env.push(("LANG".to_string(), "en_US.UTF-8".to_string()));
    env.push(("CC".to_string(), "cc".to_string()));
    env.push(("CXX".to_string(), "c++".to_string()));
    env.push((
        "PREFIX".to_string(),
        stage_dir.to_string_lossy().to_string(),
    ));
    env.push((
        "OUTPUT".to_string(),
        stage_dir.to_string_lossy().to_string(),
    ));
    env.push(("DESTDIR".to_string(), String::new()));
    env.push(("JOBS".to_string(), num_cpus::get().to_string()));
    env.push((
        "SOURCE_DATE_EPOCH".to_string(),
        SOURCE_DATE_EPOCH.to_string(),
    ));

    for (key, value) in options {
        let key = key.to_uppercase().replace(['-', '.'], "_");
        env.push((format!("OPT_{key}"), value.clone()));
    }

    if !cflags.is_empty() {
        let flags = cflags.join(" ");
        env.push(("CFLAGS".to_string(), flags.clone()));
        env.push(("CPPFLAGS".to_string(), flags));
    }
    if !ldflags.is_empty() {
        env.push(("LDFLAGS".to_string(), ldflags.join(" ")));
    }
    if !include_paths.is_empty() {
        let joined = include_paths.join(":");
        env.push(("CPATH".to_string(), joined.clone()));
        env.push(("C_INCLUDE_PATH".to_string(), joined.clone()));
        env.push(("CPLUS_INCLUDE_PATH".to_string(), joined));
    }
    if !library_paths.is_empty() {
        let joined = library_paths.join(":");
        env.push(("LIBRARY_PATH".to_string(), joined.clone()));
        env.push(("LD_LIBRARY_PATH".to_string(), joined));
    }
    if !pkg_config_paths.is_empty() {
        env.push(("PKG_CONFIG_PATH".to_string(), pkg_config_paths.join(":")));
    }

    env
}

/// Read the last N lines from a file efficiently.
///
/// Seeks to near the end and reads a fixed-size tail buffer instead of
/// loading the whole file, so huge build logs stay cheap to sample.
pub fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    // At most 16KB from the end (enough for ~400 lines at 40 chars each).
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;

    // If we seeked mid-file, skip the first (partial) line in-place.
    let content = if seek_pos > 0 {
        buffer
            .find('\n')
            .map_or(buffer.as_str(), |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context<'a>(
        workdir: &'a Path,
        env: &'a [(String, String)],
        log_path: &'a Path,
        cancel: &'a CancellationToken,
    ) -> StepContext<'a> {
        StepContext {
            workdir,
            env,
            log_path,
            cancel,
        }
    }

    #[tokio::test]
    async fn test_successful_step_logs_output() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("build.log");
        let cancel = CancellationToken::new();
        let env = vec![("PATH".to_string(), "/usr/bin:/bin".to_string())];

        ShellStepRunner
            .run("echo hello from step", &context(tmp.path(), &env, &log, &cancel))
            .await
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("+ echo hello from step"));
        assert!(logged.contains("hello from step"));
    }

    #[tokio::test]
    async fn test_failed_step_reports_code_and_tail() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("build.log");
        let cancel = CancellationToken::new();
        let env = vec![("PATH".to_string(), "/usr/bin:/bin".to_string())];

        let err = ShellStepRunner
            .run(
                "echo compiling widget; exit 3",
                &context(tmp.path(), &env, &log, &cancel),
            )
            .await
            .unwrap_err();

        match err {
            StepError::Failed { code, tail } => {
                assert_eq!(code, Some(3));
                assert!(tail.contains("compiling widget"));
            }
            other => panic!("expected Failed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_step() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("build.log");
        let cancel = CancellationToken::new();
        let env = vec![("PATH".to_string(), "/usr/bin:/bin".to_string())];

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = ShellStepRunner
            .run("sleep 30", &context(tmp.path(), &env, &log, &cancel))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Cancelled));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_host_env_never_leaks() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("build.log");
        let cancel = CancellationToken::new();
        // SAFETY: test process is single-threaded at this point in practice,
        // and the variable is only read back by the child process.
        unsafe { std::env::set_var("PKGSMITH_LEAK_CANARY", "leaked") };
        let env = vec![("PATH".to_string(), "/usr/bin:/bin".to_string())];

        ShellStepRunner
            .run(
                "echo canary=${PKGSMITH_LEAK_CANARY:-clean}",
                &context(tmp.path(), &env, &log, &cancel),
            )
            .await
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("canary=clean"));
    }

    #[test]
    fn test_job_env_contract() {
        let tmp = tempdir().unwrap();
        let dep_root = tmp.path().join("zlib");
        std::fs::create_dir_all(dep_root.join("include")).unwrap();
        std::fs::create_dir_all(dep_root.join("lib/pkgconfig")).unwrap();
        std::fs::create_dir_all(dep_root.join("bin")).unwrap();

        let deps = vec![DepArtifact {
            name: PackageName::new("zlib"),
            path: dep_root.clone(),
        }];
        let mut options = BTreeMap::new();
        options.insert("static".to_string(), "true".to_string());

        let stage = tmp.path().join("stage");
        let env = job_env(&stage, tmp.path(), &deps, &options);
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("PREFIX"), Some(stage.to_str().unwrap()));
        assert_eq!(get("OPT_STATIC"), Some("true"));
        assert_eq!(
            get("DEP_ZLIB"),
            Some(dep_root.to_str().unwrap())
        );
        assert!(get("CFLAGS").unwrap().contains("include"));
        assert!(get("LDFLAGS").unwrap().contains("lib"));
        assert!(get("PKG_CONFIG_PATH").unwrap().contains("pkgconfig"));
        assert!(get("PATH").unwrap().starts_with(dep_root.join("bin").to_str().unwrap()));
        assert_eq!(get("SOURCE_DATE_EPOCH"), Some("0"));
    }

    #[test]
    fn test_read_last_lines() {
        let tmp = tempdir().unwrap();
        let log = tmp.path().join("log");
        let content: String = (0..100).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&log, content).unwrap();

        let tail = read_last_lines(&log, 3).unwrap();
        assert_eq!(tail, "line 97\nline 98\nline 99");
    }
}
