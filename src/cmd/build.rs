//! `pkgsmith build` command.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use pkgsmith::ops::{self, BuildOptions};
use pkgsmith::ui::{ConsoleReporter, Reporter};

pub async fn run(package: &str, opts: BuildOptions, quiet: bool) -> Result<ExitCode> {
    let reporter = Arc::new(ConsoleReporter::new(quiet));

    // First Ctrl-C cancels cooperatively; a second one kills the process.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, stopping after in-flight steps...");
            interrupt.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let start = Instant::now();
    let report = ops::build(package, opts, reporter.clone(), cancel).await?;

    reporter.summary(&report, start.elapsed().as_secs_f64());
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
