//! `pkgsmith plan` command.

use std::process::ExitCode;

use anyhow::Result;

use pkgsmith::ops::{self, BuildOptions};

pub fn run(package: &str, opts: &BuildOptions) -> Result<ExitCode> {
    let plan = ops::plan(package, opts)?;

    println!("Build order for {package} ({} packages):", plan.len());
    for entry in &plan {
        let deps = if entry.deps.is_empty() {
            String::new()
        } else {
            format!(
                "  <- {}",
                entry
                    .deps
                    .iter()
                    .map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        let cached = if entry.cached { "  [cached]" } else { "" };
        println!(
            "  {}@{}  {}{cached}{deps}",
            entry.name,
            entry.version,
            entry.fingerprint.short(),
        );
    }

    Ok(ExitCode::SUCCESS)
}
