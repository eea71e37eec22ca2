//! `pkgsmith cache` command.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;

use pkgsmith::cache::{BuildCache, BuildStatus};

#[derive(Subcommand)]
pub enum CacheAction {
    /// List recorded builds
    List,
    /// Drop all cache records (staged artifacts stay in the store)
    Clear,
}

pub fn run(action: CacheAction, home: Option<PathBuf>) -> Result<ExitCode> {
    let home = home.unwrap_or_else(pkgsmith::smith_home);
    let mut cache = BuildCache::load_or_create(&home.join("cache"));

    match action {
        CacheAction::List => {
            if cache.is_empty() {
                println!("Cache is empty.");
                return Ok(ExitCode::SUCCESS);
            }
            for record in cache.records() {
                let status = match &record.status {
                    BuildStatus::Success => "success".to_string(),
                    BuildStatus::Failed { error } => format!("failed: {error}"),
                };
                println!(
                    "{}  {}@{}  {status}",
                    record.fingerprint.short(),
                    record.package,
                    record.version,
                );
            }
        }
        CacheAction::Clear => {
            let count = cache.len();
            cache.clear()?;
            println!("Cleared {count} cache record(s).");
        }
    }

    Ok(ExitCode::SUCCESS)
}
