//! pkgsmith CLI.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pkgsmith::ops::BuildOptions;

mod cmd;

#[derive(Parser)]
#[command(name = "pkgsmith")]
#[command(author, version, about = "pkgsmith - build packages from source")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Override the pkgsmith home directory
    #[arg(long, global = true, env = "PKGSMITH_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package and its dependencies
    Build {
        /// Package spec: pkg, pkg@1.2.3, or pkg@^1.2
        package: String,
        /// Parallel job bound (default: one per logical CPU)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,
        /// Keep building unaffected subtrees after a failure
        #[arg(short, long)]
        keep_going: bool,
        /// Recipe directory (default: <home>/recipes)
        #[arg(long)]
        recipes: Option<PathBuf>,
        /// Build option, KEY=VALUE; repeatable, overrides recipe options
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// Show the resolved build plan without building
    Plan {
        /// Package spec: pkg, pkg@1.2.3, or pkg@^1.2
        package: String,
        /// Recipe directory (default: <home>/recipes)
        #[arg(long)]
        recipes: Option<PathBuf>,
    },
    /// Inspect or clear the build cache
    Cache {
        #[command(subcommand)]
        action: cmd::cache::CacheAction,
    },
}

fn parse_options(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid option '{entry}', expected KEY=VALUE"))?;
        options.insert(key.to_string(), value.to_string());
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            package,
            jobs,
            keep_going,
            recipes,
            options,
        } => match parse_options(&options) {
            Ok(options) => {
                let opts = BuildOptions {
                    home: cli.home,
                    recipes_dir: recipes,
                    jobs,
                    keep_going,
                    options,
                };
                cmd::build::run(&package, opts, cli.quiet).await
            }
            Err(e) => Err(e),
        },
        Commands::Plan { package, recipes } => {
            let opts = BuildOptions {
                home: cli.home,
                recipes_dir: recipes,
                ..BuildOptions::default()
            };
            cmd::plan::run(&package, &opts)
        }
        Commands::Cache { action } => cmd::cache::run(action, cli.home),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
