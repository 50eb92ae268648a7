//! `converge`: run a coding agent against a repository until its tests pass.
//!
//! Every run works in its own worktree under `.converge/worktrees/` and only
//! touches the mainline once the gate has opened and the merge validated.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use converge::exit_codes;
use converge::io::config::{Overrides, render_config};
use converge::run::{RunOptions, clean_workspace, list_scope, load_effective_config, run_task};
use converge::signals::CancelFlag;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "converge",
    version,
    about = "Iterate a coding agent until tests pass, then merge"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task in a fresh workspace and integrate it on success.
    Run {
        /// Natural-language task for the agent.
        task: String,
        /// Repository to work on.
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Outer cycle budget (overrides the config file).
        #[arg(long)]
        max_cycles: Option<u32>,
        /// Integrate locally only; never push.
        #[arg(long)]
        no_push: bool,
        /// Expose all tracked files to the agent, not just source files.
        #[arg(long)]
        all_files: bool,
        /// Branch to integrate into (default: the current branch).
        #[arg(long)]
        mainline: Option<String>,
        /// Config file (default: `<repo>/.converge/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Seed for focus-test sampling.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Remove a kept workspace and its branch.
    Clean {
        /// Workspace branch, e.g. `converge/fix-parser-20260101-120000-ab12cd`.
        branch: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Print the files the agent would be pointed at.
    Files {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        all_files: bool,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    converge::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            repo,
            max_cycles,
            no_push,
            all_files,
            mainline,
            config,
            seed,
        } => {
            let opts = RunOptions {
                repo,
                task,
                config_path: config,
                overrides: Overrides {
                    max_cycles,
                    mainline,
                    no_push,
                    all_files,
                },
                seed,
            };
            cmd_run(&opts)
        }
        Command::Clean { branch, repo } => {
            let cfg = load_effective_config(&repo, None, &Overrides::default())?;
            let ws = clean_workspace(&repo, &branch, &cfg)?;
            info!(branch = %ws.branch, "workspace removed");
            Ok(exit_codes::OK)
        }
        Command::Files { repo, all_files } => {
            let overrides = Overrides {
                all_files,
                ..Overrides::default()
            };
            let cfg = load_effective_config(&repo, None, &overrides)?;
            for file in list_scope(&repo, &cfg)? {
                println!("{file}");
            }
            Ok(exit_codes::OK)
        }
        Command::Config { repo, config } => {
            let cfg = load_effective_config(&repo, config.as_deref(), &Overrides::default())?;
            print!("{}", render_config(&cfg)?);
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(opts: &RunOptions) -> Result<i32> {
    let cancel = CancelFlag::new();
    cancel.install_ctrl_c()?;
    let report = run_task(opts, cancel)?;
    println!(
        "{}",
        serde_json::to_string(&report).context("serialize run report")?
    );
    Ok(exit_codes::for_outcome(report.outcome))
}
