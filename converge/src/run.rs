//! Orchestration for `converge run`, `clean`, and `files`.
//!
//! A run: create a workspace off the mainline, drive it with the controller,
//! then clean up on success or abandonment. Exhausted and merge-failed
//! workspaces are kept for inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::controller::{Controller, Limits, RunReport};
use crate::core::sampler::FailureSampler;
use crate::core::state::Terminal;
use crate::core::types::{Task, Workspace};
use crate::io::agent::{Agent, AgentInvoker, CommandAgent};
use crate::io::config::{Config, Overrides, resolve_config};
use crate::io::context::ContextBuilder;
use crate::io::files::scope_files;
use crate::io::merge::GitIntegrator;
use crate::io::validator::{CommandValidator, Validator};
use crate::io::workspace::WorkspaceManager;
use crate::signals::CancelFlag;

/// Inputs for one `converge run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repo: PathBuf,
    pub task: String,
    pub config_path: Option<PathBuf>,
    pub overrides: Overrides,
    /// Seed for focus-test sampling; entropy when unset.
    pub seed: Option<u64>,
}

/// Load the effective configuration for `repo`.
pub fn load_effective_config(
    repo: &Path,
    config_path: Option<&Path>,
    overrides: &Overrides,
) -> Result<Config> {
    resolve_config(repo, config_path)?.apply_overrides(overrides)
}

/// Run a task with the configured command agent.
pub fn run_task(opts: &RunOptions, cancel: CancelFlag) -> Result<RunReport> {
    let cfg = load_effective_config(&opts.repo, opts.config_path.as_deref(), &opts.overrides)?;
    let agent = CommandAgent::new(&cfg.agent);
    run_task_with(&opts.repo, &Task::new(opts.task.as_str()), &cfg, &agent, opts.seed, cancel)
}

/// Run a task with any agent: create the workspace, drive it, finalize it.
pub fn run_task_with<A: Agent>(
    repo: &Path,
    task: &Task,
    cfg: &Config,
    agent: &A,
    seed: Option<u64>,
    cancel: CancelFlag,
) -> Result<RunReport> {
    let manager = WorkspaceManager::new(repo, cfg)?;
    let validator = CommandValidator::new(cfg);
    let ws = manager.create(task)?;
    info!(task = task.description(), branch = %ws.branch, "run started");

    let report = drive_workspace(&manager, &ws, task, cfg, &validator, agent, seed, cancel)
        .with_context(|| format!("run aborted; workspace kept at {}", ws.path.display()))?;
    finalize(&manager, &ws, &report);
    Ok(report)
}

/// Drive an existing workspace to a terminal outcome.
#[allow(clippy::too_many_arguments)]
pub fn drive_workspace<V: Validator, A: Agent>(
    manager: &WorkspaceManager,
    ws: &Workspace,
    task: &Task,
    cfg: &Config,
    validator: &V,
    agent: &A,
    seed: Option<u64>,
    cancel: CancelFlag,
) -> Result<RunReport> {
    let files = scope_files(&ws.path, cfg.all_files, &cfg.source_extensions)?;
    let sampler = match seed {
        Some(seed) => FailureSampler::seeded(seed),
        None => FailureSampler::from_entropy(),
    };
    let context = ContextBuilder::new(validator, sampler, cfg.context.clone());
    let invoker = AgentInvoker::new(agent, cfg, files);
    let integrator = GitIntegrator::new(manager.root(), cfg, validator, task);
    let limits = Limits {
        max_cycles: cfg.max_cycles,
        max_integrations: cfg.max_integrations,
        resolve_attempts: cfg.resolve_attempts,
    };
    let mut controller = Controller::new(task, validator, context, invoker, &integrator, limits, cancel);
    controller.drive(ws)
}

fn finalize(manager: &WorkspaceManager, ws: &Workspace, report: &RunReport) {
    match report.outcome {
        Terminal::Success | Terminal::Abandoned => {
            if let Err(err) = manager.destroy(ws) {
                warn!(err = %format!("{err:#}"), path = %ws.path.display(), "workspace cleanup failed");
            }
        }
        Terminal::Exhausted | Terminal::MergeFailed => {
            info!(
                outcome = report.outcome.as_str(),
                branch = %ws.branch,
                path = %ws.path.display(),
                "workspace kept for inspection"
            );
        }
    }
}

/// Destroy a kept workspace by branch name.
pub fn clean_workspace(repo: &Path, branch: &str, cfg: &Config) -> Result<Workspace> {
    let manager = WorkspaceManager::new(repo, cfg)?;
    let ws = manager.open(branch)?;
    manager.destroy(&ws)?;
    Ok(ws)
}

/// The file scope an agent would see for `repo`.
pub fn list_scope(repo: &Path, cfg: &Config) -> Result<Vec<String>> {
    let manager = WorkspaceManager::new(repo, cfg)?;
    scope_files(manager.root(), cfg.all_files, &cfg.source_extensions)
}
