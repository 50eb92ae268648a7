//! Merge Coordinator: brings the workspace up to date with the mainline and
//! integrates it back.
//!
//! All merging happens inside the workspace worktree. The mainline ref is
//! written in one place only: [`GitIntegrator::publish`], which fast-forwards
//! it to the validated workspace head and pushes it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::conflict::has_conflict_markers;
use crate::core::types::{MergeOutcome, Task, Workspace};
use crate::errors::is_fatal;
use crate::io::config::Config;
use crate::io::git::Git;
use crate::io::validator::Validator;

/// Integrates a workspace into its mainline.
pub trait Integrator {
    fn integrate(&self, ws: &Workspace) -> Result<MergeOutcome>;
}

/// Integrator backed by git and a re-validation of the merged tree.
pub struct GitIntegrator<'a, V: Validator> {
    repo: Git,
    validator: &'a V,
    remote: String,
    push: bool,
    commit_message: String,
}

impl<'a, V: Validator> GitIntegrator<'a, V> {
    pub fn new(repo_root: &Path, cfg: &Config, validator: &'a V, task: &Task) -> Self {
        let headline = task.description().lines().next().unwrap_or_default();
        Self {
            repo: Git::new(repo_root),
            validator,
            remote: cfg.remote.clone(),
            push: cfg.push,
            commit_message: format!("converge: {headline}"),
        }
    }

    /// Commit the agent's work, concluding a resolved merge if one is pending.
    ///
    /// Returns the paths that still carry conflict markers.
    fn settle(&self, ws_git: &Git) -> Result<Vec<String>> {
        if ws_git.merge_in_progress()? {
            let unresolved = unresolved_paths(ws_git.workdir(), &ws_git.unmerged_paths()?)?;
            if !unresolved.is_empty() {
                return Ok(unresolved);
            }
            debug!("concluding resolved merge");
            ws_git.commit_merge()?;
        }
        if ws_git.commit_all(&self.commit_message)? {
            debug!("committed workspace changes");
        }
        Ok(Vec::new())
    }

    /// Refs the workspace must absorb: the remote mainline tip (fetched
    /// first) and the local mainline.
    fn merge_sources(&self, mainline: &str, has_remote: bool) -> Result<Vec<String>> {
        let mut sources = Vec::new();
        if has_remote {
            self.repo.fetch(&self.remote)?;
            let remote_ref = format!("refs/remotes/{}/{mainline}", self.remote);
            if self.repo.rev_exists(&remote_ref)? {
                sources.push(remote_ref);
            }
        }
        sources.push(mainline.to_string());
        Ok(sources)
    }

    fn checked_out_at(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .repo
            .worktree_list()?
            .into_iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
            .map(|entry| entry.path))
    }

    /// Move the mainline to the workspace head and publish both branches.
    fn publish(&self, ws: &Workspace, pushing: bool) -> Result<MergeOutcome> {
        let mainline = &ws.parent_branch;
        let checked_out = self.checked_out_at(mainline)?;
        let before = self.repo.rev_parse(mainline)?;

        if pushing && !self.repo.push(&self.remote, &ws.branch)? {
            warn!(branch = %ws.branch, "workspace branch not pushed");
        }
        self.repo
            .fast_forward(mainline, &ws.branch, checked_out.as_deref())
            .with_context(|| format!("fast-forward {mainline} to {}", ws.branch))?;

        if pushing && !self.repo.push(&self.remote, mainline)? {
            warn!(mainline = %mainline, "mainline moved upstream; restoring local ref");
            self.repo
                .reset_branch(mainline, &before, checked_out.as_deref())
                .with_context(|| format!("restore {mainline}"))?;
            return Ok(MergeOutcome::stale());
        }
        info!(mainline = %mainline, pushed = pushing, "workspace integrated");
        Ok(MergeOutcome::merged(pushing))
    }
}

impl<V: Validator> Integrator for GitIntegrator<'_, V> {
    #[instrument(skip_all, fields(branch = %ws.branch, mainline = %ws.parent_branch))]
    fn integrate(&self, ws: &Workspace) -> Result<MergeOutcome> {
        let ws_git = Git::new(&ws.path);
        let mainline = ws.parent_branch.as_str();

        let unresolved = self.settle(&ws_git)?;
        if !unresolved.is_empty() {
            info!(paths = unresolved.len(), "conflict markers remain");
            return Ok(MergeOutcome::conflicted(unresolved));
        }

        let has_remote = self.repo.has_remote(&self.remote)?;
        let sources = match self.merge_sources(mainline, has_remote) {
            Ok(sources) => sources,
            Err(err) => return retryable(err, "sync with remote failed"),
        };
        for source in sources {
            if !ws_git.merge(&source)? {
                let paths = ws_git.unmerged_paths()?;
                info!(source = %source, paths = paths.len(), "merge left conflicts");
                return Ok(MergeOutcome::conflicted(paths));
            }
        }

        let result = self.validator.run(ws).context("validate merged workspace")?;
        if !result.passed {
            info!(summary = %result.summary(), "merged workspace regressed");
            return Ok(MergeOutcome::regressed(result));
        }

        match self.publish(ws, self.push && has_remote) {
            Ok(outcome) => Ok(outcome),
            Err(err) => retryable(err, "publish failed"),
        }
    }
}

/// Turn a non-fatal git failure into an outcome the controller retries.
fn retryable(err: anyhow::Error, what: &str) -> Result<MergeOutcome> {
    if is_fatal(&err) {
        return Err(err);
    }
    let message = format!("{err:#}");
    warn!(err = %message, step = what, "git step failed; will retry integration");
    Ok(MergeOutcome::git_failed(message))
}

/// Unmerged paths whose working copy still has conflict markers.
pub fn unresolved_paths(workdir: &Path, unmerged: &[String]) -> Result<Vec<String>> {
    let mut unresolved = Vec::new();
    for path in unmerged {
        let full = workdir.join(path);
        if !full.exists() {
            continue;
        }
        let bytes = fs::read(&full).with_context(|| format!("read {}", full.display()))?;
        if has_conflict_markers(&String::from_utf8_lossy(&bytes)) {
            unresolved.push(path.clone());
        }
    }
    Ok(unresolved)
}
