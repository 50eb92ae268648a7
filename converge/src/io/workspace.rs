//! Workspace Manager: isolated, branch-backed git worktrees.
//!
//! Each run forks a uniquely named `converge/*` branch off the mainline and
//! checks it out under `<repo>/.converge/worktrees/`. The mainline's own
//! working copy is never touched here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ARTIFACTS_DIR, BRANCH_PREFIX, Task, Workspace};
use crate::errors::EnvironmentError;
use crate::io::artifacts::ArtifactPaths;
use crate::io::config::Config;
use crate::io::git::Git;

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Creates and destroys workspaces for one repository.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    git: Git,
    root: PathBuf,
    workspace_dir: PathBuf,
    configured_mainline: Option<String>,
}

impl WorkspaceManager {
    /// Open the repository containing `repo`.
    ///
    /// Fails with [`EnvironmentError`] when `repo` is not inside a git work tree.
    pub fn new(repo: &Path, cfg: &Config) -> Result<Self> {
        let probe = Git::new(repo);
        if !probe.is_work_tree() {
            return Err(EnvironmentError::new(format!(
                "{} is not inside a git work tree",
                repo.display()
            ))
            .into());
        }
        let root = probe.toplevel()?;
        debug!(root = %root.display(), "repository root");
        Ok(Self {
            git: Git::new(&root),
            workspace_dir: root.join(&cfg.workspace_dir),
            configured_mainline: cfg.mainline.clone(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The branch workspaces fork from: the configured one, else the current branch.
    pub fn mainline(&self) -> Result<String> {
        let branch = match &self.configured_mainline {
            Some(branch) => branch.clone(),
            None => self.git.current_branch().map_err(|_| {
                EnvironmentError::new("HEAD is detached; pass --mainline or set `mainline`")
            })?,
        };
        if !self.git.branch_exists(&branch)? {
            return Err(EnvironmentError::new(format!("mainline branch {branch} does not exist")).into());
        }
        Ok(branch)
    }

    /// Fork a fresh branch off the mainline tip into a new worktree.
    #[instrument(skip_all, fields(slug = task.slug()))]
    pub fn create(&self, task: &Task) -> Result<Workspace> {
        let mainline = self.mainline()?;
        self.ensure_artifacts_excluded()?;

        let created_at = Utc::now();
        let name = workspace_name(
            task.slug(),
            &created_at.format(STAMP_FORMAT).to_string(),
            &short_id(),
        );
        let branch = format!("{BRANCH_PREFIX}{name}");
        let path = self.workspace_dir.join(&name);

        fs::create_dir_all(&self.workspace_dir).with_context(|| {
            format!("create workspace dir {}", self.workspace_dir.display())
        })?;
        self.git
            .worktree_add(&path, &branch, &mainline)
            .with_context(|| format!("create workspace for {branch}"))?;
        ArtifactPaths::new(&path).ensure_dir()?;

        info!(branch = %branch, path = %path.display(), parent = %mainline, "workspace created");
        Ok(Workspace {
            path,
            branch,
            parent_branch: mainline,
            created_at,
        })
    }

    /// Rebuild the handle of a kept workspace from its branch name.
    pub fn open(&self, branch: &str) -> Result<Workspace> {
        let Some(name) = branch.strip_prefix(BRANCH_PREFIX) else {
            bail!("{branch} is not a workspace branch (expected {BRANCH_PREFIX}*)");
        };
        let registered = self
            .git
            .worktree_list()?
            .into_iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
            .map(|entry| entry.path);
        if registered.is_none() && !self.git.branch_exists(branch)? {
            bail!("no workspace found for {branch}");
        }
        Ok(Workspace {
            path: registered.unwrap_or_else(|| self.workspace_dir.join(name)),
            branch: branch.to_string(),
            parent_branch: self.mainline()?,
            created_at: parse_created_at(name).unwrap_or_else(Utc::now),
        })
    }

    /// Remove the worktree, its directory, and its branch.
    ///
    /// Idempotent: pieces that are already gone are skipped.
    #[instrument(skip_all, fields(branch = %ws.branch))]
    pub fn destroy(&self, ws: &Workspace) -> Result<()> {
        let canonical = fs::canonicalize(&ws.path).ok();
        let registered = self.git.worktree_list()?.into_iter().find(|entry| {
            entry.branch.as_deref() == Some(ws.branch.as_str())
                || entry.path == ws.path
                || canonical.as_deref() == Some(entry.path.as_path())
        });
        if let Some(entry) = registered
            && let Err(err) = self.git.worktree_remove(&entry.path)
        {
            warn!(err = %format!("{err:#}"), "worktree remove failed; removing directory");
        }
        if ws.path.exists() {
            fs::remove_dir_all(&ws.path)
                .with_context(|| format!("remove workspace dir {}", ws.path.display()))?;
        }
        self.git.worktree_prune()?;
        if self.git.branch_exists(&ws.branch)? {
            self.git.delete_branch(&ws.branch)?;
        }
        info!(path = %ws.path.display(), "workspace destroyed");
        Ok(())
    }

    /// Keep converge artifacts out of every worktree's status.
    fn ensure_artifacts_excluded(&self) -> Result<()> {
        let exclude = self.git.common_dir()?.join("info").join("exclude");
        let pattern = format!("/{ARTIFACTS_DIR}/");
        let existing = match fs::read_to_string(&exclude) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("read {}", exclude.display())),
        };
        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(());
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&pattern);
        updated.push('\n');
        if let Some(parent) = exclude.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&exclude, updated).with_context(|| format!("write {}", exclude.display()))?;
        debug!(path = %exclude.display(), "artifacts dir excluded");
        Ok(())
    }
}

pub fn workspace_name(slug: &str, stamp: &str, suffix: &str) -> String {
    format!("{slug}-{stamp}-{suffix}")
}

fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

/// Recover the creation time embedded in a workspace name.
fn parse_created_at(name: &str) -> Option<DateTime<Utc>> {
    let mut parts = name.rsplitn(4, '-');
    let _suffix = parts.next()?;
    let time = parts.next()?;
    let date = parts.next()?;
    let naive = NaiveDateTime::parse_from_str(&format!("{date}-{time}"), STAMP_FORMAT).ok()?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn names_carry_slug_stamp_and_suffix() {
        assert_eq!(
            workspace_name("fix-login", "20260102-030405", "ab12cd"),
            "fix-login-20260102-030405-ab12cd"
        );
        let id = short_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn created_at_round_trips_through_name() {
        let at = parse_created_at("fix-login-20260102-030405-ab12cd").expect("parse");
        assert_eq!((at.year(), at.month(), at.day()), (2026, 1, 2));
        assert_eq!((at.hour(), at.minute(), at.second()), (3, 4, 5));
        assert!(parse_created_at("not-a-workspace").is_none());
    }

    #[test]
    fn non_repository_is_an_environment_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = WorkspaceManager::new(temp.path(), &Config::default()).unwrap_err();
        assert!(err.downcast_ref::<EnvironmentError>().is_some());
    }
}
