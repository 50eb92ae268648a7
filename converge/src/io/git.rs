//! Git adapter for workspace and merge operations.
//!
//! Every repository mutation goes through this wrapper, so the set of git
//! commands converge can issue stays small and auditable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name; `None` for detached or bare entries.
    pub branch: Option<String>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when the working directory is inside a git work tree.
    pub fn is_work_tree(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| {
                out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true"
            })
            .unwrap_or(false)
    }

    /// Absolute path of the work tree root.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// The repository's common git dir (shared by all worktrees).
    pub fn common_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--path-format=absolute", "--git-common-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Resolve a revision to its full SHA.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run_capture(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(out.trim().to_string())
    }

    pub fn rev_exists(&self, rev: &str) -> Result<bool> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self
            .run(&["rev-parse", "--verify", "--quiet", &spec])?
            .status
            .success())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Force-delete a local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Create `branch` at `base` and check it out in a new worktree at `path`.
    #[instrument(skip_all, fields(branch, base))]
    pub fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        debug!(path = %path_str, "adding worktree");
        self.run_checked(&["worktree", "add", "-b", branch, &path_str, base])?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        debug!(path = %path_str, "removing worktree");
        self.run_checked(&["worktree", "remove", "--force", &path_str])?;
        Ok(())
    }

    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Stage everything and commit with a message.
    ///
    /// If nothing changed, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// True while a merge started in this worktree awaits its commit.
    pub fn merge_in_progress(&self) -> Result<bool> {
        Ok(self
            .run(&["rev-parse", "--verify", "--quiet", "MERGE_HEAD"])?
            .status
            .success())
    }

    /// Merge `rev` into the current branch.
    ///
    /// Returns Ok(false) when the merge stopped on conflicts; the merge is left
    /// in progress for the caller to resolve or abort.
    #[instrument(skip_all, fields(rev))]
    pub fn merge(&self, rev: &str) -> Result<bool> {
        let out = self.run(&["merge", "--no-edit", "--no-ff", rev])?;
        if out.status.success() {
            debug!(rev, "merge clean");
            return Ok(true);
        }
        if self.merge_in_progress()? {
            debug!(rev, "merge stopped on conflicts");
            return Ok(false);
        }
        Err(anyhow!(
            "git merge {rev} failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ))
    }

    /// Paths git still considers unmerged.
    pub fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Conclude an in-progress merge with git's prepared message.
    pub fn commit_merge(&self) -> Result<()> {
        self.add_all()?;
        self.run_checked(&["commit", "--no-edit"])?;
        Ok(())
    }

    pub fn has_remote(&self, remote: &str) -> Result<bool> {
        let out = self.run(&["remote"])?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .any(|l| l.trim() == remote))
    }

    #[instrument(skip_all, fields(remote))]
    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.run_checked(&["fetch", "--quiet", remote])?;
        Ok(())
    }

    /// Push `branch` to `remote`. Returns Ok(false) when the remote rejects it.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<bool> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let out = self.run(&["push", "--quiet", remote, &refspec])?;
        if !out.status.success() {
            warn!(
                remote,
                branch,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "push rejected"
            );
        }
        Ok(out.status.success())
    }

    /// Fast-forward local `branch` to `target`, wherever `branch` is checked out.
    ///
    /// `checked_out_at` is the worktree holding `branch`, if any; a checked-out
    /// branch is advanced with `merge --ff-only` so its index and files follow.
    #[instrument(skip_all, fields(branch, target))]
    pub fn fast_forward(&self, branch: &str, target: &str, checked_out_at: Option<&Path>) -> Result<()> {
        match checked_out_at {
            Some(path) => {
                Git::new(path).run_checked(&["merge", "--ff-only", "--quiet", target])?;
            }
            None => {
                let refspec = format!("{target}:refs/heads/{branch}");
                self.run_checked(&["fetch", "--quiet", ".", &refspec])?;
            }
        }
        debug!(branch, target, "fast-forwarded");
        Ok(())
    }

    /// Point `branch` back at `sha` (used to undo a local fast-forward).
    #[instrument(skip_all, fields(branch, sha))]
    pub fn reset_branch(&self, branch: &str, sha: &str, checked_out_at: Option<&Path>) -> Result<()> {
        match checked_out_at {
            Some(path) => {
                Git::new(path).run_checked(&["reset", "--keep", sha])?;
            }
            None => {
                let refname = format!("refs/heads/{branch}");
                self.run_checked(&["update-ref", &refname, sha])?;
            }
        }
        Ok(())
    }

    /// Tracked files, relative to the work tree root.
    pub fn ls_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files"])?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(reference) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            let name = reference.strip_prefix("refs/heads/").unwrap_or(reference);
            entry.branch = Some(name.to_string());
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}
