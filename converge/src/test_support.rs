//! Test-only fakes and fixtures.
//!
//! Scripted collaborators replay queued responses without spawning anything;
//! [`TestRepo`] builds a real repository with a bare `origin` remote.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{MergeOutcome, ValidationResult, Workspace};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::merge::Integrator;
use crate::io::validator::Validator;

/// A validation that opens the gate.
pub fn passing() -> ValidationResult {
    ValidationResult {
        passed: true,
        test_log: "3 passed in 0.01s".to_string(),
        ..ValidationResult::default()
    }
}

/// A failing validation listing `tests` as failures.
pub fn failing(tests: &[&str]) -> ValidationResult {
    let failing_tests: Vec<String> = tests.iter().map(|t| t.to_string()).collect();
    let test_log = failing_tests
        .iter()
        .map(|t| format!("FAILED {t}"))
        .collect::<Vec<_>>()
        .join("\n");
    ValidationResult {
        passed: false,
        failing_tests,
        test_log,
        ..ValidationResult::default()
    }
}

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum AgentStep {
    /// Return success without touching the workspace.
    Noop,
    /// Write `(relative path, contents)` pairs, then succeed.
    Write(Vec<(String, String)>),
    /// Return a retryable error.
    Fail(String),
}

impl AgentStep {
    pub fn write(path: &str, contents: &str) -> Self {
        AgentStep::Write(vec![(path.to_string(), contents.to_string())])
    }
}

/// Agent that replays queued steps, then repeats its fallback.
#[derive(Debug)]
pub struct ScriptedAgent {
    steps: RefCell<VecDeque<AgentStep>>,
    fallback: AgentStep,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<AgentStep>) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            fallback: AgentStep::Noop,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: AgentStep) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            AgentStep::Noop => Ok(()),
            AgentStep::Write(files) => {
                for (rel, contents) in files {
                    let path = request.workdir.join(rel);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, contents)
                        .with_context(|| format!("write {}", path.display()))?;
                }
                Ok(())
            }
            AgentStep::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Validator that replays queued results; the last one repeats forever.
#[derive(Debug)]
pub struct ScriptedValidator {
    results: RefCell<VecDeque<ValidationResult>>,
    last: RefCell<ValidationResult>,
    calls: Cell<u32>,
}

impl ScriptedValidator {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            last: RefCell::new(passing()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Validator for ScriptedValidator {
    fn run(&self, _ws: &Workspace) -> Result<ValidationResult> {
        self.calls.set(self.calls.get() + 1);
        if let Some(next) = self.results.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        Ok(self.last.borrow().clone())
    }
}

/// Integrator that replays queued outcomes; the last one repeats forever.
#[derive(Debug)]
pub struct ScriptedIntegrator {
    outcomes: RefCell<VecDeque<MergeOutcome>>,
    last: RefCell<MergeOutcome>,
    calls: Cell<u32>,
}

impl ScriptedIntegrator {
    pub fn new(outcomes: Vec<MergeOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            last: RefCell::new(MergeOutcome::merged(false)),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Integrator for ScriptedIntegrator {
    fn integrate(&self, _ws: &Workspace) -> Result<MergeOutcome> {
        self.calls.set(self.calls.get() + 1);
        if let Some(next) = self.outcomes.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        Ok(self.last.borrow().clone())
    }
}

/// A throwaway repository (`work`, on `main`) with a bare `origin` remote.
///
/// ```text
/// <tempdir>/
///   origin.git/   bare remote
///   work/         clone under test, one initial commit pushed
/// ```
pub struct TestRepo {
    temp: TempDir,
    work: PathBuf,
    origin: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let origin = temp.path().join("origin.git");
        let work = temp.path().join("work");
        fs::create_dir_all(&work)?;

        git(temp.path(), &["init", "--bare", "-b", "main", "origin.git"])?;
        git(&work, &["init", "-b", "main"])?;
        configure_identity(&work)?;
        fs::write(work.join("README.md"), "# demo\n")?;
        fs::write(work.join("app.py"), "def answer():\n    return 41\n")?;
        git(&work, &["add", "-A"])?;
        git(&work, &["commit", "-m", "initial"])?;
        git(
            &work,
            &["remote", "add", "origin", &origin.to_string_lossy()],
        )?;
        git(&work, &["push", "--quiet", "-u", "origin", "main"])?;

        Ok(Self { temp, work, origin })
    }

    /// The working clone.
    pub fn path(&self) -> &Path {
        &self.work
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(&self.work, args)
    }

    /// Full SHA of `rev` in the working clone.
    pub fn rev(&self, rev: &str) -> Result<String> {
        Ok(self.git(&["rev-parse", rev])?.trim().to_string())
    }

    /// Full SHA of `branch` on the bare remote.
    pub fn remote_rev(&self, branch: &str) -> Result<String> {
        let git_dir = format!("--git-dir={}", self.origin.display());
        Ok(git(self.temp.path(), &[&git_dir, "rev-parse", branch])?
            .trim()
            .to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.work)
            .output()?;
        Ok(out.status.success())
    }

    /// Make `origin` reject the next push that updates `branch`, once.
    pub fn reject_next_push_of(&self, branch: &str) -> Result<()> {
        let marker = self.origin.join("reject-once");
        fs::write(&marker, format!("refs/heads/{branch}\n"))?;
        let hook = self.origin.join("hooks").join("pre-receive");
        fs::create_dir_all(hook.parent().context("hooks dir")?)?;
        fs::write(
            &hook,
            r#"#!/bin/sh
[ -f reject-once ] || exit 0
want=$(cat reject-once)
while read old new ref; do
  if [ "$ref" = "$want" ]; then
    rm -f reject-once
    echo "rejected $ref" >&2
    exit 1
  fi
done
exit 0
"#,
        )?;
        let mut perms = fs::metadata(&hook)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&hook, perms)?;
        Ok(())
    }

    /// Point `origin` somewhere that does not exist, as if the network dropped.
    pub fn break_origin(&self) -> Result<()> {
        let missing = self.temp.path().join("missing").join("origin.git");
        self.git(&["remote", "set-url", "origin", &missing.to_string_lossy()])?;
        Ok(())
    }

    /// Commit a change to `main` from a second clone and push it, as a
    /// teammate would.
    pub fn push_upstream_change(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        let upstream = self.temp.path().join("upstream");
        if !upstream.exists() {
            git(
                self.temp.path(),
                &["clone", "--quiet", &self.origin.to_string_lossy(), "upstream"],
            )?;
            configure_identity(&upstream)?;
        } else {
            git(&upstream, &["pull", "--quiet", "--ff-only"])?;
        }
        fs::write(upstream.join(rel), contents)?;
        git(&upstream, &["add", "-A"])?;
        git(&upstream, &["commit", "-m", message])?;
        git(&upstream, &["push", "--quiet", "origin", "main"])?;
        Ok(())
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    git(dir, &["config", "user.name", "Converge Test"])?;
    git(dir, &["config", "user.email", "converge-test@local.invalid"])?;
    git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("run git {args:?}"))?;
    if !output.status.success() {
        bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
