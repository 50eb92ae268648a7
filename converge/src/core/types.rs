//! Value types shared by the convergence engine.
//!
//! These are plain data: no I/O, no interior mutability. Each value is built
//! once by the component that owns it and handed around by reference.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::slug::slugify;

/// Directory (relative to a workspace) holding converge-owned artifacts.
pub const ARTIFACTS_DIR: &str = ".converge";

/// Prefix for every branch created by the workspace manager.
pub const BRANCH_PREFIX: &str = "converge/";

/// The task handed to the agent for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    description: String,
    slug: String,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into().trim().to_string();
        let slug = slugify(&description);
        Self { description, slug }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Normalized identifier used in branch and directory names.
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

/// An isolated, branch-backed working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path of the worktree.
    pub path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch: String,
    /// Mainline branch the workspace was created from and merges back into.
    pub parent_branch: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one test + lint pass over a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The gate: true when the test runner succeeded or found no tests.
    pub passed: bool,
    /// Failing test identifiers in output order, deduplicated and truncated.
    pub failing_tests: Vec<String>,
    /// Lint findings in output order, truncated. Advisory only.
    pub lint_findings: Vec<String>,
    /// No test target was discovered.
    pub no_tests: bool,
    pub test_timed_out: bool,
    pub lint_timed_out: bool,
    /// Captured test runner output (stdout then stderr).
    pub test_log: String,
    /// Captured lint output; empty when no linter is configured.
    pub lint_log: String,
}

impl ValidationResult {
    /// One-line description for logs and cycle records.
    pub fn summary(&self) -> String {
        if self.no_tests {
            return "no tests discovered".to_string();
        }
        if self.test_timed_out {
            return "tests timed out".to_string();
        }
        let verdict = if self.passed { "passing" } else { "failing" };
        format!(
            "{verdict} ({} failing tests, {} lint findings)",
            self.failing_tests.len(),
            self.lint_findings.len()
        )
    }
}

/// Result of one attempt to integrate a workspace into the mainline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The workspace is now part of the mainline.
    pub success: bool,
    /// The merge left unresolved paths, or the mainline moved during the push.
    pub conflict: bool,
    /// The integration reached the shared remote.
    pub pushed: bool,
    /// Paths the merge could not resolve.
    pub conflicted_paths: Vec<String>,
    /// Validation of the merged tree, present only when it failed.
    pub regression: Option<ValidationResult>,
    /// A git step (fetch, fast-forward, push) failed; retried like a stale push.
    pub failure: Option<String>,
}

impl MergeOutcome {
    pub fn merged(pushed: bool) -> Self {
        Self {
            success: true,
            pushed,
            ..Self::default()
        }
    }

    pub fn conflicted(paths: Vec<String>) -> Self {
        Self {
            conflict: true,
            conflicted_paths: paths,
            ..Self::default()
        }
    }

    /// Mainline advanced on the remote between fetch and push.
    pub fn stale() -> Self {
        Self::conflicted(Vec::new())
    }

    /// A git step failed before anything was published.
    pub fn git_failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::stale()
        }
    }

    pub fn regressed(result: ValidationResult) -> Self {
        Self {
            regression: Some(result),
            ..Self::default()
        }
    }

    /// True when the resolver must run before integrating again.
    pub fn needs_resolution(&self) -> bool {
        !self.success && (self.conflict || self.regression.is_some())
    }
}
