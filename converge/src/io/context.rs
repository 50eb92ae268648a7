//! Context Builder: bounded summary of test/lint state for the agent.
//!
//! The document is rebuilt from scratch every cycle and overwrites
//! `.converge/context.md`; nothing carries over between cycles.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::sampler::FailureSampler;
use crate::core::tail::tail_lines;
use crate::core::types::{ValidationResult, Workspace};
use crate::io::artifacts::{ArtifactPaths, write_file};
use crate::io::config::ContextConfig;
use crate::io::validator::Validator;

/// A rendered context document, already written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDocument {
    pub cycle: u32,
    pub body: String,
    /// The one failing test singled out this cycle.
    pub focus_test: Option<String>,
    pub path: PathBuf,
}

pub struct ContextBuilder<'a, V: Validator> {
    validator: &'a V,
    sampler: FailureSampler,
    settings: ContextConfig,
}

impl<'a, V: Validator> ContextBuilder<'a, V> {
    pub fn new(validator: &'a V, sampler: FailureSampler, settings: ContextConfig) -> Self {
        Self {
            validator,
            sampler,
            settings,
        }
    }

    /// Build the context for `cycle` from the latest validation, or a fresh one.
    #[instrument(skip_all, fields(cycle, fresh = latest.is_none()))]
    pub fn build(
        &mut self,
        ws: &Workspace,
        latest: Option<&ValidationResult>,
        cycle: u32,
    ) -> Result<ContextDocument> {
        let fresh;
        let result = match latest {
            Some(result) => result,
            None => {
                fresh = self.validator.run(ws)?;
                &fresh
            }
        };
        let focus_test = self
            .sampler
            .sample(&result.failing_tests)
            .map(str::to_string);
        let body = render_validation(cycle, result, focus_test.as_deref(), &self.settings);
        let path = ArtifactPaths::new(&ws.path).context_path;
        write_file(&path, &body)?;
        debug!(focus = ?focus_test, bytes = body.len(), "context written");
        Ok(ContextDocument {
            cycle,
            body,
            focus_test,
            path,
        })
    }

    /// Build the context for a resolver pass over unresolved merge paths.
    pub fn build_conflict(
        &self,
        ws: &Workspace,
        conflicted_paths: &[String],
        cycle: u32,
    ) -> Result<ContextDocument> {
        let body = render_conflict(cycle, &ws.parent_branch, conflicted_paths);
        let path = ArtifactPaths::new(&ws.path).context_path;
        write_file(&path, &body)?;
        Ok(ContextDocument {
            cycle,
            body,
            focus_test: None,
            path,
        })
    }
}

fn render_validation(
    cycle: u32,
    result: &ValidationResult,
    focus_test: Option<&str>,
    settings: &ContextConfig,
) -> String {
    let mut out = format!("# Context (cycle {cycle})\n\n");
    let _ = writeln!(out, "Status: {}\n", result.summary());

    if let Some(test) = focus_test {
        let _ = writeln!(
            out,
            "## Focus test\n\nStart with this failing test: `{test}`\n"
        );
    }

    if !result.failing_tests.is_empty() {
        out.push_str("## Failing tests\n\n");
        for test in &result.failing_tests {
            let _ = writeln!(out, "- {test}");
        }
        out.push('\n');
    }

    out.push_str("## Test output\n\n");
    if result.test_timed_out {
        out.push_str("timed out\n\n");
    } else {
        push_block(&mut out, &tail_lines(&result.test_log, settings.test_tail_lines));
    }

    if !result.lint_findings.is_empty() {
        out.push_str("## Lint findings\n\n");
        for finding in &result.lint_findings {
            let _ = writeln!(out, "- {finding}");
        }
        out.push('\n');
    }

    out.push_str("## Lint output\n\n");
    if result.lint_timed_out {
        out.push_str("timed out\n");
    } else if result.lint_log.trim().is_empty() {
        out.push_str("(no lint output)\n");
    } else {
        push_block(&mut out, &tail_lines(&result.lint_log, settings.lint_tail_lines));
    }
    out
}

fn render_conflict(cycle: u32, mainline: &str, paths: &[String]) -> String {
    let mut out = format!("# Context (cycle {cycle}, merge)\n\n");
    if paths.is_empty() {
        let _ = writeln!(
            out,
            "`{mainline}` moved while integrating. Re-check the work against the new mainline.\n"
        );
        return out;
    }
    let _ = writeln!(
        out,
        "Merging `{mainline}` into this branch left conflicts. Remove every conflict marker \
         (`<<<<<<<`, `=======`, `>>>>>>>`) and keep both sides' intent.\n"
    );
    out.push_str("## Conflicted files\n\n");
    for path in paths {
        let _ = writeln!(out, "- {path}");
    }
    out
}

fn push_block(out: &mut String, text: &str) {
    out.push_str("```text\n");
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n\n");
}
