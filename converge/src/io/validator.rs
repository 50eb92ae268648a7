//! Validator: the test gate plus the advisory lint pass.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::report::{parse_failing_tests, parse_lint_findings, reports_no_tests};
use crate::core::types::{ValidationResult, Workspace};
use crate::io::config::{Config, LintConfig, TestsConfig};
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Runs the test suite (and lint) against a workspace.
pub trait Validator {
    fn run(&self, ws: &Workspace) -> Result<ValidationResult>;
}

/// What one tool run left behind, independent of how it was launched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub log: String,
    pub timed_out: bool,
}

/// Validator backed by the configured test and lint commands.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    tests: TestsConfig,
    lint: LintConfig,
    output_limit_bytes: usize,
}

impl CommandValidator {
    pub fn new(cfg: &Config) -> Self {
        Self {
            tests: cfg.tests.clone(),
            lint: cfg.lint.clone(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn run_tool(&self, label: &str, argv: &[String], workdir: &Path, timeout: Duration) -> Result<ToolOutput> {
        let mut cmd = command_from_argv(argv).with_context(|| format!("{label} command"))?;
        cmd.current_dir(workdir);
        let out = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)
            .with_context(|| format!("run {label}"))?;
        Ok(ToolOutput {
            exit_code: out.status.code(),
            log: out.combined(label),
            timed_out: out.timed_out,
        })
    }
}

impl Validator for CommandValidator {
    #[instrument(skip_all, fields(workspace = %ws.path.display()))]
    fn run(&self, ws: &Workspace) -> Result<ValidationResult> {
        let tests = self.run_tool("tests", &self.tests.command, &ws.path, self.tests.timeout())?;
        let lint = if self.lint.command.is_empty() {
            None
        } else {
            Some(self.run_tool("lint", &self.lint.command, &ws.path, self.lint.timeout())?)
        };
        let result = assemble(&tests, lint.as_ref(), &self.tests, &self.lint);
        info!(
            passed = result.passed,
            failing = result.failing_tests.len(),
            lint_findings = result.lint_findings.len(),
            summary = %result.summary(),
            "validation finished"
        );
        Ok(result)
    }
}

/// Apply the gate rules to raw tool output.
///
/// The test exit status alone decides `passed`; lint findings are carried
/// along but never gate. A suite that discovered nothing passes.
pub fn assemble(
    tests: &ToolOutput,
    lint: Option<&ToolOutput>,
    tests_cfg: &TestsConfig,
    lint_cfg: &LintConfig,
) -> ValidationResult {
    let failing = parse_failing_tests(&tests.log, tests_cfg.max_failing_tests);
    let no_tests = !tests.timed_out && discovered_nothing(tests, &failing, tests_cfg);
    let passed = !tests.timed_out && (tests.exit_code == Some(0) || no_tests);
    if tests.timed_out {
        warn!("test run timed out");
    }
    debug!(exit_code = ?tests.exit_code, no_tests, passed, "test gate evaluated");

    let (lint_findings, lint_timed_out, lint_log) = match lint {
        Some(out) => (
            parse_lint_findings(&out.log, lint_cfg.max_findings),
            out.timed_out,
            out.log.clone(),
        ),
        None => (Vec::new(), false, String::new()),
    };

    ValidationResult {
        passed,
        failing_tests: if passed { Vec::new() } else { failing },
        lint_findings,
        no_tests,
        test_timed_out: tests.timed_out,
        lint_timed_out,
        test_log: tests.log.clone(),
        lint_log,
    }
}

fn discovered_nothing(tests: &ToolOutput, failing: &[String], cfg: &TestsConfig) -> bool {
    if let Some(code) = tests.exit_code
        && cfg.no_tests_exit_codes.contains(&code)
    {
        return true;
    }
    // A "no tests" message only counts when nothing else went wrong; pytest
    // prints "collected 0 items" above collection errors too.
    reports_no_tests(&tests.log)
        && failing.is_empty()
        && !tests.log.to_ascii_lowercase().contains("error")
}
