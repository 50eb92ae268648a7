//! Run configuration, read from `<repo>/.converge/config.toml` or `--config`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::ARTIFACTS_DIR;

/// Config file name inside the artifacts directory of the repository root.
pub const CONFIG_FILE: &str = "config.toml";

/// Run configuration (TOML).
///
/// Built once at startup and handed to every component by reference. Missing
/// fields default to values that suit a Python project using pytest and ruff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Outer retry budget (agent invocations before giving up).
    pub max_cycles: u32,

    /// Integrate attempts before the run ends in `MergeFailed`.
    pub max_integrations: u32,

    /// Agent calls per resolver invocation.
    pub resolve_attempts: u32,

    /// Branch to fork from and merge back into; the current branch when unset.
    pub mainline: Option<String>,

    pub remote: String,

    /// Push the workspace branch and the mainline after a clean integration.
    pub push: bool,

    /// Where worktrees live, relative to the repository root.
    pub workspace_dir: PathBuf,

    /// Expose every tracked file to the agent instead of detected sources.
    pub all_files: bool,

    /// Extensions (without the dot) that count as source files.
    pub source_extensions: Vec<String>,

    /// Bound on captured stdout/stderr per child process.
    pub output_limit_bytes: usize,

    pub tests: TestsConfig,
    pub lint: LintConfig,
    pub format: FormatConfig,
    pub agent: AgentConfig,
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Exit codes meaning "no test target discovered" (pytest uses 5).
    pub no_tests_exit_codes: Vec<i32>,
    pub max_failing_tests: usize,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string(), "-q".to_string()],
            timeout_secs: 10 * 60,
            no_tests_exit_codes: vec![5],
            max_failing_tests: 50,
        }
    }
}

impl TestsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LintConfig {
    /// Empty disables linting.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_findings: usize,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: vec!["ruff".to_string(), "check".to_string(), ".".to_string()],
            timeout_secs: 120,
            max_findings: 100,
        }
    }
}

impl LintConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FormatConfig {
    /// Empty disables the formatter pass.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl FormatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent argv. The prompt arrives on stdin; `{prompt_file}` in any
    /// argument is replaced with the prompt file path.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Append the exposed file list to the agent's arguments.
    pub pass_files: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--full-auto".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 30 * 60,
            pass_files: false,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub test_tail_lines: usize,
    pub lint_tail_lines: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            test_tail_lines: 500,
            lint_tail_lines: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            max_integrations: 3,
            resolve_attempts: 1,
            mainline: None,
            remote: "origin".to_string(),
            push: true,
            workspace_dir: PathBuf::from(ARTIFACTS_DIR).join("worktrees"),
            all_files: false,
            source_extensions: ["py", "rs", "go", "js", "ts", "tsx", "java", "c", "h", "cpp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            output_limit_bytes: 1_000_000,
            tests: TestsConfig::default(),
            lint: LintConfig::default(),
            format: FormatConfig::default(),
            agent: AgentConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if self.max_integrations == 0 {
            return Err(anyhow!("max_integrations must be > 0"));
        }
        if self.resolve_attempts == 0 {
            return Err(anyhow!("resolve_attempts must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.workspace_dir.is_absolute() {
            return Err(anyhow!("workspace_dir must be relative to the repository"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        require_argv("tests.command", &self.tests.command)?;
        require_argv("agent.command", &self.agent.command)?;
        for (name, timeout) in [
            ("tests.timeout_secs", self.tests.timeout_secs),
            ("lint.timeout_secs", self.lint.timeout_secs),
            ("format.timeout_secs", self.format.timeout_secs),
            ("agent.timeout_secs", self.agent.timeout_secs),
        ] {
            if timeout == 0 {
                bail!("{name} must be > 0");
            }
        }
        Ok(())
    }
}

fn require_argv(name: &str, argv: &[String]) -> Result<()> {
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{name} must be a non-empty array")),
    }
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_cycles: Option<u32>,
    pub mainline: Option<String>,
    pub no_push: bool,
    pub all_files: bool,
}

impl Config {
    pub fn apply_overrides(mut self, overrides: &Overrides) -> Result<Self> {
        if let Some(max_cycles) = overrides.max_cycles {
            self.max_cycles = max_cycles;
        }
        if let Some(mainline) = &overrides.mainline {
            self.mainline = Some(mainline.clone());
        }
        if overrides.no_push {
            self.push = false;
        }
        if overrides.all_files {
            self.all_files = true;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Pick the config file: an explicit path must exist, the repository default may not.
pub fn resolve_config(repo: &Path, explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            load_config(path)
        }
        None => load_config(&repo.join(ARTIFACTS_DIR).join(CONFIG_FILE)),
    }
}

/// Render the effective configuration as TOML.
pub fn render_config(cfg: &Config) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config toml")
}
