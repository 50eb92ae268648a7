//! Agent Invoker: formatter pass, prompt rendering, and the agent call.
//!
//! The [`Agent`] trait is the only seam to the external code-modification
//! tool. Tests use scripted agents that edit files without spawning anything.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Task, Workspace};
use crate::io::artifacts::{ArtifactPaths, write_file};
use crate::io::config::{AgentConfig, Config, FormatConfig};
use crate::io::context::ContextDocument;
use crate::io::process::{command_from_argv, run_command_with_stream, run_command_with_timeout};
use crate::io::prompt::{PromptEngine, PromptInputs};

/// Placeholder in agent arguments replaced by the prompt file path.
pub const PROMPT_FILE_PLACEHOLDER: &str = "{prompt_file}";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent (the workspace root).
    pub workdir: PathBuf,
    pub prompt: String,
    /// Where the prompt was written.
    pub prompt_path: PathBuf,
    /// Files exposed to the agent, relative to `workdir`.
    pub files: Vec<String>,
    /// Agent stdout is streamed here.
    pub history_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// An external code-modification agent.
pub trait Agent {
    /// Block until the agent finished editing `request.workdir`.
    fn invoke(&self, request: &AgentRequest) -> Result<()>;
}

/// Agent that spawns the configured command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    pass_files: bool,
}

impl CommandAgent {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            pass_files: cfg.pass_files,
        }
    }

    fn argv(&self, request: &AgentRequest) -> Vec<String> {
        let prompt_file = request.prompt_path.to_string_lossy();
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace(PROMPT_FILE_PLACEHOLDER, &prompt_file))
            .collect();
        if self.pass_files {
            argv.extend(request.files.iter().cloned());
        }
        argv
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        let mut cmd = command_from_argv(&self.argv(request))?;
        cmd.current_dir(&request.workdir);
        info!(
            workdir = %request.workdir.display(),
            program = %cmd.get_program().to_string_lossy(),
            "starting agent"
        );

        let output = run_command_with_stream(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            Some(&request.history_path),
        )
        .context("run agent")?;

        if !output.stderr.is_empty() {
            append_stderr(&request.history_path, &output.stderr)?;
        }

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!("agent failed with status {:?}", output.status.code()));
        }
        debug!("agent completed successfully");
        Ok(())
    }
}

fn append_stderr(path: &Path, stderr: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(b"\n=== stderr ===\n")
        .and_then(|()| file.write_all(stderr))
        .with_context(|| format!("append {}", path.display()))
}

/// Optional formatter run before each agent invocation.
#[derive(Debug, Clone)]
pub struct Formatter {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Formatter {
    pub fn new(cfg: &FormatConfig, output_limit_bytes: usize) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: cfg.timeout(),
            output_limit_bytes,
        }
    }

    /// Run the formatter. Failures are logged, never returned.
    pub fn run(&self, workdir: &Path) {
        if self.command.is_empty() {
            return;
        }
        let result = command_from_argv(&self.command).and_then(|mut cmd| {
            cmd.current_dir(workdir);
            run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
        });
        match result {
            Ok(out) if out.success() => debug!("formatter finished"),
            Ok(out) => warn!(
                exit_code = ?out.status.code(),
                timed_out = out.timed_out,
                "formatter failed; continuing"
            ),
            Err(err) => warn!(err = %format!("{err:#}"), "formatter did not run; continuing"),
        }
    }
}

/// Formats, renders the prompt, and calls the agent for one cycle.
pub struct AgentInvoker<'a, A: Agent> {
    agent: &'a A,
    formatter: Formatter,
    prompts: PromptEngine,
    files: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl<'a, A: Agent> AgentInvoker<'a, A> {
    pub fn new(agent: &'a A, cfg: &Config, files: Vec<String>) -> Self {
        Self {
            agent,
            formatter: Formatter::new(&cfg.format, cfg.output_limit_bytes),
            prompts: PromptEngine::new(),
            files,
            timeout: cfg.agent.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    #[instrument(skip_all, fields(cycle = context.cycle))]
    pub fn invoke(&self, ws: &Workspace, task: &Task, context: &ContextDocument) -> Result<()> {
        self.formatter.run(&ws.path);

        let paths = ArtifactPaths::new(&ws.path);
        let prompt = self.prompts.render(&PromptInputs {
            task: task.description(),
            branch: &ws.branch,
            context: &context.body,
            files: &self.files,
        })?;
        write_file(&paths.prompt_path, &prompt)?;

        let request = AgentRequest {
            workdir: ws.path.clone(),
            prompt,
            prompt_path: paths.prompt_path,
            files: self.files.clone(),
            history_path: paths.history_path,
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        self.agent.invoke(&request).context("agent invocation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::errors::is_fatal;

    fn request(dir: &Path) -> AgentRequest {
        AgentRequest {
            workdir: dir.to_path_buf(),
            prompt: "do the thing\n".to_string(),
            prompt_path: dir.join(".converge/prompt.md"),
            files: vec!["a.py".to_string()],
            history_path: dir.join(".converge/history.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    fn sh_agent(script: &str, pass_files: bool) -> CommandAgent {
        CommandAgent::new(&AgentConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "agent".to_string(),
                PROMPT_FILE_PLACEHOLDER.to_string(),
            ],
            timeout_secs: 10,
            pass_files,
        })
    }

    #[test]
    fn prompt_reaches_stdin_and_history_is_streamed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let agent = sh_agent("cat > received.txt; echo edited; echo note >&2", false);
        agent.invoke(&req).expect("invoke");

        let received = fs::read_to_string(temp.path().join("received.txt")).expect("read");
        assert_eq!(received, "do the thing\n");
        let history = fs::read_to_string(&req.history_path).expect("history");
        assert!(history.starts_with("edited\n"));
        assert!(history.contains("=== stderr ===\nnote"));
    }

    #[test]
    fn placeholder_and_files_become_arguments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let agent = sh_agent("echo \"$1 $2\" > args.txt", true);
        agent.invoke(&req).expect("invoke");
        let args = fs::read_to_string(temp.path().join("args.txt")).expect("read");
        assert_eq!(args.trim(), format!("{} a.py", req.prompt_path.display()));
    }

    #[test]
    fn non_zero_exit_is_retryable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = sh_agent("exit 2", false)
            .invoke(&request(temp.path()))
            .unwrap_err();
        assert!(!is_fatal(&err));
        assert!(err.to_string().contains("status Some(2)"));
    }

    #[test]
    fn timed_out_agent_is_killed_and_retryable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = AgentRequest {
            timeout: Duration::from_millis(200),
            ..request(temp.path())
        };
        let started = std::time::Instant::now();
        let err = sh_agent("exec sleep 5", false).invoke(&req).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!is_fatal(&err));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_agent_binary_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(&AgentConfig {
            command: vec!["converge-no-such-agent".to_string()],
            ..AgentConfig::default()
        });
        let err = agent.invoke(&request(temp.path())).unwrap_err();
        assert!(is_fatal(&err));
    }

    #[test]
    fn formatter_failures_are_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let formatter = Formatter::new(
            &FormatConfig {
                command: vec!["converge-no-such-formatter".to_string()],
                timeout_secs: 5,
            },
            1024,
        );
        formatter.run(temp.path());
    }
}
