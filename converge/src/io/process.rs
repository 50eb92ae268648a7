//! Helpers for running child processes with timeouts and bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::errors::ToolUnavailableError;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout followed by stderr, lossily decoded, with truncation notices.
    pub fn combined(&self, label: &str) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).to_string();
        buf.push_str(&self.truncated_notice(label, "stdout", self.stdout_truncated));
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        buf.push_str(&self.truncated_notice(label, "stderr", self.stderr_truncated));
        buf
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    fn truncated_notice(&self, label: &str, stream: &str, bytes: usize) -> String {
        if bytes > 0 {
            format!("\n[{label} {stream} truncated {bytes} bytes]\n")
        } else {
            String::new()
        }
    }
}

/// Build a [`Command`] from an argv-style vector.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// A program that cannot be found fails with [`ToolUnavailableError`].
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_with_stream(cmd, stdin, timeout, output_limit_bytes, None)
}

/// Like [`run_command_with_timeout`], but tees each stdout line into `stream_path`.
///
/// The stream file is truncated first and flushed after every line, so it can be tailed
/// while the child runs. The full (bounded) stdout is still returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, streaming = stream_path.is_some()))]
pub fn run_command_with_stream(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: Option<&Path>,
) -> Result<CommandOutput> {
    let mut child = spawn_piped(&mut cmd, stdin.is_some())?;

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // The child may exit without reading its input.
                if let Err(e) = child_stdin.write_all(&input) {
                    warn!(err = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stream_file = match stream_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create stream dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create stream file {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, stream_file));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_piped(cmd: &mut Command, piped_stdin: bool) -> Result<Child> {
    if piped_stdin {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().to_string();
    debug!(program = %program, "spawning child process");
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            error!(program = %program, err = %e, "tool unavailable");
            Err(ToolUnavailableError {
                tool: program,
                reason: e.to_string(),
            }
            .into())
        }
        Err(e) => {
            error!(program = %program, err = %e, "failed to spawn command");
            Err(e).with_context(|| format!("spawn {program}"))
        }
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally tee-ing to a file.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut tee: Option<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = tee.as_mut()
            && let Err(e) = writer.write_all(&line).and_then(|()| writer.flush())
        {
            warn!(err = %e, "failed to write to stream file; disabling tee");
            tee = None;
        }

        let remaining = limit.saturating_sub(collected.len());
        let keep = n.min(remaining);
        collected.extend_from_slice(&line[..keep]);
        truncated += n - keep;
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::is_fatal;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert!(!out.success());
        let combined = out.combined("test");
        assert!(combined.contains("out"));
        assert!(combined.contains("err"));
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.combined("x").contains("[x stdout truncated 6 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn stdin_and_stream_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stream = temp.path().join("logs/stream.log");
        let out = run_command_with_stream(
            sh("cat"),
            Some(b"line one\nline two\n"),
            Duration::from_secs(10),
            1024,
            Some(&stream),
        )
        .expect("run");
        assert!(out.success());
        let streamed = std::fs::read_to_string(&stream).expect("read stream");
        assert_eq!(streamed, "line one\nline two\n");
    }

    #[test]
    fn missing_program_is_tool_unavailable() {
        let cmd = Command::new("converge-definitely-missing-tool");
        let err = run_command_with_timeout(cmd, None, Duration::from_secs(1), 16).unwrap_err();
        assert!(is_fatal(&err));
        assert!(err.downcast_ref::<ToolUnavailableError>().is_some());
    }

    #[test]
    fn command_from_argv_rejects_empty() {
        assert!(command_from_argv(&[]).is_err());
        let cmd = command_from_argv(&["git".to_string(), "status".to_string()]).expect("cmd");
        assert_eq!(cmd.get_program(), "git");
    }
}
