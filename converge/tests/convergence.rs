//! End-to-end runs against a real repository with a bare `origin`.
//!
//! The agent is scripted (it writes files into the workspace) and the test
//! gate is a shell one-liner, so these exercise worktrees, the controller,
//! conflict resolution, and publishing without any external tools.

use std::fs;
use std::path::Path;

use converge::core::state::Terminal;
use converge::core::types::Task;
use converge::io::config::Config;
use converge::io::workspace::WorkspaceManager;
use converge::run::run_task_with;
use converge::signals::CancelFlag;
use converge::test_support::{AgentStep, ScriptedAgent, TestRepo};

const ANSWERED: &str = "def answer():\n    return 42\n";

fn sh_config(gate: &str, max_cycles: u32) -> Config {
    let mut cfg = Config::default();
    cfg.max_cycles = max_cycles;
    cfg.tests.command = vec!["sh".to_string(), "-c".to_string(), gate.to_string()];
    cfg.lint.command = Vec::new();
    cfg
}

fn kept_workspaces(repo: &Path) -> Vec<String> {
    let dir = repo.join(".converge").join("worktrees");
    match fs::read_dir(&dir) {
        Ok(entries) => entries
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn converge_branches(repo: &TestRepo) -> Vec<String> {
    repo.git(&["branch", "--list", "converge/*", "--format=%(refname:short)"])
        .expect("list branches")
        .lines()
        .map(str::to_string)
        .collect()
}

/// The agent's first attempt passes: the change lands on `main` locally and
/// on the remote, and the workspace is cleaned up.
#[test]
fn passing_first_cycle_integrates_and_cleans_up() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    let cfg = sh_config("grep -q 42 app.py", 5);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_eq!(report.cycles, 1);
    assert_eq!(agent.calls(), 1);

    let after = repo.rev("main").expect("rev");
    assert_ne!(after, before);
    assert_eq!(repo.remote_rev("main").expect("remote rev"), after);
    assert_eq!(
        fs::read_to_string(repo.path().join("app.py")).expect("read"),
        ANSWERED
    );
    assert!(kept_workspaces(repo.path()).is_empty());
    assert!(converge_branches(&repo).is_empty());
}

/// An agent that never fixes anything is stopped by the cycle budget and
/// nothing reaches the mainline.
#[test]
fn exhausted_run_keeps_workspace_and_leaves_main_alone() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    let cfg = sh_config("grep -q 42 app.py", 3);
    let agent = ScriptedAgent::new(Vec::new());

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Exhausted);
    assert_eq!(agent.calls(), 3);
    assert_eq!(repo.rev("main").expect("rev"), before);
    assert_eq!(repo.remote_rev("main").expect("remote rev"), before);

    let kept = kept_workspaces(repo.path());
    assert_eq!(kept.len(), 1);
    let branches = converge_branches(&repo);
    assert_eq!(branches.len(), 1);
    assert!(branches[0].starts_with("converge/make-answer-return-42-"));

    let ws_root = repo.path().join(".converge/worktrees").join(&kept[0]);
    assert!(ws_root.join(".converge/context.md").exists());
    assert!(ws_root.join(".converge/cycles/3.json").exists());
}

/// A teammate changes the same line upstream; the merge conflicts, the agent
/// is asked to resolve it, and the resolved branch integrates.
#[test]
fn upstream_conflict_is_resolved_by_the_agent() {
    let repo = TestRepo::new().expect("repo");
    repo.push_upstream_change("app.py", "def answer():\n    return 40\n", "upstream tweak")
        .expect("upstream");
    let cfg = sh_config("grep -q 42 app.py", 5);
    let agent = ScriptedAgent::new(vec![
        AgentStep::write("app.py", ANSWERED),
        AgentStep::write("app.py", ANSWERED),
    ]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_eq!(report.resolutions, 1);
    assert_eq!(agent.calls(), 2);
    assert!(
        agent.requests()[1]
            .prompt
            .contains("Resolve the merge conflicts")
    );

    let main = repo.rev("main").expect("rev");
    assert_eq!(repo.remote_rev("main").expect("remote rev"), main);
    let log = repo.git(&["log", "--format=%s", "main"]).expect("log");
    assert!(log.contains("upstream tweak"));
    assert_eq!(
        fs::read_to_string(repo.path().join("app.py")).expect("read"),
        ANSWERED
    );
}

/// A clean merge that breaks the tests is handed back to the agent as a
/// regression before anything is published.
#[test]
fn merge_regression_is_fixed_before_publishing() {
    let repo = TestRepo::new().expect("repo");
    repo.push_upstream_change("flag.txt", "bad\n", "upstream flag")
        .expect("upstream");
    let cfg = sh_config("grep -q 42 app.py && ! grep -q bad flag.txt", 5);
    let agent = ScriptedAgent::new(vec![
        AgentStep::write("app.py", ANSWERED),
        AgentStep::write("flag.txt", "good\n"),
    ]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_eq!(report.resolutions, 1);
    assert!(agent.requests()[1].prompt.contains("Fix the test regression"));
    assert_eq!(
        fs::read_to_string(repo.path().join("flag.txt")).expect("read"),
        "good\n"
    );
    assert_eq!(
        repo.remote_rev("main").expect("remote rev"),
        repo.rev("main").expect("rev")
    );
}

/// A regression the agent never fixes ends in a merge failure; neither the
/// local nor the remote mainline is written.
#[test]
fn unfixed_regression_fails_without_touching_mainline() {
    let repo = TestRepo::new().expect("repo");
    let local_before = repo.rev("main").expect("rev");
    repo.push_upstream_change("flag.txt", "bad\n", "upstream flag")
        .expect("upstream");
    let remote_before = repo.remote_rev("main").expect("remote rev");
    let cfg = sh_config("grep -q 42 app.py && ! grep -q bad flag.txt", 5);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::MergeFailed);
    assert_eq!(report.integrations, cfg.max_integrations);
    assert_eq!(repo.rev("main").expect("rev"), local_before);
    assert_eq!(repo.remote_rev("main").expect("remote rev"), remote_before);
    assert_eq!(kept_workspaces(repo.path()).len(), 1);
}

/// Losing the push race restores the local mainline; the next integrate
/// attempt lands without another agent call.
#[test]
fn rejected_mainline_push_restores_main_and_retries() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    repo.reject_next_push_of("main").expect("hook");
    let cfg = sh_config("grep -q 42 app.py", 5);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_eq!(report.integrations, 2);
    assert_eq!(report.resolutions, 1);
    assert_eq!(agent.calls(), 1);

    let reflog = repo
        .git(&["reflog", "show", "--format=%gs", "main"])
        .expect("reflog");
    assert!(
        reflog.contains(&format!("reset: moving to {before}")),
        "reflog: {reflog}"
    );
    let after = repo.rev("main").expect("rev");
    assert_ne!(after, before);
    assert_eq!(repo.remote_rev("main").expect("remote rev"), after);
}

/// An unreachable remote is retried as a failed integration, then reported
/// as a merge failure instead of aborting the run.
#[test]
fn unreachable_remote_ends_in_merge_failure() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    repo.break_origin().expect("break origin");
    let cfg = sh_config("grep -q 42 app.py", 5);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        Some(7),
        CancelFlag::new(),
    )
    .expect("run returns a report");

    assert_eq!(report.outcome, Terminal::MergeFailed);
    assert_eq!(report.integrations, cfg.max_integrations);
    assert_eq!(agent.calls(), 1);
    let merge = report.merge.expect("merge outcome");
    assert!(merge.failure.expect("failure").contains("fetch"));
    assert_eq!(repo.rev("main").expect("rev"), before);
    assert_eq!(kept_workspaces(repo.path()).len(), 1);
}

/// `--no-push` integrates into the local mainline only.
#[test]
fn no_push_leaves_remote_untouched() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    let mut cfg = sh_config("grep -q 42 app.py", 5);
    cfg.push = false;
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        None,
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_ne!(repo.rev("main").expect("rev"), before);
    assert_eq!(repo.remote_rev("main").expect("remote rev"), before);
}

/// A cancellation raised before the first phase ends the run without
/// touching the mainline and removes the workspace.
#[test]
fn cancelled_run_is_abandoned_and_cleaned_up() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.rev("main").expect("rev");
    let cfg = sh_config("grep -q 42 app.py", 5);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        None,
        cancel,
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Abandoned);
    assert_eq!(agent.calls(), 0);
    assert_eq!(repo.rev("main").expect("rev"), before);
    assert!(kept_workspaces(repo.path()).is_empty());
}

/// Pytest's "no tests collected" exit code counts as a pass.
#[test]
fn no_tests_discovered_opens_the_gate() {
    let repo = TestRepo::new().expect("repo");
    let cfg = sh_config("echo 'no tests ran in 0.01s'; exit 5", 2);
    let agent = ScriptedAgent::new(vec![AgentStep::write("app.py", ANSWERED)]);

    let report = run_task_with(
        repo.path(),
        &Task::new("make answer return 42"),
        &cfg,
        &agent,
        None,
        CancelFlag::new(),
    )
    .expect("run");

    assert_eq!(report.outcome, Terminal::Success);
    assert_eq!(report.cycles, 1);
}

/// Destroying a workspace twice is not an error.
#[test]
fn destroy_is_idempotent() {
    let repo = TestRepo::new().expect("repo");
    let cfg = sh_config("true", 1);
    let manager = WorkspaceManager::new(repo.path(), &cfg).expect("manager");
    let ws = manager.create(&Task::new("tidy up")).expect("create");
    assert!(ws.path.exists());
    assert!(repo.branch_exists(&ws.branch).expect("branch"));

    manager.destroy(&ws).expect("first destroy");
    manager.destroy(&ws).expect("second destroy");

    assert!(!ws.path.exists());
    assert!(!repo.branch_exists(&ws.branch).expect("branch"));
}

/// Running outside a git repository is an environment error, not a panic.
#[test]
fn non_repository_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = sh_config("true", 1);
    let agent = ScriptedAgent::new(Vec::new());

    let err = run_task_with(
        temp.path(),
        &Task::new("anything"),
        &cfg,
        &agent,
        None,
        CancelFlag::new(),
    )
    .expect_err("not a repo");

    assert!(converge::errors::is_fatal(&err));
}
