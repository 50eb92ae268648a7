//! Cycle records under `.converge/cycles/<n>.json`.
//!
//! Records are the run's audit trail: written for every cycle regardless of
//! log level and never cleared between cycles.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::io::artifacts::{ArtifactPaths, write_file};

/// What happened in one outer cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u32,
    pub passed: bool,
    pub failing_tests: Vec<String>,
    pub lint_findings: usize,
    /// The failing test singled out in the context document.
    pub focus_test: Option<String>,
    /// Set when the agent call itself failed (the cycle still validated).
    pub agent_error: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
}

pub fn cycle_record_path(workspace_root: &Path, cycle: u32) -> PathBuf {
    ArtifactPaths::new(workspace_root)
        .cycles_dir
        .join(format!("{cycle}.json"))
}

pub fn write_cycle_record(workspace_root: &Path, record: &CycleRecord) -> Result<PathBuf> {
    let path = cycle_record_path(workspace_root, record.cycle);
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    write_file(&path, &buf)?;
    Ok(path)
}
