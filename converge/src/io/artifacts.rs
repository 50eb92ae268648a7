//! Per-workspace artifact layout under `<workspace>/.converge/`.
//!
//! Everything here is excluded from git through the repository's shared
//! `info/exclude`, so the agent's commits never pick it up.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::ARTIFACTS_DIR;

/// Resolved artifact paths for one workspace.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    /// Context document, overwritten every cycle.
    pub context_path: PathBuf,
    /// Rendered agent prompt.
    pub prompt_path: PathBuf,
    /// Agent stdout, cleared at the start of every outer cycle.
    pub history_path: PathBuf,
    /// One JSON record per cycle.
    pub cycles_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(workspace_root: &Path) -> Self {
        let dir = workspace_root.join(ARTIFACTS_DIR);
        Self {
            context_path: dir.join("context.md"),
            prompt_path: dir.join("prompt.md"),
            history_path: dir.join("history.log"),
            cycles_dir: dir.join("cycles"),
            dir,
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create artifacts dir {}", self.dir.display()))
    }

    /// Drop the per-cycle artifacts (context document and agent history).
    ///
    /// Cycle records are kept; they are the run's audit trail.
    pub fn clear_cycle_artifacts(&self) -> Result<()> {
        for path in [&self.context_path, &self.history_path] {
            if path.exists() {
                debug!(path = %path.display(), "clearing cycle artifact");
                fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Write a file, creating its parent directory first.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_keeps_cycle_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        write_file(&paths.context_path, "ctx").expect("write context");
        write_file(&paths.history_path, "log").expect("write history");
        write_file(&paths.cycles_dir.join("1.json"), "{}").expect("write record");

        paths.clear_cycle_artifacts().expect("clear");
        assert!(!paths.context_path.exists());
        assert!(!paths.history_path.exists());
        assert!(paths.cycles_dir.join("1.json").exists());

        // Clearing an already-empty layout is fine.
        paths.clear_cycle_artifacts().expect("clear again");
    }
}
