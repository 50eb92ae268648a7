//! File scope exposed to the agent.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::io::git::Git;

/// Tracked files whose extension is one of `extensions`, in `git ls-files` order.
pub fn detect_source_files(files: &[String], extensions: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|file| {
            Path::new(file.as_str())
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
        })
        .cloned()
        .collect()
}

/// The files the agent is told about: every tracked file, or detected sources.
pub fn scope_files(root: &Path, all_files: bool, extensions: &[String]) -> Result<Vec<String>> {
    let tracked = Git::new(root).ls_files()?;
    let scoped = if all_files {
        tracked
    } else {
        detect_source_files(&tracked, extensions)
    };
    debug!(files = scoped.len(), all_files, "file scope resolved");
    Ok(scoped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_source_extensions() {
        let files: Vec<String> = ["README.md", "src/app.py", "lib/Util.PY", "Makefile", "web/x.ts"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let exts = vec!["py".to_string(), "ts".to_string()];
        assert_eq!(
            detect_source_files(&files, &exts),
            vec!["src/app.py", "lib/Util.PY", "web/x.ts"]
        );
    }
}
