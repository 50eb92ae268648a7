//! Side-effecting adapters: git, child processes, and workspace files.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod context;
pub mod cycle_log;
pub mod files;
pub mod git;
pub mod merge;
pub mod process;
pub mod prompt;
pub mod validator;
pub mod workspace;
