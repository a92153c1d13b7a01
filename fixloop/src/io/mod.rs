//! Adapters for side effects: subprocesses, containers, git, files.

pub mod analyzer;
pub mod config;
pub mod docker;
pub mod generative;
pub mod git;
pub mod process;
pub mod remediation;
pub mod run_store;
pub mod sandbox;
