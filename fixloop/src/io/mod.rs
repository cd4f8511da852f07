//! I/O adapters for fixloop: filesystem, git, child processes and HTTP.

pub mod artifacts;
pub mod config;
pub mod fixers;
pub mod git;
pub mod init;
pub mod preflight;
pub mod process;
pub mod prompt;
pub mod repair_client;
pub mod suite;
