//! Test-suite adapter.
//!
//! The [`TestRunner`] trait decouples the loop from the actual test command.
//! Tests use scripted runners that return predetermined outcomes without
//! spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::TestOutcome;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Parameters for one test-suite run.
#[derive(Debug, Clone)]
pub struct SuiteRequest {
    pub workdir: PathBuf,
    /// Fully expanded argv.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Captured result of one test-suite run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRun {
    pub outcome: TestOutcome,
    pub stdout: String,
    /// Combined stdout/stderr log with truncation notices; becomes the error log.
    pub log: String,
    pub timed_out: bool,
}

pub trait TestRunner {
    fn run(&self, request: &SuiteRequest) -> Result<SuiteRun>;
}

/// Runs the configured test command as a child process.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &SuiteRequest) -> Result<SuiteRun> {
        info!(command = %request.command.join(" "), "running test suite");
        let cmd = command_from_argv(&request.command, &request.workdir)?;
        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .context("run test command")?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "test suite timed out"
            );
        }
        let outcome = if output.succeeded() {
            TestOutcome::Pass
        } else {
            TestOutcome::Fail
        };
        info!(?outcome, exit_code = ?output.status.code(), "test suite finished");

        Ok(SuiteRun {
            outcome,
            stdout: output.stdout_lossy(),
            log: output.render_log("tests"),
            timed_out: output.timed_out,
        })
    }
}
