//! Shared deterministic types for the fix loop.
//!
//! These types describe what happened during a run. They carry no I/O handles
//! so orchestration code and tests can compare them directly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Classification of a single test-suite run.
///
/// A timed-out run is classified as `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
}

/// How the repair agent step ended once failing files were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairResult {
    /// Prompt written for an operator or external agent; nothing was sent.
    PromptOnly,
    /// The endpoint returned a diff and `git apply` accepted it.
    PatchApplied { patch_path: PathBuf },
    /// The endpoint response could not be applied.
    PatchRejected {
        patch_path: Option<PathBuf>,
        reason: String,
    },
}

/// Result of handing a failure off to the external repair step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// The failure report named no file inside the project; no prompt was built.
    NoFailingFiles,
    /// A prompt bundle was written (and possibly sent).
    Handoff {
        failing_files: Vec<PathBuf>,
        prompt_path: PathBuf,
        repair: RepairResult,
    },
}

/// Reason why the attempt loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The suite passed on the given attempt (1-indexed).
    Passed { attempt: u32 },
    /// Every attempt failed and the fixers kept changing files.
    Exhausted { attempts: u32 },
    /// The fixers changed nothing on the given attempt, so the failure was escalated.
    Escalated { attempt: u32, escalation: Escalation },
}

impl LoopStop {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopStop::Passed { .. })
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Number of test runs performed.
    pub attempts_run: u32,
    pub stop: LoopStop,
    /// Captured stdout of the last test run.
    pub last_output: String,
    /// Contents of the last error log, if any attempt failed.
    pub last_error_log: Option<String>,
}
