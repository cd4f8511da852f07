//! Repair escalation: bundle the failure for an external agent.
//!
//! Runs once the static fixers stop changing the tree. Failing files come from
//! the structured test report; if none can be identified no prompt is written.
//! In agent mode the prompt is sent to a [`Repairer`] and the returned diff is
//! applied with `git apply`. Whatever happens, escalation ends the loop.

use std::fs;
use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::core::diff::extract_unified_diff;
use crate::core::failures::{failing_files, report_counts};
use crate::core::types::{Escalation, RepairResult};
use crate::io::artifacts::{read_optional, write_text};
use crate::io::config::{FixloopConfig, RepairMode};
use crate::io::git::Git;
use crate::io::init::FixloopPaths;
use crate::io::prompt::{PromptBuilder, PromptFile, PromptInputs};
use crate::io::repair_client::Repairer;

/// Build the repair prompt for the last failure and, in agent mode, try the
/// agent's patch.
#[instrument(skip_all, fields(attempts = attempts, mode = ?cfg.repair.mode))]
pub fn escalate<R: Repairer>(
    paths: &FixloopPaths,
    cfg: &FixloopConfig,
    attempts: u32,
    error_log: &str,
    repairer: Option<&R>,
) -> Result<Escalation> {
    let report_path = paths.report_path(cfg);
    let Some(report) = read_optional(&report_path)? else {
        warn!(path = %report_path.display(), "no test report; cannot identify failing files");
        return Ok(Escalation::NoFailingFiles);
    };
    if let Ok(counts) = report_counts(&report) {
        info!(
            failed_tests = counts.failed_tests,
            failed_collectors = counts.failed_collectors,
            "read test report"
        );
    }

    let failing = match failing_files(&report, &paths.root) {
        Ok(files) => files,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "unreadable test report");
            return Ok(Escalation::NoFailingFiles);
        }
    };
    let files = read_failing_files(paths, &failing);
    if files.is_empty() {
        warn!("no failing files found in the test report");
        return Ok(Escalation::NoFailingFiles);
    }
    let failing_files: Vec<PathBuf> = files.iter().map(|f| PathBuf::from(&f.path)).collect();

    let want_diff = cfg.repair.mode == RepairMode::Agent;
    let pack = PromptBuilder::new(cfg.repair.prompt_budget_bytes).build(&PromptInputs {
        command: cfg.test_command().join(" "),
        attempts,
        error_log: error_log.to_string(),
        files,
        want_diff,
    })?;
    if pack.dropped_files > 0 {
        warn!(
            dropped = pack.dropped_files,
            budget = cfg.repair.prompt_budget_bytes,
            "prompt budget dropped failing files"
        );
    }
    write_text(&paths.prompt_path, pack.render())?;
    info!(
        path = %paths.prompt_path.display(),
        files = pack.included_files,
        "repair prompt written"
    );

    let repair = match cfg.repair.mode {
        RepairMode::Prompt => RepairResult::PromptOnly,
        RepairMode::Agent => {
            let Some(repairer) = repairer else {
                bail!("agent mode requires a repair client");
            };
            request_patch(paths, repairer, pack.render())?
        }
    };

    Ok(Escalation::Handoff {
        failing_files,
        prompt_path: paths.prompt_path.clone(),
        repair,
    })
}

/// Send the prompt, store the response, and apply the diff it carries.
fn request_patch<R: Repairer>(
    paths: &FixloopPaths,
    repairer: &R,
    prompt: &str,
) -> Result<RepairResult> {
    let response = match repairer.propose_patch(prompt) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "repair request failed");
            return Ok(RepairResult::PatchRejected {
                patch_path: None,
                reason: format!("repair request failed: {err:#}"),
            });
        }
    };
    write_text(&paths.response_path, &response)?;

    let Some(diff) = extract_unified_diff(&response) else {
        warn!("repair response contained no unified diff");
        return Ok(RepairResult::PatchRejected {
            patch_path: None,
            reason: "response contained no unified diff".to_string(),
        });
    };
    write_text(&paths.patch_path, &diff)?;

    let git = Git::new(&paths.root);
    match git.apply_patch(&paths.patch_path) {
        Ok(()) => {
            info!(path = %paths.patch_path.display(), "repair patch applied");
            Ok(RepairResult::PatchApplied {
                patch_path: paths.patch_path.clone(),
            })
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "repair patch rejected");
            Ok(RepairResult::PatchRejected {
                patch_path: Some(paths.patch_path.clone()),
                reason: format!("{err:#}"),
            })
        }
    }
}

/// Read every failing file that still exists as a regular file under the root.
fn read_failing_files(paths: &FixloopPaths, failing: &[PathBuf]) -> Vec<PromptFile> {
    let mut files = Vec::new();
    for rel in failing {
        let path = paths.root.join(rel);
        if !path.is_file() {
            continue;
        }
        match fs::read(&path) {
            Ok(bytes) => files.push(PromptFile {
                path: rel.to_string_lossy().into_owned(),
                contents: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable failing file");
            }
        }
    }
    files
}
