//! Orchestration for a full `fixloop` run: preflight, safety gate, loop, report.
//!
//! Preconditions are checked in a fixed order so nothing is mutated when one
//! fails: config, then tools and credentials, then the git working tree.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::types::{Escalation, LoopOutcome, LoopStop, RepairResult};
use crate::exit_codes;
use crate::fix_loop::run_fix_loop;
use crate::io::config::{FixloopConfig, RepairMode, load_config};
use crate::io::fixers::CommandFixers;
use crate::io::git::Git;
use crate::io::init::FixloopPaths;
use crate::io::preflight::check_preflight;
use crate::io::repair_client::ChatCompletionsRepairer;
use crate::io::suite::CommandTestRunner;

/// Inputs for `run_fixloop`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    /// Overrides `.fixloop/config.toml`.
    pub config_path: Option<PathBuf>,
}

/// Run the loop in `options.root` and print the final report.
///
/// Returns the process exit code. Precondition failures are returned as
/// errors ([`crate::io::preflight::PreflightError`],
/// [`crate::io::git::DirtyTreeError`]) before any test runs.
pub fn run_fixloop(options: &RunOptions) -> Result<i32> {
    let root = options.root.as_path();
    let paths = FixloopPaths::new(root);
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| paths.config_path.clone());
    let cfg = load_config(&config_path)?;
    debug!(config = %config_path.display(), mode = ?cfg.repair.mode, "config loaded");

    let env_lookup = |key: &str| env::var(key).ok();
    check_preflight(&cfg, root, env_lookup)?;

    let git = Git::new(root);
    git.ensure_work_tree()?;
    git.ensure_clean_except_prefixes(&cfg.exempt_paths(root))?;

    let repairer = match cfg.repair.mode {
        RepairMode::Agent => Some(ChatCompletionsRepairer::from_config(&cfg, env_lookup)?),
        RepairMode::Prompt => None,
    };
    let fixers = CommandFixers {
        formatter: cfg.formatter_command(),
        linter: cfg.linter_command(),
    };

    let outcome = run_fix_loop(root, &cfg, &CommandTestRunner, &fixers, repairer.as_ref())?;
    info!(
        attempts = outcome.attempts_run,
        success = outcome.stop.is_success(),
        "loop finished"
    );

    write_report(&outcome, &cfg, root, &mut io::stdout(), &mut io::stderr())
        .context("write final report")?;
    Ok(exit_code(&outcome.stop))
}

pub fn exit_code(stop: &LoopStop) -> i32 {
    if stop.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

/// Print the final report: captured test output on success, otherwise a
/// summary on `out` and the last error log on `err`.
pub fn write_report(
    outcome: &LoopOutcome,
    cfg: &FixloopConfig,
    root: &Path,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<()> {
    match &outcome.stop {
        LoopStop::Passed { attempt } => {
            write!(out, "{}", outcome.last_output)?;
            if !outcome.last_output.ends_with('\n') && !outcome.last_output.is_empty() {
                writeln!(out)?;
            }
            writeln!(out, "fixloop: tests passed on attempt {attempt}")?;
        }
        LoopStop::Exhausted { attempts } => {
            writeln!(out, "fixloop: tests still failing after {attempts} attempt(s)")?;
            write_error_log(outcome, err)?;
        }
        LoopStop::Escalated {
            attempt,
            escalation,
        } => {
            writeln!(
                out,
                "fixloop: formatter and linter changed nothing on attempt {attempt}; escalating"
            )?;
            write_escalation(escalation, cfg, root, out)?;
            write_error_log(outcome, err)?;
        }
    }
    Ok(())
}

fn write_escalation(
    escalation: &Escalation,
    cfg: &FixloopConfig,
    root: &Path,
    out: &mut impl Write,
) -> io::Result<()> {
    match escalation {
        Escalation::NoFailingFiles => {
            writeln!(
                out,
                "fixloop: no failing files found in {}; no repair prompt written",
                cfg.test.report_path
            )?;
        }
        Escalation::Handoff {
            failing_files,
            prompt_path,
            repair,
        } => {
            writeln!(out, "fixloop: failing files:")?;
            for file in failing_files {
                writeln!(out, "  {}", file.display())?;
            }
            writeln!(
                out,
                "fixloop: repair prompt written to {}",
                display_rel(prompt_path, root)
            )?;
            match repair {
                RepairResult::PromptOnly => {
                    writeln!(out, "fixloop: hand the prompt to a repair agent, then rerun")?;
                }
                RepairResult::PatchApplied { patch_path } => {
                    writeln!(
                        out,
                        "fixloop: applied {}; review the change and rerun",
                        display_rel(patch_path, root)
                    )?;
                }
                RepairResult::PatchRejected { patch_path, reason } => {
                    match patch_path {
                        Some(path) => writeln!(
                            out,
                            "fixloop: patch {} was not applied: {reason}",
                            display_rel(path, root)
                        )?,
                        None => writeln!(out, "fixloop: no patch applied: {reason}")?,
                    }
                }
            }
        }
    }
    Ok(())
}

fn write_error_log(outcome: &LoopOutcome, err: &mut impl Write) -> io::Result<()> {
    if let Some(log) = &outcome.last_error_log {
        writeln!(err, "--- last error log ---")?;
        write!(err, "{log}")?;
        if !log.ends_with('\n') {
            writeln!(err)?;
        }
    }
    Ok(())
}

/// Show artifact paths relative to the project root when possible.
fn display_rel(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::preflight::PreflightError;

    fn outcome(stop: LoopStop) -> LoopOutcome {
        LoopOutcome {
            attempts_run: 1,
            stop,
            last_output: "3 passed\n".to_string(),
            last_error_log: Some("FAILED test_app.py::test_x\n".to_string()),
        }
    }

    fn report(outcome: &LoopOutcome) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        write_report(
            outcome,
            &FixloopConfig::default(),
            Path::new("/work"),
            &mut out,
            &mut err,
        )
        .expect("report");
        (
            String::from_utf8(out).expect("utf8"),
            String::from_utf8(err).expect("utf8"),
        )
    }

    #[test]
    fn passed_report_prints_test_output() {
        let (out, err) = report(&outcome(LoopStop::Passed { attempt: 2 }));
        assert!(out.starts_with("3 passed\n"));
        assert!(out.contains("passed on attempt 2"));
        assert!(err.is_empty());
        assert_eq!(exit_code(&LoopStop::Passed { attempt: 2 }), exit_codes::OK);
    }

    #[test]
    fn exhausted_report_prints_last_error_log() {
        let stop = LoopStop::Exhausted { attempts: 3 };
        let (out, err) = report(&outcome(stop.clone()));
        assert!(out.contains("after 3 attempt(s)"));
        assert!(err.contains("FAILED test_app.py::test_x"));
        assert_eq!(exit_code(&stop), exit_codes::FAILED);
    }

    #[test]
    fn escalated_report_names_prompt_and_patch_outcome() {
        let stop = LoopStop::Escalated {
            attempt: 1,
            escalation: Escalation::Handoff {
                failing_files: vec![PathBuf::from("app.py")],
                prompt_path: PathBuf::from("/work/.fixloop/prompt.md"),
                repair: RepairResult::PatchRejected {
                    patch_path: Some(PathBuf::from("/work/.fixloop/repair.patch")),
                    reason: "does not apply".to_string(),
                },
            },
        };
        let (out, err) = report(&outcome(stop.clone()));
        assert!(out.contains("  app.py"));
        assert!(out.contains(".fixloop/prompt.md"));
        assert!(out.contains("patch .fixloop/repair.patch was not applied: does not apply"));
        assert!(err.contains("--- last error log ---"));
        assert_eq!(exit_code(&stop), exit_codes::FAILED);
    }

    #[test]
    fn escalation_without_files_says_so() {
        let stop = LoopStop::Escalated {
            attempt: 1,
            escalation: Escalation::NoFailingFiles,
        };
        let (out, _) = report(&outcome(stop));
        assert!(out.contains("no failing files found in .fixloop/report.json"));
    }

    #[test]
    fn invalid_config_fails_before_preflight() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = temp.path().join("bad.toml");
        std::fs::write(&config, "max_attempts = 0\n").expect("write");
        let err = run_fixloop(&RunOptions {
            root: temp.path().to_path_buf(),
            config_path: Some(config),
        })
        .unwrap_err();
        assert!(err.downcast_ref::<PreflightError>().is_none());
        assert!(format!("{err:#}").contains("max_attempts must be > 0"));
    }
}
