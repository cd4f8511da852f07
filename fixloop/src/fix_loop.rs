//! The bounded attempt loop behind `fixloop`.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{LoopOutcome, LoopStop, TestOutcome};
use crate::escalate::escalate;
use crate::io::artifacts::{clear_report, remove_artifacts, write_text};
use crate::io::config::FixloopConfig;
use crate::io::fixers::{FixRequest, StaticFixer};
use crate::io::git::Git;
use crate::io::init::FixloopPaths;
use crate::io::repair_client::Repairer;
use crate::io::suite::{SuiteRequest, TestRunner};

/// Run tests, auto-fix and retry until the suite passes, the attempt budget
/// runs out, or the fixers stop changing the tree.
///
/// Test failures drive the loop; only I/O failures (spawning tools, git,
/// writing artifacts) are returned as errors.
#[instrument(skip_all, fields(root = %root.display(), max_attempts = cfg.max_attempts))]
pub fn run_fix_loop<T: TestRunner, S: StaticFixer, R: Repairer>(
    root: &Path,
    cfg: &FixloopConfig,
    tests: &T,
    fixer: &S,
    repairer: Option<&R>,
) -> Result<LoopOutcome> {
    let paths = FixloopPaths::new(root);
    let report_path = paths.report_path(cfg);
    let git = Git::new(root);
    let exempt = cfg.exempt_paths(root);
    let request = SuiteRequest {
        workdir: root.to_path_buf(),
        command: cfg.test_command(),
        timeout: cfg.test_timeout(),
        output_limit_bytes: cfg.test.output_limit_bytes,
    };
    let fix_request = FixRequest {
        workdir: root.to_path_buf(),
        timeout: cfg.fix_timeout(),
    };

    let mut last_output = String::new();
    let mut last_error_log = None;

    for attempt in 1..=cfg.max_attempts {
        info!(attempt, "attempt started");
        clear_report(&report_path)?;
        let run = tests.run(&request)?;
        write_text(&paths.output_log_path, &run.stdout)?;
        last_output = run.stdout;

        if run.outcome == TestOutcome::Pass {
            remove_artifacts(&paths, &report_path)?;
            info!(attempt, "test suite passed");
            return Ok(LoopOutcome {
                attempts_run: attempt,
                stop: LoopStop::Passed { attempt },
                last_output,
                last_error_log: None,
            });
        }

        write_text(&paths.error_log_path, &run.log)?;
        last_error_log = Some(run.log);
        if run.timed_out {
            warn!(attempt, "test suite timed out; treating as failure");
        }

        let before = git.snapshot(&exempt)?;
        let report = fixer.fix(&fix_request)?;
        let after = git.snapshot(&exempt)?;

        if before == after {
            info!(attempt, steps = report.steps.len(), "fixers changed nothing; escalating");
            let error_log = last_error_log.as_deref().unwrap_or_default();
            let escalation = escalate(&paths, cfg, attempt, error_log, repairer)?;
            return Ok(LoopOutcome {
                attempts_run: attempt,
                stop: LoopStop::Escalated {
                    attempt,
                    escalation,
                },
                last_output,
                last_error_log,
            });
        }
        info!(attempt, "fixers changed files");
    }

    warn!(attempts = cfg.max_attempts, "attempt budget exhausted");
    Ok(LoopOutcome {
        attempts_run: cfg.max_attempts,
        stop: LoopStop::Exhausted {
            attempts: cfg.max_attempts,
        },
        last_output,
        last_error_log,
    })
}
