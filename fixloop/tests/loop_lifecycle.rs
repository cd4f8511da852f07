//! Loop-level lifecycle tests.
//!
//! These drive `run_fix_loop` through complete scenarios: a formatter that
//! repairs the suite on its own, and an agent-mode escalation whose patch makes
//! the next run pass.

use fixloop::core::types::{Escalation, LoopStop, RepairResult};
use fixloop::fix_loop::run_fix_loop;
use fixloop::io::config::{FixloopConfig, RepairMode};
use fixloop::io::fixers::CommandFixers;
use fixloop::io::init::FixloopPaths;
use fixloop::io::suite::CommandTestRunner;
use fixloop::test_support::{
    ScriptedFixer, ScriptedRepairer, ScriptedSuite, ScriptedTestRunner, TestRepo, failing_run,
    passing_run, report_with_failure,
};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Attempt 1 fails, the formatter edits `app.py`, attempt 2 passes.
#[test]
fn formatter_fix_turns_the_suite_green() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = FixloopConfig::default();
    cfg.test.command =
        sh("grep -q formatted app.py && echo '1 passed' || { echo 'FAILED'; exit 1; }");
    cfg.test.timeout_secs = 30;
    let fixers = CommandFixers {
        formatter: sh("grep -q formatted app.py || echo '# formatted' >> app.py"),
        linter: sh("exit 1"),
    };

    let outcome = run_fix_loop(
        repo.path(),
        &cfg,
        &CommandTestRunner,
        &fixers,
        None::<&ScriptedRepairer>,
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Passed { attempt: 2 });
    assert_eq!(outcome.attempts_run, 2);
    assert!(outcome.last_output.contains("1 passed"));
    let paths = FixloopPaths::new(repo.path());
    assert!(!paths.error_log_path.exists());
    assert!(!paths.output_log_path.exists());
}

/// Agent mode: the fixers change nothing, the agent's diff is applied, the
/// loop still stops, and a fresh run on the committed fix passes.
#[test]
fn agent_patch_is_applied_then_next_run_passes() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = FixloopConfig::default();
    cfg.repair.mode = RepairMode::Agent;

    let failing = ScriptedTestRunner::new(vec![ScriptedSuite {
        run: failing_run("FAILED test_app.py::test_x - assert 1 == 2"),
        report: Some((
            ".fixloop/report.json".to_string(),
            report_with_failure("app.py::test_x", "app.py"),
        )),
    }]);
    let repairer = ScriptedRepairer::new(
        "The constant is wrong.\n\n```diff\n--- a/app.py\n+++ b/app.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n```\n",
    );

    let outcome = run_fix_loop(
        repo.path(),
        &cfg,
        &failing,
        &ScriptedFixer::noop(),
        Some(&repairer),
    )
    .expect("loop");

    let paths = FixloopPaths::new(repo.path());
    assert_eq!(
        outcome.stop,
        LoopStop::Escalated {
            attempt: 1,
            escalation: Escalation::Handoff {
                failing_files: vec!["app.py".into()],
                prompt_path: paths.prompt_path.clone(),
                repair: RepairResult::PatchApplied {
                    patch_path: paths.patch_path.clone(),
                },
            },
        }
    );
    assert!(!outcome.stop.is_success());
    assert_eq!(repo.read_file("app.py").expect("read"), "x = 2\n");
    let prompt = &repairer.prompts()[0];
    assert!(prompt.contains("assert 1 == 2"));
    assert!(prompt.contains("<file path=\"app.py\">"));

    repo.commit_all("apply repair").expect("commit");
    let passing = ScriptedTestRunner::new(vec![passing_run("1 passed").into()]);
    let rerun = run_fix_loop(
        repo.path(),
        &cfg,
        &passing,
        &ScriptedFixer::noop(),
        Some(&repairer),
    )
    .expect("rerun");

    assert_eq!(rerun.stop, LoopStop::Passed { attempt: 1 });
    assert!(!paths.patch_path.exists());
    assert!(!paths.prompt_path.exists());
    assert_eq!(repairer.prompts().len(), 1);
}
