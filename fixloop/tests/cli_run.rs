//! CLI tests for `fixloop`.
//!
//! Spawns the binary against throwaway git repositories, with `sh -c` scripts
//! standing in for the test runner, formatter and linter.

use std::path::Path;
use std::process::{Command, Output};

use fixloop::exit_codes;
use fixloop::io::init::FixloopPaths;
use fixloop::test_support::TestRepo;

fn config(test: &str, formatter: &str, linter: &str) -> String {
    format!(
        r#"max_attempts = 2

[test]
command = ["sh", "-c", {test:?}]

[fix]
formatter = {formatter}
linter = {linter}
"#
    )
}

fn sh(script: &str) -> String {
    format!(r#"["sh", "-c", {script:?}]"#)
}

fn fixloop(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fixloop"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("spawn fixloop")
}

#[test]
fn passing_suite_exits_zero_and_cleans_up() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(
        ".fixloop/config.toml",
        &config("echo '2 passed'", &sh("true"), &sh("true")),
    )
    .expect("config");

    let output = fixloop(repo.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("2 passed"));
    let paths = FixloopPaths::new(repo.path());
    assert!(!paths.output_log_path.exists());
    assert!(!paths.error_log_path.exists());
}

#[test]
fn dirty_tree_exits_before_running_tests() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(
        ".fixloop/config.toml",
        &config("touch ran.marker", &sh("true"), &sh("true")),
    )
    .expect("config");
    repo.write_file("app.py", "x = 2\n").expect("dirty");

    let output = fixloop(repo.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("working tree not clean"));
    assert!(!repo.path().join("ran.marker").exists());
}

#[test]
fn missing_tool_exits_before_touching_git() {
    // Not a git repository: reaching the safety gate would report that instead.
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("fixloop.toml");
    std::fs::write(
        &config_path,
        config(
            "true",
            r#"["fixloop-missing-formatter", "."]"#,
            &sh("true"),
        ),
    )
    .expect("config");

    let output = fixloop(
        temp.path(),
        &["--config", config_path.to_str().expect("utf8 path")],
    );

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fixloop-missing-formatter"), "{stderr}");
    assert!(!stderr.contains("git work tree"), "{stderr}");
}

#[test]
fn unfixable_failure_escalates_and_exits_one() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(
        ".fixloop/config.toml",
        &config(
            "echo run >> .fixloop/runs.txt; echo 'FAILED test_app.py::test_x'; exit 1",
            &sh("true"),
            &sh("exit 1"),
        ),
    )
    .expect("config");

    let output = fixloop(repo.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("escalating"), "{stdout}");
    assert!(stdout.contains("no failing files"), "{stdout}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("FAILED test_app.py::test_x"));
    assert_eq!(
        repo.read_file(".fixloop/runs.txt").expect("runs"),
        "run\n",
        "escalation stops after the first unchanged attempt"
    );
    assert!(!FixloopPaths::new(repo.path()).prompt_path.exists());
}

#[test]
fn formatter_changes_keep_the_loop_going_until_exhausted() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(
        ".fixloop/config.toml",
        &config(
            "echo run >> .fixloop/runs.txt; exit 1",
            &sh("echo '# touched' >> app.py"),
            &sh("true"),
        ),
    )
    .expect("config");

    let output = fixloop(repo.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stdout).contains("after 2 attempt(s)"));
    assert_eq!(
        repo.read_file(".fixloop/runs.txt").expect("runs"),
        "run\nrun\n"
    );
}

#[test]
fn leftovers_from_a_failed_run_do_not_block_the_next_one() {
    let repo = TestRepo::new().expect("repo");
    let test = "echo run >> .fixloop/runs.txt; echo data > .coverage; \
                mkdir -p reports; echo '{}' > reports/report.json; exit 1";
    repo.write_file(
        ".fixloop/config.toml",
        &format!(
            r#"max_attempts = 1

[test]
command = ["sh", "-c", {test:?}]
report_path = "reports/report.json"

[fix]
formatter = {fmt}
linter = {fmt}
"#,
            fmt = sh("true"),
        ),
    )
    .expect("config");

    let first = fixloop(repo.path(), &[]);
    assert_eq!(first.status.code(), Some(exit_codes::FAILED));
    assert!(repo.path().join(".coverage").exists());
    assert!(repo.path().join("reports/report.json").exists());

    let second = fixloop(repo.path(), &[]);
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(!stderr.contains("working tree not clean"), "{stderr}");
    assert_eq!(
        repo.read_file(".fixloop/runs.txt").expect("runs"),
        "run\nrun\n"
    );
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = fixloop(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".fixloop/config.toml").exists());

    let second = fixloop(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = fixloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}
