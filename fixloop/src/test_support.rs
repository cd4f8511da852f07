//! Test-only helpers: throwaway git repositories and scripted adapters.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::TestOutcome;
use crate::io::fixers::{FixReport, FixRequest, StaticFixer};
use crate::io::repair_client::Repairer;
use crate::io::suite::{SuiteRequest, SuiteRun, TestRunner};

/// A temporary git repository with one committed file, `app.py` (`x = 1`).
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.name", "fixloop tests"])?;
        repo.git(&["config", "user.email", "fixloop@example.invalid"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("app.py", "x = 1\n")?;
        repo.commit_all("initial")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage and commit everything, including `.fixloop/` files not ignored.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "--allow-empty", "-m", message])
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// A passing suite run with the given stdout.
pub fn passing_run(stdout: &str) -> SuiteRun {
    SuiteRun {
        outcome: TestOutcome::Pass,
        stdout: stdout.to_string(),
        log: format!("=== stdout ===\n{stdout}"),
        timed_out: false,
    }
}

/// A failing suite run whose log carries `message`.
pub fn failing_run(message: &str) -> SuiteRun {
    SuiteRun {
        outcome: TestOutcome::Fail,
        stdout: message.to_string(),
        log: format!("=== stdout ===\n{message}"),
        timed_out: false,
    }
}

/// One scripted test run: the result to return plus an optional report to
/// write at the requested report path, the way a real runner would.
#[derive(Debug, Clone)]
pub struct ScriptedSuite {
    pub run: SuiteRun,
    pub report: Option<(String, String)>,
}

impl From<SuiteRun> for ScriptedSuite {
    fn from(run: SuiteRun) -> Self {
        Self { run, report: None }
    }
}

/// Returns scripted runs in order; the last one repeats once the queue drains.
pub struct ScriptedTestRunner {
    runs: RefCell<VecDeque<ScriptedSuite>>,
    last: RefCell<Option<ScriptedSuite>>,
    calls: Cell<u32>,
}

impl ScriptedTestRunner {
    pub fn new(runs: Vec<ScriptedSuite>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            last: RefCell::new(None),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &SuiteRequest) -> Result<SuiteRun> {
        self.calls.set(self.calls.get() + 1);
        let next = match self.runs.borrow_mut().pop_front() {
            Some(next) => {
                *self.last.borrow_mut() = Some(next.clone());
                next
            }
            None => self
                .last
                .borrow()
                .clone()
                .ok_or_else(|| anyhow!("scripted test runner has no runs"))?,
        };
        if let Some((rel, contents)) = &next.report {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
        Ok(next.run)
    }
}

/// Applies one scripted edit per call (`None` means the fixers changed nothing).
pub struct ScriptedFixer {
    edits: RefCell<VecDeque<Option<(String, String)>>>,
    calls: Cell<u32>,
}

impl ScriptedFixer {
    pub fn new(edits: Vec<Option<(&str, &str)>>) -> Self {
        let edits = edits
            .into_iter()
            .map(|edit| edit.map(|(rel, contents)| (rel.to_string(), contents.to_string())))
            .collect();
        Self {
            edits: RefCell::new(edits),
            calls: Cell::new(0),
        }
    }

    /// A fixer that never changes anything.
    pub fn noop() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl StaticFixer for ScriptedFixer {
    fn fix(&self, request: &FixRequest) -> Result<FixReport> {
        self.calls.set(self.calls.get() + 1);
        if let Some(Some((rel, contents))) = self.edits.borrow_mut().pop_front() {
            fs::write(request.workdir.join(rel), contents)?;
        }
        Ok(FixReport::default())
    }
}

/// Returns a fixed response and records the prompts it received.
pub struct ScriptedRepairer {
    response: String,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedRepairer {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Repairer for ScriptedRepairer {
    fn propose_patch(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self.response.clone())
    }
}

/// A minimal pytest-json-report document with one failing test.
pub fn report_with_failure(nodeid: &str, crash_path: &str) -> String {
    serde_json::json!({
        "collectors": [],
        "tests": [{
            "nodeid": nodeid,
            "outcome": "failed",
            "call": { "crash": { "path": crash_path, "lineno": 1 }, "traceback": [] }
        }]
    })
    .to_string()
}
