//! Failing-file extraction from a structured test report.
//!
//! The test runner writes a JSON report in the pytest-json-report layout:
//!
//! ```json
//! {
//!   "root": "/work/project",
//!   "collectors": [{ "nodeid": "test_app.py", "outcome": "failed" }],
//!   "tests": [{
//!     "nodeid": "test_app.py::TestSynthesize::test_empty_text",
//!     "outcome": "failed",
//!     "call": {
//!       "crash": { "path": "/work/project/app.py", "lineno": 21 },
//!       "traceback": [{ "path": "test_app.py", "lineno": 33 }]
//!     }
//!   }]
//! }
//! ```
//!
//! Every failed or errored test contributes the file of its node id plus each
//! crash and traceback location of every stage. Failed collectors (import or
//! syntax errors) contribute their node id. Paths are re-rooted onto the
//! project root; anything that escapes it (site-packages, stdlib) is dropped.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Report {
    root: Option<String>,
    collectors: Vec<Collector>,
    tests: Vec<TestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Collector {
    nodeid: String,
    outcome: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestEntry {
    nodeid: String,
    outcome: String,
    setup: Option<Stage>,
    call: Option<Stage>,
    teardown: Option<Stage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Stage {
    crash: Option<Location>,
    traceback: Vec<Location>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Location {
    path: String,
}

/// Summary counts derived from a report, used for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCounts {
    pub failed_tests: usize,
    pub failed_collectors: usize,
}

/// Parse `report_json` and return the project-relative files implicated in failures.
///
/// The result is sorted and deduplicated. Absolute paths outside `root`, and
/// relative paths that climb out of it, are discarded.
pub fn failing_files(report_json: &str, root: &Path) -> Result<Vec<PathBuf>> {
    let report: Report = serde_json::from_str(report_json).context("parse test report json")?;
    let report_root = report.root.as_deref().map(Path::new);

    let mut files = BTreeSet::new();
    let mut push = |raw: &str| {
        if let Some(path) = reroot(raw, report_root, root) {
            files.insert(path);
        }
    };

    for collector in report.collectors.iter().filter(|c| is_failure(&c.outcome)) {
        push(nodeid_file(&collector.nodeid));
    }
    for test in report.tests.iter().filter(|t| is_failure(&t.outcome)) {
        push(nodeid_file(&test.nodeid));
        for stage in [&test.setup, &test.call, &test.teardown]
            .into_iter()
            .flatten()
        {
            if let Some(crash) = &stage.crash {
                push(&crash.path);
            }
            for entry in &stage.traceback {
                push(&entry.path);
            }
        }
    }

    Ok(files.into_iter().collect())
}

/// Count failed tests and collectors in `report_json`.
pub fn report_counts(report_json: &str) -> Result<ReportCounts> {
    let report: Report = serde_json::from_str(report_json).context("parse test report json")?;
    Ok(ReportCounts {
        failed_tests: report
            .tests
            .iter()
            .filter(|t| is_failure(&t.outcome))
            .count(),
        failed_collectors: report
            .collectors
            .iter()
            .filter(|c| is_failure(&c.outcome))
            .count(),
    })
}

fn is_failure(outcome: &str) -> bool {
    matches!(outcome, "failed" | "error")
}

/// File part of a pytest node id (`path/to/test_x.py::Class::test[param]`).
fn nodeid_file(nodeid: &str) -> &str {
    nodeid.split("::").next().unwrap_or_default()
}

/// Map a report path onto a normalized path relative to `root`.
fn reroot(raw: &str, report_root: Option<&Path>, root: &Path) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match report_root {
            Some(base) => base.join(path),
            None => root.join(path),
        }
    };
    let relative = normalize(&absolute)?
        .strip_prefix(normalize(root)?)
        .ok()?
        .to_path_buf();
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
