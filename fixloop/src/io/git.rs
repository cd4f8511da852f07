//! Git adapter for the safety gate, change detection and patch application.
//!
//! Every git interaction goes through the `git` binary in the project root, so
//! we keep a small, explicit wrapper around subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }
}

/// Observable state of the working tree, used to decide whether the static
/// fixers changed anything.
///
/// Two snapshots are equal iff the status entries, the unstaged diff, and the
/// contents of untracked files are all identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeSnapshot {
    pub entries: Vec<StatusEntry>,
    pub diff: String,
    /// `(path, blob id)` for every untracked file.
    pub untracked: Vec<(String, String)>,
}

/// Returned by [`Git::ensure_clean_except_prefixes`]; recoverable with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyTreeError {
    pub entries: Vec<StatusEntry>,
}

impl std::fmt::Display for DirtyTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "working tree not clean (commit or stash first):")?;
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|entry| format!("{} {}", entry.code, entry.path))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

impl std::error::Error for DirtyTreeError {}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Fail unless `workdir` is inside a git work tree.
    pub fn ensure_work_tree(&self) -> Result<()> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true" {
            return Ok(());
        }
        Err(anyhow!(
            "{} is not inside a git work tree",
            self.workdir.display()
        ))
    }

    /// Get status entries (including untracked) in porcelain format.
    ///
    /// Uses `-z` so paths arrive verbatim, without C-style quoting.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-z", "-uall"])?;
        parse_porcelain_z(&out)
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    ///
    /// On violation the error is a [`DirtyTreeError`].
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes<S: AsRef<str>>(
        &self,
        allowed_prefixes: &[S],
    ) -> Result<()> {
        let disallowed = filter_entries(self.status_porcelain()?, allowed_prefixes);
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        Err(DirtyTreeError {
            entries: disallowed,
        }
        .into())
    }

    /// Capture the observable worktree state, ignoring `excluded_prefixes`.
    #[instrument(skip_all)]
    pub fn snapshot<S: AsRef<str>>(&self, excluded_prefixes: &[S]) -> Result<WorktreeSnapshot> {
        let entries = filter_entries(self.status_porcelain()?, excluded_prefixes);

        let mut args: Vec<String> = ["diff", "--no-color", "--no-ext-diff", "--", "."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for prefix in excluded_prefixes {
            args.push(format!(":(exclude){}", prefix.as_ref().trim_end_matches('/')));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let diff = self.run_capture(&arg_refs)?;

        let untracked_paths: Vec<&str> = entries
            .iter()
            .filter(|e| e.is_untracked())
            .map(|e| e.path.as_str())
            .collect();
        let untracked = if untracked_paths.is_empty() {
            Vec::new()
        } else {
            let mut hash_args = vec!["hash-object", "--"];
            hash_args.extend(untracked_paths.iter().copied());
            let out = self.run_capture(&hash_args)?;
            untracked_paths
                .iter()
                .zip(out.lines())
                .map(|(path, oid)| (path.to_string(), oid.trim().to_string()))
                .collect()
        };

        debug!(
            entries = entries.len(),
            diff_bytes = diff.len(),
            untracked = untracked.len(),
            "worktree snapshot"
        );
        Ok(WorktreeSnapshot {
            entries,
            diff,
            untracked,
        })
    }

    /// Check and apply a unified diff file to the working tree.
    ///
    /// Runs `git apply --check` first so a rejected patch leaves the tree untouched.
    #[instrument(skip_all, fields(patch = %patch_path.display()))]
    pub fn apply_patch(&self, patch_path: &Path) -> Result<()> {
        let patch = patch_path.to_string_lossy();
        self.run_checked(&["apply", "--check", "--whitespace=nowarn", &patch])?;
        self.run_checked(&["apply", "--whitespace=nowarn", &patch])?;
        debug!("patch applied");
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Drop entries covered by `excluded`: a directory prefix when the item ends
/// with `/`, otherwise an exact path.
fn filter_entries<S: AsRef<str>>(entries: Vec<StatusEntry>, excluded: &[S]) -> Vec<StatusEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            !excluded
                .iter()
                .any(|item| covers(item.as_ref(), &entry.path))
        })
        .collect()
}

fn covers(item: &str, path: &str) -> bool {
    if item.ends_with('/') {
        path.starts_with(item)
    } else {
        path == item || path.starts_with(&format!("{item}/"))
    }
}

/// Parse `git status --porcelain=v1 -z` output.
///
/// Records are `XY path`, NUL-terminated. Renames and copies carry the
/// original path as an extra record, which is skipped.
fn parse_porcelain_z(out: &str) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut records = out.split('\0').filter(|r| !r.is_empty());
    while let Some(record) = records.next() {
        let (Some(code), Some(path)) = (record.get(..2), record.get(3..)) else {
            return Err(anyhow!("unexpected porcelain record: '{record}'"));
        };
        if path.is_empty() {
            return Err(anyhow!("unexpected porcelain record: '{record}'"));
        }
        if code.contains(['R', 'C']) {
            records.next();
        }
        entries.push(StatusEntry {
            code: code.to_string(),
            path: path.to_string(),
        });
    }
    Ok(entries)
}
