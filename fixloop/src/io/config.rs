//! Fixloop configuration stored under `.fixloop/config.toml`.

use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::init::FIXLOOP_DIR;

/// Placeholder replaced by [`FixloopConfig::target`] in tool commands.
pub const TARGET_PLACEHOLDER: &str = "{target}";
/// Placeholder replaced by [`TestConfig::report_path`] in tool commands.
pub const REPORT_PLACEHOLDER: &str = "{report}";

/// Fixloop configuration (TOML).
///
/// Every field has a default, so a missing file or a partial file is valid.
/// Commands are argv arrays; `{target}` and `{report}` are expanded before
/// spawning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixloopConfig {
    /// Attempt budget: maximum number of test runs.
    pub max_attempts: u32,

    /// Path (relative to the project root) handed to the tools.
    pub target: String,

    pub test: TestConfig,
    pub fix: FixConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Test command, run with coverage. Must write the JSON report to `report_path`.
    pub command: Vec<String>,
    /// Structured failure report written by the test command, relative to the root.
    pub report_path: String,
    pub timeout_secs: u64,
    /// Truncate captured test stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Files or directories (relative to the root, trailing `/` for a
    /// directory) the test command may leave behind, such as coverage data.
    /// They neither block the clean-tree gate nor count as fixer changes.
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixConfig {
    pub formatter: Vec<String>,
    pub linter: Vec<String>,
    /// Per-tool timeout.
    pub timeout_secs: u64,
}

/// What happens once the fixers stop changing the tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    /// Write the prompt bundle and stop.
    Prompt,
    /// Also send the prompt to the endpoint and apply the returned diff.
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    pub mode: RepairMode,
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub prompt_budget_bytes: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: argv(&[
                "pytest",
                "--cov={target}",
                "--json-report",
                "--json-report-file={report}",
                "{target}",
            ]),
            report_path: ".fixloop/report.json".to_string(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            artifacts: argv(&[".coverage"]),
        }
    }
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            formatter: argv(&["black", "{target}"]),
            linter: argv(&["ruff", "check", "--fix", "{target}"]),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            mode: RepairMode::Prompt,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            target: ".".to_string(),
            test: TestConfig::default(),
            fix: FixConfig::default(),
            repair: RepairConfig::default(),
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.target.trim().is_empty() {
            return Err(anyhow!("target must not be empty"));
        }
        require_command("test.command", &self.test.command)?;
        require_command("fix.formatter", &self.fix.formatter)?;
        require_command("fix.linter", &self.fix.linter)?;
        if self.test.report_path.trim().is_empty() {
            return Err(anyhow!("test.report_path must not be empty"));
        }
        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        if self.test.output_limit_bytes == 0 {
            return Err(anyhow!("test.output_limit_bytes must be > 0"));
        }
        if self.fix.timeout_secs == 0 {
            return Err(anyhow!("fix.timeout_secs must be > 0"));
        }
        if self.repair.prompt_budget_bytes == 0 {
            return Err(anyhow!("repair.prompt_budget_bytes must be > 0"));
        }
        if self.repair.mode == RepairMode::Agent {
            if self.repair.endpoint.trim().is_empty() {
                return Err(anyhow!("repair.endpoint must be set in agent mode"));
            }
            if self.repair.model.trim().is_empty() {
                return Err(anyhow!("repair.model must be set in agent mode"));
            }
            if self.repair.api_key_env.trim().is_empty() {
                return Err(anyhow!("repair.api_key_env must be set in agent mode"));
            }
            if self.repair.timeout_secs == 0 {
                return Err(anyhow!("repair.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    /// Test command with placeholders expanded.
    pub fn test_command(&self) -> Vec<String> {
        self.expand(&self.test.command)
    }

    pub fn formatter_command(&self) -> Vec<String> {
        self.expand(&self.fix.formatter)
    }

    pub fn linter_command(&self) -> Vec<String> {
        self.expand(&self.fix.linter)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test.timeout_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix.timeout_secs)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair.timeout_secs)
    }

    /// Root-relative paths that may be dirty without blocking the run or
    /// counting as a fixer change: the tool directory, the report file when it
    /// lives elsewhere under the root, and the configured test artifacts.
    pub fn exempt_paths(&self, root: &Path) -> Vec<String> {
        let mut exempt = vec![FIXLOOP_DIR.to_string()];
        let candidates = std::iter::once(&self.test.report_path).chain(&self.test.artifacts);
        for item in candidates {
            let Some(rel) = root_relative(root, item) else {
                continue;
            };
            if !rel.starts_with(FIXLOOP_DIR) && !exempt.contains(&rel) {
                exempt.push(rel);
            }
        }
        exempt
    }

    fn expand(&self, command: &[String]) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace(TARGET_PLACEHOLDER, &self.target)
                    .replace(REPORT_PLACEHOLDER, &self.test.report_path)
            })
            .collect()
    }
}

fn require_command(label: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{label} must be a non-empty array")),
    }
}

/// Normalise `item` to a `/`-separated path relative to `root`, keeping a
/// trailing `/`. `None` for paths outside the root or with `..` segments.
fn root_relative(root: &Path, item: &str) -> Option<String> {
    let path = Path::new(item.trim());
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    let mut out = parts.join("/");
    if item.trim_end().ends_with('/') {
        out.push('/');
    }
    Some(out)
}

fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
