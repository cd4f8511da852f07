//! Preflight: required tools on `PATH` and, in agent mode, the API credential.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::io::config::{FixloopConfig, RepairMode};

/// Missing prerequisites, recoverable with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightError {
    pub missing_tools: Vec<String>,
    pub missing_credential: Option<String>,
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.missing_tools.is_empty() {
            parts.push(format!(
                "required tools not found: {}",
                self.missing_tools.join(", ")
            ));
        }
        if let Some(var) = &self.missing_credential {
            parts.push(format!("environment variable {var} is not set"));
        }
        write!(f, "preflight failed: {}", parts.join("; "))
    }
}

impl std::error::Error for PreflightError {}

/// Programs that must resolve before the loop starts: `git` plus the first
/// argv element of every configured tool, deduplicated.
pub fn required_tools(cfg: &FixloopConfig) -> Vec<String> {
    let mut tools = BTreeSet::new();
    tools.insert("git".to_string());
    for command in [
        cfg.test_command(),
        cfg.formatter_command(),
        cfg.linter_command(),
    ] {
        if let Some(program) = command.into_iter().next() {
            tools.insert(program);
        }
    }
    tools.into_iter().collect()
}

/// Verify tools and credentials; `env` looks up environment variables.
#[instrument(skip_all)]
pub fn check_preflight(
    cfg: &FixloopConfig,
    root: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let search_path = env("PATH");
    let mut missing_tools = Vec::new();
    for tool in required_tools(cfg) {
        match which::which_in(&tool, search_path.as_deref(), root) {
            Ok(resolved) => debug!(tool = %tool, path = %resolved.display(), "tool found"),
            Err(_) => {
                warn!(tool = %tool, "tool not found");
                missing_tools.push(tool);
            }
        }
    }

    let missing_credential = match cfg.repair.mode {
        RepairMode::Agent => {
            let var = &cfg.repair.api_key_env;
            let present = env(var).is_some_and(|value| !value.trim().is_empty());
            (!present).then(|| var.clone())
        }
        RepairMode::Prompt => None,
    };

    if missing_tools.is_empty() && missing_credential.is_none() {
        return Ok(());
    }
    Err(PreflightError {
        missing_tools,
        missing_credential,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{FixConfig, RepairConfig, TestConfig};

    fn sh_config() -> FixloopConfig {
        let sh = |s: &str| vec!["sh".to_string(), "-c".to_string(), s.to_string()];
        FixloopConfig {
            test: TestConfig {
                command: sh("exit 0"),
                ..TestConfig::default()
            },
            fix: FixConfig {
                formatter: sh("true"),
                linter: sh("true"),
                ..FixConfig::default()
            },
            ..FixloopConfig::default()
        }
    }

    fn host_env(name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    #[test]
    fn default_tools_are_deduplicated_and_sorted() {
        assert_eq!(
            required_tools(&FixloopConfig::default()),
            vec!["black", "git", "pytest", "ruff"]
        );
        assert_eq!(required_tools(&sh_config()), vec!["git", "sh"]);
    }

    #[test]
    fn passes_when_everything_resolves() {
        let temp = tempfile::tempdir().expect("tempdir");
        check_preflight(&sh_config(), temp.path(), host_env).expect("preflight");
    }

    #[test]
    fn reports_missing_tool() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = sh_config();
        cfg.fix.linter = vec!["fixloop-absent-linter".to_string()];

        let err = check_preflight(&cfg, temp.path(), host_env).unwrap_err();
        let preflight = err.downcast_ref::<PreflightError>().expect("typed error");
        assert_eq!(preflight.missing_tools, vec!["fixloop-absent-linter"]);
        assert_eq!(preflight.missing_credential, None);
    }

    #[test]
    fn agent_mode_requires_credential() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = FixloopConfig {
            repair: RepairConfig {
                mode: RepairMode::Agent,
                api_key_env: "FIXLOOP_TEST_KEY".to_string(),
                ..RepairConfig::default()
            },
            ..sh_config()
        };

        let without = |name: &str| match name {
            "FIXLOOP_TEST_KEY" => None,
            other => host_env(other),
        };
        let err = check_preflight(&cfg, temp.path(), without).unwrap_err();
        assert!(err.to_string().contains("FIXLOOP_TEST_KEY is not set"));

        let with = |name: &str| match name {
            "FIXLOOP_TEST_KEY" => Some("sk-test".to_string()),
            other => host_env(other),
        };
        check_preflight(&cfg, temp.path(), with).expect("preflight");
    }
}
