//! Bounded test/auto-fix loop with repair escalation.
//!
//! `fixloop` runs a project's test suite, and on failure runs the configured
//! formatter and linter before trying again. When the static fixers stop
//! changing the tree, the failure context (error log plus failing source files)
//! is bundled into a prompt for an external repair agent. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (report parsing, diff extraction,
//!   loop outcome types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, child processes,
//!   HTTP). Exposed through traits so tests can script them.
//!
//! Orchestration modules ([`run`], [`fix_loop`], [`escalate`]) coordinate core
//! logic with I/O to implement the CLI.

pub mod core;
pub mod escalate;
pub mod exit_codes;
pub mod fix_loop;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
