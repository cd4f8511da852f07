//! Stable exit codes for the fixloop CLI.

/// Every test passed (or a scaffolding command succeeded).
pub const OK: i32 = 0;
/// Preflight or safety gate failed, the config is invalid, attempts were
/// exhausted, or the run ended in repair escalation.
pub const FAILED: i32 = 1;
