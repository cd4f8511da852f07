//! Unified-diff extraction from free-form model responses.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
});

/// Pull a single unified diff out of a model response.
///
/// Preference order: a fenced block tagged `diff` or `patch`, then any fenced
/// block whose body looks like a diff, then the bare response if it starts
/// with a diff header. The returned diff always ends with a newline, which
/// `git apply` requires.
pub fn extract_unified_diff(response: &str) -> Option<String> {
    let blocks: Vec<(&str, &str)> = FENCE_RE
        .captures_iter(response)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();

    let tagged = blocks
        .iter()
        .find(|(lang, body)| matches!(*lang, "diff" | "patch") && looks_like_diff(body));
    let untagged = || blocks.iter().find(|(_, body)| looks_like_diff(body));

    if let Some((_, body)) = tagged.or_else(untagged) {
        return Some(with_trailing_newline(body));
    }

    let trimmed = response.trim_start();
    if (trimmed.starts_with("diff --git") || trimmed.starts_with("--- ")) && looks_like_diff(trimmed)
    {
        return Some(with_trailing_newline(trimmed.trim_end()));
    }
    None
}

fn looks_like_diff(body: &str) -> bool {
    let has_old = body.lines().any(|l| l.starts_with("--- "));
    let has_new = body.lines().any(|l| l.starts_with("+++ "));
    let has_hunk = body.lines().any(|l| l.starts_with("@@"));
    has_old && has_new && has_hunk
}

fn with_trailing_newline(body: &str) -> String {
    let mut out = body.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
