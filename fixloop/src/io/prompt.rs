//! Repair prompt builder: error log plus failing source files, within a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

const TRUNCATION_MARKER: &str = "\n[truncated]";
const SECTION_SEPARATOR: &str = "\n\n";

/// One failing source file to include verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct PromptFile {
    pub path: String,
    pub contents: String,
}

/// All inputs needed to build the repair prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    /// Expanded test command, for the reader's benefit.
    pub command: String,
    /// Number of test runs performed before escalating.
    pub attempts: u32,
    pub error_log: String,
    pub files: Vec<PromptFile>,
    /// Ask for a single fenced unified diff (agent mode).
    pub want_diff: bool,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds the repair prompt within a byte budget, dropping file sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<PromptPack> {
        let mut env = Environment::new();
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("load repair template")?;
        let rendered = env
            .get_template("repair")?
            .render(context! {
                command => &input.command,
                attempts => input.attempts,
                error_log => input.error_log.trim_end(),
                files => &input.files,
                want_diff => input.want_diff,
            })
            .context("render repair prompt")?;

        let mut sections = parse_sections(&rendered);
        let included_before = sections.iter().filter(|s| s.key == "file").count();
        apply_budget(&mut sections, self.budget_bytes);
        let included_files = sections.iter().filter(|s| s.key == "file").count();

        Ok(PromptPack {
            content: render_sections(&sections),
            included_files,
            dropped_files: included_before - included_files,
        })
    }
}

/// A rendered prompt ready to write or send.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
    pub included_files: usize,
    pub dropped_files: usize,
}

impl PromptPack {
    pub fn render(&self) -> &str {
        &self.content
    }
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(rendered.len());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Smallest slice of a file worth sending; below this the file section is dropped.
const MIN_FILE_BYTES: usize = 256;

/// Bytes `render_sections` will produce, separators included.
fn rendered_len(sections: &[ParsedSection]) -> usize {
    let content: usize = sections.iter().map(|s| s.content.len()).sum();
    content + SECTION_SEPARATOR.len() * sections.len().saturating_sub(1) + 1
}

/// Drop trailing file sections until one is left, truncate that one rather
/// than losing all source, then truncate the last section if still over.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    while rendered_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            break;
        };
        let remaining = sections.iter().filter(|s| !s.required).count();
        if remaining == 1 {
            let others = rendered_len(sections) - sections[idx].content.len();
            let room = budget.saturating_sub(others);
            if room >= MIN_FILE_BYTES {
                truncate_section(&mut sections[idx], room);
                return;
            }
        }
        let dropped = sections.remove(idx);
        debug!(
            section = dropped.key,
            bytes_dropped = dropped.content.len(),
            "dropped section for budget"
        );
    }

    let total = rendered_len(sections);
    if total <= budget {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let others = total - last.content.len();
        truncate_section(last, budget.saturating_sub(others));
    }
}

/// Cut `section` to at most `allowed` bytes on a char boundary, marking the cut.
fn truncate_section(section: &mut ParsedSection, allowed: usize) {
    let before_len = section.content.len();
    if before_len <= allowed {
        return;
    }
    if allowed > TRUNCATION_MARKER.len() {
        let cut = floor_char_boundary(&section.content, allowed - TRUNCATION_MARKER.len());
        section.content.truncate(cut);
        section.content.push_str(TRUNCATION_MARKER);
    } else {
        let cut = floor_char_boundary(&section.content, allowed);
        section.content.truncate(cut);
    }
    debug!(
        section = section.key,
        before_len,
        after_len = section.content.len(),
        "truncated section for budget"
    );
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    out.push('\n');
    out
}
