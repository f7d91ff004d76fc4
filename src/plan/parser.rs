//! Deterministic markdown plan parser.
//!
//! Recognizes two task shapes, in document order:
//!
//! ```markdown
//! - [ ] 1. Add config loader
//!   Reads foreman.toml from the project root.
//! - [x] 2. Wire logging
//!
//! ## Task 3: Harden error paths [ ]
//! Body lines up to the next heading become the description.
//! ```
//!
//! Checkbox markers carry status: `[ ]` pending, `[x]` done, `[!]` blocked.
//! Items may carry an explicit leading id ("2" or "2.1"); items without one
//! get the next free ordinal. Reference, testing, and documentation sections
//! are excluded wholesale. The same content always parses to the same list;
//! a document with no tasks is rejected rather than treated as empty work.

use super::{PlanParser, Task, TaskStatus};
use crate::errors::PlanError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// Compile regexes once using LazyLock
static CHECKLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:[-*]|\d+[.)])\s*\[([ xX!])\]\s*(.+)$").unwrap());

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());

static TASK_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#{2,4}\s+(?i:task)\s+(\d+(?:\.\d+)*)\s*[:.)\-]?\s*(.+?)(?:\s*\[([ xX!])\])?\s*$")
        .unwrap()
});

static ID_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)*)[.):]?\s+(.+)$").unwrap());

static TRAILING_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[ xX!]\]\s*$").unwrap());

/// Rewrite the status marker on a single task line, leaving every other
/// byte alone. Returns `None` when the line holds no recognizable marker
/// position.
pub(crate) fn set_line_marker(line: &str, marker: char) -> Option<String> {
    if let Some(caps) = CHECKLIST_RE.captures(line) {
        let m = caps.get(2)?;
        let mut out = String::with_capacity(line.len());
        out.push_str(&line[..m.start()]);
        out.push(marker);
        out.push_str(&line[m.end()..]);
        return Some(out);
    }
    if HEADING_RE.is_match(line) {
        if let Some(m) = TRAILING_MARKER_RE.find(line) {
            return Some(format!("{} [{}]", line[..m.start()].trim_end(), marker));
        }
        return Some(format!("{} [{}]", line.trim_end(), marker));
    }
    None
}

fn is_excluded_heading(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.split(|c: char| !c.is_alphanumeric()).any(|word| {
        matches!(
            word,
            "reference"
                | "references"
                | "testing"
                | "tests"
                | "test"
                | "documentation"
                | "docs"
                | "notes"
                | "note"
                | "appendix"
        )
    })
}

fn split_id_prefix(text: &str) -> (Option<String>, String) {
    if let Some(caps) = ID_PREFIX_RE.captures(text) {
        (Some(caps[1].to_string()), caps[2].trim().to_string())
    } else {
        (None, text.to_string())
    }
}

struct RawItem {
    explicit_id: Option<String>,
    title: String,
    description: Vec<String>,
    status: TaskStatus,
    line: usize,
}

enum Context {
    None,
    /// Inside a checklist item; more-indented lines extend its description.
    Checklist { indent: usize },
    /// Inside a task heading section; lines up to the next heading extend it.
    Section,
}

/// The default [`PlanParser`] for markdown plan documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownPlanParser;

impl MarkdownPlanParser {
    pub fn new() -> Self {
        Self
    }

    fn collect_items(content: &str) -> Vec<RawItem> {
        let mut items: Vec<RawItem> = Vec::new();
        let mut context = Context::None;
        let mut skip_below: Option<usize> = None;

        for (idx, line) in content.lines().enumerate() {
            if let Some(h) = HEADING_RE.captures(line) {
                let level = h[1].len();
                context = Context::None;
                if let Some(limit) = skip_below {
                    if level <= limit {
                        skip_below = None;
                    } else {
                        continue;
                    }
                }
                if is_excluded_heading(&h[2]) {
                    skip_below = Some(level);
                    continue;
                }
                if let Some(t) = TASK_HEADING_RE.captures(line) {
                    let marker = t
                        .get(3)
                        .and_then(|m| m.as_str().chars().next())
                        .unwrap_or(' ');
                    items.push(RawItem {
                        explicit_id: Some(t[1].to_string()),
                        title: t[2].trim().to_string(),
                        description: Vec::new(),
                        status: TaskStatus::from_marker(marker),
                        line: idx,
                    });
                    context = Context::Section;
                }
                continue;
            }
            if skip_below.is_some() {
                continue;
            }

            if let Some(c) = CHECKLIST_RE.captures(line) {
                if matches!(context, Context::Section) {
                    // Checklists inside a task section are acceptance detail,
                    // not separate tasks
                    if let Some(item) = items.last_mut() {
                        item.description.push(line.trim().to_string());
                    }
                    continue;
                }
                let marker = c[2].chars().next().unwrap_or(' ');
                let (explicit_id, title) = split_id_prefix(c[3].trim());
                items.push(RawItem {
                    explicit_id,
                    title,
                    description: Vec::new(),
                    status: TaskStatus::from_marker(marker),
                    line: idx,
                });
                context = Context::Checklist { indent: c[1].len() };
                continue;
            }

            match context {
                Context::Checklist { indent } => {
                    if line.trim().is_empty() {
                        context = Context::None;
                    } else {
                        let this_indent = line.len() - line.trim_start().len();
                        if this_indent > indent
                            && let Some(item) = items.last_mut()
                        {
                            item.description.push(line.trim().to_string());
                        } else if this_indent <= indent {
                            context = Context::None;
                        }
                    }
                }
                Context::Section => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty()
                        && let Some(item) = items.last_mut()
                    {
                        item.description.push(trimmed.to_string());
                    }
                }
                Context::None => {}
            }
        }

        items
    }
}

impl PlanParser for MarkdownPlanParser {
    fn parse(&self, content: &str) -> Result<Vec<Task>, PlanError> {
        let items = Self::collect_items(content);

        let mut used: HashSet<String> = HashSet::new();
        for item in &items {
            if let Some(ref id) = item.explicit_id
                && !used.insert(id.clone())
            {
                return Err(PlanError::ParseRejected(format!(
                    "duplicate task id {id:?}"
                )));
            }
        }

        let mut next_auto: u32 = 1;
        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            let id = match item.explicit_id {
                Some(id) => id,
                None => {
                    while used.contains(&next_auto.to_string()) {
                        next_auto += 1;
                    }
                    let id = next_auto.to_string();
                    used.insert(id.clone());
                    next_auto += 1;
                    id
                }
            };
            let mut task = Task::new(&id, &item.title)
                .with_status(item.status)
                .with_line(item.line);
            if !item.description.is_empty() {
                task = task.with_description(&item.description.join("\n"));
            }
            if let Some(dot) = id.rfind('.') {
                task = task.with_parent(&id[..dot]);
            }
            tasks.push(task);
        }

        if tasks.is_empty() {
            return Err(PlanError::ParseRejected(
                "no tasks found in plan document".to_string(),
            ));
        }
        Ok(tasks)
    }
}
