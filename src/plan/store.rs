//! Plan document store.
//!
//! Owns every read and write of the plan document, plus a parse cache keyed
//! on a content fingerprint. All document mutations funnel through one write
//! path that re-parses the new content and rewrites the cache in the same
//! step, so the cache can never go stale against a document the store itself
//! changed. A stale cache is a correctness bug: the parser would later run
//! against content it has never seen and report a different task count.

use super::parser::{MarkdownPlanParser, set_line_marker};
use super::{Plan, PlanParser, Task, TaskStatus};
use crate::errors::PlanError;
use crate::signals::SplitTask;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Content-derived cache key for a plan document.
pub fn fingerprint(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanCache {
    fingerprint: String,
    tasks: Vec<Task>,
}

pub struct PlanStore {
    path: PathBuf,
    cache_path: PathBuf,
    parser: Box<dyn PlanParser>,
}

impl PlanStore {
    pub fn new(path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_path: cache_path.into(),
            parser: Box::new(MarkdownPlanParser::new()),
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn PlanParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn document_path(&self) -> &Path {
        &self.path
    }

    pub fn read_document(&self) -> Result<String, PlanError> {
        std::fs::read_to_string(&self.path).map_err(|source| PlanError::ReadFailed {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the plan, serving from the cache when the document fingerprint
    /// matches and re-parsing otherwise.
    pub fn load(&self) -> Result<Plan, PlanError> {
        let content = self.read_document()?;
        let fp = fingerprint(&content);
        if let Some(cached) = self.read_cache()
            && cached.fingerprint == fp
        {
            debug!(target: "plan", "parse cache hit");
            return Ok(Plan::new(&self.path, &fp, cached.tasks));
        }
        let tasks = self.parser.parse(&content)?;
        self.write_cache(&fp, &tasks);
        Ok(Plan::new(&self.path, &fp, tasks))
    }

    /// Mark a task done in the document, rewriting only its marker.
    pub fn mark_done(&self, id: &str) -> Result<(), PlanError> {
        self.set_task_marker(id, TaskStatus::Done.marker())
    }

    /// Mark a task blocked in the document, rewriting only its marker.
    pub fn mark_blocked(&self, id: &str) -> Result<(), PlanError> {
        self.set_task_marker(id, TaskStatus::Blocked.marker())
    }

    /// Replace one task in place with an ordered set of subtasks.
    ///
    /// Subtasks get ids `{parent}.1`, `{parent}.2`, ... and inherit the
    /// parent's indentation. The parent's own lines (checklist description
    /// or heading section body) are superseded by the subtask lines.
    pub fn apply_split(
        &self,
        parent_id: &str,
        subtasks: &[SplitTask],
    ) -> Result<Vec<Task>, PlanError> {
        if subtasks.is_empty() {
            return Err(PlanError::ParseRejected(
                "split produced no subtasks".to_string(),
            ));
        }
        let content = self.read_document()?;
        let tasks = self.parser.parse(&content)?;
        let parent = tasks
            .iter()
            .find(|t| t.id == parent_id)
            .ok_or_else(|| PlanError::TaskNotFound {
                id: parent_id.to_string(),
            })?;

        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = parent.line;
        if start >= lines.len() {
            return Err(PlanError::MarkerNotFound {
                id: parent_id.to_string(),
            });
        }
        let end = replaced_span_end(&lines, start);
        let pad = " ".repeat(leading_spaces(&lines[start]));

        let mut replacement = Vec::new();
        for (i, sub) in subtasks.iter().enumerate() {
            replacement.push(format!("{pad}- [ ] {parent_id}.{} {}", i + 1, sub.title));
            for dline in sub.description.lines() {
                if !dline.trim().is_empty() {
                    replacement.push(format!("{pad}  {}", dline.trim()));
                }
            }
        }

        let mut updated_lines = Vec::with_capacity(lines.len() + replacement.len());
        updated_lines.extend_from_slice(&lines[..start]);
        updated_lines.extend(replacement);
        updated_lines.extend_from_slice(&lines[end..]);
        let updated = rejoin(updated_lines, &content);

        debug!(target: "plan", parent = parent_id, count = subtasks.len(), "applying split");
        self.write_document(&updated)
    }

    /// Append follow-up tasks at the end of the document with fresh
    /// top-level ids.
    pub fn append_tasks(&self, additions: &[SplitTask]) -> Result<Vec<Task>, PlanError> {
        if additions.is_empty() {
            return Ok(self.load()?.tasks);
        }
        let content = self.read_document()?;
        let tasks = self.parser.parse(&content)?;
        let first_id = next_top_level_id(&tasks);

        let mut updated = content.clone();
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        if !updated.contains("\n## Follow-up tasks\n") && !updated.starts_with("## Follow-up tasks\n")
        {
            updated.push_str("\n## Follow-up tasks\n\n");
        }
        let mut next = first_id;
        for add in additions {
            updated.push_str(&format!("- [ ] {next}. {}\n", add.title));
            for dline in add.description.lines() {
                if !dline.trim().is_empty() {
                    updated.push_str(&format!("  {}\n", dline.trim()));
                }
            }
            next += 1;
        }

        let new_tasks = self.write_document(&updated)?;
        for expected in first_id..next {
            let id = expected.to_string();
            if !new_tasks.iter().any(|t| t.id == id) {
                return Err(PlanError::ParseRejected(format!(
                    "appended task {id} did not survive re-parse"
                )));
            }
        }
        debug!(target: "plan", count = additions.len(), "appended follow-up tasks");
        Ok(new_tasks)
    }

    fn set_task_marker(&self, id: &str, marker: char) -> Result<(), PlanError> {
        let content = self.read_document()?;
        let tasks = self.parser.parse(&content)?;
        let task = tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| PlanError::TaskNotFound { id: id.to_string() })?;

        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let line = lines
            .get_mut(task.line)
            .ok_or_else(|| PlanError::MarkerNotFound { id: id.to_string() })?;
        *line = set_line_marker(line, marker)
            .ok_or_else(|| PlanError::MarkerNotFound { id: id.to_string() })?;

        let updated = rejoin(lines, &content);
        self.write_document(&updated)?;
        debug!(target: "plan", task = id, %marker, "toggled status marker");
        Ok(())
    }

    /// The single document write path: validate that the new content still
    /// parses, write the document, then rewrite the cache for the new
    /// fingerprint.
    fn write_document(&self, content: &str) -> Result<Vec<Task>, PlanError> {
        let tasks = self.parser.parse(content)?;
        atomic_write(&self.path, content).map_err(|source| PlanError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        self.write_cache(&fingerprint(content), &tasks);
        Ok(tasks)
    }

    fn read_cache(&self) -> Option<PlanCache> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(target: "plan", error = %e, "ignoring corrupt plan cache");
                None
            }
        }
    }

    // A cache that cannot be written is removed outright: a missing cache
    // re-parses, a stale one mis-counts tasks.
    fn write_cache(&self, fp: &str, tasks: &[Task]) {
        let cache = PlanCache {
            fingerprint: fp.to_string(),
            tasks: tasks.to_vec(),
        };
        match serde_json::to_string_pretty(&cache) {
            Ok(json) => {
                if let Err(e) = atomic_write(&self.cache_path, &json) {
                    warn!(target: "plan", error = %e, "failed to write plan cache");
                    let _ = std::fs::remove_file(&self.cache_path);
                }
            }
            Err(e) => {
                warn!(target: "plan", error = %e, "failed to serialize plan cache");
                let _ = std::fs::remove_file(&self.cache_path);
            }
        }
    }
}

fn rejoin(lines: Vec<String>, original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Lines superseded when the task at `start` is replaced: a heading task
/// owns everything up to the next heading, a checklist task owns its
/// more-indented description lines.
fn replaced_span_end(lines: &[String], start: usize) -> usize {
    let mut end = start + 1;
    if lines[start].trim_start().starts_with('#') {
        while end < lines.len() && !lines[end].trim_start().starts_with('#') {
            end += 1;
        }
    } else {
        let indent = leading_spaces(&lines[start]);
        while end < lines.len() {
            let line = &lines[end];
            if line.trim().is_empty() || leading_spaces(line) <= indent {
                break;
            }
            end += 1;
        }
    }
    end
}

fn next_top_level_id(tasks: &[Task]) -> u32 {
    tasks
        .iter()
        .filter_map(|t| t.id.split('.').next()?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1
}
