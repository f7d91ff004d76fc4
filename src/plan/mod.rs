//! Plan document model.
//!
//! A plan is an ordered list of tasks parsed from a markdown document. The
//! document is the authority for which tasks are done; execution state lives
//! elsewhere. Task order is execution order: a task's only precondition is
//! that every earlier task reached a terminal status.

mod parser;
mod store;

pub use parser::MarkdownPlanParser;
pub use store::{PlanStore, fingerprint};

use crate::errors::PlanError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of a plan task, exactly as the document records it. Where a task
/// is mid-lifecycle lives in the orchestration snapshot, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has not been finished.
    #[default]
    Pending,
    /// Task is stuck and needs external resolution.
    Blocked,
    /// Task is finished and committed.
    Done,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }

    /// Map a document checkbox character to a status.
    pub fn from_marker(c: char) -> Self {
        match c {
            'x' | 'X' => Self::Done,
            '!' => Self::Blocked,
            _ => Self::Pending,
        }
    }

    /// The checkbox character this status writes into the document.
    pub fn marker(&self) -> char {
        match self {
            Self::Done => 'x',
            Self::Blocked => '!',
            Self::Pending => ' ',
        }
    }
}

/// One unit of plan work with its own implement/review/commit lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Stable hierarchical identifier, e.g. "2" or "2.1".
    pub id: String,
    /// Human-readable task title.
    pub title: String,
    /// Detailed description of what needs to be done.
    #[serde(default)]
    pub description: String,
    /// Current status of the task.
    #[serde(default)]
    pub status: TaskStatus,
    /// Parent task id when this task came from a split.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Zero-based document line holding this task's status marker.
    #[serde(default)]
    pub line: usize,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            parent_id: None,
            line: 0,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_blocked(&self) -> bool {
        self.status == TaskStatus::Blocked
    }
}

/// An ordered plan of tasks tied to its source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Path of the source document.
    pub source: PathBuf,
    /// Content fingerprint of the document these tasks were parsed from.
    pub fingerprint: String,
    /// Tasks in execution order.
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(source: impl Into<PathBuf>, fingerprint: &str, tasks: Vec<Task>) -> Self {
        Self {
            source: source.into(),
            fingerprint: fingerprint.to_string(),
            tasks,
        }
    }

    /// First task that has not reached a terminal status.
    ///
    /// Blocked tasks do not stall the plan here; whole-plan blockage is an
    /// escalation decision, not a scheduling one.
    pub fn next_pending(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| !t.status.is_terminal())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// All tasks are done; nothing blocked, nothing pending.
    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(Task::is_done)
    }

    pub fn done_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_done()).count()
    }

    pub fn blocked_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_blocked()).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One-line progress summary, e.g. "3/5 done, 1 blocked".
    pub fn summary(&self) -> String {
        let done = self.done_count();
        let blocked = self.blocked_count();
        if blocked == 0 {
            format!("{}/{} done", done, self.len())
        } else {
            format!("{}/{} done, {} blocked", done, self.len(), blocked)
        }
    }
}

/// Turns plan document content into an ordered task list.
///
/// Implementations must be deterministic: the same content always yields the
/// same task list. Malformed or task-free documents are an error, never an
/// empty guess.
pub trait PlanParser: Send + Sync {
    fn parse(&self, content: &str) -> Result<Vec<Task>, PlanError>;
}
