//! Working-tree tracking and the commit collaborator.
//!
//! The tracker reports what changed relative to a base commit; the committer
//! stages and lands one commit per request. Neither retries: a failed commit
//! is reported to the caller, whose fix-loop budget governs what happens
//! next.

mod git;

pub use git::{GitCommitter, GitTracker};

use crate::errors::CommitError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Aggregate change statistics for the working tree against a base commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeStats {
    pub files_changed: usize,
    pub files_added: usize,
    pub files_deleted: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl ChangeStats {
    /// Whether this change needs human review before it may be committed.
    ///
    /// Additions and balanced refactors pass at any size; the gate is aimed
    /// at one-sided deletion, where accidental code loss hides.
    pub fn exceeds(&self, limits: &ChangeLimits) -> Option<String> {
        let ratio = self.deletions as f64 / self.insertions.max(1) as f64;
        if self.deletions > limits.max_deletions && ratio > limits.deletion_ratio {
            return Some(format!(
                "mass deletion: {} deletions vs {} insertions ({ratio:.1}x ratio)",
                self.deletions, self.insertions
            ));
        }
        if self.files_deleted > limits.max_files_deleted {
            return Some(format!("{} files deleted", self.files_deleted));
        }
        None
    }

    pub fn total_lines(&self) -> usize {
        self.insertions + self.deletions
    }

    pub fn is_empty(&self) -> bool {
        self.files_changed == 0 && self.total_lines() == 0
    }
}

/// Thresholds for the mass-change gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLimits {
    #[serde(default = "default_max_deletions")]
    pub max_deletions: usize,
    #[serde(default = "default_deletion_ratio")]
    pub deletion_ratio: f64,
    #[serde(default = "default_max_files_deleted")]
    pub max_files_deleted: usize,
}

fn default_max_deletions() -> usize {
    2000
}

fn default_deletion_ratio() -> f64 {
    10.0
}

fn default_max_files_deleted() -> usize {
    20
}

impl Default for ChangeLimits {
    fn default() -> Self {
        Self {
            max_deletions: default_max_deletions(),
            deletion_ratio: default_deletion_ratio(),
            max_files_deleted: default_max_files_deleted(),
        }
    }
}

/// Outcome of one commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { sha: String, files: usize },
    /// The tree matched HEAD already. On resume after a crash mid-commit
    /// this means the commit landed before the crash.
    NothingToCommit,
}

/// Commit message for a finished task. Shared by the committer and the
/// decision log so both record the same text.
pub fn task_message(task_id: &str, title: &str) -> String {
    format!("Task {task_id}: {title}")
}

/// Read-only view of working-tree changes against a base commit.
pub trait ChangeTracker: Send + Sync {
    /// Current HEAD commit sha (None on an unborn branch).
    fn head_sha(&self) -> Option<String>;

    /// Change statistics for the working tree against the tree of `base_sha`.
    fn stats_since(&self, base_sha: &str) -> Result<ChangeStats, CommitError>;

    /// Unified diff of the working tree against `base_sha`, truncated to
    /// `max_chars`.
    fn diff_since(&self, base_sha: &str, max_chars: usize) -> Result<String, CommitError>;
}

/// The commit collaborator: stage what changed and land one commit.
pub trait Committer: Send + Sync {
    /// Commit the working tree for a finished task, including the plan
    /// document's status toggle when it lives inside the repository.
    fn commit_task(
        &self,
        task_id: &str,
        title: &str,
        plan_path: &Path,
    ) -> Result<CommitOutcome, CommitError>;

    /// Commit everything outstanding with an explicit message (polish quick
    /// wins, final cleanup).
    fn commit_all(&self, message: &str) -> Result<CommitOutcome, CommitError>;
}

#[cfg(test)]
pub use scripted::{ScriptedCommitter, ScriptedTracker};
