//! Persistent orchestration state.
//!
//! One JSON snapshot per plan, saved atomically under the work directory.
//! The snapshot owns "where execution is": phase, current task, attempt
//! counters, decision log offset. The plan document owns "what is done".
//! Resume reconciles the two, with the document winning on completion and
//! the snapshot winning on in-flight phase.

use crate::errors::StateError;
use crate::util::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the orchestrator is in the plan lifecycle.
///
/// `Committing` is persisted before the commit collaborator runs, so a crash
/// mid-commit resumes as "approved, commit unconfirmed" rather than "never
/// attempted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Implementing,
    Reviewing,
    Fixing,
    Escalating,
    Committing,
    Blocked,
    Polishing,
    Finalizing,
    Paused,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Implementing => "implementing",
            Self::Reviewing => "reviewing",
            Self::Fixing => "fixing",
            Self::Escalating => "escalating",
            Self::Committing => "committing",
            Self::Blocked => "blocked",
            Self::Polishing => "polishing",
            Self::Finalizing => "finalizing",
            Self::Paused => "paused",
            Self::Complete => "complete",
        }
    }

    /// No automatic forward progress is possible from these phases.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked | Self::Complete)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The task currently in flight, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentTask {
    pub id: String,
    pub title: String,
}

/// Durable snapshot of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// Path of the plan document this run drives.
    pub plan_path: PathBuf,
    /// Fingerprint of the document content the run started from.
    pub plan_fingerprint: String,
    /// Where execution is.
    pub phase: Phase,
    /// Task in flight, if any.
    #[serde(default)]
    pub current_task: Option<CurrentTask>,
    /// Review attempts consumed, per task id.
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    /// Automated escalation rounds consumed, per task id.
    #[serde(default)]
    pub escalation_rounds: BTreeMap<String, u32>,
    /// Consecutive ambiguous review outcomes for the current task.
    #[serde(default)]
    pub ambiguous_streak: u32,
    /// Finalize cycles completed so far.
    #[serde(default)]
    pub finalize_cycles: u32,
    /// Decision log records written when this snapshot was taken.
    #[serde(default)]
    pub decision_offset: u64,
    /// Commit the working tree was at when the run started.
    #[serde(default)]
    pub base_commit: Option<String>,
    /// Why the plan halted, when phase is blocked.
    #[serde(default)]
    pub blocked_reason: Option<String>,
    /// Pause between tasks for confirmation.
    #[serde(default)]
    pub step_mode: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    pub fn new(plan_path: impl Into<PathBuf>, plan_fingerprint: &str) -> Self {
        let now = Utc::now();
        Self {
            plan_path: plan_path.into(),
            plan_fingerprint: plan_fingerprint.to_string(),
            phase: Phase::Idle,
            current_task: None,
            attempts: BTreeMap::new(),
            escalation_rounds: BTreeMap::new(),
            ambiguous_streak: 0,
            finalize_cycles: 0,
            decision_offset: 0,
            base_commit: None,
            blocked_reason: None,
            step_mode: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Point the snapshot at a task and enter implementing.
    pub fn begin_task(&mut self, id: &str, title: &str) {
        self.current_task = Some(CurrentTask {
            id: id.to_string(),
            title: title.to_string(),
        });
        self.phase = Phase::Implementing;
        self.ambiguous_streak = 0;
    }

    /// Drop the in-flight task pointer after it settles.
    pub fn clear_task(&mut self) {
        self.current_task = None;
        self.ambiguous_streak = 0;
    }

    pub fn attempts_for(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    /// Consume one review attempt for a task and return the new count.
    pub fn record_attempt(&mut self, id: &str) -> u32 {
        let count = self.attempts.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_attempts(&mut self, id: &str) {
        self.attempts.remove(id);
    }

    pub fn escalation_rounds_for(&self, id: &str) -> u32 {
        self.escalation_rounds.get(id).copied().unwrap_or(0)
    }

    pub fn record_escalation_round(&mut self, id: &str) -> u32 {
        let count = self.escalation_rounds.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Enter the blocked phase with a human-readable reason.
    pub fn block(&mut self, reason: &str) {
        self.phase = Phase::Blocked;
        self.blocked_reason = Some(reason.to_string());
    }
}

/// Accumulated history handed to whoever resolves a blocked task: what was
/// attempted, why escalation triggered, and the last worker output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationContext {
    pub task_id: String,
    pub task_title: String,
    pub reason: String,
    /// One summary line per fix attempt, in order.
    #[serde(default)]
    pub attempts: Vec<String>,
    /// Raw output of the session that triggered escalation.
    #[serde(default)]
    pub last_output: String,
}

impl EscalationContext {
    pub fn new(task_id: &str, task_title: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_title: task_title.to_string(),
            ..Default::default()
        }
    }

    pub fn set_reason(&mut self, reason: &str) {
        self.reason = reason.to_string();
    }

    pub fn push_attempt(&mut self, summary: &str) {
        self.attempts.push(summary.to_string());
    }

    /// Render as the blocked-context document for external resolution.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Blocked: task {} ({})\n\nRecorded: {}\n\n## Reason\n\n{}\n",
            self.task_id,
            self.task_title,
            Utc::now().to_rfc3339(),
            if self.reason.is_empty() {
                "not recorded"
            } else {
                &self.reason
            },
        );
        if !self.attempts.is_empty() {
            out.push_str("\n## Fix attempts\n\n");
            for (i, attempt) in self.attempts.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, attempt));
            }
        }
        if !self.last_output.is_empty() {
            out.push_str("\n## Last worker output\n\n");
            out.push_str(&self.last_output);
            out.push('\n');
        }
        out
    }
}

/// Atomic load/save of the orchestration snapshot, plus the blocked-context
/// document beside it.
pub struct StateStore {
    path: PathBuf,
    blocked_path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, blocked_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocked_path: blocked_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the snapshot. Missing file means no run in progress; a corrupt
    /// file is an error, never a silent fresh start.
    pub fn load(&self) -> Result<Option<OrchestrationState>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| StateError::ReadFailed {
            path: self.path.clone(),
            source,
        })?;
        let state = serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Stamp and save the snapshot atomically.
    pub fn save(&self, state: &mut OrchestrationState) -> Result<(), StateError> {
        state.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(state).map_err(|source| {
            StateError::WriteFailed {
                path: self.path.clone(),
                source: std::io::Error::other(source),
            }
        })?;
        atomic_write(&self.path, &json).map_err(|source| StateError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!(target: "state", phase = %state.phase, "saved snapshot");
        Ok(())
    }

    /// Remove the snapshot and blocked context, e.g. on `clean`.
    pub fn clear(&self) -> Result<(), StateError> {
        for path in [&self.path, &self.blocked_path] {
            if path.exists() {
                std::fs::remove_file(path).map_err(|source| StateError::WriteFailed {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    pub fn write_blocked_context(&self, context: &EscalationContext) -> Result<(), StateError> {
        atomic_write(&self.blocked_path, &context.to_markdown()).map_err(|source| {
            StateError::WriteFailed {
                path: self.blocked_path.clone(),
                source,
            }
        })
    }

    pub fn read_blocked_context(&self) -> Option<String> {
        std::fs::read_to_string(&self.blocked_path).ok()
    }

    pub fn clear_blocked_context(&self) -> Result<(), StateError> {
        if self.blocked_path.exists() {
            std::fs::remove_file(&self.blocked_path).map_err(|source| StateError::WriteFailed {
                path: self.blocked_path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), dir.path().join("blocked.md"));
        (store, dir)
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_string(&Phase::Idle).unwrap(), "\"idle\"");
        assert_eq!(
            serde_json::to_string(&Phase::Committing).unwrap(),
            "\"committing\""
        );
        assert_eq!(
            serde_json::from_str::<Phase>("\"polishing\"").unwrap(),
            Phase::Polishing
        );
    }

    #[test]
    fn test_phase_terminal() {
        assert!(Phase::Blocked.is_terminal());
        assert!(Phase::Complete.is_terminal());
        assert!(!Phase::Implementing.is_terminal());
        assert!(!Phase::Committing.is_terminal());
        assert!(!Phase::Paused.is_terminal());
    }

    #[test]
    fn test_state_new_defaults() {
        let state = OrchestrationState::new("plan.md", "abc123");
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.current_task.is_none());
        assert!(state.attempts.is_empty());
        assert_eq!(state.finalize_cycles, 0);
        assert_eq!(state.decision_offset, 0);
    }

    #[test]
    fn test_begin_task_enters_implementing() {
        let mut state = OrchestrationState::new("plan.md", "fp");
        state.ambiguous_streak = 2;
        state.begin_task("2", "Wire logging");

        assert_eq!(state.phase, Phase::Implementing);
        assert_eq!(state.current_task.as_ref().unwrap().id, "2");
        assert_eq!(state.ambiguous_streak, 0);
    }

    #[test]
    fn test_attempts_are_per_task() {
        let mut state = OrchestrationState::new("plan.md", "fp");
        assert_eq!(state.record_attempt("1"), 1);
        assert_eq!(state.record_attempt("1"), 2);
        assert_eq!(state.record_attempt("2"), 1);
        assert_eq!(state.attempts_for("1"), 2);

        state.reset_attempts("1");
        assert_eq!(state.attempts_for("1"), 0);
        assert_eq!(state.attempts_for("2"), 1);
    }

    #[test]
    fn test_escalation_rounds_tracked_separately() {
        let mut state = OrchestrationState::new("plan.md", "fp");
        state.record_attempt("1");
        assert_eq!(state.record_escalation_round("1"), 1);
        assert_eq!(state.record_escalation_round("1"), 2);
        assert_eq!(state.attempts_for("1"), 1);
    }

    #[test]
    fn test_block_records_reason() {
        let mut state = OrchestrationState::new("plan.md", "fp");
        state.block("missing credentials");
        assert_eq!(state.phase, Phase::Blocked);
        assert_eq!(state.blocked_reason.as_deref(), Some("missing credentials"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (store, _dir) = make_store();
        let mut state = OrchestrationState::new("plan.md", "fp123");
        state.begin_task("2", "Wire logging");
        state.record_attempt("2");
        state.decision_offset = 4;
        store.save(&mut state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.plan_fingerprint, "fp123");
        assert_eq!(loaded.phase, Phase::Implementing);
        assert_eq!(loaded.current_task.as_ref().unwrap().id, "2");
        assert_eq!(loaded.attempts_for("2"), 1);
        assert_eq!(loaded.decision_offset, 4);
    }

    #[test]
    fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let blocked = dir.path().join("blocked.md");

        {
            let store = StateStore::new(path.clone(), blocked.clone());
            let mut state = OrchestrationState::new("plan.md", "fp");
            state.phase = Phase::Committing;
            store.save(&mut state).unwrap();
        }

        {
            let store = StateStore::new(path, blocked);
            let loaded = store.load().unwrap().unwrap();
            assert_eq!(loaded.phase, Phase::Committing);
        }
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (store, _dir) = make_store();
        assert!(store.load().unwrap().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn test_load_corrupt_is_an_error() {
        let (store, dir) = make_store();
        std::fs::write(dir.path().join("state.json"), "{ truncated").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_save_stamps_updated_at() {
        let (store, _dir) = make_store();
        let mut state = OrchestrationState::new("plan.md", "fp");
        let created = state.updated_at;
        store.save(&mut state).unwrap();
        assert!(state.updated_at >= created);
    }

    #[test]
    fn test_clear_removes_snapshot_and_context() {
        let (store, _dir) = make_store();
        let mut state = OrchestrationState::new("plan.md", "fp");
        store.save(&mut state).unwrap();
        store
            .write_blocked_context(&EscalationContext::new("1", "A"))
            .unwrap();

        store.clear().unwrap();
        assert!(!store.exists());
        assert!(store.read_blocked_context().is_none());
    }

    #[test]
    fn test_blocked_context_document() {
        let (store, _dir) = make_store();
        let mut ctx = EscalationContext::new("2", "Wire logging");
        ctx.set_reason("review found the same failure three times");
        ctx.push_attempt("fix pass 1: adjusted retry bounds");
        ctx.push_attempt("fix pass 2: rewrote the backoff loop");
        ctx.last_output = "[ISSUES] still failing".to_string();

        store.write_blocked_context(&ctx).unwrap();
        let doc = store.read_blocked_context().unwrap();
        assert!(doc.contains("# Blocked: task 2 (Wire logging)"));
        assert!(doc.contains("same failure three times"));
        assert!(doc.contains("1. fix pass 1"));
        assert!(doc.contains("## Last worker output"));

        store.clear_blocked_context().unwrap();
        assert!(store.read_blocked_context().is_none());
    }
}
