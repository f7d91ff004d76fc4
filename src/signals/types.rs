//! Signal types for worker session outcomes.
//!
//! `Signal` is the closed set of outcomes the orchestrator understands. Every
//! worker output maps to exactly one variant; anything unrecognized becomes
//! `Ambiguous` so that no output is ever mistaken for success.

use serde::{Deserialize, Serialize};

/// One subtask proposed by a split-check session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTask {
    /// Short title for the subtask.
    pub title: String,
    /// Description lines following the title, may be empty.
    pub description: String,
}

impl SplitTask {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Parsed outcome of a worker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// The described work already exists; skip review and commit.
    AlreadyComplete,
    /// Reviewer accepts the change as-is.
    Approved,
    /// Reviewer found problems; body carries the feedback.
    Issues(String),
    /// Reviewer found the change untested; body carries what is missing.
    MissingTests(String),
    /// Reviewer found a severity-override problem (security, data loss).
    Critical(String),
    /// Worker cannot proceed for an external reason.
    Blocked(String),
    /// Worker recorded a design decision on the named topic.
    Decision { topic: String, detail: String },
    /// Escalation verdict: continue with this revised approach.
    ProceedWithPlan(String),
    /// Escalation verdict: halt and hand to a human.
    Escalate(String),
    /// Split check declined to decompose the task.
    NoSplit,
    /// Split check proposes replacing the task with these subtasks, in order.
    Split(Vec<SplitTask>),
    /// Polish pass suggestions: quick wins to apply now, deferred items to record.
    Suggestions {
        quick_wins: Vec<String>,
        deferred: Vec<String>,
    },
    /// No recognized marker; carries the raw output for diagnostics.
    Ambiguous(String),
}

impl Signal {
    /// Stable lowercase label, used in logs and session records.
    pub fn label(&self) -> &'static str {
        match self {
            Signal::AlreadyComplete => "already_complete",
            Signal::Approved => "approved",
            Signal::Issues(_) => "issues",
            Signal::MissingTests(_) => "missing_tests",
            Signal::Critical(_) => "critical",
            Signal::Blocked(_) => "blocked",
            Signal::Decision { .. } => "decision",
            Signal::ProceedWithPlan(_) => "proceed",
            Signal::Escalate(_) => "escalate",
            Signal::NoSplit => "no_split",
            Signal::Split(_) => "split",
            Signal::Suggestions { .. } => "suggestions",
            Signal::Ambiguous(_) => "ambiguous",
        }
    }

    /// Whether this signal halts the current attempt regardless of budget.
    pub fn is_severity_override(&self) -> bool {
        matches!(self, Signal::Critical(_) | Signal::Blocked(_))
    }

    /// Free-text payload carried by the signal, if any.
    pub fn detail(&self) -> &str {
        match self {
            Signal::Issues(d)
            | Signal::MissingTests(d)
            | Signal::Critical(d)
            | Signal::Blocked(d)
            | Signal::ProceedWithPlan(d)
            | Signal::Escalate(d)
            | Signal::Ambiguous(d) => d,
            Signal::Decision { detail, .. } => detail,
            _ => "",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A `[DECISION: topic]` block extracted from worker output.
///
/// Decisions are logged independently of the primary outcome signal; one
/// output may carry several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDecision {
    /// Topic line from the marker.
    pub topic: String,
    /// What was decided.
    pub decision: String,
    /// Why, if the worker said.
    #[serde(default)]
    pub reasoning: String,
    /// Alternatives considered, if any.
    #[serde(default)]
    pub alternatives: String,
}
