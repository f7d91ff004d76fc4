//! Escalation policy.
//!
//! Pure decision functions over (signal, attempt budget, streaks). No I/O
//! and no state: callers own the counters and pass them in, which keeps
//! every rule here table-testable.

use crate::signals::Signal;

/// What the task loop does next after a review outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Accept the work and move to commit.
    Proceed,
    /// Run an implement-fix pass and re-review.
    Retry,
    /// Hand the task to the automated escalation step.
    Escalate,
    /// Halt the task and plan for external resolution.
    Halt(String),
}

/// Outcome of the automated escalation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationVerdict {
    /// Re-enter the fix loop with this revised plan and an attempt budget
    /// of one.
    ProceedWith(String),
    /// Halt for external resolution.
    Halt(String),
}

/// Decide what a review outcome means for the task.
///
/// `attempts` is the count consumed so far including the attempt that
/// produced this signal; `ambiguous_streak` counts consecutive ambiguous
/// outcomes including this one. Severity overrides budget: `Critical`
/// escalates and `Blocked` halts no matter how many attempts remain. An
/// ambiguous outcome is retryable once; the second in a row escalates so an
/// uncommunicative worker cannot spin forever.
pub fn decide(
    signal: &Signal,
    attempts: u32,
    max_attempts: u32,
    ambiguous_streak: u32,
) -> Directive {
    match signal {
        Signal::Approved | Signal::AlreadyComplete => Directive::Proceed,
        Signal::Critical(_) => Directive::Escalate,
        Signal::Blocked(reason) => Directive::Halt(reason.clone()),
        Signal::Escalate(_) => Directive::Escalate,
        Signal::Issues(_) | Signal::MissingTests(_) => {
            if attempts < max_attempts {
                Directive::Retry
            } else {
                Directive::Escalate
            }
        }
        // No verdict rendered: ambiguous output, or a signal that belongs to
        // another role. Never treated as success.
        Signal::Ambiguous(_)
        | Signal::Decision { .. }
        | Signal::ProceedWithPlan(_)
        | Signal::NoSplit
        | Signal::Split(_)
        | Signal::Suggestions { .. } => {
            if ambiguous_streak >= 2 || attempts >= max_attempts {
                Directive::Escalate
            } else {
                Directive::Retry
            }
        }
    }
}

/// Decide what the escalation worker's outcome means.
///
/// `rounds` counts escalation rounds already consumed for this task. A
/// proposed plan re-enters the loop only while rounds remain; anything else,
/// including an ambiguous answer, halts. Escalation is the last automated
/// resort, so it never retries itself.
pub fn decide_escalation(signal: &Signal, rounds: u32, max_rounds: u32) -> EscalationVerdict {
    match signal {
        Signal::ProceedWithPlan(plan) if rounds < max_rounds => {
            EscalationVerdict::ProceedWith(plan.clone())
        }
        Signal::ProceedWithPlan(_) => EscalationVerdict::Halt(format!(
            "escalation rounds exhausted ({rounds} of {max_rounds} used)"
        )),
        Signal::Escalate(reason) if !reason.is_empty() => EscalationVerdict::Halt(reason.clone()),
        Signal::Escalate(_) => {
            EscalationVerdict::Halt("escalation step requested external resolution".to_string())
        }
        other => EscalationVerdict::Halt(format!(
            "escalation step produced no usable plan (signal {})",
            other.label()
        )),
    }
}

/// Decide what a process-level session fault means. Faults are not semantic
/// signals but still consume the attempt budget.
pub fn decide_process_failure(attempts: u32, max_attempts: u32) -> Directive {
    if attempts < max_attempts {
        Directive::Retry
    } else {
        Directive::Escalate
    }
}

// Operations the orchestrator must never perform on its own authority.
const FORBIDDEN_PATTERNS: &[(&str, &str)] = &[
    ("merge to main", "merging to main branch"),
    ("merge to master", "merging to master branch"),
    ("push to main", "pushing to main branch"),
    ("push to master", "pushing to master branch"),
    ("deploy to", "deployment operations"),
    ("deploy the", "deployment operations"),
    ("production deploy", "production deployment"),
    ("release to", "release operations"),
    ("merge branch", "branch merging"),
    ("git merge main", "merging main"),
    ("git merge master", "merging master"),
];

/// Screen a task description for forbidden operations before any session
/// runs. Returns the violation when the task must not be executed.
pub fn screen_task(title: &str, description: &str) -> Option<String> {
    let text = format!("{title} {description}").to_lowercase();
    FORBIDDEN_PATTERNS
        .iter()
        .find(|(pattern, _)| text.contains(pattern))
        .map(|(_, what)| format!("task contains forbidden operation: {what}"))
}
