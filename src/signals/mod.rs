//! Outcome signaling module.
//!
//! Worker sessions report results as free text with a leading bracket marker:
//!
//! - `[APPROVED]` - reviewer accepts the change
//! - `[ISSUES]` / `[MISSING_TESTS]` - reviewer wants another fix cycle
//! - `[CRITICAL]` / `[BLOCKED: reason]` - stop and escalate
//! - `[ALREADY_COMPLETE]` - work already exists, skip review and commit
//! - `[PROCEED]` / `[ESCALATE]` - escalation verdicts
//! - `[SPLIT]` / `[NO_SPLIT]` - task decomposition verdicts
//! - `[SUGGESTIONS]` / `[POLISHED]` - polish pass results
//! - `[DECISION: topic]` - a recorded design decision
//!
//! Output with no recognized marker parses to `Signal::Ambiguous`; absence of
//! failure is never treated as success.

mod parser;
mod types;

pub use parser::{extract_decisions, parse_signal};
pub use types::{Signal, SplitTask, WorkerDecision};
