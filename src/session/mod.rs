//! Worker session invocation.
//!
//! A worker session is the opaque external collaborator that actually edits
//! code, reviews it, or rules on escalations. The orchestrator only knows the
//! contract: `invoke(role, args) -> (text, exit status)`. One call per
//! invocation, blocking from the caller's point of view, no implicit retry.
//! Interpreting the output is the signal parser's job, not this module's.
//!
//! `CliWorker` is the production implementation; tests use `ScriptedWorker`
//! behind the same trait.

mod worker;

pub use worker::CliWorker;

use crate::errors::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// The fixed set of worker roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Implement,
    ImplementFix,
    Review,
    Escalate,
    Split,
    Polish,
    Finalize,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Implement => "implement",
            Role::ImplementFix => "implement-fix",
            Role::Review => "review",
            Role::Escalate => "escalate",
            Role::Split => "split",
            Role::Polish => "polish",
            Role::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named string arguments passed to a worker session.
///
/// Ordered (BTreeMap) so envelopes and transcripts are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionArgs(BTreeMap<String, String>);

impl SessionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw result of one worker invocation.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    /// Accumulated output text; the final result payload when the worker
    /// emitted one, otherwise everything streamed.
    pub text: String,
    /// Process exit code (-1 when terminated by signal).
    pub exit_code: i32,
    /// Whether the worker's own result event flagged an error.
    pub reported_error: bool,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// Output transcript on disk, when the implementation writes one.
    pub transcript: Option<PathBuf>,
    /// Size in bytes of the prompt envelope the worker was fed.
    pub prompt_chars: usize,
}

impl SessionOutput {
    /// Process-level success: clean exit and no error flag from the worker.
    pub fn ok(&self) -> bool {
        self.exit_code == 0 && !self.reported_error
    }
}

/// The session slot: exactly one invocation runs at a time because all
/// sessions share one mutable working tree. Callers hold the slot by
/// ownership; the trait has no queueing.
#[async_trait]
pub trait WorkerSession: Send + Sync {
    async fn invoke(&self, role: Role, args: &SessionArgs) -> Result<SessionOutput, SessionError>;
}

#[cfg(test)]
type ScriptQueue = std::collections::VecDeque<Result<SessionOutput, SessionError>>;

/// Test double that replays scripted outputs per role and records calls.
#[cfg(test)]
pub struct ScriptedWorker {
    responses: std::sync::Mutex<std::collections::HashMap<Role, ScriptQueue>>,
    calls: std::sync::Mutex<Vec<(Role, SessionArgs)>>,
}

#[cfg(test)]
impl ScriptedWorker {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn output(text: &str, exit_code: i32) -> SessionOutput {
        SessionOutput {
            text: text.to_string(),
            exit_code,
            reported_error: false,
            duration: Duration::from_millis(1),
            transcript: None,
            prompt_chars: 0,
        }
    }

    /// Queue a successful response for the given role.
    pub fn push(self, role: Role, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(Ok(Self::output(text, 0)));
        self
    }

    /// Queue a non-zero-exit response for the given role.
    pub fn push_failure(self, role: Role, text: &str, exit_code: i32) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(Ok(Self::output(text, exit_code)));
        self
    }

    /// Queue a process-level fault for the given role.
    pub fn push_fault(self, role: Role) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(Err(SessionError::Timeout { limit_secs: 0 }));
        self
    }

    /// Number of invocations seen for the given role.
    pub fn call_count(&self, role: Role) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    /// Total invocations across all roles.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Arguments of the nth invocation for the given role.
    pub fn call_args(&self, role: Role, n: usize) -> Option<SessionArgs> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .nth(n)
            .map(|(_, a)| a.clone())
    }

    /// Every invocation in order, for asserting sequencing across roles.
    pub fn call_sequence(&self) -> Vec<(Role, SessionArgs)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl WorkerSession for ScriptedWorker {
    async fn invoke(&self, role: Role, args: &SessionArgs) -> Result<SessionOutput, SessionError> {
        self.calls.lock().unwrap().push((role, args.clone()));
        self.responses
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| panic!("no scripted response left for role {}", role))
    }
}
