//! Append-only decision log.
//!
//! One JSONL file per plan. Every worker session, every decision a worker
//! reports, every landed commit, and every process-level fault becomes an
//! immutable record. The state snapshot stores the record count as its
//! resume offset; records are never rewritten or deleted.

use crate::errors::StateError;
use crate::session::{Role, SessionArgs, SessionOutput};
use crate::signals::{Signal, WorkerDecision};
use crate::util::truncate_text;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const DETAIL_LIMIT: usize = 2000;

/// One immutable decision log record.
///
/// `Fault` is a separate kind on purpose: a worker that crashed or timed out
/// is not a reasoned rejection and must stay distinguishable from one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// One completed worker session and its parsed signal.
    Session {
        task_id: String,
        role: Role,
        #[serde(default)]
        args: BTreeMap<String, String>,
        /// Stable label of the parsed signal.
        signal: String,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        transcript: Option<PathBuf>,
        #[serde(default)]
        prompt_chars: usize,
        #[serde(default)]
        output_chars: usize,
        #[serde(default)]
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
    /// A design decision a worker reported in its output.
    Decision {
        task_id: String,
        topic: String,
        decision: String,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        alternatives: String,
        timestamp: DateTime<Utc>,
    },
    /// A commit the collaborator landed.
    Commit {
        task_id: String,
        sha: String,
        #[serde(default)]
        files: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A process-level session fault (spawn failure, timeout, bad exit).
    Fault {
        task_id: String,
        role: Role,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl LogRecord {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Session { task_id, .. }
            | Self::Decision { task_id, .. }
            | Self::Commit { task_id, .. }
            | Self::Fault { task_id, .. } => task_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Session { timestamp, .. }
            | Self::Decision { timestamp, .. }
            | Self::Commit { timestamp, .. }
            | Self::Fault { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Decision { .. } => "decision",
            Self::Commit { .. } => "commit",
            Self::Fault { .. } => "fault",
        }
    }
}

/// Append-only JSONL log, one record per line.
pub struct DecisionLog {
    path: PathBuf,
}

impl DecisionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and return the new record count.
    pub fn append(&self, record: &LogRecord) -> Result<u64, StateError> {
        let line = serde_json::to_string(record).map_err(|source| StateError::WriteFailed {
            path: self.path.clone(),
            source: std::io::Error::other(source),
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StateError::WriteFailed {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(|source| StateError::WriteFailed {
                path: self.path.clone(),
                source,
            })?;
        self.count()
    }

    pub fn record_session(
        &self,
        task_id: &str,
        role: Role,
        args: &SessionArgs,
        signal: &Signal,
        output: &SessionOutput,
    ) -> Result<u64, StateError> {
        self.append(&LogRecord::Session {
            task_id: task_id.to_string(),
            role,
            args: args.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            signal: signal.label().to_string(),
            detail: truncate_text(signal.detail(), DETAIL_LIMIT),
            transcript: output.transcript.clone(),
            prompt_chars: output.prompt_chars,
            output_chars: output.text.len(),
            exit_code: output.exit_code,
            timestamp: Utc::now(),
        })
    }

    pub fn record_decision(
        &self,
        task_id: &str,
        decision: &WorkerDecision,
    ) -> Result<u64, StateError> {
        self.append(&LogRecord::Decision {
            task_id: task_id.to_string(),
            topic: decision.topic.clone(),
            decision: decision.decision.clone(),
            reasoning: decision.reasoning.clone(),
            alternatives: decision.alternatives.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn record_commit(
        &self,
        task_id: &str,
        sha: &str,
        files: usize,
        message: &str,
    ) -> Result<u64, StateError> {
        self.append(&LogRecord::Commit {
            task_id: task_id.to_string(),
            sha: sha.to_string(),
            files,
            message: message.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn record_fault(&self, task_id: &str, role: Role, error: &str) -> Result<u64, StateError> {
        self.append(&LogRecord::Fault {
            task_id: task_id.to_string(),
            role,
            error: error.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// All parseable records in append order. Lines that do not parse (e.g.
    /// a torn final line after a crash) are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<LogRecord>, StateError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| StateError::ReadFailed {
            path: self.path.clone(),
            source,
        })?;
        let records = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(target: "state", error = %e, "skipping unparseable decision log line");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    /// Records appended after the given offset (a prior record count).
    pub fn read_from(&self, offset: u64) -> Result<Vec<LogRecord>, StateError> {
        Ok(self
            .read_all()?
            .into_iter()
            .skip(offset as usize)
            .collect())
    }

    pub fn for_task(&self, task_id: &str) -> Result<Vec<LogRecord>, StateError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.task_id() == task_id)
            .collect())
    }

    pub fn count(&self) -> Result<u64, StateError> {
        Ok(self.read_all()?.len() as u64)
    }
}
