//! The orchestration core.
//!
//! `PlanRunner` owns every collaborator for one plan run: the worker session
//! slot, the committer, the change tracker, the plan document store, the
//! state store, and the decision log. Task-level execution lives in `task`;
//! plan-level sequencing, resume, polish, and finalize live in `plan`.

mod plan;
mod task;

pub use plan::RunOutcome;
pub use task::TaskOutcome;

use crate::config::{Config, PolicySection};
use crate::decisions::DecisionLog;
use crate::plan::PlanStore;
use crate::session::{Role, SessionArgs, WorkerSession};
use crate::signals::{Signal, extract_decisions, parse_signal};
use crate::state::StateStore;
use crate::tracker::{ChangeLimits, ChangeTracker, Committer};
use crate::ui::OrchestratorUI;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives one plan document to completion: tasks in order, then a polish
/// pass, then the finalize loop.
///
/// All sessions share one mutable working tree, so the runner never has more
/// than one session in flight; every invocation funnels through
/// [`PlanRunner::run_session`].
pub struct PlanRunner {
    worker: Arc<dyn WorkerSession>,
    committer: Arc<dyn Committer>,
    tracker: Arc<dyn ChangeTracker>,
    plans: PlanStore,
    states: StateStore,
    log: DecisionLog,
    policy: PolicySection,
    limits: ChangeLimits,
    followups_path: PathBuf,
    ui: Option<Arc<OrchestratorUI>>,
}

/// Where one worker session leaves the caller.
enum SessionStep {
    /// The worker finished and its output parsed to a signal.
    Parsed { signal: Signal, text: String },
    /// Process-level fault: spawn failure, timeout, or bad exit. Recorded as
    /// a fault, never coerced into a signal.
    Fault { error: String },
}

impl PlanRunner {
    pub fn new(
        worker: Arc<dyn WorkerSession>,
        committer: Arc<dyn Committer>,
        tracker: Arc<dyn ChangeTracker>,
        plans: PlanStore,
        states: StateStore,
        log: DecisionLog,
        config: &Config,
    ) -> Self {
        Self {
            worker,
            committer,
            tracker,
            plans,
            states,
            log,
            policy: config.policy.clone(),
            limits: config.review.clone(),
            followups_path: config.followups_file(),
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn ui(&self) -> Option<&OrchestratorUI> {
        self.ui.as_deref()
    }

    /// Run one worker session end to end: invoke, record reported decisions,
    /// parse the outcome signal, and append the session record.
    async fn run_session(
        &self,
        task_id: &str,
        role: Role,
        args: &SessionArgs,
        attempt: u32,
        max: u32,
    ) -> Result<SessionStep> {
        if let Some(ui) = self.ui() {
            ui.start_session(role.as_str(), attempt, max);
        }
        let output = match self.worker.invoke(role, args).await {
            Ok(output) => output,
            Err(e) => {
                let error = e.to_string();
                warn!(target: "worker", task = task_id, role = %role, error, "session fault");
                self.log.record_fault(task_id, role, &error)?;
                if let Some(ui) = self.ui() {
                    ui.session_failed(&error);
                }
                return Ok(SessionStep::Fault { error });
            }
        };
        if !output.ok() {
            let error = if output.reported_error {
                "worker reported an error result".to_string()
            } else {
                format!("worker exited with status {}", output.exit_code)
            };
            warn!(target: "worker", task = task_id, role = %role, error, "session fault");
            self.log.record_fault(task_id, role, &error)?;
            if let Some(ui) = self.ui() {
                ui.session_failed(&error);
            }
            return Ok(SessionStep::Fault { error });
        }

        for decision in extract_decisions(&output.text) {
            debug!(target: "signal", task = task_id, topic = %decision.topic, "worker recorded a decision");
            self.log.record_decision(task_id, &decision)?;
        }

        let signal = parse_signal(&output.text);
        self.log
            .record_session(task_id, role, args, &signal, &output)?;
        match &signal {
            Signal::Issues(_)
            | Signal::MissingTests(_)
            | Signal::Critical(_)
            | Signal::Blocked(_)
            | Signal::Ambiguous(_) => {
                info!(target: "signal", task = task_id, role = %role, outcome = %signal, "session did not approve");
            }
            _ => {
                debug!(target: "signal", task = task_id, role = %role, outcome = %signal, "session outcome");
            }
        }
        if let Some(ui) = self.ui() {
            ui.session_done(signal.label());
        }
        Ok(SessionStep::Parsed {
            signal,
            text: output.text,
        })
    }
}
