//! The plan-level loop: resume, tasks in order, polish, finalize.

use super::{PlanRunner, SessionStep, TaskOutcome};
use crate::plan::Plan;
use crate::session::{Role, SessionArgs};
use crate::signals::{Signal, SplitTask};
use crate::state::{EscalationContext, OrchestrationState, Phase};
use crate::tracker::CommitOutcome;
use crate::util::{atomic_write, truncate_text};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Prompt-sized cap on the aggregated diff handed to the polish session.
const DIFF_CHAR_LIMIT: usize = 30_000;
/// Cap on reasons quoted into block messages.
const REASON_LIMIT: usize = 400;
/// Identifier for plan-level records in the decision log.
const PLAN_TASK_ID: &str = "plan";
/// Commit message for the final cleanup commit.
const CLEANUP_MESSAGE: &str = "Plan cleanup";
/// Commit message for applied polish suggestions.
const POLISH_MESSAGE: &str = "Polish: apply review suggestions";

/// How a whole run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task done, polish and finalize passed, cleanup committed.
    Complete,
    /// Halted for external resolution; details are in the blocked context.
    Blocked { reason: String },
    /// Step mode: paused after a completed task.
    Paused,
}

/// Why the inner task loop stopped.
enum DriveEnd {
    Settled,
    Blocked(String),
    Paused,
}

enum FinalizeEnd {
    Clean,
    Blocked(String),
    Paused,
}

/// What resume reconciliation decided.
enum Resume {
    Start(OrchestrationState),
    Halted(String),
    Done,
}

impl PlanRunner {
    /// Start or resume the plan and drive it as far as it can go.
    pub async fn run(&self, step_mode: bool) -> Result<RunOutcome> {
        let plan = self.plans.load().context("failed to load plan document")?;
        let mut state = match self.reconcile(&plan)? {
            Resume::Start(state) => state,
            Resume::Halted(reason) => {
                warn!(target: "run", reason, "plan is blocked, refusing to run");
                if let Some(ui) = self.ui() {
                    ui.plan_halted(&reason);
                }
                return Ok(RunOutcome::Blocked { reason });
            }
            Resume::Done => {
                info!(target: "run", "plan already complete");
                if let Some(ui) = self.ui() {
                    ui.plan_complete(&plan.summary());
                }
                return Ok(RunOutcome::Complete);
            }
        };
        state.step_mode = step_mode;
        state.decision_offset = self.log.count()?;
        self.states.save(&mut state)?;

        if let Some(ui) = self.ui() {
            ui.print_plan_header(
                &self.plans.document_path().display().to_string(),
                &plan.summary(),
            );
        }

        // A crash between the committing save and the commit itself leaves
        // the task approved but unconfirmed. Land it before anything else;
        // every part of that step tolerates having already happened.
        if state.phase == Phase::Committing {
            match state.current_task.clone() {
                Some(current) => match plan.task(&current.id) {
                    Some(task) => {
                        info!(target: "run", task = %task.id, "resuming interrupted commit");
                        self.land_commit(&mut state, task)?;
                        if state.step_mode {
                            state.phase = Phase::Paused;
                            self.states.save(&mut state)?;
                            return Ok(RunOutcome::Paused);
                        }
                    }
                    None => {
                        warn!(target: "run", task = %current.id, "interrupted commit for a task no longer in the plan");
                        state.clear_task();
                        state.phase = Phase::Idle;
                        self.states.save(&mut state)?;
                    }
                },
                None => {
                    state.phase = Phase::Idle;
                    self.states.save(&mut state)?;
                }
            }
        }

        match self.drive_tasks(&mut state).await? {
            DriveEnd::Paused => return Ok(RunOutcome::Paused),
            DriveEnd::Blocked(reason) => {
                if let Some(ui) = self.ui() {
                    ui.plan_halted(&reason);
                }
                return Ok(RunOutcome::Blocked { reason });
            }
            DriveEnd::Settled => {}
        }

        let plan = self.plans.load()?;
        if !plan.all_done() {
            let reason = blocked_overall_reason(&plan);
            self.block_plan(&mut state, &reason)?;
            if let Some(ui) = self.ui() {
                ui.plan_halted(&reason);
            }
            return Ok(RunOutcome::Blocked { reason });
        }

        // One polish pass per completion round. A resume that is already
        // inside finalize (or past a finalize cycle) must not polish again.
        if state.finalize_cycles == 0 && state.phase != Phase::Finalizing {
            self.polish(&mut state).await?;
        }

        match self.finalize(&mut state).await? {
            FinalizeEnd::Paused => return Ok(RunOutcome::Paused),
            FinalizeEnd::Blocked(reason) => {
                if let Some(ui) = self.ui() {
                    ui.plan_halted(&reason);
                }
                return Ok(RunOutcome::Blocked { reason });
            }
            FinalizeEnd::Clean => {}
        }

        self.cleanup_commit()?;
        state.clear_task();
        state.phase = Phase::Complete;
        self.states.save(&mut state)?;

        let plan = self.plans.load()?;
        info!(target: "run", summary = %plan.summary(), "plan complete");
        if let Some(ui) = self.ui() {
            ui.plan_complete(&plan.summary());
        }
        Ok(RunOutcome::Complete)
    }

    /// Reconcile the persisted snapshot with the document. The document owns
    /// what is done; the snapshot owns where execution was.
    fn reconcile(&self, plan: &Plan) -> Result<Resume> {
        let Some(mut state) = self.states.load()? else {
            let mut state = OrchestrationState::new(self.plans.document_path(), &plan.fingerprint);
            state.base_commit = self.tracker.head_sha();
            return Ok(Resume::Start(state));
        };

        if state.plan_fingerprint != plan.fingerprint {
            info!(target: "plan", "document changed since the last snapshot, reconciling by task id");
            state.plan_fingerprint = plan.fingerprint.clone();
        }

        match state.phase {
            Phase::Blocked => {
                if self.states.read_blocked_context().is_some() {
                    let reason = state
                        .blocked_reason
                        .clone()
                        .unwrap_or_else(|| "plan is blocked".to_string());
                    return Ok(Resume::Halted(format!(
                        "{reason}; resolve the blocked context or rerun with --force"
                    )));
                }
                // The context document was removed externally: treat the
                // block as resolved and re-enter from the document.
                info!(target: "run", "blocked context cleared externally, resuming");
                state.phase = Phase::Idle;
                state.blocked_reason = None;
                state.clear_task();
                Ok(Resume::Start(state))
            }
            Phase::Complete => {
                if plan.all_done() {
                    return Ok(Resume::Done);
                }
                info!(target: "run", "plan gained new tasks after completion, continuing");
                state.phase = Phase::Idle;
                state.finalize_cycles = 0;
                state.ambiguous_streak = 0;
                Ok(Resume::Start(state))
            }
            // Finished by `run` before the task loop.
            Phase::Committing => Ok(Resume::Start(state)),
            // Re-entered by phase guard after the task loop settles.
            Phase::Polishing | Phase::Finalizing => Ok(Resume::Start(state)),
            Phase::Implementing | Phase::Reviewing | Phase::Fixing | Phase::Escalating => {
                if let Some(current) = &state.current_task
                    && plan
                        .task(&current.id)
                        .is_none_or(|task| task.status.is_terminal())
                {
                    // The document already settled the in-flight task (done,
                    // blocked, or split away); never re-invoke for it.
                    info!(target: "run", task = %current.id, "document already settled the in-flight task");
                    state.clear_task();
                }
                state.phase = Phase::Idle;
                Ok(Resume::Start(state))
            }
            Phase::Idle | Phase::Paused => {
                state.phase = Phase::Idle;
                Ok(Resume::Start(state))
            }
        }
    }

    /// Run pending tasks in document order until none remain, one blocks
    /// the plan, or step mode pauses.
    async fn drive_tasks(&self, state: &mut OrchestrationState) -> Result<DriveEnd> {
        loop {
            let plan = self.plans.load()?;
            let Some(task) = plan.next_pending().cloned() else {
                return Ok(DriveEnd::Settled);
            };
            match self.run_task(state, &task).await? {
                TaskOutcome::Completed { .. } => {
                    if state.step_mode {
                        state.phase = Phase::Paused;
                        self.states.save(state)?;
                        info!(target: "run", task = %task.id, "paused after task");
                        if let Some(ui) = self.ui() {
                            ui.log_step(&format!(
                                "paused after task {}; run again to continue",
                                task.id
                            ));
                        }
                        return Ok(DriveEnd::Paused);
                    }
                }
                TaskOutcome::Split { .. } | TaskOutcome::Skipped { .. } => {}
                TaskOutcome::Blocked { reason } => return Ok(DriveEnd::Blocked(reason)),
            }
        }
    }

    /// One best-effort review of the aggregated diff of the whole run.
    /// Never blocks the plan: faults and unusable outcomes log and move on.
    async fn polish(&self, state: &mut OrchestrationState) -> Result<()> {
        state.phase = Phase::Polishing;
        self.states.save(state)?;
        if let Some(ui) = self.ui() {
            ui.print_pass_header("polish", "reviewing the aggregated change");
        }

        let diff = match &state.base_commit {
            Some(base) => match self.tracker.diff_since(base, DIFF_CHAR_LIMIT) {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(target: "run", error = %e, "could not compute the aggregated diff");
                    String::new()
                }
            },
            None => String::new(),
        };
        let args = SessionArgs::new()
            .with("plan", self.plans.document_path().display().to_string())
            .with("diff", diff);

        match self
            .run_session(PLAN_TASK_ID, Role::Polish, &args, 1, 1)
            .await?
        {
            SessionStep::Fault { error } => {
                warn!(target: "run", error, "polish session failed, skipping polish");
            }
            SessionStep::Parsed {
                signal: Signal::Suggestions {
                    quick_wins,
                    deferred,
                },
                ..
            } => {
                if !deferred.is_empty() {
                    self.record_followups(&deferred)?;
                    info!(target: "run", count = deferred.len(), "deferred suggestions recorded");
                }
                if !quick_wins.is_empty() {
                    self.apply_quick_wins(&quick_wins).await?;
                }
            }
            SessionStep::Parsed {
                signal: Signal::AlreadyComplete | Signal::Approved,
                ..
            } => {
                info!(target: "run", "polish found nothing to improve");
            }
            SessionStep::Parsed { signal, .. } => {
                warn!(target: "signal", outcome = %signal, "polish gave no usable outcome, continuing");
            }
        }
        Ok(())
    }

    /// Apply quick wins through one fix session and commit whatever it
    /// changed.
    async fn apply_quick_wins(&self, wins: &[String]) -> Result<()> {
        info!(target: "run", count = wins.len(), "applying polish quick wins");
        let feedback: String = wins.iter().map(|w| format!("- {w}\n")).collect();
        let args = SessionArgs::new()
            .with("plan", self.plans.document_path().display().to_string())
            .with("feedback", feedback);

        if let SessionStep::Fault { error } = self
            .run_session(PLAN_TASK_ID, Role::ImplementFix, &args, 1, 1)
            .await?
        {
            warn!(target: "run", error, "quick-win session failed, leaving suggestions unapplied");
            return Ok(());
        }
        match self.committer.commit_all(POLISH_MESSAGE)? {
            CommitOutcome::Committed { sha, files } => {
                self.log
                    .record_commit(PLAN_TASK_ID, &sha, files, POLISH_MESSAGE)?;
                info!(target: "run", sha = %sha, files, "polish quick wins committed");
            }
            CommitOutcome::NothingToCommit => {
                info!(target: "run", "quick-win session changed nothing");
            }
        }
        Ok(())
    }

    /// Append deferred suggestions to the follow-ups document under a
    /// timestamp heading.
    fn record_followups(&self, items: &[String]) -> Result<()> {
        let mut doc = std::fs::read_to_string(&self.followups_path).unwrap_or_default();
        if doc.is_empty() {
            doc.push_str("# Deferred follow-ups\n");
        }
        doc.push_str(&format!(
            "\n## {}\n\n",
            Utc::now().format("%Y-%m-%d %H:%M UTC")
        ));
        for item in items {
            doc.push_str(&format!("- {item}\n"));
        }
        atomic_write(&self.followups_path, &doc)
            .with_context(|| format!("failed to write {}", self.followups_path.display()))?;
        Ok(())
    }

    /// Whole-plan verification loop. `Issues` turns into appended follow-up
    /// tasks that run through the normal task machinery; the cycle cap
    /// guarantees the loop ends.
    async fn finalize(&self, state: &mut OrchestrationState) -> Result<FinalizeEnd> {
        loop {
            if state.finalize_cycles >= self.policy.max_finalize_cycles {
                let reason = format!(
                    "finalize cycle cap reached ({} of {})",
                    state.finalize_cycles, self.policy.max_finalize_cycles
                );
                self.block_plan(state, &reason)?;
                return Ok(FinalizeEnd::Blocked(reason));
            }
            state.phase = Phase::Finalizing;
            self.states.save(state)?;
            if let Some(ui) = self.ui() {
                ui.print_pass_header(
                    "finalize",
                    &format!(
                        "cycle {} of {}",
                        state.finalize_cycles + 1,
                        self.policy.max_finalize_cycles
                    ),
                );
            }

            let plan = self.plans.load()?;
            let args = SessionArgs::new()
                .with("plan", self.plans.document_path().display().to_string())
                .with("summary", plan.summary());
            let step = self
                .run_session(
                    PLAN_TASK_ID,
                    Role::Finalize,
                    &args,
                    state.finalize_cycles + 1,
                    self.policy.max_finalize_cycles,
                )
                .await?;

            let signal = match step {
                SessionStep::Fault { error } => {
                    // A fault consumes a cycle like any other inconclusive
                    // answer, so repeated failures still hit the cap.
                    warn!(target: "run", error, "finalize session failed");
                    state.finalize_cycles += 1;
                    self.states.save(state)?;
                    continue;
                }
                SessionStep::Parsed { signal, .. } => signal,
            };

            match signal {
                Signal::Approved | Signal::AlreadyComplete => {
                    info!(target: "run", "finalize passed");
                    return Ok(FinalizeEnd::Clean);
                }
                Signal::Issues(details) | Signal::MissingTests(details) => {
                    let additions = followup_tasks(&details);
                    if additions.is_empty() {
                        warn!(target: "signal", "finalize reported issues with nothing actionable");
                        if let Some(end) = self.finalize_no_verdict(state)? {
                            return Ok(end);
                        }
                        continue;
                    }
                    state.ambiguous_streak = 0;
                    // The cycle is consumed before the follow-ups run, so a
                    // crash mid-round cannot replay it against the cap.
                    state.finalize_cycles += 1;
                    self.states.save(state)?;
                    let added = self.plans.append_tasks(&additions)?;
                    info!(target: "plan", count = added.len(), "finalize appended follow-up tasks");
                    if let Some(ui) = self.ui() {
                        ui.log_step(&format!("finalize appended {} follow-up task(s)", added.len()));
                    }
                    match self.drive_tasks(state).await? {
                        DriveEnd::Settled => {
                            let plan = self.plans.load()?;
                            if !plan.all_done() {
                                let reason = blocked_overall_reason(&plan);
                                self.block_plan(state, &reason)?;
                                return Ok(FinalizeEnd::Blocked(reason));
                            }
                        }
                        DriveEnd::Blocked(reason) => return Ok(FinalizeEnd::Blocked(reason)),
                        DriveEnd::Paused => return Ok(FinalizeEnd::Paused),
                    }
                }
                Signal::Critical(detail) => {
                    let reason = format!(
                        "finalize flagged a critical problem: {}",
                        truncate_text(&detail, REASON_LIMIT)
                    );
                    self.block_plan(state, &reason)?;
                    return Ok(FinalizeEnd::Blocked(reason));
                }
                Signal::Blocked(reason) => {
                    self.block_plan(state, &reason)?;
                    return Ok(FinalizeEnd::Blocked(reason));
                }
                Signal::Escalate(detail) => {
                    let reason = if detail.trim().is_empty() {
                        "finalize requested external resolution".to_string()
                    } else {
                        truncate_text(&detail, REASON_LIMIT)
                    };
                    self.block_plan(state, &reason)?;
                    return Ok(FinalizeEnd::Blocked(reason));
                }
                other => {
                    warn!(target: "signal", outcome = %other, "finalize gave no verdict");
                    if let Some(end) = self.finalize_no_verdict(state)? {
                        return Ok(end);
                    }
                }
            }
        }
    }

    /// An inconclusive finalize answer consumes a cycle; the second in a row
    /// blocks the plan.
    fn finalize_no_verdict(
        &self,
        state: &mut OrchestrationState,
    ) -> Result<Option<FinalizeEnd>> {
        state.finalize_cycles += 1;
        state.ambiguous_streak += 1;
        self.states.save(state)?;
        if state.ambiguous_streak >= 2 {
            let reason = "finalize produced no usable verdict twice in a row".to_string();
            self.block_plan(state, &reason)?;
            return Ok(Some(FinalizeEnd::Blocked(reason)));
        }
        Ok(None)
    }

    /// Commit anything the polish and finalize fix-ups left uncommitted.
    fn cleanup_commit(&self) -> Result<()> {
        match self.committer.commit_all(CLEANUP_MESSAGE)? {
            CommitOutcome::Committed { sha, files } => {
                self.log
                    .record_commit(PLAN_TASK_ID, &sha, files, CLEANUP_MESSAGE)?;
                info!(target: "run", sha = %sha, files, "cleanup commit landed");
            }
            CommitOutcome::NothingToCommit => {
                debug!(target: "run", "tree clean at completion");
            }
        }
        Ok(())
    }

    /// Plan-level halt with no single owning task.
    fn block_plan(&self, state: &mut OrchestrationState, reason: &str) -> Result<()> {
        warn!(target: "run", reason, "plan blocked");
        let mut ctx = EscalationContext::new(PLAN_TASK_ID, "whole plan");
        ctx.set_reason(reason);
        self.states.write_blocked_context(&ctx)?;
        state.block(reason);
        self.states.save(state)?;
        Ok(())
    }
}

fn blocked_overall_reason(plan: &Plan) -> String {
    let blocked: Vec<&str> = plan
        .tasks
        .iter()
        .filter(|t| t.is_blocked())
        .map(|t| t.id.as_str())
        .collect();
    format!(
        "{} task(s) remain blocked for external resolution: {}",
        blocked.len(),
        blocked.join(", ")
    )
}

/// Turn a finalize issues report into follow-up tasks: one per list item,
/// or a single catch-all task when the report has no list at all.
fn followup_tasks(details: &str) -> Vec<SplitTask> {
    let items: Vec<SplitTask> = details
        .lines()
        .filter_map(list_item)
        .map(|item| SplitTask::new(item, ""))
        .collect();
    if !items.is_empty() {
        return items;
    }
    let trimmed = details.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![SplitTask::new("Address finalize findings", trimmed)]
    }
}

fn list_item(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        let rest = rest.trim();
        return (!rest.is_empty()).then_some(rest);
    }
    if let Some((number, rest)) = trimmed.split_once(". ")
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
    {
        let rest = rest.trim();
        return (!rest.is_empty()).then_some(rest);
    }
    None
}
