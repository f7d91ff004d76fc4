//! The per-task state machine: implement, review, fix, escalate, commit.

use super::{PlanRunner, SessionStep};
use crate::plan::Task;
use crate::policy::{self, Directive, EscalationVerdict};
use crate::session::{Role, SessionArgs};
use crate::signals::Signal;
use crate::state::{EscalationContext, OrchestrationState, Phase};
use crate::tracker::{CommitOutcome, task_message};
use crate::util::truncate_text;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// How much reviewer feedback is carried into a fix session.
const FEEDBACK_LIMIT: usize = 4_000;
/// How much raw worker output the blocked-context document keeps.
const OUTPUT_SNIPPET_LIMIT: usize = 2_000;
/// Cap on reasons quoted into block messages.
const REASON_LIMIT: usize = 400;

/// How one task settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Marked done in the document; `sha` is the landed commit, or `None`
    /// when there was nothing to commit.
    Completed { sha: Option<String> },
    /// Replaced in the document by subtasks; the plan must be re-read.
    Split { count: usize },
    /// Refused by the safety screen and marked blocked in the document.
    /// Later tasks still run.
    Skipped { reason: String },
    /// Blocked with the whole plan halted for external resolution.
    Blocked { reason: String },
}

/// Where an implement or fix session leaves the task.
enum ImplementStep {
    /// Output produced; the reviewer decides next.
    Review,
    /// The work already exists in the tree; skip review and commit.
    AlreadyDone,
    /// The worker cannot proceed for an external reason.
    Halted(String),
    /// Sessions kept faulting until the attempt budget ran out.
    Exhausted(String),
}

impl PlanRunner {
    /// Drive one task from pending to a terminal outcome.
    pub(super) async fn run_task(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
    ) -> Result<TaskOutcome> {
        if let Some(violation) = policy::screen_task(&task.title, &task.description) {
            warn!(target: "run", task = %task.id, violation, "task refused by the safety screen");
            self.plans.mark_blocked(&task.id)?;
            if let Some(ui) = self.ui() {
                ui.task_blocked(&task.id, &violation);
            }
            return Ok(TaskOutcome::Skipped { reason: violation });
        }

        state.begin_task(&task.id, &task.title);
        self.states.save(state)?;
        info!(target: "run", task = %task.id, title = %task.title, "task started");
        if let Some(ui) = self.ui() {
            ui.start_task(&task.id, &task.title);
        }

        // Only top-level tasks face the split check; subtasks are already
        // the product of one.
        if self.policy.split_check
            && task.parent_id.is_none()
            && let Some(count) = self.split_task(state, task).await?
        {
            return Ok(TaskOutcome::Split { count });
        }

        let base_sha = self.tracker.head_sha();
        let mut ctx = EscalationContext::new(&task.id, &task.title);
        let mut feedback: Vec<String> = Vec::new();
        let mut budget = self.policy.max_attempts;

        let mut step = self
            .implement(state, task, Role::Implement, &feedback, budget, &mut ctx)
            .await?;

        loop {
            match step {
                ImplementStep::AlreadyDone => return self.finish_without_commit(state, task),
                ImplementStep::Halted(reason) => {
                    return self.block_task(state, task, &reason, &mut ctx);
                }
                ImplementStep::Exhausted(reason) => {
                    match self
                        .escalation_verdict(state, task, &reason, &mut ctx)
                        .await?
                    {
                        EscalationVerdict::ProceedWith(plan) => {
                            ctx.push_attempt(&format!(
                                "escalation round {}: retrying with a revised plan",
                                state.escalation_rounds_for(&task.id)
                            ));
                            if let Some(ui) = self.ui() {
                                ui.show_escalation(&plan);
                            }
                            // The revised plan replaces accumulated feedback
                            // and buys exactly one more review attempt.
                            budget = 1;
                            feedback = vec![plan];
                            step = self
                                .implement(
                                    state,
                                    task,
                                    Role::ImplementFix,
                                    &feedback,
                                    budget,
                                    &mut ctx,
                                )
                                .await?;
                            continue;
                        }
                        EscalationVerdict::Halt(why) => {
                            return self.block_task(state, task, &why, &mut ctx);
                        }
                    }
                }
                ImplementStep::Review => {}
            }

            // Mass-change gate: a sweeping diff goes to a human, not to an
            // automated reviewer that might wave it through.
            if let Some(base) = &base_sha {
                let stats = self.tracker.stats_since(base)?;
                if let Some(ui) = self.ui() {
                    ui.update_changes(&stats);
                }
                if let Some(what) = stats.exceeds(&self.limits) {
                    let reason = format!("change needs human review: {what}");
                    return self.block_task(state, task, &reason, &mut ctx);
                }
            }

            state.phase = Phase::Reviewing;
            self.states.save(state)?;
            let attempt_display = state.attempts_for(&task.id) + 1;
            let outcome = self
                .run_session(
                    &task.id,
                    Role::Review,
                    &self.task_args(task),
                    attempt_display,
                    budget,
                )
                .await?;

            let signal = match outcome {
                SessionStep::Fault { error } => {
                    let attempts = state.record_attempt(&task.id);
                    self.states.save(state)?;
                    match policy::decide_process_failure(attempts, budget) {
                        Directive::Retry => continue,
                        _ => {
                            step = ImplementStep::Exhausted(format!(
                                "review sessions kept failing: {error}"
                            ));
                            continue;
                        }
                    }
                }
                SessionStep::Parsed { signal, text } => {
                    ctx.last_output = truncate_text(&text, OUTPUT_SNIPPET_LIMIT);
                    signal
                }
            };

            let attempts = state.record_attempt(&task.id);
            state.ambiguous_streak = if lacks_verdict(&signal) {
                state.ambiguous_streak + 1
            } else {
                0
            };
            self.states.save(state)?;
            if let Some(ui) = self.ui() {
                ui.show_signal(signal.label(), signal.detail());
            }

            match policy::decide(&signal, attempts, budget, state.ambiguous_streak) {
                Directive::Proceed => return self.land_commit(state, task),
                Directive::Retry => {
                    ctx.push_attempt(&attempt_summary(attempts, &signal));
                    feedback.push(fix_instructions(&signal));
                    step = self
                        .implement(state, task, Role::ImplementFix, &feedback, budget, &mut ctx)
                        .await?;
                }
                Directive::Escalate => {
                    ctx.push_attempt(&attempt_summary(attempts, &signal));
                    step = ImplementStep::Exhausted(escalation_reason(&signal, attempts));
                }
                Directive::Halt(reason) => {
                    return self.block_task(state, task, &reason, &mut ctx);
                }
            }
        }
    }

    /// Run an implement or fix session, consuming attempt budget on process
    /// faults until output is produced or the budget runs out.
    async fn implement(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
        role: Role,
        feedback: &[String],
        budget: u32,
        ctx: &mut EscalationContext,
    ) -> Result<ImplementStep> {
        state.phase = if role == Role::ImplementFix {
            Phase::Fixing
        } else {
            Phase::Implementing
        };
        self.states.save(state)?;

        let mut args = self.task_args(task);
        if !feedback.is_empty() {
            args = args.with("feedback", feedback.join("\n\n"));
        }

        loop {
            let attempt_display = state.attempts_for(&task.id) + 1;
            match self
                .run_session(&task.id, role, &args, attempt_display, budget)
                .await?
            {
                SessionStep::Fault { error } => {
                    let attempts = state.record_attempt(&task.id);
                    self.states.save(state)?;
                    if policy::decide_process_failure(attempts, budget) == Directive::Retry {
                        continue;
                    }
                    return Ok(ImplementStep::Exhausted(format!(
                        "{role} sessions kept failing: {error}"
                    )));
                }
                SessionStep::Parsed { signal, text } => {
                    ctx.last_output = truncate_text(&text, OUTPUT_SNIPPET_LIMIT);
                    return Ok(match signal {
                        // A fix session claiming the work already exists
                        // still faces the reviewer; only a fresh implement
                        // may short-circuit.
                        Signal::AlreadyComplete if role == Role::Implement => {
                            ImplementStep::AlreadyDone
                        }
                        Signal::Blocked(reason) => ImplementStep::Halted(reason),
                        _ => ImplementStep::Review,
                    });
                }
            }
        }
    }

    /// Ask whether the task should be decomposed before implementing.
    /// Anything short of a clean split verdict proceeds unsplit.
    async fn split_task(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
    ) -> Result<Option<usize>> {
        match self
            .run_session(&task.id, Role::Split, &self.task_args(task), 1, 1)
            .await?
        {
            SessionStep::Fault { error } => {
                warn!(target: "run", task = %task.id, error, "split check failed, continuing unsplit");
                Ok(None)
            }
            SessionStep::Parsed {
                signal: Signal::Split(subtasks),
                ..
            } => match self.plans.apply_split(&task.id, &subtasks) {
                Ok(added) => {
                    info!(target: "plan", task = %task.id, count = added.len(), "task split into subtasks");
                    if let Some(ui) = self.ui() {
                        ui.log_step(&format!(
                            "split task {} into {} subtasks",
                            task.id,
                            added.len()
                        ));
                    }
                    state.clear_task();
                    state.phase = Phase::Idle;
                    self.states.save(state)?;
                    Ok(Some(added.len()))
                }
                Err(e) => {
                    warn!(target: "run", task = %task.id, error = %e, "split unusable, continuing unsplit");
                    Ok(None)
                }
            },
            SessionStep::Parsed {
                signal: Signal::NoSplit,
                ..
            } => {
                debug!(target: "run", task = %task.id, "split check declined");
                Ok(None)
            }
            SessionStep::Parsed { signal, .. } => {
                warn!(target: "run", task = %task.id, outcome = %signal, "split check gave no verdict, continuing unsplit");
                Ok(None)
            }
        }
    }

    /// Ask the escalation worker what to do with a stuck task. This step
    /// never retries itself: a fault or an unusable answer halts.
    async fn escalation_verdict(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
        reason: &str,
        ctx: &mut EscalationContext,
    ) -> Result<EscalationVerdict> {
        state.phase = Phase::Escalating;
        self.states.save(state)?;
        info!(target: "run", task = %task.id, reason, "escalating");
        ctx.set_reason(reason);

        let rounds = state.escalation_rounds_for(&task.id);
        let args = self
            .task_args(task)
            .with("reason", reason)
            .with("history", ctx.to_markdown());
        let step = self
            .run_session(
                &task.id,
                Role::Escalate,
                &args,
                rounds + 1,
                self.policy.max_escalation_rounds,
            )
            .await?;

        let signal = match step {
            SessionStep::Fault { error } => {
                return Ok(EscalationVerdict::Halt(format!(
                    "escalation session failed: {error}"
                )));
            }
            SessionStep::Parsed { signal, text } => {
                ctx.last_output = truncate_text(&text, OUTPUT_SNIPPET_LIMIT);
                signal
            }
        };

        let verdict = policy::decide_escalation(&signal, rounds, self.policy.max_escalation_rounds);
        if matches!(verdict, EscalationVerdict::ProceedWith(_)) {
            state.record_escalation_round(&task.id);
            state.reset_attempts(&task.id);
            state.ambiguous_streak = 0;
            self.states.save(state)?;
        }
        Ok(verdict)
    }

    /// The work already exists: mark done without review or commit. The
    /// document toggle rides along with whichever commit comes next.
    fn finish_without_commit(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
    ) -> Result<TaskOutcome> {
        info!(target: "run", task = %task.id, "work already complete");
        self.plans.mark_done(&task.id)?;
        state.clear_task();
        state.phase = Phase::Idle;
        self.states.save(state)?;
        if let Some(ui) = self.ui() {
            ui.task_complete(&task.id, None);
        }
        Ok(TaskOutcome::Completed { sha: None })
    }

    /// Approved: persist the committing phase, toggle the document marker,
    /// and land the commit. Resume re-runs this whole step after a crash, so
    /// each part tolerates having already happened; a clean tree reports
    /// `NothingToCommit` and the task still completes.
    pub(super) fn land_commit(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
    ) -> Result<TaskOutcome> {
        state.phase = Phase::Committing;
        self.states.save(state)?;

        self.plans.mark_done(&task.id)?;
        let outcome = self
            .committer
            .commit_task(&task.id, &task.title, self.plans.document_path())
            .with_context(|| format!("commit failed for task {}", task.id))?;
        let sha = match outcome {
            CommitOutcome::Committed { sha, files } => {
                self.log
                    .record_commit(&task.id, &sha, files, &task_message(&task.id, &task.title))?;
                info!(target: "run", task = %task.id, sha = %sha, files, "task committed");
                Some(sha)
            }
            CommitOutcome::NothingToCommit => {
                info!(target: "run", task = %task.id, "nothing to commit");
                None
            }
        };

        state.clear_task();
        state.phase = Phase::Idle;
        self.states.save(state)?;
        if let Some(ui) = self.ui() {
            ui.task_complete(&task.id, sha.as_deref());
        }
        Ok(TaskOutcome::Completed { sha })
    }

    /// Halt the task and the whole plan: blocked-context document, document
    /// marker, state phase.
    fn block_task(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
        reason: &str,
        ctx: &mut EscalationContext,
    ) -> Result<TaskOutcome> {
        warn!(target: "run", task = %task.id, reason, "task blocked");
        ctx.set_reason(reason);
        self.states.write_blocked_context(ctx)?;
        self.plans.mark_blocked(&task.id)?;
        state.block(reason);
        self.states.save(state)?;
        if let Some(ui) = self.ui() {
            ui.task_blocked(&task.id, reason);
        }
        Ok(TaskOutcome::Blocked {
            reason: reason.to_string(),
        })
    }

    fn task_args(&self, task: &Task) -> SessionArgs {
        SessionArgs::new()
            .with("task", task.id.as_str())
            .with("title", task.title.as_str())
            .with("description", task.description.as_str())
            .with("plan", self.plans.document_path().display().to_string())
    }
}

/// Signals that carry no verdict for the position that received them.
fn lacks_verdict(signal: &Signal) -> bool {
    matches!(
        signal,
        Signal::Ambiguous(_)
            | Signal::Decision { .. }
            | Signal::ProceedWithPlan(_)
            | Signal::NoSplit
            | Signal::Split(_)
            | Signal::Suggestions { .. }
    )
}

/// One summary line for the escalation history.
fn attempt_summary(attempts: u32, signal: &Signal) -> String {
    let first_line = signal.detail().lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        format!("attempt {attempts}: review reported {}", signal.label())
    } else {
        format!(
            "attempt {attempts}: review reported {}: {first_line}",
            signal.label()
        )
    }
}

/// What the next fix session is told to address.
fn fix_instructions(signal: &Signal) -> String {
    let detail = truncate_text(signal.detail(), FEEDBACK_LIMIT);
    match signal {
        Signal::MissingTests(_) => format!("The review found missing tests:\n{detail}"),
        Signal::Ambiguous(_) => format!(
            "The review session ended without a verdict. Re-check the task and finish anything incomplete. Its raw output follows:\n{detail}"
        ),
        _ => detail,
    }
}

/// Why the task is leaving the fix loop for escalation.
fn escalation_reason(signal: &Signal, attempts: u32) -> String {
    match signal {
        Signal::Critical(d) => format!(
            "review flagged a critical problem: {}",
            truncate_text(d, REASON_LIMIT)
        ),
        Signal::Escalate(d) if !d.trim().is_empty() => truncate_text(d, REASON_LIMIT),
        Signal::Escalate(_) => "review requested escalation".to_string(),
        _ => format!(
            "review did not approve after {attempts} attempt(s); last outcome was {}",
            signal.label()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testutil::Harness;
    use crate::session::ScriptedWorker;
    use crate::tracker::{ChangeStats, ScriptedCommitter, ScriptedTracker};

    const PLAN: &str = "# Plan\n\n- [ ] 1. Add config loader\n- [ ] 2. Wire logging\n";

    fn first_task(h: &Harness) -> Task {
        h.plans().load().unwrap().tasks[0].clone()
    }

    // =========================================
    // happy path and already-complete
    // =========================================

    #[tokio::test]
    async fn test_approved_first_try_commits_and_marks_done() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "wrote the loader")
            .push(Role::Review, "[APPROVED]\nlooks right");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        match outcome {
            TaskOutcome::Completed { sha } => assert!(sha.is_some()),
            other => panic!("expected Completed, got {:?}", other),
        }
        assert!(h.document().contains("- [x] 1. Add config loader"));
        assert_eq!(h.committer.committed(), vec!["1"]);
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.current_task.is_none());
        assert_eq!(state.attempts_for("1"), 1);

        let records = h.log().read_all().unwrap();
        let kinds: Vec<_> = records.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["session", "session", "commit"]);
    }

    #[tokio::test]
    async fn test_already_complete_skips_review_and_commit() {
        let worker = ScriptedWorker::new().push(
            Role::Implement,
            "[ALREADY_COMPLETE]\nThe loader landed in an earlier task.",
        );
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed { sha: None });
        assert!(h.document().contains("- [x] 1."));
        assert_eq!(h.committer.commit_count(), 0);
        assert_eq!(h.worker.call_count(Role::Review), 0);
    }

    #[tokio::test]
    async fn test_fix_claiming_already_complete_still_faces_review() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[ISSUES]\nmissing the reload hook")
            .push(Role::ImplementFix, "[ALREADY_COMPLETE]")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Completed { sha: Some(_) }));
        assert_eq!(h.worker.call_count(Role::Review), 2);
        assert_eq!(h.committer.commit_count(), 1);
    }

    // =========================================
    // fix loop
    // =========================================

    #[tokio::test]
    async fn test_issues_twice_then_approved_accumulates_feedback() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[ISSUES]\nloop bound off by one")
            .push(Role::ImplementFix, "fixed the bound")
            .push(Role::Review, "[ISSUES]\nstill no overflow test")
            .push(Role::ImplementFix, "added the test")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Completed { sha: Some(_) }));
        assert_eq!(state.attempts_for("1"), 3);
        assert_eq!(h.worker.call_count(Role::Escalate), 0);

        // Later fix sessions see every earlier finding.
        let second_fix = h.worker.call_args(Role::ImplementFix, 1).unwrap();
        let feedback = second_fix.get("feedback").unwrap();
        assert!(feedback.contains("loop bound off by one"));
        assert!(feedback.contains("still no overflow test"));
    }

    #[tokio::test]
    async fn test_missing_tests_feedback_is_labelled() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[MISSING_TESTS]\nno coverage for the retry path")
            .push(Role::ImplementFix, "added retry tests")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        h.runner.run_task(&mut state, &task).await.unwrap();

        let fix = h.worker.call_args(Role::ImplementFix, 0).unwrap();
        let feedback = fix.get("feedback").unwrap();
        assert!(feedback.contains("missing tests"));
        assert!(feedback.contains("retry path"));
    }

    // =========================================
    // escalation
    // =========================================

    #[tokio::test]
    async fn test_budget_exhaustion_escalates_and_revised_plan_succeeds() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[ISSUES]\nwrong layering")
            .push(Role::ImplementFix, "moved it")
            .push(Role::Review, "[ISSUES]\nstill wrong")
            .push(Role::ImplementFix, "moved it again")
            .push(Role::Review, "[ISSUES]\nsame problem")
            .push(Role::Escalate, "[PROCEED]\nPut the adapter behind a trait.")
            .push(Role::ImplementFix, "introduced the trait")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Completed { sha: Some(_) }));
        assert_eq!(h.worker.call_count(Role::Escalate), 1);
        assert_eq!(state.escalation_rounds_for("1"), 1);
        // Attempts were reset for the revised plan; only the closing review
        // consumed one.
        assert_eq!(state.attempts_for("1"), 1);

        // The revised plan replaces accumulated review feedback.
        let last_fix = h.worker.call_args(Role::ImplementFix, 2).unwrap();
        assert_eq!(
            last_fix.get("feedback").unwrap(),
            "Put the adapter behind a trait."
        );

        // The escalation session saw the attempt history.
        let esc = h.worker.call_args(Role::Escalate, 0).unwrap();
        let history = esc.get("history").unwrap();
        assert!(history.contains("attempt 1"));
        assert!(history.contains("wrong layering"));
    }

    #[tokio::test]
    async fn test_escalation_halt_blocks_task_and_plan() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[ISSUES]\na")
            .push(Role::ImplementFix, "fix")
            .push(Role::Review, "[ISSUES]\nb")
            .push(Role::ImplementFix, "fix")
            .push(Role::Review, "[ISSUES]\nc")
            .push(Role::Escalate, "[ESCALATE]\nNeeds a schema decision only a human can make.");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        match outcome {
            TaskOutcome::Blocked { reason } => assert!(reason.contains("schema decision")),
            other => panic!("expected Blocked, got {:?}", other),
        }
        assert!(h.document().contains("- [!] 1."));
        assert_eq!(state.phase, Phase::Blocked);
        assert_eq!(h.committer.commit_count(), 0);

        let doc = h.states().read_blocked_context().unwrap();
        assert!(doc.contains("schema decision"));
        assert!(doc.contains("1. attempt 1"));
        assert!(doc.contains("## Last worker output"));
    }

    #[tokio::test]
    async fn test_second_exhaustion_runs_out_of_escalation_rounds() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[ISSUES]\na")
            .push(Role::ImplementFix, "fix")
            .push(Role::Review, "[ISSUES]\nb")
            .push(Role::ImplementFix, "fix")
            .push(Role::Review, "[ISSUES]\nc")
            .push(Role::Escalate, "[PROCEED]\nNarrow the scope to the parser.")
            .push(Role::ImplementFix, "narrowed")
            .push(Role::Review, "[ISSUES]\nstill broken")
            .push(Role::Escalate, "[PROCEED]\nSplit the parser in two.")
            .push(Role::ImplementFix, "split it")
            .push(Role::Review, "[ISSUES]\nno")
            .push(Role::Escalate, "[PROCEED]\nTry a table-driven approach.");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        // Two revised plans were allowed; the third proposal is refused.
        match outcome {
            TaskOutcome::Blocked { reason } => {
                assert!(reason.contains("escalation rounds exhausted"))
            }
            other => panic!("expected Blocked, got {:?}", other),
        }
        assert_eq!(h.worker.call_count(Role::Escalate), 3);
        assert_eq!(state.escalation_rounds_for("1"), 2);
    }

    #[tokio::test]
    async fn test_critical_review_escalates_without_retry() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "[CRITICAL]\ndrops the audit table")
            .push(Role::Escalate, "[ESCALATE]\nDo not proceed without a human.");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Blocked { .. }));
        // No fix attempt between the critical review and escalation.
        assert_eq!(h.worker.call_count(Role::ImplementFix), 0);
        assert_eq!(h.worker.call_count(Role::Review), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_reviews_escalate_after_two_in_a_row() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first pass")
            .push(Role::Review, "I looked around and things seem plausible.")
            .push(Role::ImplementFix, "re-checked everything")
            .push(Role::Review, "Hard to say, really.")
            .push(Role::Escalate, "[ESCALATE]\nReviewer cannot reach a verdict.");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Blocked { .. }));
        assert_eq!(h.worker.call_count(Role::Review), 2);
        assert_eq!(h.worker.call_count(Role::ImplementFix), 1);
        assert_eq!(h.worker.call_count(Role::Escalate), 1);
    }

    // =========================================
    // blocked, screened, and gated
    // =========================================

    #[tokio::test]
    async fn test_blocked_implementer_halts_immediately() {
        let worker = ScriptedWorker::new().push(Role::Implement, "[BLOCKED: missing credentials]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Blocked {
                reason: "missing credentials".to_string()
            }
        );
        assert_eq!(h.committer.commit_count(), 0);
        assert_eq!(h.worker.total_calls(), 1);
        assert!(h.document().contains("- [!] 1."));
        assert!(
            h.states()
                .read_blocked_context()
                .unwrap()
                .contains("missing credentials")
        );
    }

    #[tokio::test]
    async fn test_safety_screen_refuses_without_any_session() {
        let plan = "# Plan\n\n- [ ] 1. Force push to main to reset history\n";
        let h = Harness::new(plan, ScriptedWorker::new());
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        match outcome {
            TaskOutcome::Skipped { reason } => {
                assert!(reason.contains("forbidden operation"))
            }
            other => panic!("expected Skipped, got {:?}", other),
        }
        assert_eq!(h.worker.total_calls(), 0);
        assert!(h.document().contains("- [!] 1."));
        // The plan is not halted; only the task is refused.
        assert_ne!(state.phase, Phase::Blocked);
        assert!(h.states().read_blocked_context().is_none());
    }

    #[tokio::test]
    async fn test_mass_deletion_blocks_before_review() {
        let worker = ScriptedWorker::new().push(Role::Implement, "rewrote the world");
        let tracker = ScriptedTracker::new().with_stats(ChangeStats {
            files_changed: 40,
            files_added: 0,
            files_deleted: 2,
            insertions: 10,
            deletions: 5_000,
        });
        let h = Harness::build(
            PLAN,
            worker,
            ScriptedCommitter::new(),
            tracker,
            |_| {},
        );
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        match outcome {
            TaskOutcome::Blocked { reason } => {
                assert!(reason.contains("needs human review"))
            }
            other => panic!("expected Blocked, got {:?}", other),
        }
        assert_eq!(h.worker.call_count(Role::Review), 0);
        assert!(h.document().contains("- [!] 1."));
    }

    #[tokio::test]
    async fn test_no_baseline_skips_the_change_gate() {
        let worker = ScriptedWorker::new()
            .push(Role::Implement, "first commit in an empty repo")
            .push(Role::Review, "[APPROVED]");
        let tracker = ScriptedTracker::new().with_head(None);
        let h = Harness::build(
            PLAN,
            worker,
            ScriptedCommitter::new(),
            tracker,
            |_| {},
        );
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed { .. }));
    }

    // =========================================
    // process faults
    // =========================================

    #[tokio::test]
    async fn test_implement_fault_consumes_budget_then_retries() {
        let worker = ScriptedWorker::new()
            .push_fault(Role::Implement)
            .push(Role::Implement, "second spawn worked")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Completed { sha: Some(_) }));
        assert_eq!(state.attempts_for("1"), 2);
        let records = h.log().read_all().unwrap();
        assert_eq!(records.iter().filter(|r| r.kind() == "fault").count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_faults_exhaust_budget_and_escalate() {
        let worker = ScriptedWorker::new()
            .push_fault(Role::Implement)
            .push_fault(Role::Implement)
            .push_fault(Role::Implement)
            .push(Role::Escalate, "[ESCALATE]\nWorker environment is broken.");
        let h = Harness::new(PLAN, worker);
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Blocked { .. }));
        assert_eq!(h.worker.call_count(Role::Implement), 3);
        let records = h.log().read_all().unwrap();
        assert_eq!(records.iter().filter(|r| r.kind() == "fault").count(), 3);
        // Faults are faults, not parsed sessions.
        assert_eq!(
            records
                .iter()
                .filter(|r| r.kind() == "session")
                .filter(|r| r.task_id() == "1")
                .count(),
            1 // the escalation session
        );
    }

    // =========================================
    // split
    // =========================================

    #[tokio::test]
    async fn test_split_replaces_task_with_subtasks() {
        let worker = ScriptedWorker::new().push(
            Role::Split,
            "[SPLIT]\n## Subtasks\n- Parse the config file\n- Apply the parsed settings\n",
        );
        let h = Harness::build(
            PLAN,
            worker,
            ScriptedCommitter::new(),
            ScriptedTracker::new(),
            |c| c.policy.split_check = true,
        );
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Split { count: 2 });
        let doc = h.document();
        assert!(doc.contains("- [ ] 1.1 Parse the config file"));
        assert!(doc.contains("- [ ] 1.2 Apply the parsed settings"));
        assert_eq!(h.worker.call_count(Role::Implement), 0);
        assert!(state.current_task.is_none());
    }

    #[tokio::test]
    async fn test_no_split_proceeds_to_implement() {
        let worker = ScriptedWorker::new()
            .push(Role::Split, "[NO_SPLIT]\nSmall enough.")
            .push(Role::Implement, "done in one pass")
            .push(Role::Review, "[APPROVED]");
        let h = Harness::build(
            PLAN,
            worker,
            ScriptedCommitter::new(),
            ScriptedTracker::new(),
            |c| c.policy.split_check = true,
        );
        let task = first_task(&h);
        let mut state = h.fresh_state();

        let outcome = h.runner.run_task(&mut state, &task).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Completed { .. }));
        assert_eq!(h.worker.call_count(Role::Split), 1);
    }

    // =========================================
    // pure helpers
    // =========================================

    #[test]
    fn test_lacks_verdict_groups_signals() {
        assert!(lacks_verdict(&Signal::Ambiguous("eh".into())));
        assert!(lacks_verdict(&Signal::NoSplit));
        assert!(!lacks_verdict(&Signal::Approved));
        assert!(!lacks_verdict(&Signal::Issues("x".into())));
        assert!(!lacks_verdict(&Signal::Blocked("y".into())));
    }

    #[test]
    fn test_attempt_summary_quotes_first_line() {
        let s = attempt_summary(2, &Signal::Issues("first line\nsecond line".into()));
        assert_eq!(s, "attempt 2: review reported issues: first line");

        let s = attempt_summary(1, &Signal::Approved);
        assert_eq!(s, "attempt 1: review reported approved");
    }

    #[test]
    fn test_fix_instructions_by_signal() {
        let issues = fix_instructions(&Signal::Issues("tighten bounds".into()));
        assert_eq!(issues, "tighten bounds");

        let tests = fix_instructions(&Signal::MissingTests("no retry coverage".into()));
        assert!(tests.contains("missing tests"));
        assert!(tests.contains("no retry coverage"));

        let vague = fix_instructions(&Signal::Ambiguous("rambling".into()));
        assert!(vague.contains("without a verdict"));
        assert!(vague.contains("rambling"));
    }

    #[test]
    fn test_escalation_reason_by_signal() {
        let critical = escalation_reason(&Signal::Critical("drops table".into()), 1);
        assert!(critical.contains("critical"));
        assert!(critical.contains("drops table"));

        let exhausted = escalation_reason(&Signal::Issues("same again".into()), 3);
        assert!(exhausted.contains("3 attempt(s)"));
        assert!(exhausted.contains("issues"));
    }
}
