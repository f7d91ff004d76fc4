//! Plan execution — `foreman run`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::super::Cli;

pub async fn run_plan(
    cli: &Cli,
    project_dir: PathBuf,
    plan: Option<PathBuf>,
    force: bool,
    step: bool,
) -> Result<()> {
    use foreman::config::Config;
    use foreman::decisions::DecisionLog;
    use foreman::logging;
    use foreman::orchestrator::{PlanRunner, RunOutcome};
    use foreman::plan::PlanStore;
    use foreman::session::CliWorker;
    use foreman::state::StateStore;
    use foreman::tracker::{GitCommitter, GitTracker};
    use foreman::ui::OrchestratorUI;
    use std::sync::Arc;

    let config = Config::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    config.ensure_dirs()?;
    let _log_guard = logging::init(config.verbose, Some(&config.log_file()));

    let plan_path = resolve_plan_path(plan, &config.project_dir);
    if !plan_path.exists() {
        anyhow::bail!(
            "No plan document at {}. Write one or pass a path: foreman run <plan>",
            plan_path.display()
        );
    }

    if force
        && !discard_progress(
            &config.state_file(),
            &config.blocked_file(),
            &config.decision_log_file(),
            config.assume_yes,
        )?
    {
        println!("Run cancelled");
        return Ok(());
    }

    let tracker = Arc::new(GitTracker::new(&config.project_dir)?);
    let committer = Arc::new(GitCommitter::new(&config.project_dir)?);
    let plans = PlanStore::new(&plan_path, config.plan_cache_file());
    let states = StateStore::new(config.state_file(), config.blocked_file());
    let log = DecisionLog::new(config.decision_log_file());

    let plan_doc = plans.load()?;
    let ui = Arc::new(OrchestratorUI::new(plan_doc.len() as u64, config.verbose));
    let worker = Arc::new(CliWorker::from_config(&config).with_ui(ui.clone()));

    let runner = PlanRunner::new(worker, committer, tracker, plans, states, log, &config)
        .with_ui(ui);

    match runner.run(step).await? {
        RunOutcome::Complete => {
            println!("Plan complete. Check 'foreman status' for the summary.");
        }
        RunOutcome::Paused => {
            println!();
            println!("Paused after the last completed task. Run 'foreman run' again to continue.");
        }
        RunOutcome::Blocked { reason } => {
            println!();
            println!("Blocked: {reason}");
            println!(
                "Resolve the context in {}, then run again. Use 'foreman run --force' to discard it.",
                config.blocked_file().display()
            );
        }
    }
    Ok(())
}

/// Drop the saved snapshot, the decision log, and the blocked context so the
/// next run starts from the document alone. Returns false when the user
/// declines.
fn discard_progress(
    state_file: &Path,
    blocked_file: &Path,
    decisions_file: &Path,
    assume_yes: bool,
) -> Result<bool> {
    use dialoguer::Confirm;
    use foreman::state::StateStore;

    if !state_file.exists() && !blocked_file.exists() && !decisions_file.exists() {
        println!("No saved progress to discard");
        return Ok(true);
    }

    if !assume_yes {
        let confirm = Confirm::new()
            .with_prompt(
                "This will discard saved progress, the decision log, and any blocked context. Continue?",
            )
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            return Ok(false);
        }
    }

    StateStore::new(state_file, blocked_file).clear()?;
    if decisions_file.exists() {
        std::fs::remove_file(decisions_file)?;
    }
    println!("Saved progress discarded");
    Ok(true)
}

/// Pick the plan document: an explicit path wins, otherwise `plan.md` in
/// the project directory.
pub fn resolve_plan_path(explicit: Option<PathBuf>, project_dir: &Path) -> PathBuf {
    explicit.unwrap_or_else(|| project_dir.join("plan.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── resolve_plan_path ─────────────────────────────────────────────────────

    #[test]
    fn resolve_plan_path_explicit_wins() {
        let path = resolve_plan_path(Some(PathBuf::from("docs/roadmap.md")), Path::new("/proj"));
        assert_eq!(path, PathBuf::from("docs/roadmap.md"));
    }

    #[test]
    fn resolve_plan_path_defaults_to_plan_md() {
        let path = resolve_plan_path(None, Path::new("/proj"));
        assert_eq!(path, PathBuf::from("/proj/plan.md"));
    }

    // ── run_plan ──────────────────────────────────────────────────────────────

    fn test_cli() -> Cli {
        Cli {
            verbose: false,
            yes: true,
            project_dir: None,
            command: crate::Commands::Status,
        }
    }

    #[tokio::test]
    async fn run_plan_without_document_fails_with_hint() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = run_plan(&test_cli(), tmp.path().to_path_buf(), None, false, false)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("No plan document"),
            "expected missing-plan hint in error: {msg}"
        );
    }

    // ── discard_progress ──────────────────────────────────────────────────────

    #[test]
    fn discard_progress_removes_snapshot_log_and_context() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = tmp.path().join("state.json");
        let blocked = tmp.path().join("blocked.md");
        let decisions = tmp.path().join("decisions.jsonl");
        std::fs::write(&state, "{}").unwrap();
        std::fs::write(&blocked, "# Blocked").unwrap();
        std::fs::write(&decisions, "{\"kind\":\"fault\"}\n").unwrap();

        let cleared = discard_progress(&state, &blocked, &decisions, true).unwrap();

        assert!(cleared);
        assert!(!state.exists());
        assert!(!blocked.exists());
        assert!(!decisions.exists());
    }

    #[test]
    fn discard_progress_with_nothing_saved_is_a_noop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = tmp.path().join("state.json");
        let blocked = tmp.path().join("blocked.md");
        let decisions = tmp.path().join("decisions.jsonl");

        assert!(discard_progress(&state, &blocked, &decisions, true).unwrap());
    }
}
