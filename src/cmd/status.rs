//! Plan and progress overview — `foreman status`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use foreman::config::Config;
    use foreman::decisions::DecisionLog;
    use foreman::plan::PlanStore;
    use foreman::state::{Phase, StateStore};

    let config = Config::with_cli_args(project_dir.to_path_buf(), false, false)?;
    let states = StateStore::new(config.state_file(), config.blocked_file());
    let state = states.load()?;

    println!();
    println!("Foreman Status");
    println!("==============");
    println!();

    // The snapshot remembers which document the run drives; before any run
    // the default location is the only candidate.
    let plan_path = state
        .as_ref()
        .map(|s| s.plan_path.clone())
        .unwrap_or_else(|| config.project_dir.join("plan.md"));

    if !plan_path.exists() {
        println!("Plan:  none found at {}", plan_path.display());
        println!();
        println!("Write a plan document and start with 'foreman run'.");
        println!();
        return Ok(());
    }

    match PlanStore::new(&plan_path, config.plan_cache_file()).load() {
        Ok(plan) => {
            println!("Plan:  {}", plan_path.display());
            println!("Tasks: {}", plan.summary());
            for task in plan.tasks.iter().filter(|t| t.is_blocked()) {
                println!("       [!] {}. {}", task.id, task.title);
            }
        }
        Err(e) => println!("Plan:  {} (unreadable: {e})", plan_path.display()),
    }
    println!();

    match &state {
        Some(state) => {
            println!("Phase: {}", state.phase.as_str());
            if let Some(current) = &state.current_task {
                println!(
                    "Task:  {}. {} ({} fix attempt(s) so far)",
                    current.id,
                    current.title,
                    state.attempts_for(&current.id)
                );
            }
            if state.phase == Phase::Blocked {
                if let Some(reason) = &state.blocked_reason {
                    println!("Blocked: {reason}");
                }
                println!("Context: {}", config.blocked_file().display());
            }
            if state.finalize_cycles > 0 {
                println!("Finalize cycles used: {}", state.finalize_cycles);
            }
            println!(
                "Started: {}",
                state.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("Progress: not started"),
    }

    let records = DecisionLog::new(config.decision_log_file())
        .read_all()
        .unwrap_or_default();
    if !records.is_empty() {
        println!();
        println!("Recent activity:");
        let start = records.len().saturating_sub(5);
        for record in &records[start..] {
            println!("  {}", super::decisions::record_line(record));
        }
    }
    println!();
    Ok(())
}
