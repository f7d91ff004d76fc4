//! Remove saved run artifacts — `foreman clean`.

use anyhow::Result;
use foreman::config::Config;
use std::path::{Path, PathBuf};

pub fn cmd_clean(project_dir: &Path, assume_yes: bool) -> Result<()> {
    use dialoguer::Confirm;

    let config = Config::with_cli_args(project_dir.to_path_buf(), false, assume_yes)?;
    let existing: Vec<PathBuf> = clean_targets(&config)
        .into_iter()
        .filter(|p| p.exists())
        .collect();
    let has_transcripts = config.log_dir.is_dir();

    if existing.is_empty() && !has_transcripts {
        println!("Nothing to clean");
        return Ok(());
    }

    if !assume_yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Remove {} saved file(s) and session transcripts under {}?",
                existing.len(),
                config.foreman_dir.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Clean cancelled");
            return Ok(());
        }
    }

    for path in &existing {
        std::fs::remove_file(path).ok();
    }
    if has_transcripts {
        std::fs::remove_dir_all(&config.log_dir).ok();
    }
    println!("Removed {} file(s)", existing.len());
    Ok(())
}

/// File targets `clean` may remove; the transcript directory is handled
/// separately. The plan document and the follow-ups list are working
/// artifacts for humans and stay.
pub fn clean_targets(config: &Config) -> Vec<PathBuf> {
    vec![
        config.state_file(),
        config.blocked_file(),
        config.plan_cache_file(),
        config.decision_log_file(),
        config.log_file(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── clean_targets ─────────────────────────────────────────────────────────

    #[test]
    fn clean_targets_spare_the_followups_list() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = Config::with_cli_args(tmp.path().to_path_buf(), false, true).unwrap();
        let targets = clean_targets(&config);
        assert!(targets.iter().any(|p| p.ends_with("state.json")));
        assert!(targets.iter().any(|p| p.ends_with("decisions.jsonl")));
        assert!(!targets.iter().any(|p| p.ends_with("followups.md")));
    }

    // ── cmd_clean ─────────────────────────────────────────────────────────────

    #[test]
    fn cmd_clean_removes_saved_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = Config::with_cli_args(tmp.path().to_path_buf(), false, true).unwrap();
        config.ensure_dirs().unwrap();
        std::fs::write(config.state_file(), "{}").unwrap();
        std::fs::write(config.decision_log_file(), "").unwrap();
        std::fs::write(config.log_dir.join("001-implement-prompt.md"), "x").unwrap();

        cmd_clean(tmp.path(), true).unwrap();

        assert!(!config.state_file().exists());
        assert!(!config.decision_log_file().exists());
        assert!(!config.log_dir.exists());
    }

    #[test]
    fn cmd_clean_with_nothing_saved_reports_cleanly() {
        let tmp = tempfile::tempdir().expect("tempdir");
        cmd_clean(tmp.path(), true).unwrap();
    }
}
