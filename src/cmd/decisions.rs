//! Decision log viewer — `foreman decisions`.

use anyhow::Result;
use foreman::decisions::LogRecord;
use std::path::Path;

pub fn cmd_decisions(project_dir: &Path, task: Option<&str>, limit: usize) -> Result<()> {
    use foreman::config::Config;
    use foreman::decisions::DecisionLog;

    let config = Config::with_cli_args(project_dir.to_path_buf(), false, false)?;
    let records = DecisionLog::new(config.decision_log_file()).read_all()?;

    let matching: Vec<&LogRecord> = records
        .iter()
        .filter(|r| task.is_none_or(|t| r.task_id() == t))
        .collect();

    if matching.is_empty() {
        match task {
            Some(t) => println!("No records for task {t}"),
            None => println!("No records yet. Start with 'foreman run'."),
        }
        return Ok(());
    }

    let start = matching.len().saturating_sub(limit);
    for record in &matching[start..] {
        println!("{}", record_line(record));
    }
    if start > 0 {
        println!();
        println!("({start} earlier record(s) not shown; raise --limit to see them)");
    }
    Ok(())
}

/// One record, one line. Shared with `status` for its activity tail.
pub fn record_line(record: &LogRecord) -> String {
    let ts = record.timestamp().format("%Y-%m-%d %H:%M:%S");
    match record {
        LogRecord::Session {
            task_id,
            role,
            signal,
            detail,
            ..
        } => {
            let mut line = format!("{ts}  [{task_id}] {role} -> {signal}");
            let head = first_line(detail);
            if !head.is_empty() {
                line.push_str(&format!(": {head}"));
            }
            line
        }
        LogRecord::Decision {
            task_id,
            topic,
            decision,
            ..
        } => format!("{ts}  [{task_id}] decision on {topic}: {decision}"),
        LogRecord::Commit {
            task_id,
            sha,
            files,
            message,
            ..
        } => format!(
            "{ts}  [{task_id}] commit {} ({files} file(s)): {message}",
            short_sha(sha)
        ),
        LogRecord::Fault {
            task_id,
            role,
            error,
            ..
        } => format!("{ts}  [{task_id}] {role} fault: {}", first_line(error)),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman::session::Role;
    use std::collections::BTreeMap;

    // ── record_line ───────────────────────────────────────────────────────────

    #[test]
    fn record_line_session_shows_role_and_signal() {
        let record = LogRecord::Session {
            task_id: "3".into(),
            role: Role::Review,
            args: BTreeMap::new(),
            signal: "issues".into(),
            detail: "error paths untested\nsecond line".into(),
            transcript: None,
            prompt_chars: 512,
            output_chars: 40,
            exit_code: 0,
            timestamp: Utc::now(),
        };
        let line = record_line(&record);
        assert!(line.contains("[3]"), "missing task id: {line}");
        assert!(line.contains("review -> issues"), "missing outcome: {line}");
        assert!(line.contains("error paths untested"), "missing detail: {line}");
        assert!(!line.contains("second line"), "detail not truncated: {line}");
    }

    #[test]
    fn record_line_commit_shortens_the_sha() {
        let record = LogRecord::Commit {
            task_id: "1".into(),
            sha: "a1b2c3d4e5f6a7b8".into(),
            files: 3,
            message: "Task 1: Add config loader".into(),
            timestamp: Utc::now(),
        };
        let line = record_line(&record);
        assert!(line.contains("commit a1b2c3d4 "), "sha not shortened: {line}");
        assert!(line.contains("3 file(s)"), "missing file count: {line}");
    }

    #[test]
    fn record_line_fault_keeps_first_error_line() {
        let record = LogRecord::Fault {
            task_id: "2".into(),
            role: Role::Implement,
            error: "worker exited with status 137\ndetails follow".into(),
            timestamp: Utc::now(),
        };
        let line = record_line(&record);
        assert!(line.contains("implement fault"), "missing role: {line}");
        assert!(line.contains("status 137"), "missing error: {line}");
        assert!(!line.contains("details follow"), "error not truncated: {line}");
    }

    #[test]
    fn short_sha_handles_short_input() {
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(short_sha("a1b2c3d4e5"), "a1b2c3d4");
    }
}
