use crate::tracker::ChangeStats;
use crate::ui::icons::{BLOCKER, CHECK, CROSS, FOLDER, PIVOT, REVIEW, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Terminal UI for the orchestrator, rendered via `indicatif` progress bars.
///
/// Three bars are stacked vertically:
/// - Task bar: tracks how many plan tasks have finished
/// - Session bar: spinner with the current worker session and live status
/// - File bar: running tally of working-tree changes for the current task
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally.
pub struct OrchestratorUI {
    multi: MultiProgress,
    task_bar: ProgressBar,
    session_bar: ProgressBar,
    file_bar: ProgressBar,
    verbose: bool,
    session_label: Mutex<String>,
}

impl OrchestratorUI {
    /// Create the UI and add all three progress bars to the multiplex
    /// renderer. Call once at startup, before `start_task`.
    pub fn new(total_tasks: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let task_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let task_bar = multi.add(ProgressBar::new(total_tasks));
        task_bar.set_style(task_style);
        task_bar.set_prefix("Tasks");

        let session_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let session_bar = multi.add(ProgressBar::new_spinner());
        session_bar.set_style(session_style);
        session_bar.set_prefix(" Work");

        let file_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");

        let file_bar = multi.add(ProgressBar::new(0));
        file_bar.set_style(file_style);
        file_bar.set_prefix("Files");

        Self {
            multi,
            task_bar,
            session_bar,
            file_bar,
            verbose,
            session_label: Mutex::new(String::new()),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails. Keeps blockers and outcomes visible even when the
    /// terminal is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn label(&self) -> String {
        self.session_label
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Print a full-width cyan separator line.
    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Print the header block before a run begins.
    pub fn print_plan_header(&self, plan: &str, summary: &str) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Plan: {}",
            style("▶").green().bold(),
            style(plan).yellow().bold()
        ));
        self.print_separator();
        self.print_line(format!("{}  {}", style("Progress:").dim(), summary));
        self.print_line("");
    }

    /// Print a banner for a whole-plan pass (polish, finalize).
    pub fn print_pass_header(&self, name: &str, detail: &str) {
        self.print_line("");
        self.print_line(format!(
            "{} {} {}",
            REVIEW,
            style(name).cyan().bold(),
            style(detail).dim()
        ));
        self.print_line("");
    }

    /// Update the task bar to the task about to execute. Does **not**
    /// advance the counter; `task_complete` does that.
    pub fn start_task(&self, id: &str, title: &str) {
        self.task_bar
            .set_message(format!("{}: {}", style(id).yellow(), title));
        self.file_bar.set_message("");
    }

    /// Record the session label and start the spinner animation.
    pub fn start_session(&self, role: &str, attempt: u32, max: u32) {
        let label = if max > 1 {
            format!("{} {}/{}", role, attempt, max)
        } else {
            role.to_string()
        };
        if let Ok(mut slot) = self.session_label.lock() {
            *slot = label.clone();
        }
        self.session_bar.set_message(format!(
            "{} {}",
            style(label).cyan(),
            style("(starting...)").dim()
        ));
        self.session_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Update the session spinner with a short status string.
    pub fn log_step(&self, msg: &str) {
        self.session_bar.set_message(format!(
            "{} {}",
            style(self.label()).cyan(),
            style(format!("({})", msg)).dim()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    /// Refresh the session spinner with wall-clock elapsed time. Intended to
    /// be called from a periodic timer task.
    pub fn update_elapsed(&self, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let time_str = if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        };
        self.session_bar.set_message(format!(
            "{} {}",
            style(self.label()).cyan(),
            style(format!("({})", time_str)).dim()
        ));
    }

    /// Show a tool use event (Read, Write, Edit, Bash, etc.)
    pub fn show_tool_use(&self, emoji: &str, description: &str) {
        self.session_bar.set_message(format!(
            "{} {} {}",
            style(self.label()).cyan(),
            emoji,
            style(description).yellow()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", emoji, style(description).yellow()));
        }
    }

    /// Finish the session spinner with the signal the worker produced.
    pub fn session_done(&self, signal: &str) {
        self.session_bar
            .finish_with_message(format!("{} {} → {}", CHECK, self.label(), signal));
    }

    /// Finish the session spinner with an error message.
    pub fn session_failed(&self, msg: &str) {
        self.session_bar
            .finish_with_message(format!("{} {} failed: {}", CROSS, self.label(), msg));
    }

    /// Print the signal a session produced, with a one-line detail snippet.
    pub fn show_signal(&self, label: &str, detail: &str) {
        let snippet = detail.lines().next().unwrap_or("");
        if snippet.is_empty() {
            self.print_line(format!("    {}", style(label).cyan().bold()));
        } else {
            self.print_line(format!(
                "    {} {}",
                style(label).cyan().bold(),
                style(snippet).dim()
            ));
        }
    }

    /// Overwrite the file-change bar with aggregate diff statistics.
    pub fn update_changes(&self, stats: &ChangeStats) {
        let modified = stats
            .files_changed
            .saturating_sub(stats.files_added + stats.files_deleted);
        self.file_bar.set_message(format!(
            "{} +{} ~{} -{} | {} +{} -{}",
            FOLDER,
            style(stats.files_added).green(),
            style(modified).yellow(),
            style(stats.files_deleted).red(),
            style("lines:").dim(),
            style(stats.insertions).green(),
            style(stats.deletions).red(),
        ));
    }

    /// Increment the task progress bar and print a completion line.
    pub fn task_complete(&self, id: &str, sha: Option<&str>) {
        self.task_bar.inc(1);
        match sha {
            Some(sha) => self.print_line(format!(
                "{} Task {} committed ({})",
                CHECK,
                style(id).green().bold(),
                style(&sha[..sha.len().min(8)]).dim()
            )),
            None => self.print_line(format!(
                "{} Task {} complete",
                CHECK,
                style(id).green().bold()
            )),
        }
    }

    /// Count an already-done task without celebration.
    pub fn task_skipped(&self, id: &str) {
        self.task_bar.inc(1);
        if self.verbose {
            self.print_line(format!(
                "    {} task {} already complete",
                style("↷").dim(),
                style(id).dim()
            ));
        }
    }

    /// Print a blocked banner without advancing the task bar.
    pub fn task_blocked(&self, id: &str, reason: &str) {
        self.print_line(format!(
            "\n{} Task {} blocked: {}\n",
            BLOCKER,
            style(id).red().bold(),
            reason
        ));
    }

    /// Print an escalation outcome (new plan adopted, or given up).
    pub fn show_escalation(&self, text: &str) {
        self.print_line(format!("    {} {}", PIVOT, style(text).yellow()));
    }

    /// Print the end-of-run banner.
    pub fn plan_complete(&self, summary: &str) {
        self.task_bar.finish();
        self.print_line(format!(
            "\n{} Plan complete: {}\n",
            SPARKLE,
            style(summary).green().bold()
        ));
    }

    /// Print the halt banner when the run cannot continue.
    pub fn plan_halted(&self, reason: &str) {
        self.print_line(format!(
            "\n{} Run halted: {}\n",
            CROSS,
            style(reason).red().bold()
        ));
    }
}
