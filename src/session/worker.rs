//! Worker invocation over an external CLI.
//!
//! Spawns the configured worker command, writes a role/argument envelope to
//! its stdin, and streams its stdout as line-delimited JSON events. Assistant
//! text accumulates; a final result event replaces the accumulation when
//! present; lines that are not valid events pass through as plain text. Each
//! invocation leaves a prompt and output transcript in the log directory.

use super::{Role, SessionArgs, SessionOutput, WorkerSession};
use crate::config::Config;
use crate::errors::SessionError;
use crate::stream::{ContentBlock, StreamEvent, describe_tool_use, tool_emoji};
use crate::ui::OrchestratorUI;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct CliWorker {
    cmd: String,
    flags: Vec<String>,
    project_dir: PathBuf,
    log_dir: PathBuf,
    templates_dir: Option<PathBuf>,
    timeout: Duration,
    ui: Option<Arc<OrchestratorUI>>,
    seq: AtomicU64,
}

impl CliWorker {
    pub fn new(
        cmd: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            flags: Vec::new(),
            project_dir: project_dir.into(),
            log_dir: log_dir.into(),
            templates_dir: None,
            timeout: Duration::from_secs(1200),
            ui: None,
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.worker_cmd.clone(),
            config.project_dir.clone(),
            config.log_dir.clone(),
        )
        .with_flags(config.worker_flags.clone())
        .with_timeout(config.worker_timeout)
        .with_templates_dir(config.prompts_dir.clone())
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Marshal role and arguments into the worker's input envelope.
    ///
    /// A per-role template at `<templates>/<role>.md` wins when present, with
    /// `{key}` placeholders replaced by argument values; otherwise a generic
    /// sectioned envelope is generated.
    fn build_envelope(&self, role: Role, args: &SessionArgs) -> String {
        if let Some(ref dir) = self.templates_dir {
            let template = dir.join(format!("{}.md", role.as_str()));
            if let Ok(body) = std::fs::read_to_string(&template) {
                return substitute(&body, args);
            }
        }
        let mut envelope = format!("## ROLE\n{}\n", role);
        for (key, value) in args.iter() {
            envelope.push_str(&format!("\n## {}\n{}\n", key.to_uppercase(), value));
        }
        envelope
    }

    fn transcript_paths(&self, role: Role) -> (PathBuf, PathBuf) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (
            self.log_dir.join(format!("{:03}-{}-prompt.md", seq, role)),
            self.log_dir.join(format!("{:03}-{}-output.log", seq, role)),
        )
    }
}

fn substitute(template: &str, args: &SessionArgs) -> String {
    let mut out = template.to_string();
    for (key, value) in args.iter() {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

fn write_transcript(path: &Path, content: &str) -> Result<(), SessionError> {
    std::fs::write(path, content).map_err(|source| SessionError::TranscriptWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl WorkerSession for CliWorker {
    async fn invoke(&self, role: Role, args: &SessionArgs) -> Result<SessionOutput, SessionError> {
        let envelope = self.build_envelope(role, args);
        let (prompt_file, output_file) = self.transcript_paths(role);
        write_transcript(&prompt_file, &envelope)?;

        let start = Instant::now();
        let mut cmd = Command::new(&self.cmd);
        for flag in &self.flags {
            cmd.arg(flag);
        }
        debug!(
            target: "worker",
            %role,
            cmd = %self.cmd,
            prompt_chars = envelope.len(),
            "spawning worker session"
        );

        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .current_dir(&self.project_dir)
            .spawn()
            .map_err(|source| SessionError::SpawnFailed {
                cmd: self.cmd.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A worker may exit without draining stdin; a broken pipe here
            // is not a fault.
            match stdin.write_all(envelope.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(SessionError::StdinWriteFailed(e));
                }
                _ => {}
            }
            let _ = stdin.shutdown().await;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::StreamReadFailed(std::io::Error::other("no stdout")))?;

        // Elapsed-time ticker for the progress display
        let elapsed_task = self.ui.clone().map(|ui| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(10));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    ui.update_elapsed(start.elapsed());
                }
            })
        });

        let drive = async {
            let mut reader = BufReader::new(stdout).lines();
            let mut accumulated = String::new();
            let mut final_result: Option<String> = None;
            let mut is_error = false;

            while let Some(line) = reader
                .next_line()
                .await
                .map_err(SessionError::StreamReadFailed)?
            {
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamEvent>(&line) {
                    Ok(StreamEvent::Assistant { message }) => {
                        for content in message.content {
                            match content {
                                ContentBlock::ToolUse { name, input, .. } => {
                                    if let Some(ref ui) = self.ui {
                                        ui.show_tool_use(
                                            tool_emoji(&name),
                                            &describe_tool_use(&name, &input),
                                        );
                                    }
                                }
                                ContentBlock::Text { text } => {
                                    accumulated.push_str(&text);
                                    accumulated.push('\n');
                                }
                            }
                        }
                    }
                    Ok(StreamEvent::Result {
                        result,
                        is_error: err,
                        ..
                    }) => {
                        final_result = result;
                        is_error = err;
                    }
                    Ok(StreamEvent::User {} | StreamEvent::System { .. }) => {}
                    Err(_) => {
                        // Not an event; keep it as plain output
                        accumulated.push_str(&line);
                        accumulated.push('\n');
                    }
                }
            }

            let status = child
                .wait()
                .await
                .map_err(SessionError::StreamReadFailed)?;
            Ok::<_, SessionError>((accumulated, final_result, is_error, status))
        };

        let outcome = tokio::time::timeout(self.timeout, drive).await;
        if let Some(task) = elapsed_task {
            task.abort();
        }

        let (accumulated, final_result, is_error, status) = match outcome {
            Ok(res) => res?,
            Err(_) => {
                child.start_kill().ok();
                warn!(
                    target: "worker",
                    %role,
                    limit_secs = self.timeout.as_secs(),
                    "worker session timed out"
                );
                return Err(SessionError::Timeout {
                    limit_secs: self.timeout.as_secs(),
                });
            }
        };

        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);
        let text = final_result.unwrap_or(accumulated);
        write_transcript(&output_file, &text)?;

        if is_error {
            warn!(target: "worker", %role, "worker reported an error result");
        }
        info!(
            target: "worker",
            %role,
            exit_code,
            duration_secs = duration.as_secs_f64(),
            output_chars = text.len(),
            "session finished"
        );

        Ok(SessionOutput {
            text,
            exit_code,
            reported_error: is_error,
            duration,
            transcript: Some(output_file),
            prompt_chars: envelope.len(),
        })
    }
}
