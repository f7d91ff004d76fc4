//! Configuration: `.foreman/foreman.toml` plus CLI overrides.
//!
//! The TOML file carries durable project settings; `Config` resolves them
//! together with command-line arguments into the paths and knobs the
//! orchestrator uses at runtime.
//!
//! # Configuration File Format
//!
//! ```toml
//! [worker]
//! cmd = "claude"
//! skip_permissions = true
//! extra_flags = []
//! timeout_secs = 1200
//!
//! [policy]
//! max_attempts = 3
//! max_escalation_rounds = 2
//! max_finalize_cycles = 3
//! split_check = true
//!
//! [review]
//! max_deletions = 2000
//! deletion_ratio = 10.0
//! max_files_deleted = 20
//! ```

use crate::tracker::ChangeLimits;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Worker command (default: "claude", overridable via FOREMAN_WORKER_CMD)
    #[serde(default)]
    pub cmd: Option<String>,
    /// Whether to pass the skip-permissions flag
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    /// Flags appended after the standard set
    #[serde(default)]
    pub extra_flags: Vec<String>,
    /// Per-session wall-clock limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_skip_permissions() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    1200
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            cmd: None,
            skip_permissions: default_skip_permissions(),
            extra_flags: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Fix-loop and escalation budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    /// Review/fix cycles per task before escalating
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Escalation sessions per task before giving up
    #[serde(default = "default_max_escalation_rounds")]
    pub max_escalation_rounds: u32,
    /// Finalize re-checks before escalating the plan itself
    #[serde(default = "default_max_finalize_cycles")]
    pub max_finalize_cycles: u32,
    /// Ask whether large tasks should be split before implementing
    #[serde(default = "default_split_check")]
    pub split_check: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_escalation_rounds() -> u32 {
    2
}

fn default_max_finalize_cycles() -> u32 {
    3
}

fn default_split_check() -> bool {
    true
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_escalation_rounds: default_max_escalation_rounds(),
            max_finalize_cycles: default_max_finalize_cycles(),
            split_check: default_split_check(),
        }
    }
}

/// The complete foreman.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForemanToml {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub review: ChangeLimits,
}

impl ForemanToml {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse foreman.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load from `<foreman_dir>/foreman.toml`, or defaults when absent.
    pub fn load_or_default(foreman_dir: &Path) -> Result<Self> {
        let config_path = foreman_dir.join("foreman.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize foreman.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Worker command (file, then FOREMAN_WORKER_CMD, then "claude").
    pub fn worker_cmd(&self) -> String {
        self.worker
            .cmd
            .clone()
            .or_else(|| std::env::var("FOREMAN_WORKER_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Flag list for worker invocations.
    pub fn worker_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.worker.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags.extend(self.worker.extra_flags.iter().cloned());
        flags
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub foreman_dir: PathBuf,
    pub log_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub worker_cmd: String,
    pub worker_flags: Vec<String>,
    pub worker_timeout: Duration,
    pub policy: PolicySection,
    pub review: ChangeLimits,
    pub verbose: bool,
    pub assume_yes: bool,
}

impl Config {
    pub fn load(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let foreman_dir = project_dir.join(".foreman");
        let toml = ForemanToml::load_or_default(&foreman_dir)?;

        Ok(Self {
            log_dir: foreman_dir.join("logs"),
            prompts_dir: foreman_dir.join("prompts"),
            worker_cmd: toml.worker_cmd(),
            worker_flags: toml.worker_flags(),
            worker_timeout: Duration::from_secs(toml.worker.timeout_secs),
            policy: toml.policy,
            review: toml.review,
            project_dir,
            foreman_dir,
            verbose: false,
            assume_yes: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, assume_yes: bool) -> Result<Self> {
        let mut config = Self::load(project_dir)?;
        config.verbose = verbose;
        config.assume_yes = assume_yes;
        Ok(config)
    }

    pub fn state_file(&self) -> PathBuf {
        self.foreman_dir.join("state.json")
    }

    pub fn blocked_file(&self) -> PathBuf {
        self.foreman_dir.join("blocked.md")
    }

    pub fn decision_log_file(&self) -> PathBuf {
        self.foreman_dir.join("decisions.jsonl")
    }

    pub fn plan_cache_file(&self) -> PathBuf {
        self.foreman_dir.join("plan-cache.json")
    }

    pub fn followups_file(&self) -> PathBuf {
        self.foreman_dir.join("followups.md")
    }

    pub fn log_file(&self) -> PathBuf {
        self.foreman_dir.join("foreman.log")
    }

    /// Create the working directories this run will write into.
    ///
    /// Also drops a `.gitignore` into the state directory so the stage-all
    /// committer never lands orchestrator state in the project's history.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.foreman_dir)
            .with_context(|| format!("Failed to create {}", self.foreman_dir.display()))?;
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("Failed to create {}", self.log_dir.display()))?;
        let gitignore = self.foreman_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n")
                .with_context(|| format!("Failed to create {}", gitignore.display()))?;
        }
        Ok(())
    }
}
