use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Plan-driven development orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive every pending task through implement, review, and commit
    Run {
        /// Plan document (defaults to plan.md in the project directory)
        plan: Option<PathBuf>,

        /// Discard saved progress and blocked context before starting
        #[arg(long)]
        force: bool,

        /// Pause after each completed task
        #[arg(long)]
        step: bool,
    },
    /// Show where the plan stands
    Status,
    /// Show the decision log
    Decisions {
        /// Only records for this task
        #[arg(short, long)]
        task: Option<String>,

        /// Show at most this many records
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Remove saved progress, caches, and logs
    Clean {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { plan, force, step } => {
            cmd::run_plan(&cli, project_dir, plan.clone(), *force, *step).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Decisions { task, limit } => {
            cmd::cmd_decisions(&project_dir, task.as_deref(), *limit)?
        }
        Commands::Clean { force } => cmd::cmd_clean(&project_dir, cli.yes || *force)?,
    }

    Ok(())
}
