use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Autonomous development pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a conductor project (.conductor/ layout, config, state)
    Init,
    /// Run the execution loop
    Run {
        /// Stop after this many iterations (overrides config and env)
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Concurrency cap for worker waves (overrides config and env)
        #[arg(long)]
        max_workers: Option<usize>,

        /// Back up the current state and start over
        #[arg(long)]
        fresh: bool,
    },
    /// Show pipeline progress
    Status,
    /// Show per-objective health and the dimensional landscape
    Health,
    /// Back up and clear the pipeline state
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage objectives
    Objective {
        #[command(subcommand)]
        command: ObjectiveCommands,
    },
    /// Manage tactical tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Send a signal to a running (or the next) execution loop
    Signal {
        #[command(subcommand)]
        command: SignalCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default conductor.toml
    Init,
}

#[derive(Subcommand, Clone)]
pub enum ObjectiveCommands {
    /// Add an objective
    Add {
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// primary, secondary or tertiary
        #[arg(long, default_value = "secondary")]
        tier: String,

        /// Objective ids this one depends on (comma-separated, e.g. 1,2)
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<u32>,

        /// Initial status (proposed or approved)
        #[arg(long, default_value = "approved")]
        status: String,
    },
    /// List objectives
    List,
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// Add a task, optionally under an objective
    Add {
        description: String,

        /// File or path the task works on
        #[arg(short, long, default_value = "")]
        target: String,

        #[arg(long)]
        objective: Option<u32>,

        /// Requested priority; clamped into the band for the task's kind
        #[arg(long)]
        priority: Option<u32>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SignalCommands {
    /// Promote an objective to primary with an immediate deadline
    Urgent { objective: u32 },
    /// Block an objective
    Block {
        objective: u32,

        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Release a blocked objective
    Unblock { objective: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Only `run` writes the JSON log file; other commands are short-lived.
    let log_dir = match &cli.command {
        Commands::Run { .. } if conductor::init::is_initialized(&project_dir) => {
            Some(conductor::init::get_conductor_dir(&project_dir).join("logs"))
        }
        _ => None,
    };
    let _guard = conductor::logging::init(cli.verbose, log_dir.as_deref())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            max_iterations,
            max_workers,
            fresh,
        } => {
            cmd::cmd_run(&cli, &project_dir, *max_iterations, *max_workers, *fresh).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Health => cmd::cmd_health(&project_dir)?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, &cli, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Objective { command } => cmd::cmd_objective(&project_dir, command.clone())?,
        Commands::Task { command } => cmd::cmd_task(&project_dir, command.clone())?,
        Commands::Signal { command } => cmd::cmd_signal(&project_dir, command.clone())?,
    }

    Ok(())
}
