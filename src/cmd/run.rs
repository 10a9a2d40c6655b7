//! The execution loop: `conductor run`.

use anyhow::{Context as _, Result};
use std::path::Path;

use super::super::Cli;

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    use conductor::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'conductor init' first.");
    }
    Ok(())
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    max_iterations: Option<u64>,
    max_workers: Option<usize>,
    fresh: bool,
) -> Result<()> {
    use chrono::Utc;
    use conductor::config::Config;
    use conductor::orchestrator::{Context, ExecutionLoop, RunOutcome};
    use console::style;

    check_run_prerequisites(project_dir)?;

    let config = Config::with_cli_args(project_dir, cli.verbose, cli.yes)?
        .with_max_iterations(max_iterations)
        .with_max_workers(max_workers);
    config.ensure_directories()?;
    for warning in config.validate() {
        println!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let (tx, rx) = tokio::sync::mpsc::channel(EVENT_BUFFER);
    let progress = tokio::spawn(print_progress(rx, config.verbose));
    let ctx = Context::new(config).with_plan_events(tx);
    let _lock = ctx
        .store
        .lock()
        .context("Another conductor run holds the state lock")?;

    if fresh {
        if let Some(backup) = ctx.store.backup()? {
            println!("Backed up previous state to {}", backup.display());
        }
        ctx.store.initialize(Utc::now())?;
        println!("Started a fresh pipeline state");
    }

    println!(
        "{} (max {} iterations, {} workers)",
        style("Conductor run starting").bold(),
        ctx.config.max_iterations(),
        ctx.config.max_workers()
    );

    let mut pipeline = ExecutionLoop::new(&ctx);
    let result = pipeline.run().await;
    // Closing the channel lets the printer drain and exit.
    drop(pipeline);
    drop(ctx);
    progress.await.ok();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "Execution loop stopped");
            return Err(e).context("Execution loop stopped");
        }
    };

    println!();
    match report.outcome {
        RunOutcome::Completed => println!("{}", style("All work complete").green().bold()),
        RunOutcome::IterationLimit => println!(
            "{} Run 'conductor run' again to resume.",
            style("Iteration limit reached.").yellow().bold()
        ),
    }
    println!("  Iterations this run: {}", report.iterations);
    println!("  Current phase:       {}", report.phase);
    println!("  Completion:          {:.1}%", report.completion_percentage);
    println!();
    Ok(())
}

const EVENT_BUFFER: usize = 64;

/// Wave progress on stdout. Task-level lines only with `--verbose`.
async fn print_progress(
    mut rx: tokio::sync::mpsc::Receiver<conductor::waves::PlanEvent>,
    verbose: bool,
) {
    use conductor::waves::PlanEvent;
    use console::style;

    while let Some(event) = rx.recv().await {
        match event {
            PlanEvent::WaveStarted { wave, tasks } => {
                println!("  {} wave {}: {}", style("▶").cyan(), wave, tasks.join(", "));
            }
            PlanEvent::TaskStarted {
                task,
                worker,
                attempt,
                ..
            } if verbose => {
                println!("    {} on {} (attempt {})", task, worker, attempt);
            }
            PlanEvent::TaskCompleted {
                task,
                status,
                duration,
            } if verbose => {
                println!("    {} {} in {:.1}s", task, status, duration.as_secs_f64());
            }
            PlanEvent::TaskBlocked {
                task, blocked_by, ..
            } => {
                println!(
                    "    {} {} blocked by {}",
                    style("✗").red(),
                    task,
                    blocked_by.join(", ")
                );
            }
            PlanEvent::WaveCompleted {
                wave,
                succeeded,
                failed,
                blocked,
            } => {
                let mark = if failed + blocked == 0 {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                println!(
                    "  {} wave {}: {} ok, {} failed, {} blocked",
                    mark, wave, succeeded, failed, blocked
                );
            }
            _ => {}
        }
    }
}
