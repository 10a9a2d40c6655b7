//! Pipeline status, health, and reset commands.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::Cli;
use conductor::config::Config;
use conductor::state::PipelineState;

/// `None` when the project has no state yet.
fn load_state(config: &Config) -> Result<Option<PipelineState>> {
    let store = config.state_store();
    if !store.exists() {
        return Ok(None);
    }
    let state = store
        .load()
        .with_context(|| format!("Failed to load {}", store.state_path().display()))?;
    Ok(Some(state))
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use conductor::init::is_initialized;
    use conductor::phase::Phase;
    use conductor::state::StateStore;
    use console::style;

    println!();
    println!("Conductor Pipeline Status");
    println!("=========================");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'conductor init' to initialize the project.");
        println!();
        return Ok(());
    }

    let config = Config::new(project_dir)?;
    let Some(state) = load_state(&config)? else {
        println!("Project: Initialized");
        println!("State:   Missing (run 'conductor init' to recreate it)");
        println!();
        return Ok(());
    };

    let summary = StateStore::summary(&state);
    println!("Project:    Initialized");
    println!("Run id:     {}", summary.run_id);
    println!("Phase:      {}", summary.phase);
    println!("Iteration:  {}", summary.iteration);
    println!("Completion: {:.1}%", summary.completion_percentage);
    println!(
        "Updated:    {}",
        summary.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let store = config.state_store();
    println!(
        "Audit:      {} snapshots, {} backups",
        store.history_snapshots().len(),
        store.list_backups().len()
    );
    println!();
    println!(
        "Objectives: {} total, {} completed",
        summary.objectives_total, summary.objectives_completed
    );
    if let Some(active) = &summary.active_objective {
        println!("  Active: {}", active);
    }
    println!(
        "Tasks:      {} total, {} open, {} completed, {} failed",
        summary.tasks_total, summary.tasks_open, summary.tasks_completed, summary.tasks_failed
    );

    if !state.objectives.is_empty() {
        println!();
        println!("{:<6} {:<11} {:<10} {:>7}  Title", "Id", "Status", "Tier", "Done");
        println!("{:<6} {:<11} {:<10} {:>7}  -----", "------", "-----------", "----------", "-------");
        for objective in state.objectives.values() {
            println!(
                "{:<6} {:<11} {:<10} {:>6.1}%  {}",
                objective.id.to_string(),
                objective.status.to_string(),
                objective.tier.to_string(),
                objective.completion_percentage,
                objective.title
            );
        }
    }

    println!();
    if state.phase_history.is_empty() {
        println!("Execution: Not started");
        println!();
        println!("Run 'conductor run' to start execution.");
    } else {
        println!("Recent activity:");
        for record in state.phase_history.iter().rev().take(5) {
            let outcome = if record.success {
                style("ok").green()
            } else {
                style("failed").red()
            };
            let substituted = record
                .substituted_for
                .map(|p| format!(" (instead of {})", p))
                .unwrap_or_default();
            println!(
                "  #{:<4} {:<16} {:<6} {}{}",
                record.iteration,
                record.phase.to_string(),
                outcome,
                record.message,
                substituted
            );
        }

        let trends: Vec<String> = Phase::ALL
            .iter()
            .filter_map(|phase| {
                let history = &state.phase_history;
                let rate = history.recent_success_rate(*phase, TREND_WINDOW)?;
                let trend = if history.is_oscillating(*phase) {
                    "oscillating"
                } else if history.is_improving(*phase) {
                    "improving"
                } else if history.is_degrading(*phase) {
                    "degrading"
                } else {
                    "steady"
                };
                Some(format!(
                    "  {:<16} {:>5.0}% ok, {}",
                    phase.to_string(),
                    rate * 100.0,
                    trend
                ))
            })
            .collect();
        println!();
        println!("Phase trends (last {} runs each):", TREND_WINDOW);
        for line in trends {
            println!("{}", line);
        }
    }
    println!();
    Ok(())
}

const TREND_WINDOW: usize = 10;

pub fn cmd_health(project_dir: &Path) -> Result<()> {
    use chrono::Utc;
    use conductor::scheduler::space::{
        DEFAULT_CLUSTER_DISTANCE, Direction, dominant_dimensions, predict_position, similarity,
        trajectory, weak_dimensions,
    };
    use conductor::scheduler::{
        DimensionalSpace, ObjectiveHealthStatus, OverallHealth, analyze_health, objective_health,
    };
    use console::style;

    let config = Config::new(project_dir)?;
    let Some(mut state) = load_state(&config)? else {
        println!("No pipeline state found. Run 'conductor init' first.");
        return Ok(());
    };
    if state.objectives.is_empty() {
        println!("No objectives yet. Add one with 'conductor objective add <title>'.");
        return Ok(());
    }
    // Read-only view: refresh the derived scores in memory, never save.
    state.update_all_progress(Utc::now());

    let space = DimensionalSpace::from_state(&state);

    println!();
    println!("Objective Health");
    println!("================");
    for objective in state.objectives.values() {
        let report = analyze_health(objective);
        let execution = objective_health(&state, objective);
        let overall = match report.overall {
            OverallHealth::Healthy => style(report.overall.to_string()).green(),
            OverallHealth::AttentionNeeded => style(report.overall.to_string()).yellow(),
            OverallHealth::Degrading | OverallHealth::Critical => {
                style(report.overall.to_string()).red()
            }
        };
        let status = match execution.status {
            ObjectiveHealthStatus::Healthy => style(execution.status.to_string()).green(),
            ObjectiveHealthStatus::Degrading => style(execution.status.to_string()).yellow(),
            ObjectiveHealthStatus::Critical | ObjectiveHealthStatus::Blocked => {
                style(execution.status.to_string()).red()
            }
        };

        println!();
        println!("{} {}", style(objective.id).bold(), objective.title);
        println!("  Profile health:   {}", overall);
        println!("  Execution health: {} ({})", status, execution.recommendation);
        println!(
            "  Complexity {:.2}  Risk {:.2}  Readiness {:.2}",
            report.complexity_score, report.risk_score, report.readiness_score
        );
        let strong = dominant_dimensions(&objective.profile);
        let weak = weak_dimensions(&objective.profile);
        if !strong.is_empty() || !weak.is_empty() {
            println!("  Strong: {}  Weak: {}", list(&strong), list(&weak));
        }
        let moving: Vec<String> = trajectory(&objective.velocity)
            .into_iter()
            .filter(|(_, d)| *d != Direction::Stable)
            .map(|(name, d)| format!("{} {}", name, d))
            .collect();
        if !moving.is_empty() {
            let ahead = predict_position(&objective.profile, &objective.velocity, FORECAST_STEPS);
            println!(
                "  Trend: {} (drift {:.2} over {} snapshots)",
                moving.join(", "),
                1.0 - similarity(&objective.profile, &ahead),
                FORECAST_STEPS
            );
        }
        if let Some((neighbor, d)) = space.nearest_neighbors(objective.id, 1).first() {
            let adjacent = space.adjacent(objective.id).contains(neighbor);
            println!(
                "  Nearest: {} at {:.2}{}",
                neighbor,
                d,
                if adjacent { " (adjacent)" } else { "" }
            );
        }
        for concern in &report.concerns {
            println!("  - {}: {}", concern.message, concern.recommendation);
        }
    }
    println!();
    println!("Dimensional Landscape ({} objectives)", space.len());
    println!("=====================");
    println!("{:<12} {:>6} {:>6} {:>6} {:>6}", "Dimension", "Mean", "Min", "Max", "Std");
    for (dimension, stats) in space.statistics() {
        println!(
            "{:<12} {:>6.2} {:>6.2} {:>6.2} {:>6.2}",
            dimension, stats.mean, stats.min, stats.max, stats.std
        );
    }
    let clusters = space.clusters(DEFAULT_CLUSTER_DISTANCE);
    if clusters.len() < space.len() {
        println!();
        println!("Clusters:");
        for cluster in clusters.iter().filter(|c| c.len() > 1) {
            let ids: Vec<String> = cluster.iter().map(ToString::to_string).collect();
            println!("  {}", ids.join(", "));
        }
    }
    println!();
    Ok(())
}

const FORECAST_STEPS: u32 = 3;

fn list(names: &[&str]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, force: bool) -> Result<()> {
    use chrono::Utc;
    use dialoguer::Confirm;

    let config = Config::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    let store = config.state_store();

    if !force && !config.yes {
        let confirm = Confirm::new()
            .with_prompt("This will reset all pipeline progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let _lock = store
        .lock()
        .context("A conductor run holds the state lock; stop it before resetting")?;
    config.ensure_directories()?;
    if let Some(backup) = store.backup()? {
        println!("Backed up state to {}", backup.display());
    }
    store.initialize(Utc::now())?;

    println!("Reset complete");
    Ok(())
}
