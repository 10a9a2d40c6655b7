//! Work intake: `conductor objective` and `conductor task`.
//!
//! Both edit the state document directly and therefore need the state lock.
//! `task add` falls back to the signal inbox while a run holds it.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use super::super::{ObjectiveCommands, TaskCommands};
use conductor::config::Config;
use conductor::errors::StateError;
use conductor::state::{PipelineState, StateLock, StateStore};

fn open_store(project_dir: &Path) -> Result<(Config, StateStore)> {
    use conductor::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'conductor init' first.");
    }
    let config = Config::new(project_dir)?;
    let store = config.state_store();
    Ok((config, store))
}

fn load_for_edit(store: &StateStore) -> Result<PipelineState> {
    let state = if store.exists() {
        store.load()?
    } else {
        store.initialize(Utc::now())?
    };
    Ok(state)
}

pub fn cmd_objective(project_dir: &Path, command: ObjectiveCommands) -> Result<()> {
    use conductor::state::{Objective, ObjectiveId, ObjectiveStatus, PriorityTier};

    let (_config, store) = open_store(project_dir)?;

    match command {
        ObjectiveCommands::Add {
            title,
            description,
            tier,
            depends_on,
            status,
        } => {
            let tier: PriorityTier = tier.parse()?;
            let status: ObjectiveStatus = status.parse()?;
            if !matches!(status, ObjectiveStatus::Proposed | ObjectiveStatus::Approved) {
                anyhow::bail!(
                    "New objectives start as 'proposed' or 'approved', not '{}'",
                    status
                );
            }

            let _lock = lock(&store)?;
            let mut state = load_for_edit(&store)?;
            let deps: Vec<ObjectiveId> = depends_on.into_iter().map(ObjectiveId).collect();
            if let Some(unknown) = deps.iter().find(|id| !state.objectives.contains_key(id)) {
                anyhow::bail!("Unknown dependency {}", unknown);
            }

            let now = Utc::now();
            let objective = Objective::new(ObjectiveId(0), title, now)
                .with_description(description)
                .with_tier(tier)
                .with_status(status)
                .with_dependencies(deps);
            let id = state.add_objective(objective);
            state.updated_at = now;
            store.save(&state)?;

            tracing::info!(objective = %id, %tier, %status, "Objective added");
            println!("Added objective {}", id);
        }
        ObjectiveCommands::List => {
            let state = store
                .load()
                .with_context(|| format!("Failed to load {}", store.state_path().display()))?;
            if state.objectives.is_empty() {
                println!("No objectives.");
                return Ok(());
            }
            for objective in state.objectives.values() {
                let deps: Vec<String> =
                    objective.depends_on.iter().map(ToString::to_string).collect();
                println!(
                    "{:<6} {:<10} {:<10} {}{}",
                    objective.id.to_string(),
                    objective.status.to_string(),
                    objective.tier.to_string(),
                    objective.title,
                    if deps.is_empty() {
                        String::new()
                    } else {
                        format!(" (after {})", deps.join(", "))
                    }
                );
            }
        }
    }
    Ok(())
}

pub fn cmd_task(project_dir: &Path, command: TaskCommands) -> Result<()> {
    use conductor::orchestrator::Signal;
    use conductor::state::ObjectiveId;

    let (config, store) = open_store(project_dir)?;

    match command {
        TaskCommands::Add {
            description,
            target,
            objective,
            priority,
        } => {
            let signal = Signal::AddTask {
                description,
                target,
                objective_id: objective.map(ObjectiveId),
                priority,
            };

            match store.lock() {
                Ok(_lock) => {
                    let mut state = load_for_edit(&store)?;
                    let now = Utc::now();
                    let message = signal.apply(&mut state, &config.toml.priority_bands, now)?;
                    state.updated_at = now;
                    store.save(&state)?;
                    println!("{}", capitalize(&message));
                }
                Err(StateError::Locked { .. }) => {
                    let path = send(&config, &signal)?;
                    println!(
                        "A run is in progress; queued the task as signal {}",
                        path.display()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

pub(super) fn send(config: &Config, signal: &conductor::orchestrator::Signal) -> Result<std::path::PathBuf> {
    use conductor::orchestrator::SignalInbox;

    let inbox = SignalInbox::new(config.signals_dir());
    let path = inbox.send(signal)?;
    tracing::debug!(path = %path.display(), "Signal queued");
    Ok(path)
}

fn lock(store: &StateStore) -> Result<StateLock> {
    store
        .lock()
        .context("A conductor run holds the state lock; use 'conductor signal' while it runs")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
