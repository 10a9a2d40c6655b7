//! Operator signals: `conductor signal`.

use anyhow::Result;
use std::path::Path;

use super::super::SignalCommands;

pub fn cmd_signal(project_dir: &Path, command: SignalCommands) -> Result<()> {
    use conductor::config::Config;
    use conductor::init::is_initialized;
    use conductor::orchestrator::Signal;
    use conductor::state::ObjectiveId;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'conductor init' first.");
    }
    let config = Config::new(project_dir)?;

    let signal = match command {
        SignalCommands::Urgent { objective } => Signal::UrgentObjective {
            objective_id: ObjectiveId(objective),
        },
        SignalCommands::Block { objective, reason } => Signal::BlockObjective {
            objective_id: ObjectiveId(objective),
            reason,
        },
        SignalCommands::Unblock { objective } => Signal::UnblockObjective {
            objective_id: ObjectiveId(objective),
        },
    };

    // Catch typos early; the loop would only log and skip them.
    let store = config.state_store();
    if store.exists() {
        let state = store.load()?;
        let target = match &signal {
            Signal::UrgentObjective { objective_id }
            | Signal::BlockObjective { objective_id, .. }
            | Signal::UnblockObjective { objective_id } => Some(*objective_id),
            Signal::AddTask { objective_id, .. } => *objective_id,
        };
        if let Some(id) = target
            && !state.objectives.contains_key(&id)
        {
            anyhow::bail!("Unknown objective {}", id);
        }
    }

    let path = super::objective::send(&config, &signal)?;
    println!("Queued signal {}", path.display());
    println!("It is applied at the start of the next loop iteration.");
    Ok(())
}
