//! Project initialization: `conductor init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use conductor::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized conductor project at {}",
            result.conductor_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .conductor/");
        println!("  ├── conductor.toml  # Configuration (see `conductor config show`)");
        println!("  ├── state.json      # Pipeline state");
        println!("  ├── history/        # Audit trail of saved states");
        println!("  ├── backups/        # Backups from `reset` and `run --fresh`");
        println!("  ├── escalations/    # Loop escalation reports");
        println!("  ├── signals/        # Signal inbox (use `conductor signal`)");
        println!("  └── logs/           # JSON run logs");
        println!();
        println!("Next steps:");
        println!("  1. Declare workers under [[workers]] in conductor.toml");
        println!("  2. Run `conductor objective add <title>` to describe the work");
        println!("  3. Run `conductor run` to start execution");
    } else if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            result.conductor_dir.display()
        );
        if result.state_initialized {
            println!("Pipeline state was missing and has been recreated.");
        }
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed conductor initialization at {}",
            result.conductor_dir.display()
        );
    }

    Ok(())
}
