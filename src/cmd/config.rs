//! Configuration view and validation commands: `conductor config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use conductor::conductor_config::{ConductorToml, template};
    use conductor::config::{CONFIG_FILE, Config, ENV_MAX_ITERATIONS, ENV_MAX_WORKERS};
    use conductor::init::get_conductor_dir;

    let conductor_dir = get_conductor_dir(project_dir);
    let config_path = conductor_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ConductorToml::load(&config_path)?
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ConductorToml::default()
            };
            println!();
            let rendered =
                toml::to_string_pretty(&toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            let config = Config::new(project_dir)?;
            println!(
                "  max_iterations = {}  ({} overrides)",
                config.max_iterations(),
                ENV_MAX_ITERATIONS
            );
            println!(
                "  max_workers = {}  ({} overrides)",
                config.max_workers(),
                ENV_MAX_WORKERS
            );
            println!("  workers configured = {}", toml.workers.len());
            println!();
            if !config_path.exists() {
                println!("Run 'conductor config init' to create a conductor.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                ConductorToml::load(&config_path)?
            } else {
                println!("No conductor.toml found; checking defaults.");
                ConductorToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("conductor.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&conductor_dir).with_context(|| {
                format!("Failed to create directory: {}", conductor_dir.display())
            })?;
            std::fs::write(&config_path, template())
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created conductor.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [run] max_iterations, loop_budget, max_task_attempts");
            println!("  - [waves] max_workers, reviewers, consensus_min_agreement");
            println!("  - [[workers]] the programs that carry out each role");
            println!();
        }
    }

    Ok(())
}
