//! `conductor init`: lay out the `.conductor/` directory of a project.
//!
//! ```text
//! .conductor/
//! ├── conductor.toml   # configuration (written from the template)
//! ├── state.json       # pipeline state document
//! ├── history/         # audit trail of saved states
//! ├── backups/         # explicit backups (`conductor reset`, `run --fresh`)
//! ├── escalations/     # loop escalation reports
//! ├── signals/         # operator signal inbox
//! └── logs/            # daily-rolling JSON logs
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::conductor_config::template;
use crate::config::{CONDUCTOR_DIR, CONFIG_FILE};
use crate::state::StateStore;

const SUBDIRECTORIES: [&str; 5] = ["history", "backups", "escalations", "signals", "logs"];

/// Result of initializing a conductor project.
#[derive(Debug)]
pub struct InitResult {
    pub conductor_dir: PathBuf,
    /// Whether `.conductor/` was newly created.
    pub created: bool,
    pub config_written: bool,
    pub state_initialized: bool,
}

/// Create whatever part of the layout is missing. Existing files are never
/// overwritten, so running this twice is harmless.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let conductor_dir = get_conductor_dir(project_dir);
    let created = !conductor_dir.exists();

    for sub in std::iter::once(conductor_dir.clone())
        .chain(SUBDIRECTORIES.iter().map(|s| conductor_dir.join(s)))
    {
        std::fs::create_dir_all(&sub)
            .with_context(|| format!("Failed to create directory: {}", sub.display()))?;
    }

    let config_path = conductor_dir.join(CONFIG_FILE);
    let config_written = !config_path.exists();
    if config_written {
        std::fs::write(&config_path, template())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let store = StateStore::new(&conductor_dir);
    let state_initialized = !store.exists();
    if state_initialized {
        store
            .initialize(Utc::now())
            .context("Failed to initialize pipeline state")?;
    }

    Ok(InitResult {
        conductor_dir,
        created,
        config_written,
        state_initialized,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    get_conductor_dir(project_dir).join(CONFIG_FILE).exists()
}

pub fn get_conductor_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONDUCTOR_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor_config::ConductorToml;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_layout() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.config_written);
        assert!(result.state_initialized);
        assert_eq!(result.conductor_dir, dir.path().join(".conductor"));
        for sub in SUBDIRECTORIES {
            assert!(result.conductor_dir.join(sub).is_dir(), "missing {}", sub);
        }
        assert!(result.conductor_dir.join("state.json").is_file());
    }

    #[test]
    fn test_written_config_parses_to_defaults() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let toml = ConductorToml::load(&dir.path().join(".conductor/conductor.toml")).unwrap();
        assert_eq!(toml, ConductorToml::default());
    }

    #[test]
    fn test_second_init_keeps_existing_files() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config = dir.path().join(".conductor/conductor.toml");
        std::fs::write(&config, "[run]\nmax_iterations = 9\n").unwrap();
        let store = StateStore::new(dir.path().join(".conductor"));
        let before = store.load().unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(!again.config_written);
        assert!(!again.state_initialized);
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "[run]\nmax_iterations = 9\n"
        );
        assert_eq!(store.load().unwrap().run_id, before.run_id);
    }

    #[test]
    fn test_init_completes_partial_layout() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".conductor")).unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.created);
        assert!(result.config_written);
        assert!(result.conductor_dir.join("signals").is_dir());
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
    }
}
