use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::conductor_config::ConductorToml;
use crate::state::StateStore;
use crate::waves::WaveConfig;

/// The name of the conductor working directory inside a project.
pub const CONDUCTOR_DIR: &str = ".conductor";
pub const CONFIG_FILE: &str = "conductor.toml";

pub const ENV_MAX_ITERATIONS: &str = "CONDUCTOR_MAX_ITERATIONS";
pub const ENV_MAX_WORKERS: &str = "CONDUCTOR_MAX_WORKERS";

/// Runtime configuration.
///
/// Combines `conductor.toml` with environment variables and CLI flags, in that
/// order of increasing precedence, and knows where everything lives on disk.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub toml: ConductorToml,
    pub verbose: bool,
    pub yes: bool,
    cli_max_iterations: Option<u64>,
    cli_max_workers: Option<usize>,
}

impl Config {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let toml = ConductorToml::load_or_default(&conductor_dir)?;
        Ok(Self {
            project_dir,
            conductor_dir,
            toml,
            verbose: false,
            yes: false,
            cli_max_iterations: None,
            cli_max_workers: None,
        })
    }

    pub fn with_cli_args(project_dir: &Path, verbose: bool, yes: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.cli_max_iterations = max_iterations;
        self
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.cli_max_workers = max_workers;
        self
    }

    /// CLI → env → file.
    pub fn max_iterations(&self) -> u64 {
        self.cli_max_iterations
            .or_else(|| env_parse(ENV_MAX_ITERATIONS))
            .unwrap_or(self.toml.run.max_iterations)
    }

    /// CLI → env → file.
    pub fn max_workers(&self) -> usize {
        self.cli_max_workers
            .or_else(|| env_parse(ENV_MAX_WORKERS))
            .unwrap_or(self.toml.waves.max_workers)
    }

    pub fn wave_config(&self) -> WaveConfig {
        WaveConfig {
            max_workers: self.max_workers(),
            ..self.toml.waves.to_wave_config()
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.conductor_dir.join("logs")
    }

    pub fn signals_dir(&self) -> PathBuf {
        self.conductor_dir.join("signals")
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.conductor_dir)
            .with_audit_depth(self.toml.state.audit_depth)
            .with_backup_keep(self.toml.state.backup_keep)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        let store = self.state_store();
        for dir in [
            self.conductor_dir.clone(),
            self.log_dir(),
            self.signals_dir(),
            store.history_dir(),
            store.backups_dir(),
            store.escalations_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Unparseable values are ignored with a warning.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
            .collect();
        for (k, v) in vars {
            match v {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
        let result = f();
        for (k, v) in saved {
            match v {
                Some(v) => unsafe { std::env::set_var(&k, v) },
                None => unsafe { std::env::remove_var(&k) },
            }
        }
        result
    }

    fn project_with_config(content: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let conductor = dir.path().join(CONDUCTOR_DIR);
        std::fs::create_dir_all(&conductor).unwrap();
        std::fs::write(conductor.join(CONFIG_FILE), content).unwrap();
        dir
    }

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).unwrap();
        assert_eq!(config.toml, ConductorToml::default());
        assert!(config.conductor_dir.ends_with(CONDUCTOR_DIR));
    }

    #[test]
    fn test_layering_file_env_cli() {
        let dir = project_with_config("[run]\nmax_iterations = 7\n[waves]\nmax_workers = 3\n");

        with_env(
            &[(ENV_MAX_ITERATIONS, None), (ENV_MAX_WORKERS, None)],
            || {
                let config = Config::new(dir.path()).unwrap();
                assert_eq!(config.max_iterations(), 7);
                assert_eq!(config.max_workers(), 3);
            },
        );

        with_env(
            &[(ENV_MAX_ITERATIONS, Some("12")), (ENV_MAX_WORKERS, Some("6"))],
            || {
                let config = Config::new(dir.path()).unwrap();
                assert_eq!(config.max_iterations(), 12);
                assert_eq!(config.wave_config().max_workers, 6);

                let config = config.with_max_iterations(Some(2)).with_max_workers(Some(1));
                assert_eq!(config.max_iterations(), 2);
                assert_eq!(config.max_workers(), 1);
            },
        );
    }

    #[test]
    fn test_unparseable_env_falls_back_to_file() {
        let dir = project_with_config("[run]\nmax_iterations = 7\n");
        with_env(&[(ENV_MAX_ITERATIONS, Some("lots"))], || {
            let config = Config::new(dir.path()).unwrap();
            assert_eq!(config.max_iterations(), 7);
        });
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).unwrap();
        config.ensure_directories().unwrap();
        for sub in ["logs", "signals", "history", "backups", "escalations"] {
            assert!(config.conductor_dir.join(sub).is_dir(), "missing {}", sub);
        }
    }

    #[test]
    fn test_broken_config_file_is_an_error() {
        let dir = project_with_config("[waves\n");
        assert!(Config::new(dir.path()).is_err());
    }
}
