use std::sync::Arc;

use tokio::sync::mpsc;

use super::signals::SignalInbox;
use crate::config::Config;
use crate::scheduler::ObjectiveScheduler;
use crate::state::{PriorityBands, StateStore};
use crate::waves::{PlanEvent, WaveExecutor};
use crate::workers::{CommandInvoker, ConfiguredDirectory, WorkerInvoker, WorkerRegistry};

/// Collaborators shared by the execution loop and every phase handler.
///
/// Built once per `run` and passed by reference; nothing here is global.
pub struct Context {
    pub config: Config,
    pub store: StateStore,
    pub registry: Arc<WorkerRegistry>,
    pub invoker: Arc<dyn WorkerInvoker>,
    pub scheduler: ObjectiveScheduler,
    pub signals: SignalInbox,
    plan_events: Option<mpsc::Sender<PlanEvent>>,
}

impl Context {
    /// Workers come from `[[workers]]` and run as child processes.
    pub fn new(config: Config) -> Self {
        let directory = ConfiguredDirectory::new(config.toml.workers.clone(), &config.project_dir);
        let registry = Arc::new(WorkerRegistry::new(Arc::new(directory)));
        let invoker = Arc::new(CommandInvoker::new(&config.project_dir));
        Self::with_workers(config, registry, invoker)
    }

    pub fn with_workers(
        config: Config,
        registry: Arc<WorkerRegistry>,
        invoker: Arc<dyn WorkerInvoker>,
    ) -> Self {
        Self {
            store: config.state_store(),
            scheduler: ObjectiveScheduler::new(config.toml.scheduler.clone()),
            signals: SignalInbox::new(config.signals_dir()),
            registry,
            invoker,
            config,
            plan_events: None,
        }
    }

    /// Forward wave progress from every phase to `tx`.
    pub fn with_plan_events(mut self, tx: mpsc::Sender<PlanEvent>) -> Self {
        self.plan_events = Some(tx);
        self
    }

    pub fn executor(&self) -> WaveExecutor {
        let executor = WaveExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.invoker),
            self.config.wave_config(),
        );
        match &self.plan_events {
            Some(tx) => executor.with_event_channel(tx.clone()),
            None => executor,
        }
    }

    pub fn bands(&self) -> &PriorityBands {
        &self.config.toml.priority_bands
    }

    pub fn max_task_attempts(&self) -> u32 {
        self.config.toml.run.max_task_attempts
    }

    pub fn error_history_depth(&self) -> usize {
        self.config.toml.state.error_history_depth
    }
}
