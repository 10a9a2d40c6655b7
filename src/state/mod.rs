//! Pipeline state: the data model and its crash-safe store.
//!
//! ```text
//! .conductor/
//! ├── state.json        # canonical document (atomic replace)
//! ├── state.lock        # advisory lock held by the running coordinator
//! ├── history/          # bounded audit trail, one snapshot per save
//! └── backups/          # explicit timestamped backups
//! ```

mod arena;
pub mod history;
pub mod objective;
pub mod pipeline;
pub mod priority;
pub mod store;
pub mod task;

pub use history::{PhaseHistory, PhaseRecord};
pub use objective::{Objective, ObjectiveId, ObjectiveStatus, PriorityTier};
pub use pipeline::{PipelineState, SCHEMA_VERSION};
pub use priority::{PriorityBands, TaskKind};
pub use store::{StateLock, StateStore, StateSummary};
pub use task::{Task, TaskId, TaskStatus};
