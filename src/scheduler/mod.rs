//! Strategic objective scheduling.
//!
//! Each objective gets a seven-dimension profile (`profile`), from which
//! complexity, risk, and readiness are derived (`metrics`). `select` ranks the
//! eligible objectives, `health` reports concerns, and `space` answers geometric
//! questions (neighbours, clusters, trends) about the profile space.

pub mod health;
pub mod metrics;
pub mod profile;
pub mod select;
pub mod space;

pub use health::{HealthReport, ObjectiveHealth, ObjectiveHealthStatus, OverallHealth, analyze_health, objective_health};
pub use metrics::ObjectiveMetrics;
pub use profile::{DimensionalProfile, calculate_profile};
pub use select::{ObjectiveScheduler, SchedulerConfig, Selection};
pub use space::DimensionalSpace;
