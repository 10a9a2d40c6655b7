//! Parallel waves of worker tasks.
//!
//! A phase handler describes its work as a `Problem` (or explicit waves through
//! `PlanBuilder`), the executor runs the resulting plan wave by wave, and
//! `synthesize` turns the successful outputs into one answer.
//!
//! ```text
//! Problem ──create_plan──▶ OrchestrationPlan ──execute_plan──▶ PlanReport ──synthesize──▶ Synthesis
//!                            wave 0: [a]
//!                            wave 1: [b, c]   (both depend on a)
//!                            wave 2: [d]      (depends on b and c)
//! ```

mod executor;
mod plan;
mod synthesis;

pub use executor::{PlanEvent, PlanReport, WaveConfig, WaveExecutor};
pub use plan::{
    OrchestrationPlan, PlanBuilder, Problem, SubTaskSpec, Wave, WorkerTask, WorkerTaskStatus,
    create_plan,
};
pub use synthesis::{Strategy, Synthesis, synthesize, synthesize_field};
