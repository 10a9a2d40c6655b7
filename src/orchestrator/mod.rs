//! The control loop and the phase handlers it dispatches to.

mod context;
mod execution;
mod handlers;
mod phases;
mod signals;

pub use context::Context;
pub use execution::{ExecutionLoop, RunOutcome, RunReport};
pub use phases::{
    Decision, NewObjective, NewTask, PhaseHandler, PhaseOutcome, PhaseTable, TaskChange,
    record_attempt_failure,
};
pub use signals::{PendingSignal, Signal, SignalInbox};
