//! Loop detection over a bounded window of recent actions.
//!
//! The execution loop records one (action fingerprint, state fingerprint, target)
//! entry per iteration and asks `detect` about the next candidate before acting.
//! Detection never mutates the window.

mod detector;
mod fingerprint;

pub use detector::{
    Candidate, LoopConfig, LoopDetector, LoopEntry, LoopKind, LoopVerdict, Severity,
    should_intervene,
};
pub use fingerprint::{Action, Fingerprint, state_fingerprint};
