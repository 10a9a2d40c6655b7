//! Backend workers: discovery, health, leasing, and invocation.

pub mod invoker;
pub mod registry;

pub use invoker::{CommandInvoker, WorkerInvoker, WorkerRequest, WorkerResponse, decode_envelope};
pub use registry::{
    ConfiguredDirectory, HealthTable, WorkerDirectory, WorkerInfo, WorkerLease, WorkerRegistry,
    WorkerSpec,
};
