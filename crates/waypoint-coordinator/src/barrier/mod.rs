//! Barrier synchronization between concurrently running pipeline stages.
//!
//! A barrier is created before its branches start. Each evaluation fills in
//! the execution ids of branches that have started, builds a forcer tree
//! (pipeline, workflow, phase, barrier step) and derives the barrier state
//! from it. Standing barriers are driven forward by the monitor.

pub mod forcer;
pub mod monitor;
mod resolver;
pub mod service;

pub use forcer::{
    calculate_state, ExecutionForcerStateProvider, Forcer, ForcerLevel, ForcerMetadata,
    ForcerStateProvider,
};
pub use monitor::{BarrierMonitor, Partition};
pub use resolver::IdResolver;
pub use service::BarrierService;
