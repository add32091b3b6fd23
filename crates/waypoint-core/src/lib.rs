//! Waypoint Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Document stores
//! - Caches
//! - Runtime specifics
//!
//! All types here describe delegates, the tasks they run, and the barriers
//! that synchronize concurrent pipeline stages.

pub mod barrier;
pub mod connection;
pub mod delegate;
pub mod error;
pub mod ids;
pub mod scope;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use barrier::{
    BarrierInstance, BarrierPipeline, BarrierWorkflow, GraphStep, OrchestrationWorkflow,
    ResolvedIds, StepSection, StepType,
};
pub use connection::{ConnectionKey, DelegateConnectionResult};
pub use delegate::Delegate;
pub use error::CoreError;
pub use ids::{AccountId, BarrierId, DelegateId, ExecutionId, TaskId};
pub use scope::{DelegateScope, ScopeModel};
pub use status::{BarrierState, EnvironmentType, ExecutionStatus, ForcerState};
pub use task::{DelegateTask, SCOPE_WILDCARD};
