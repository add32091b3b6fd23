//! Waypoint Coordinator Library
//!
//! Execution coordination for a delivery pipeline: which delegate may run a
//! task, and when concurrently running stages may pass a barrier.

pub mod assignment;
pub mod barrier;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod state;
pub mod store;

pub use assignment::{AccountContext, AssignmentEngine};
pub use barrier::{BarrierMonitor, BarrierService, Partition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AssignError, BarrierError, NotifyError, StoreError};
pub use metrics::Metrics;
pub use state::CoordinatorState;
