//! Shared coordinator state.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::store::{
    BarrierStore, ConnectionResultStore, DelegateStore, ExecutionStore, FeatureFlags, Notifier,
    SetupLookup, TaskRegistry,
};

/// Collaborators shared by the assignment engine, barrier service and monitor.
///
/// Built once at startup and handed around by `Arc`.
pub struct CoordinatorState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,

    /// Delegate registry.
    pub delegates: Arc<dyn DelegateStore>,

    /// Connection results, unique on (account, delegate, criteria).
    pub connection_results: Arc<dyn ConnectionResultStore>,

    /// Barrier instances.
    pub barriers: Arc<dyn BarrierStore>,

    /// Pipeline, workflow, phase and step execution records.
    pub executions: Arc<dyn ExecutionStore>,

    /// Environments and infrastructure mappings.
    pub setup: Arc<dyn SetupLookup>,

    /// Task-type registry.
    pub registry: Arc<dyn TaskRegistry>,

    /// Per-account feature flags.
    pub flags: Arc<dyn FeatureFlags>,

    /// Wait/notify signalling for barrier waiters.
    pub notifier: Arc<dyn Notifier>,
}
