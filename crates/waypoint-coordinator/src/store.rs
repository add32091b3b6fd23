//! Ports to the collaborators the coordination core consumes.
//!
//! The document store, task-type registry, feature flags and wait/notify
//! signalling all live outside this crate. Adapters for them implement the
//! traits below; `crate::memory` provides in-process versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use waypoint_core::{
    AccountId, BarrierId, BarrierInstance, BarrierState, ConnectionKey, Delegate, DelegateId,
    DelegateConnectionResult, DelegateTask, EnvironmentType, ExecutionId, ExecutionStatus,
    ResolvedIds,
};

use crate::barrier::ForcerLevel;
use crate::error::{NotifyError, StoreError};

/// Read access to the delegate registry.
#[async_trait]
pub trait DelegateStore: Send + Sync {
    /// All delegates registered for an account.
    async fn list_by_account(&self, account_id: &AccountId) -> Result<Vec<Delegate>, StoreError>;

    async fn get(
        &self,
        account_id: &AccountId,
        delegate_id: &DelegateId,
    ) -> Result<Option<Delegate>, StoreError>;
}

/// Persistence of connection results, unique on `ConnectionKey`.
#[async_trait]
pub trait ConnectionResultStore: Send + Sync {
    async fn find(&self, key: &ConnectionKey)
        -> Result<Option<DelegateConnectionResult>, StoreError>;

    /// Insert a new record. Fails with `StoreError::DuplicateKey` if the key exists.
    async fn insert(&self, result: DelegateConnectionResult) -> Result<(), StoreError>;

    /// Set the validated flag of an existing record, stamping the write time.
    ///
    /// Returns false if no record matched.
    async fn set_validated(
        &self,
        key: &ConnectionKey,
        validated: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Move `last_updated_at`/`valid_until` forward, only if the record is
    /// still validated and `last_updated_at` still equals `expected`.
    ///
    /// Returns false if the record changed underneath the caller.
    async fn refresh_if_unchanged(
        &self,
        key: &ConnectionKey,
        expected: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Bulk delete for an account, optionally narrowed to one delegate.
    async fn delete(
        &self,
        account_id: &AccountId,
        delegate_id: Option<&DelegateId>,
    ) -> Result<u64, StoreError>;
}

/// Persistence of barrier instances.
#[async_trait]
pub trait BarrierStore: Send + Sync {
    async fn insert(&self, instance: &BarrierInstance) -> Result<(), StoreError>;

    async fn get(&self, id: &BarrierId) -> Result<Option<BarrierInstance>, StoreError>;

    async fn list_standing(&self) -> Result<Vec<BarrierInstance>, StoreError>;

    /// Barriers named `name` with a participant in `pipeline_stage_id`.
    async fn find_candidates(
        &self,
        app_id: &str,
        name: &str,
        parallel_index: u32,
        pipeline_stage_id: &str,
    ) -> Result<Vec<BarrierInstance>, StoreError>;

    /// Copy `ids` into the participant's execution id fields that are still
    /// null. Fields already set are left alone.
    ///
    /// Returns true if any field was written.
    async fn fill_workflow_ids(
        &self,
        id: &BarrierId,
        workflow_index: usize,
        ids: &ResolvedIds,
    ) -> Result<bool, StoreError>;

    /// Compare-and-swap the barrier state.
    ///
    /// Returns true only for the caller whose write moved the state.
    async fn transition_state(
        &self,
        id: &BarrierId,
        from: BarrierState,
        to: BarrierState,
    ) -> Result<bool, StoreError>;
}

/// A workflow execution started by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWorkflowExecution {
    pub workflow_execution_id: ExecutionId,
    pub pipeline_stage_execution_id: ExecutionId,
}

/// Read access to execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Workflow executions a pipeline stage started within a pipeline execution.
    async fn find_stage_workflow_executions(
        &self,
        app_id: &str,
        pipeline_execution_id: &ExecutionId,
        pipeline_stage_id: &str,
    ) -> Result<Vec<StageWorkflowExecution>, StoreError>;

    /// Execution instances of the phase or step `state_uuid` inside a
    /// workflow execution, optionally under a parent instance.
    async fn find_state_executions(
        &self,
        app_id: &str,
        workflow_execution_id: &ExecutionId,
        state_uuid: &str,
        parent: Option<&ExecutionId>,
    ) -> Result<Vec<ExecutionId>, StoreError>;

    /// Current status of an execution instance at the given level.
    async fn status(
        &self,
        level: ForcerLevel,
        app_id: &str,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionStatus>, StoreError>;
}

/// An infrastructure mapping as referenced by delegate tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureMapping {
    pub id: String,
    pub infra_definition_id: Option<String>,
    pub service_id: Option<String>,
}

/// Lookups of setup entities referenced by tasks.
#[async_trait]
pub trait SetupLookup: Send + Sync {
    async fn environment_type(
        &self,
        app_id: &str,
        env_id: &str,
    ) -> Result<Option<EnvironmentType>, StoreError>;

    async fn infrastructure_mapping(
        &self,
        app_id: &str,
        infrastructure_mapping_id: &str,
    ) -> Result<Option<InfrastructureMapping>, StoreError>;
}

/// Task-type registry.
pub trait TaskRegistry: Send + Sync {
    /// Connectivity criteria a delegate must satisfy to run the task.
    fn criteria_for(&self, task: &DelegateTask) -> Vec<String>;

    /// Task group of a task type.
    fn task_group_for(&self, task_type: &str) -> Option<String>;
}

/// Per-account feature flags.
#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn is_enabled(&self, flag: &str, account_id: &AccountId) -> bool;
}

/// Payload delivered to the waiter of a barrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierResponse {
    pub barrier_id: BarrierId,
    pub failed: bool,
}

/// Wait/notify signalling.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, key: &str, payload: BarrierResponse) -> Result<(), NotifyError>;
}
