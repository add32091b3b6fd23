//! In-process implementations of every store port.
//!
//! Used by the tests and the standalone binary. Locks are never held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use waypoint_core::{
    AccountId, BarrierId, BarrierInstance, BarrierState, ConnectionKey, Delegate, DelegateId,
    DelegateConnectionResult, DelegateTask, EnvironmentType, ExecutionId, ExecutionStatus,
    ResolvedIds,
};

use crate::barrier::ForcerLevel;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{NotifyError, StoreError};
use crate::metrics::Metrics;
use crate::state::CoordinatorState;
use crate::store::{
    BarrierResponse, BarrierStore, ConnectionResultStore, DelegateStore, ExecutionStore,
    FeatureFlags, InfrastructureMapping, Notifier, SetupLookup, StageWorkflowExecution,
    TaskRegistry,
};

/// Optional injected failure shared by the stores below.
#[derive(Debug, Default)]
struct Outage(RwLock<Option<String>>);

impl Outage {
    fn set(&self, reason: &str) {
        *self.0.write() = Some(reason.to_string());
    }

    fn check(&self) -> Result<(), StoreError> {
        match self.0.read().as_ref() {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Delegate registry.
#[derive(Debug, Default)]
pub struct MemoryDelegateStore {
    delegates: RwLock<HashMap<DelegateId, Delegate>>,
    outage: Outage,
}

impl MemoryDelegateStore {
    /// Register or replace a delegate.
    pub fn add(&self, delegate: Delegate) {
        self.delegates.write().insert(delegate.id.clone(), delegate);
    }

    /// Make every subsequent call fail.
    pub fn fail_with(&self, reason: &str) {
        self.outage.set(reason);
    }
}

#[async_trait]
impl DelegateStore for MemoryDelegateStore {
    async fn list_by_account(&self, account_id: &AccountId) -> Result<Vec<Delegate>, StoreError> {
        self.outage.check()?;
        let mut delegates: Vec<Delegate> = self
            .delegates
            .read()
            .values()
            .filter(|d| &d.account_id == account_id)
            .cloned()
            .collect();
        delegates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(delegates)
    }

    async fn get(
        &self,
        account_id: &AccountId,
        delegate_id: &DelegateId,
    ) -> Result<Option<Delegate>, StoreError> {
        self.outage.check()?;
        Ok(self
            .delegates
            .read()
            .get(delegate_id)
            .filter(|d| &d.account_id == account_id)
            .cloned())
    }
}

/// Connection results keyed by (account, delegate, criteria).
#[derive(Debug, Default)]
pub struct MemoryConnectionResultStore {
    results: RwLock<HashMap<ConnectionKey, DelegateConnectionResult>>,
    outage: Outage,
}

impl MemoryConnectionResultStore {
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored record.
    pub fn get(&self, key: &ConnectionKey) -> Option<DelegateConnectionResult> {
        self.results.read().get(key).cloned()
    }

    pub fn fail_with(&self, reason: &str) {
        self.outage.set(reason);
    }
}

#[async_trait]
impl ConnectionResultStore for MemoryConnectionResultStore {
    async fn find(
        &self,
        key: &ConnectionKey,
    ) -> Result<Option<DelegateConnectionResult>, StoreError> {
        self.outage.check()?;
        Ok(self.results.read().get(key).cloned())
    }

    async fn insert(&self, result: DelegateConnectionResult) -> Result<(), StoreError> {
        self.outage.check()?;
        let key = result.key();
        let mut results = self.results.write();
        if results.contains_key(&key) {
            return Err(StoreError::DuplicateKey(format!(
                "{}/{}/{}",
                key.account_id, key.delegate_id, key.criteria
            )));
        }
        results.insert(key, result);
        Ok(())
    }

    async fn set_validated(
        &self,
        key: &ConnectionKey,
        validated: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.outage.check()?;
        match self.results.write().get_mut(key) {
            Some(result) => {
                result.validated = validated;
                result.last_updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn refresh_if_unchanged(
        &self,
        key: &ConnectionKey,
        expected: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.outage.check()?;
        match self.results.write().get_mut(key) {
            Some(result) if result.validated && result.last_updated_at == expected => {
                result.last_updated_at = last_updated_at;
                result.valid_until = valid_until;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(
        &self,
        account_id: &AccountId,
        delegate_id: Option<&DelegateId>,
    ) -> Result<u64, StoreError> {
        self.outage.check()?;
        let mut results = self.results.write();
        let before = results.len();
        results.retain(|key, _| {
            !(&key.account_id == account_id && delegate_id.map_or(true, |d| &key.delegate_id == d))
        });
        Ok((before - results.len()) as u64)
    }
}

/// Barrier instances.
#[derive(Debug, Default)]
pub struct MemoryBarrierStore {
    barriers: RwLock<HashMap<BarrierId, BarrierInstance>>,
    outage: Outage,
}

impl MemoryBarrierStore {
    pub fn len(&self) -> usize {
        self.barriers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_with(&self, reason: &str) {
        self.outage.set(reason);
    }

    fn not_found(id: &BarrierId) -> StoreError {
        StoreError::NotFound(format!("barrier {id}"))
    }
}

#[async_trait]
impl BarrierStore for MemoryBarrierStore {
    async fn insert(&self, instance: &BarrierInstance) -> Result<(), StoreError> {
        self.outage.check()?;
        let mut barriers = self.barriers.write();
        if barriers.contains_key(&instance.id) {
            return Err(StoreError::DuplicateKey(instance.id.to_string()));
        }
        barriers.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get(&self, id: &BarrierId) -> Result<Option<BarrierInstance>, StoreError> {
        self.outage.check()?;
        Ok(self.barriers.read().get(id).cloned())
    }

    async fn list_standing(&self) -> Result<Vec<BarrierInstance>, StoreError> {
        self.outage.check()?;
        Ok(self
            .barriers
            .read()
            .values()
            .filter(|b| b.state == BarrierState::Standing)
            .cloned()
            .collect())
    }

    async fn find_candidates(
        &self,
        app_id: &str,
        name: &str,
        parallel_index: u32,
        pipeline_stage_id: &str,
    ) -> Result<Vec<BarrierInstance>, StoreError> {
        self.outage.check()?;
        Ok(self
            .barriers
            .read()
            .values()
            .filter(|b| {
                b.app_id == app_id
                    && b.name == name
                    && b.pipeline.parallel_index == parallel_index
                    && b
                        .pipeline
                        .workflows
                        .iter()
                        .any(|wf| wf.pipeline_stage_id == pipeline_stage_id)
            })
            .cloned()
            .collect())
    }

    async fn fill_workflow_ids(
        &self,
        id: &BarrierId,
        workflow_index: usize,
        ids: &ResolvedIds,
    ) -> Result<bool, StoreError> {
        self.outage.check()?;
        let mut barriers = self.barriers.write();
        let barrier = barriers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        let workflow = barrier
            .pipeline
            .workflows
            .get_mut(workflow_index)
            .ok_or_else(|| Self::not_found(id))?;
        Ok(workflow.fill_missing(ids))
    }

    async fn transition_state(
        &self,
        id: &BarrierId,
        from: BarrierState,
        to: BarrierState,
    ) -> Result<bool, StoreError> {
        self.outage.check()?;
        let mut barriers = self.barriers.write();
        let barrier = barriers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if barrier.state != from {
            return Ok(false);
        }
        barrier.state = to;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
struct StageWorkflowRecord {
    app_id: String,
    pipeline_execution_id: ExecutionId,
    pipeline_stage_id: String,
    execution: StageWorkflowExecution,
}

#[derive(Debug, Clone)]
struct StateExecutionRecord {
    app_id: String,
    workflow_execution_id: ExecutionId,
    state_uuid: String,
    parent: Option<ExecutionId>,
    id: ExecutionId,
}

/// Pipeline, workflow, phase and step execution records.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    stage_workflows: RwLock<Vec<StageWorkflowRecord>>,
    state_executions: RwLock<Vec<StateExecutionRecord>>,
    statuses: RwLock<HashMap<(ForcerLevel, ExecutionId), ExecutionStatus>>,
    outage: Outage,
}

impl MemoryExecutionStore {
    /// Record a workflow execution started by a pipeline stage.
    pub fn add_stage_workflow(
        &self,
        app_id: &str,
        pipeline_execution_id: &str,
        pipeline_stage_id: &str,
        workflow_execution_id: &str,
        pipeline_stage_execution_id: &str,
    ) {
        self.stage_workflows.write().push(StageWorkflowRecord {
            app_id: app_id.to_string(),
            pipeline_execution_id: ExecutionId::new(pipeline_execution_id),
            pipeline_stage_id: pipeline_stage_id.to_string(),
            execution: StageWorkflowExecution {
                workflow_execution_id: ExecutionId::new(workflow_execution_id),
                pipeline_stage_execution_id: ExecutionId::new(pipeline_stage_execution_id),
            },
        });
    }

    /// Record a phase or step execution instance.
    pub fn add_state_execution(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        state_uuid: &str,
        parent: Option<&str>,
        id: &str,
    ) {
        self.state_executions.write().push(StateExecutionRecord {
            app_id: app_id.to_string(),
            workflow_execution_id: ExecutionId::new(workflow_execution_id),
            state_uuid: state_uuid.to_string(),
            parent: parent.map(ExecutionId::new),
            id: ExecutionId::new(id),
        });
    }

    pub fn set_status(&self, level: ForcerLevel, id: &str, status: ExecutionStatus) {
        self.statuses
            .write()
            .insert((level, ExecutionId::new(id)), status);
    }

    pub fn fail_with(&self, reason: &str) {
        self.outage.set(reason);
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn find_stage_workflow_executions(
        &self,
        app_id: &str,
        pipeline_execution_id: &ExecutionId,
        pipeline_stage_id: &str,
    ) -> Result<Vec<StageWorkflowExecution>, StoreError> {
        self.outage.check()?;
        Ok(self
            .stage_workflows
            .read()
            .iter()
            .filter(|r| {
                r.app_id == app_id
                    && &r.pipeline_execution_id == pipeline_execution_id
                    && r.pipeline_stage_id == pipeline_stage_id
            })
            .map(|r| r.execution.clone())
            .collect())
    }

    async fn find_state_executions(
        &self,
        app_id: &str,
        workflow_execution_id: &ExecutionId,
        state_uuid: &str,
        parent: Option<&ExecutionId>,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        self.outage.check()?;
        Ok(self
            .state_executions
            .read()
            .iter()
            .filter(|r| {
                r.app_id == app_id
                    && &r.workflow_execution_id == workflow_execution_id
                    && r.state_uuid == state_uuid
                    && (parent.is_none() || r.parent.as_ref() == parent)
            })
            .map(|r| r.id.clone())
            .collect())
    }

    async fn status(
        &self,
        level: ForcerLevel,
        _app_id: &str,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionStatus>, StoreError> {
        self.outage.check()?;
        Ok(self.statuses.read().get(&(level, id.clone())).copied())
    }
}

/// Environments and infrastructure mappings per application.
#[derive(Debug, Default)]
pub struct MemorySetupLookup {
    environments: RwLock<HashMap<(String, String), EnvironmentType>>,
    mappings: RwLock<HashMap<(String, String), InfrastructureMapping>>,
}

impl MemorySetupLookup {
    pub fn add_environment(&self, app_id: &str, env_id: &str, environment_type: EnvironmentType) {
        self.environments
            .write()
            .insert((app_id.to_string(), env_id.to_string()), environment_type);
    }

    pub fn add_infrastructure_mapping(&self, app_id: &str, mapping: InfrastructureMapping) {
        self.mappings
            .write()
            .insert((app_id.to_string(), mapping.id.clone()), mapping);
    }
}

#[async_trait]
impl SetupLookup for MemorySetupLookup {
    async fn environment_type(
        &self,
        app_id: &str,
        env_id: &str,
    ) -> Result<Option<EnvironmentType>, StoreError> {
        Ok(self
            .environments
            .read()
            .get(&(app_id.to_string(), env_id.to_string()))
            .copied())
    }

    async fn infrastructure_mapping(
        &self,
        app_id: &str,
        infrastructure_mapping_id: &str,
    ) -> Result<Option<InfrastructureMapping>, StoreError> {
        Ok(self
            .mappings
            .read()
            .get(&(app_id.to_string(), infrastructure_mapping_id.to_string()))
            .cloned())
    }
}

/// Task-type registry backed by fixed tables.
#[derive(Debug, Default)]
pub struct StaticTaskRegistry {
    groups: RwLock<HashMap<String, String>>,
    criteria: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticTaskRegistry {
    pub fn with_group(self, task_type: &str, group: &str) -> Self {
        self.set_group(task_type, group);
        self
    }

    pub fn set_group(&self, task_type: &str, group: &str) {
        self.groups
            .write()
            .insert(task_type.to_string(), group.to_string());
    }

    /// Add a criteria produced by every task of `task_type`.
    pub fn set_criteria(&self, task_type: &str, criteria: &str) {
        self.criteria
            .write()
            .entry(task_type.to_string())
            .or_default()
            .push(criteria.to_string());
    }
}

impl TaskRegistry for StaticTaskRegistry {
    fn criteria_for(&self, task: &DelegateTask) -> Vec<String> {
        self.criteria
            .read()
            .get(&task.task_type)
            .cloned()
            .unwrap_or_default()
    }

    fn task_group_for(&self, task_type: &str) -> Option<String> {
        self.groups.read().get(task_type).cloned()
    }
}

/// Feature flags switched on per account.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    enabled: RwLock<HashSet<(String, AccountId)>>,
}

impl StaticFeatureFlags {
    pub fn enable(&self, flag: &str, account_id: &AccountId) {
        self.enabled
            .write()
            .insert((flag.to_string(), account_id.clone()));
    }
}

#[async_trait]
impl FeatureFlags for StaticFeatureFlags {
    async fn is_enabled(&self, flag: &str, account_id: &AccountId) -> bool {
        self.enabled
            .read()
            .contains(&(flag.to_string(), account_id.clone()))
    }
}

/// Notifier that keeps every notification it is asked to deliver.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, BarrierResponse)>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<(String, BarrierResponse)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, key: &str, payload: BarrierResponse) -> Result<(), NotifyError> {
        tracing::debug!(key = %key, failed = payload.failed, "Barrier notification");
        self.sent.lock().push((key.to_string(), payload));
        Ok(())
    }
}

/// One of every in-memory adapter, wired together.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub delegates: Arc<MemoryDelegateStore>,
    pub connection_results: Arc<MemoryConnectionResultStore>,
    pub barriers: Arc<MemoryBarrierStore>,
    pub executions: Arc<MemoryExecutionStore>,
    pub setup: Arc<MemorySetupLookup>,
    pub registry: Arc<StaticTaskRegistry>,
    pub flags: Arc<StaticFeatureFlags>,
    pub notifier: Arc<RecordingNotifier>,
}

impl MemoryBackend {
    /// Build coordinator state on top of these adapters.
    pub fn state(&self, config: Config, clock: Arc<dyn Clock>) -> Arc<CoordinatorState> {
        Arc::new(CoordinatorState {
            config,
            clock,
            metrics: Arc::new(Metrics::default()),
            delegates: self.delegates.clone(),
            connection_results: self.connection_results.clone(),
            barriers: self.barriers.clone(),
            executions: self.executions.clone(),
            setup: self.setup.clone(),
            registry: self.registry.clone(),
            flags: self.flags.clone(),
            notifier: self.notifier.clone(),
        })
    }
}
