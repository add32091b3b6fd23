//! Barrier construction, evaluation and lookup.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use waypoint_core::{
    BarrierId, BarrierInstance, BarrierPipeline, BarrierState, BarrierWorkflow, ExecutionId,
    OrchestrationWorkflow,
};

use super::forcer::{calculate_state, ExecutionForcerStateProvider, Forcer};
use super::resolver::IdResolver;
use crate::error::BarrierError;
use crate::state::CoordinatorState;
use crate::store::BarrierResponse;

/// Barrier engine.
pub struct BarrierService {
    state: Arc<CoordinatorState>,
}

impl BarrierService {
    pub fn new(state: Arc<CoordinatorState>) -> Self {
        Self { state }
    }

    /// Build the barriers shared by concurrently running workflow tracks.
    ///
    /// Barrier steps are grouped by identifier across tracks. A name used by
    /// a single track is dropped. A name used twice within one track is an
    /// error.
    pub fn obtain_instances(
        &self,
        app_id: &str,
        tracks: &[OrchestrationWorkflow],
        pipeline_execution_id: &ExecutionId,
        parallel_index: u32,
    ) -> Result<Vec<BarrierInstance>, BarrierError> {
        let mut groups: BTreeMap<&str, Vec<BarrierWorkflow>> = BTreeMap::new();

        for track in tracks {
            let mut seen = HashSet::new();
            for section in track.sections() {
                for step in &section.steps {
                    let Some(name) = step.barrier_identifier() else {
                        continue;
                    };
                    if !seen.insert(name) {
                        return Err(BarrierError::NotRunningConcurrently {
                            name: name.to_string(),
                        });
                    }
                    groups.entry(name).or_default().push(BarrierWorkflow::new(
                        track.workflow_id.as_str(),
                        track.pipeline_stage_id.as_str(),
                        section.uuid.as_str(),
                        step.uuid.as_str(),
                    ));
                }
            }
        }

        Ok(groups
            .into_iter()
            .filter(|(_, workflows)| workflows.len() > 1)
            .map(|(name, workflows)| {
                BarrierInstance::new(
                    app_id,
                    name,
                    BarrierPipeline {
                        execution_id: pipeline_execution_id.clone(),
                        parallel_index,
                        workflows,
                    },
                )
            })
            .collect())
    }

    /// `obtain_instances`, then persist every instance.
    pub async fn create_instances(
        &self,
        app_id: &str,
        tracks: &[OrchestrationWorkflow],
        pipeline_execution_id: &ExecutionId,
        parallel_index: u32,
    ) -> Result<Vec<BarrierInstance>, BarrierError> {
        let instances =
            self.obtain_instances(app_id, tracks, pipeline_execution_id, parallel_index)?;
        for instance in &instances {
            self.state.barriers.insert(instance).await?;
            debug!(
                barrier_id = %instance.id,
                name = %instance.name,
                participants = instance.pipeline.workflows.len(),
                "Created barrier"
            );
        }
        Ok(instances)
    }

    /// Re-evaluate a standing barrier.
    ///
    /// A barrier that is no longer standing is left alone. When the barrier
    /// reaches a terminal state, only the caller whose state write wins
    /// notifies the waiter.
    pub async fn update(&self, instance: &mut BarrierInstance) -> Result<BarrierState, BarrierError> {
        if instance.state.is_terminal() {
            return Ok(instance.state);
        }

        IdResolver::new(self.state.executions.as_ref(), self.state.barriers.as_ref())
            .resolve(instance)
            .await;

        let tree = Forcer::for_barrier(instance);
        let provider = ExecutionForcerStateProvider::new(self.state.executions.as_ref());
        let next = calculate_state(&tree, &provider).await.barrier_state();
        self.state.metrics.record_barrier_evaluation();

        if !next.is_terminal() {
            return Ok(BarrierState::Standing);
        }

        let won = self
            .state
            .barriers
            .transition_state(&instance.id, BarrierState::Standing, next)
            .await?;
        if !won {
            let stored = self.state.barriers.get(&instance.id).await?;
            instance.state = stored.map_or(next, |stored| stored.state);
            debug!(barrier_id = %instance.id, state = ?instance.state, "Barrier already settled by another evaluation");
            return Ok(instance.state);
        }
        instance.state = next;

        info!(barrier_id = %instance.id, name = %instance.name, state = ?next, "Barrier settled");
        self.state.metrics.record_barrier_transition(next);

        let response = BarrierResponse {
            barrier_id: instance.id.clone(),
            failed: next == BarrierState::Endure,
        };
        if let Err(e) = self.state.notifier.notify(instance.id.as_str(), response).await {
            warn!(barrier_id = %instance.id, error = %e, "Failed to notify barrier waiter");
        }

        Ok(next)
    }

    /// Find the barrier a running barrier step belongs to.
    ///
    /// `None` means the step has no partner and should proceed.
    pub async fn find_by_step(
        &self,
        app_id: &str,
        pipeline_stage_id: &str,
        parallel_index: u32,
        workflow_execution_id: &ExecutionId,
        identifier: &str,
    ) -> Result<Option<BarrierId>, BarrierError> {
        let candidates = self
            .state
            .barriers
            .find_candidates(app_id, identifier, parallel_index, pipeline_stage_id)
            .await?;
        let resolver = IdResolver::new(self.state.executions.as_ref(), self.state.barriers.as_ref());

        for mut candidate in candidates {
            let unresolved = candidate.pipeline.workflows.iter().any(|wf| {
                wf.pipeline_stage_id == pipeline_stage_id && wf.workflow_execution_id.is_none()
            });
            if unresolved {
                resolver.resolve(&mut candidate).await;
            }

            let found = candidate.pipeline.workflows.iter().any(|wf| {
                wf.pipeline_stage_id == pipeline_stage_id
                    && wf.workflow_execution_id.as_ref() == Some(workflow_execution_id)
            });
            if found {
                return Ok(Some(candidate.id));
            }
        }
        Ok(None)
    }
}
