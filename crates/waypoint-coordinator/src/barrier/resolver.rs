//! Lazy resolution of barrier participants' execution ids.

use tracing::{debug, warn};

use waypoint_core::{BarrierInstance, BarrierWorkflow, ExecutionId, ResolvedIds};

use crate::error::StoreError;
use crate::store::{BarrierStore, ExecutionStore};

/// Fills in execution ids of participants whose branch has started.
pub struct IdResolver<'a> {
    executions: &'a dyn ExecutionStore,
    barriers: &'a dyn BarrierStore,
}

impl<'a> IdResolver<'a> {
    pub fn new(executions: &'a dyn ExecutionStore, barriers: &'a dyn BarrierStore) -> Self {
        Self {
            executions,
            barriers,
        }
    }

    /// Resolve what can be resolved and write it back, filling only ids that
    /// are still empty.
    ///
    /// Returns the number of participants that gained an id. Lookup and
    /// write failures are logged; the ids stay unresolved for the next pass.
    pub async fn resolve(&self, instance: &mut BarrierInstance) -> usize {
        let app_id = instance.app_id.clone();
        let pipeline_execution_id = instance.pipeline.execution_id.clone();
        let mut filled = 0;

        for (index, workflow) in instance.pipeline.workflows.iter_mut().enumerate() {
            if workflow.is_resolved() {
                continue;
            }

            let resolved = match self
                .lookup(&app_id, &pipeline_execution_id, workflow)
                .await
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(barrier_id = %instance.id, workflow = %workflow.uuid, error = %e, "Execution id lookup failed");
                    continue;
                }
            };
            if resolved.is_empty() {
                continue;
            }

            if let Err(e) = self
                .barriers
                .fill_workflow_ids(&instance.id, index, &resolved)
                .await
            {
                warn!(barrier_id = %instance.id, workflow = %workflow.uuid, error = %e, "Failed to persist execution ids");
            }
            if workflow.fill_missing(&resolved) {
                debug!(barrier_id = %instance.id, workflow = %workflow.uuid, "Resolved execution ids");
                filled += 1;
            }
        }
        filled
    }

    // Each level needs the one above it, so a single pass walks down as far
    // as the branch has progressed.
    async fn lookup(
        &self,
        app_id: &str,
        pipeline_execution_id: &ExecutionId,
        workflow: &BarrierWorkflow,
    ) -> Result<ResolvedIds, StoreError> {
        let mut resolved = ResolvedIds::default();

        let mut workflow_execution_id = workflow.workflow_execution_id.clone();
        if workflow_execution_id.is_none() || workflow.pipeline_stage_execution_id.is_none() {
            let matches = self
                .executions
                .find_stage_workflow_executions(
                    app_id,
                    pipeline_execution_id,
                    &workflow.pipeline_stage_id,
                )
                .await?;
            if let Some(found) = first_of(matches, "stage workflow execution", &workflow.pipeline_stage_id) {
                workflow_execution_id = workflow_execution_id.or(Some(found.workflow_execution_id.clone()));
                resolved.workflow_execution_id = Some(found.workflow_execution_id);
                resolved.pipeline_stage_execution_id = Some(found.pipeline_stage_execution_id);
            }
        }
        let Some(workflow_execution_id) = workflow_execution_id else {
            return Ok(resolved);
        };

        let mut phase_execution_id = workflow.phase_execution_id.clone();
        if phase_execution_id.is_none() {
            let matches = self
                .executions
                .find_state_executions(app_id, &workflow_execution_id, &workflow.phase_uuid, None)
                .await?;
            phase_execution_id = first_of(matches, "phase execution", &workflow.phase_uuid);
            resolved.phase_execution_id = phase_execution_id.clone();
        }
        let Some(phase_execution_id) = phase_execution_id else {
            return Ok(resolved);
        };

        if workflow.step_execution_id.is_none() {
            let matches = self
                .executions
                .find_state_executions(
                    app_id,
                    &workflow_execution_id,
                    &workflow.step_uuid,
                    Some(&phase_execution_id),
                )
                .await?;
            resolved.step_execution_id = first_of(matches, "step execution", &workflow.step_uuid);
        }

        Ok(resolved)
    }
}

fn first_of<T>(matches: Vec<T>, what: &str, key: &str) -> Option<T> {
    if matches.len() > 1 {
        warn!(key = %key, count = matches.len(), "More than one {what} matched; using the first");
    }
    matches.into_iter().next()
}
