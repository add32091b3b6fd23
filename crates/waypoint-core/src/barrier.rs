//! Barrier instances and the orchestration graph they are derived from.

use crate::{BarrierId, BarrierState, ExecutionId};
use serde::{Deserialize, Serialize};

/// A persisted rendezvous between concurrent pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierInstance {
    pub id: BarrierId,
    pub app_id: String,
    /// User-supplied barrier identifier shared by every participant.
    pub name: String,
    pub state: BarrierState,
    pub pipeline: BarrierPipeline,
}

impl BarrierInstance {
    /// Create a standing barrier.
    pub fn new(app_id: impl Into<String>, name: impl Into<String>, pipeline: BarrierPipeline) -> Self {
        Self {
            id: BarrierId::generate(),
            app_id: app_id.into(),
            name: name.into(),
            state: BarrierState::Standing,
            pipeline,
        }
    }
}

/// Pipeline execution a barrier belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierPipeline {
    pub execution_id: ExecutionId,
    pub parallel_index: u32,
    pub workflows: Vec<BarrierWorkflow>,
}

/// One participant of a barrier.
///
/// The reference fields are known when the barrier is built. The execution
/// ids start empty and are filled in once the branch starts running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarrierWorkflow {
    pub uuid: String,
    pub pipeline_stage_id: String,
    pub phase_uuid: String,
    pub step_uuid: String,

    pub pipeline_stage_execution_id: Option<ExecutionId>,
    pub workflow_execution_id: Option<ExecutionId>,
    pub phase_execution_id: Option<ExecutionId>,
    pub step_execution_id: Option<ExecutionId>,
}

impl BarrierWorkflow {
    pub fn new(
        uuid: impl Into<String>,
        pipeline_stage_id: impl Into<String>,
        phase_uuid: impl Into<String>,
        step_uuid: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            pipeline_stage_id: pipeline_stage_id.into(),
            phase_uuid: phase_uuid.into(),
            step_uuid: step_uuid.into(),
            ..Self::default()
        }
    }

    /// Returns true once every execution id is known.
    pub fn is_resolved(&self) -> bool {
        self.pipeline_stage_execution_id.is_some()
            && self.workflow_execution_id.is_some()
            && self.phase_execution_id.is_some()
            && self.step_execution_id.is_some()
    }

    /// Copy ids from `resolved` into fields that are still empty.
    ///
    /// Returns true if anything changed. Ids already set are never replaced.
    pub fn fill_missing(&mut self, resolved: &ResolvedIds) -> bool {
        fn fill(slot: &mut Option<ExecutionId>, value: &Option<ExecutionId>) -> bool {
            match (slot.is_none(), value) {
                (true, Some(v)) => {
                    *slot = Some(v.clone());
                    true
                }
                _ => false,
            }
        }

        let mut changed = fill(
            &mut self.pipeline_stage_execution_id,
            &resolved.pipeline_stage_execution_id,
        );
        changed |= fill(&mut self.workflow_execution_id, &resolved.workflow_execution_id);
        changed |= fill(&mut self.phase_execution_id, &resolved.phase_execution_id);
        changed |= fill(&mut self.step_execution_id, &resolved.step_execution_id);
        changed
    }
}

/// Execution ids discovered for a participant in one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIds {
    pub pipeline_stage_execution_id: Option<ExecutionId>,
    pub workflow_execution_id: Option<ExecutionId>,
    pub phase_execution_id: Option<ExecutionId>,
    pub step_execution_id: Option<ExecutionId>,
}

impl ResolvedIds {
    pub fn is_empty(&self) -> bool {
        self.pipeline_stage_execution_id.is_none()
            && self.workflow_execution_id.is_none()
            && self.phase_execution_id.is_none()
            && self.step_execution_id.is_none()
    }
}

/// Kind of a step in an orchestration graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Barrier,
    Other(String),
}

/// A step in an orchestration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStep {
    pub uuid: String,
    pub step_type: StepType,
    /// Barrier identifier; only meaningful for barrier steps.
    pub identifier: Option<String>,
}

impl GraphStep {
    pub fn barrier(uuid: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            step_type: StepType::Barrier,
            identifier: Some(identifier.into()),
        }
    }

    pub fn other(uuid: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            step_type: StepType::Other(step_type.into()),
            identifier: None,
        }
    }

    /// Barrier identifier if this step is a barrier with a non-blank name.
    pub fn barrier_identifier(&self) -> Option<&str> {
        match (&self.step_type, &self.identifier) {
            (StepType::Barrier, Some(name)) if !name.trim().is_empty() => Some(name.as_str()),
            _ => None,
        }
    }
}

/// A group of steps executed as one phase (or pre/post deployment section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSection {
    pub uuid: String,
    pub steps: Vec<GraphStep>,
}

impl StepSection {
    pub fn new(uuid: impl Into<String>, steps: Vec<GraphStep>) -> Self {
        Self {
            uuid: uuid.into(),
            steps,
        }
    }
}

/// One concurrently running workflow track of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationWorkflow {
    pub workflow_id: String,
    pub pipeline_stage_id: String,
    pub pre_deployment: Option<StepSection>,
    pub phases: Vec<StepSection>,
    pub post_deployment: Option<StepSection>,
}

impl OrchestrationWorkflow {
    pub fn new(workflow_id: impl Into<String>, pipeline_stage_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            pipeline_stage_id: pipeline_stage_id.into(),
            pre_deployment: None,
            phases: Vec::new(),
            post_deployment: None,
        }
    }

    pub fn with_pre_deployment(mut self, section: StepSection) -> Self {
        self.pre_deployment = Some(section);
        self
    }

    pub fn with_phase(mut self, section: StepSection) -> Self {
        self.phases.push(section);
        self
    }

    pub fn with_post_deployment(mut self, section: StepSection) -> Self {
        self.post_deployment = Some(section);
        self
    }

    /// All sections in execution order.
    pub fn sections(&self) -> impl Iterator<Item = &StepSection> {
        self.pre_deployment
            .iter()
            .chain(self.phases.iter())
            .chain(self.post_deployment.iter())
    }
}
