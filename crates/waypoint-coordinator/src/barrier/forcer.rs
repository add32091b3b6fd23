//! Forcer trees: hierarchical progress toward a rendezvous.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use waypoint_core::{BarrierInstance, ExecutionId, ForcerState};

use crate::store::ExecutionStore;

/// Level of an execution instance in the pipeline hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForcerLevel {
    Pipeline,
    Workflow,
    Phase,
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcerMetadata {
    pub level: ForcerLevel,
    pub app_id: String,
}

/// A node of a forcer tree. Built per evaluation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forcer {
    /// Execution instance behind this node; `None` until it has started.
    pub id: Option<ExecutionId>,
    pub metadata: ForcerMetadata,
    pub children: Vec<Forcer>,
}

impl Forcer {
    pub fn new(level: ForcerLevel, app_id: &str, id: Option<ExecutionId>) -> Self {
        Self {
            id,
            metadata: ForcerMetadata {
                level,
                app_id: app_id.to_string(),
            },
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Forcer) -> Self {
        self.children.push(child);
        self
    }

    /// Tree for a barrier: pipeline root, one workflow child per
    /// participant, each with its phase and then the barrier step.
    pub fn for_barrier(instance: &BarrierInstance) -> Self {
        let app_id = instance.app_id.as_str();
        instance.pipeline.workflows.iter().fold(
            Forcer::new(
                ForcerLevel::Pipeline,
                app_id,
                Some(instance.pipeline.execution_id.clone()),
            ),
            |root, wf| {
                let step = Forcer::new(ForcerLevel::Step, app_id, wf.step_execution_id.clone());
                let phase = Forcer::new(ForcerLevel::Phase, app_id, wf.phase_execution_id.clone())
                    .with_child(step);
                let workflow =
                    Forcer::new(ForcerLevel::Workflow, app_id, wf.workflow_execution_id.clone())
                        .with_child(phase);
                root.with_child(workflow)
            },
        )
    }
}

/// Source of the state of a single forcer node.
#[async_trait]
pub trait ForcerStateProvider: Send + Sync {
    async fn forcer_state(&self, id: &ExecutionId, metadata: &ForcerMetadata) -> ForcerState;
}

/// Maps execution statuses to forcer states.
pub struct ExecutionForcerStateProvider<'a> {
    executions: &'a dyn ExecutionStore,
}

impl<'a> ExecutionForcerStateProvider<'a> {
    pub fn new(executions: &'a dyn ExecutionStore) -> Self {
        Self { executions }
    }
}

#[async_trait]
impl ForcerStateProvider for ExecutionForcerStateProvider<'_> {
    async fn forcer_state(&self, id: &ExecutionId, metadata: &ForcerMetadata) -> ForcerState {
        let status = match self
            .executions
            .status(metadata.level, &metadata.app_id, id)
            .await
        {
            Ok(Some(status)) => status,
            Ok(None) => return ForcerState::Approaching,
            Err(e) => {
                warn!(execution_id = %id, level = ?metadata.level, error = %e, "Execution status lookup failed");
                return ForcerState::Approaching;
            }
        };

        if status.is_positive() {
            ForcerState::Arrived
        } else if metadata.level == ForcerLevel::Step && status.is_in_progress() {
            // Reaching the barrier step means reaching the gate.
            ForcerState::Arrived
        } else if status.is_final() {
            ForcerState::Abandoned
        } else {
            ForcerState::Approaching
        }
    }
}

/// Compute the state of `forcer`.
///
/// A node with a known execution id is asked first; a settled answer ends
/// the descent. Otherwise a leaf is approaching and an inner node aggregates
/// its children: abandoned if any child is, arrived if all are.
pub fn calculate_state<'a>(
    forcer: &'a Forcer,
    provider: &'a dyn ForcerStateProvider,
) -> Pin<Box<dyn Future<Output = ForcerState> + Send + 'a>> {
    Box::pin(async move {
        if let Some(id) = &forcer.id {
            let own = provider.forcer_state(id, &forcer.metadata).await;
            if own.is_settled() || forcer.children.is_empty() {
                return own;
            }
        }
        if forcer.children.is_empty() {
            return ForcerState::Approaching;
        }

        let mut all_arrived = true;
        for child in &forcer.children {
            match calculate_state(child, provider).await {
                ForcerState::Abandoned => return ForcerState::Abandoned,
                ForcerState::Approaching => all_arrived = false,
                ForcerState::Arrived => {}
            }
        }

        if all_arrived {
            ForcerState::Arrived
        } else {
            ForcerState::Approaching
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedStates(HashMap<&'static str, ForcerState>);

    #[async_trait]
    impl ForcerStateProvider for FixedStates {
        async fn forcer_state(&self, id: &ExecutionId, _metadata: &ForcerMetadata) -> ForcerState {
            self.0
                .get(id.as_str())
                .copied()
                .unwrap_or(ForcerState::Approaching)
        }
    }

    fn node(level: ForcerLevel, id: Option<&str>) -> Forcer {
        Forcer::new(level, "APP_ID", id.map(ExecutionId::new))
    }

    fn branch(wf: Option<&str>, step: Option<&str>) -> Forcer {
        node(ForcerLevel::Workflow, wf).with_child(
            node(ForcerLevel::Phase, None).with_child(node(ForcerLevel::Step, step)),
        )
    }

    fn tree() -> Forcer {
        node(ForcerLevel::Pipeline, Some("pipe"))
            .with_child(branch(Some("wf-a"), Some("step-a")))
            .with_child(branch(Some("wf-b"), None))
    }

    async fn state(states: &[(&'static str, ForcerState)]) -> ForcerState {
        let provider = FixedStates(states.iter().copied().collect());
        calculate_state(&tree(), &provider).await
    }

    #[tokio::test]
    async fn test_unresolved_branch_keeps_tree_approaching() {
        assert_eq!(
            state(&[("step-a", ForcerState::Arrived)]).await,
            ForcerState::Approaching
        );
    }

    #[tokio::test]
    async fn test_abandoned_workflow_settles_without_descending() {
        assert_eq!(
            state(&[("step-a", ForcerState::Arrived), ("wf-b", ForcerState::Abandoned)]).await,
            ForcerState::Abandoned
        );
    }

    #[tokio::test]
    async fn test_all_arrived() {
        assert_eq!(
            state(&[("step-a", ForcerState::Arrived), ("wf-b", ForcerState::Arrived)]).await,
            ForcerState::Arrived
        );
    }

    #[tokio::test]
    async fn test_settled_root_short_circuits() {
        assert_eq!(
            state(&[("pipe", ForcerState::Abandoned)]).await,
            ForcerState::Abandoned
        );
    }

    #[test]
    fn test_tree_shape_for_barrier() {
        use waypoint_core::{BarrierPipeline, BarrierWorkflow};

        let mut a = BarrierWorkflow::new("wf-a", "stage-a", "phase-a", "step-a");
        a.workflow_execution_id = Some(ExecutionId::new("wf-exec-a"));
        let b = BarrierWorkflow::new("wf-b", "stage-b", "phase-b", "step-b");
        let instance = BarrierInstance::new(
            "APP_ID",
            "sync-1",
            BarrierPipeline {
                execution_id: ExecutionId::new("pipe"),
                parallel_index: 0,
                workflows: vec![a, b],
            },
        );

        let root = Forcer::for_barrier(&instance);
        assert_eq!(root.metadata.level, ForcerLevel::Pipeline);
        assert_eq!(root.children.len(), 2);
        let wf = &root.children[0];
        assert_eq!(wf.id, Some(ExecutionId::new("wf-exec-a")));
        assert_eq!(wf.children[0].metadata.level, ForcerLevel::Phase);
        assert_eq!(wf.children[0].children[0].metadata.level, ForcerLevel::Step);
        assert!(root.children[1].id.is_none());
    }
}
