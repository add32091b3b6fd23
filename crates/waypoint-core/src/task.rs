//! Delegate task types.

use crate::{AccountId, DelegateId, TaskId};
use serde::{Deserialize, Serialize};

/// Setup value that matches every include scope and no exclude scope.
pub const SCOPE_WILDCARD: &str = "__ALL__";

/// A unit of work waiting for a delegate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    /// Unique task identifier.
    pub id: TaskId,

    /// Account that owns the task.
    pub account_id: AccountId,

    /// Application the task runs for.
    pub app_id: Option<String>,

    /// Environment the task targets.
    pub env_id: Option<String>,

    /// Infrastructure mapping the task deploys to.
    pub infrastructure_mapping_id: Option<String>,

    /// Task type name, resolved to a task group by the task registry.
    pub task_type: String,

    /// Selectors a delegate must carry.
    pub tags: Vec<String>,

    /// Delegate the task was handed to, if any.
    pub delegate_id: Option<DelegateId>,

    /// Type-specific payload; criteria are derived from it.
    pub parameters: serde_json::Value,
}

impl DelegateTask {
    /// Create a new DelegateTask.
    pub fn new(account_id: AccountId, task_type: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            account_id,
            app_id: None,
            env_id: None,
            infrastructure_mapping_id: None,
            task_type: task_type.into(),
            tags: Vec::new(),
            delegate_id: None,
            parameters: serde_json::Value::Null,
        }
    }

    /// Builder method to set the application.
    pub fn with_app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Builder method to set the environment.
    pub fn with_env(mut self, env_id: impl Into<String>) -> Self {
        self.env_id = Some(env_id.into());
        self
    }

    /// Builder method to set the infrastructure mapping.
    pub fn with_infrastructure_mapping(mut self, id: impl Into<String>) -> Self {
        self.infrastructure_mapping_id = Some(id.into());
        self
    }

    /// Builder method to require a selector.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method to set the payload.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builder method to record the assigned delegate.
    pub fn assigned_to(mut self, delegate_id: DelegateId) -> Self {
        self.delegate_id = Some(delegate_id);
        self
    }

    /// Required selectors, trimmed and lower-cased, blanks dropped.
    pub fn required_selectors(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}
