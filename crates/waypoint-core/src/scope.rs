//! Delegate scope rules.

use crate::{CoreError, EnvironmentType};
use serde::{Deserialize, Serialize};

/// Which infrastructure dimensions an account's scopes are evaluated on.
///
/// Chosen once per account; the two models are never mixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeModel {
    /// `service_infrastructures`, matched against the task's infrastructure mapping.
    #[default]
    Legacy,
    /// `infrastructure_definitions` and `services`.
    InfrastructureDefinitions,
}

/// A named rule restricting which work a delegate may serve.
///
/// Every empty list is an unpopulated dimension and imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateScope {
    pub name: String,
    pub environment_types: Vec<EnvironmentType>,
    pub task_types: Vec<String>,
    pub applications: Vec<String>,
    pub environments: Vec<String>,
    pub infrastructure_definitions: Vec<String>,
    pub services: Vec<String>,
    pub service_infrastructures: Vec<String>,
}

impl DelegateScope {
    /// Create an empty scope. It is invalid until a dimension is populated.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_environment_types(mut self, types: impl IntoIterator<Item = EnvironmentType>) -> Self {
        self.environment_types = types.into_iter().collect();
        self
    }

    pub fn with_task_types<S: Into<String>>(mut self, groups: impl IntoIterator<Item = S>) -> Self {
        self.task_types = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_applications<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.applications = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_environments<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.environments = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_infrastructure_definitions<S: Into<String>>(
        mut self,
        ids: impl IntoIterator<Item = S>,
    ) -> Self {
        self.infrastructure_definitions = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_services<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.services = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_service_infrastructures<S: Into<String>>(
        mut self,
        ids: impl IntoIterator<Item = S>,
    ) -> Self {
        self.service_infrastructures = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if at least one dimension considered by `model` is populated.
    pub fn is_populated(&self, model: ScopeModel) -> bool {
        let common = !self.environment_types.is_empty()
            || !self.task_types.is_empty()
            || !self.applications.is_empty()
            || !self.environments.is_empty();

        common
            || match model {
                ScopeModel::Legacy => !self.service_infrastructures.is_empty(),
                ScopeModel::InfrastructureDefinitions => {
                    !self.infrastructure_definitions.is_empty() || !self.services.is_empty()
                }
            }
    }

    /// Reject scopes that constrain nothing under `model`.
    pub fn validate(&self, model: ScopeModel) -> Result<(), CoreError> {
        if self.is_populated(model) {
            Ok(())
        } else {
            Err(CoreError::InvalidScope(self.name.clone()))
        }
    }
}
