//! Include/exclude scope evaluation.

use tracing::warn;

use waypoint_core::{CoreError, Delegate, DelegateScope, DelegateTask, ScopeModel, SCOPE_WILDCARD};

use crate::store::{SetupLookup, TaskRegistry};

/// Outcome of checking a delegate's scopes against a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeVerdict {
    Allowed,
    /// The delegate has include scopes and none of them matched.
    NoIncludeMatch,
    /// An exclude scope matched.
    Excluded { scope: String },
}

impl ScopeVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Include,
    Exclude,
}

/// A task attribute as seen by scope rules.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fact {
    Missing,
    Wildcard,
    Value(String),
}

impl Fact {
    fn from_setup(value: Option<&str>) -> Self {
        match value {
            None => Fact::Missing,
            Some(SCOPE_WILDCARD) => Fact::Wildcard,
            Some(v) => Fact::Value(v.to_string()),
        }
    }

    fn from_lookup(value: Option<String>) -> Self {
        value.map(Fact::Value).unwrap_or(Fact::Missing)
    }

    // An unpopulated dimension never gets here. A wildcard satisfies an
    // include rule and never triggers an exclude rule.
    fn within(&self, allowed: &[String], mode: Mode) -> bool {
        match self {
            Fact::Missing => false,
            Fact::Wildcard => mode == Mode::Include,
            Fact::Value(v) => allowed.iter().any(|a| a == v),
        }
    }
}

/// Task attributes scope rules are evaluated on, looked up once per check.
#[derive(Debug, Clone)]
struct TaskFacts {
    application: Fact,
    environment: Fact,
    environment_type: Fact,
    task_group: Fact,
    infrastructure_mapping: Fact,
    infrastructure_definition: Fact,
    service: Fact,
}

/// Evaluates delegate scopes for one account's scope model.
pub struct ScopeMatcher<'a> {
    setup: &'a dyn SetupLookup,
    registry: &'a dyn TaskRegistry,
    model: ScopeModel,
}

impl<'a> ScopeMatcher<'a> {
    pub fn new(setup: &'a dyn SetupLookup, registry: &'a dyn TaskRegistry, model: ScopeModel) -> Self {
        Self {
            setup,
            registry,
            model,
        }
    }

    /// Check `delegate`'s scopes against `task`.
    ///
    /// An empty include list passes the include check. Any matching exclude
    /// scope rejects the delegate. A scope with no populated dimension is an
    /// error.
    pub async fn evaluate(
        &self,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<ScopeVerdict, CoreError> {
        if delegate.include_scopes.is_empty() && delegate.exclude_scopes.is_empty() {
            return Ok(ScopeVerdict::Allowed);
        }

        for scope in delegate.include_scopes.iter().chain(&delegate.exclude_scopes) {
            scope.validate(self.model)?;
        }

        let facts = self.task_facts(task).await;

        if !delegate.include_scopes.is_empty()
            && !delegate
                .include_scopes
                .iter()
                .any(|scope| self.matches(scope, &facts, Mode::Include))
        {
            return Ok(ScopeVerdict::NoIncludeMatch);
        }

        if let Some(scope) = delegate
            .exclude_scopes
            .iter()
            .find(|scope| self.matches(scope, &facts, Mode::Exclude))
        {
            return Ok(ScopeVerdict::Excluded {
                scope: scope.name.clone(),
            });
        }

        Ok(ScopeVerdict::Allowed)
    }

    fn matches(&self, scope: &DelegateScope, facts: &TaskFacts, mode: Mode) -> bool {
        let env_types: Vec<String> = scope
            .environment_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();

        let mut dimensions: Vec<(&[String], &Fact)> = vec![
            (env_types.as_slice(), &facts.environment_type),
            (scope.task_types.as_slice(), &facts.task_group),
            (scope.applications.as_slice(), &facts.application),
            (scope.environments.as_slice(), &facts.environment),
        ];
        match self.model {
            ScopeModel::Legacy => {
                dimensions.push((
                    scope.service_infrastructures.as_slice(),
                    &facts.infrastructure_mapping,
                ));
            }
            ScopeModel::InfrastructureDefinitions => {
                dimensions.push((
                    scope.infrastructure_definitions.as_slice(),
                    &facts.infrastructure_definition,
                ));
                dimensions.push((scope.services.as_slice(), &facts.service));
            }
        }

        dimensions
            .into_iter()
            .filter(|(allowed, _)| !allowed.is_empty())
            .all(|(allowed, fact)| fact.within(allowed, mode))
    }

    async fn task_facts(&self, task: &DelegateTask) -> TaskFacts {
        let application = Fact::from_setup(task.app_id.as_deref());
        let environment = Fact::from_setup(task.env_id.as_deref());

        let environment_type = match (&application, &environment) {
            (_, Fact::Wildcard) => Fact::Wildcard,
            (Fact::Value(app_id), Fact::Value(env_id)) => {
                match self.setup.environment_type(app_id, env_id).await {
                    Ok(env_type) => Fact::from_lookup(env_type.map(|t| t.as_str().to_string())),
                    Err(e) => {
                        warn!(app_id = %app_id, env_id = %env_id, error = %e, "Environment lookup failed");
                        Fact::Missing
                    }
                }
            }
            _ => Fact::Missing,
        };

        let task_group = Fact::from_lookup(self.registry.task_group_for(&task.task_type));
        let infrastructure_mapping = Fact::from_setup(task.infrastructure_mapping_id.as_deref());

        let (infrastructure_definition, service) = match (&application, &infrastructure_mapping) {
            (Fact::Value(app_id), Fact::Value(mapping_id))
                if self.model == ScopeModel::InfrastructureDefinitions =>
            {
                match self.setup.infrastructure_mapping(app_id, mapping_id).await {
                    Ok(Some(mapping)) => (
                        Fact::from_lookup(mapping.infra_definition_id),
                        Fact::from_lookup(mapping.service_id),
                    ),
                    Ok(None) => {
                        warn!(infrastructure_mapping_id = %mapping_id, "Infrastructure mapping not found");
                        (Fact::Missing, Fact::Missing)
                    }
                    Err(e) => {
                        warn!(infrastructure_mapping_id = %mapping_id, error = %e, "Infrastructure mapping lookup failed");
                        (Fact::Missing, Fact::Missing)
                    }
                }
            }
            _ => (Fact::Missing, Fact::Missing),
        };

        TaskFacts {
            application,
            environment,
            environment_type,
            task_group,
            infrastructure_mapping,
            infrastructure_definition,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySetupLookup, StaticTaskRegistry};
    use crate::store::InfrastructureMapping;
    use waypoint_core::{AccountId, DelegateId, EnvironmentType};

    fn delegate() -> Delegate {
        Delegate::new(DelegateId::new("DELEGATE_ID"), AccountId::new("ACCOUNT_ID"), "host")
    }

    fn task() -> DelegateTask {
        DelegateTask::new(AccountId::new("ACCOUNT_ID"), "HTTP")
            .with_app("APP_ID")
            .with_env("ENV_ID")
    }

    fn setup() -> MemorySetupLookup {
        let setup = MemorySetupLookup::default();
        setup.add_environment("APP_ID", "ENV_ID", EnvironmentType::Prod);
        setup.add_infrastructure_mapping(
            "APP_ID",
            InfrastructureMapping {
                id: "INFRA_MAPPING_ID".into(),
                infra_definition_id: Some("INFRA_DEF_ID".into()),
                service_id: Some("SERVICE_ID".into()),
            },
        );
        setup
    }

    fn prod() -> DelegateScope {
        DelegateScope::named("prod").with_environment_types([EnvironmentType::Prod])
    }

    fn non_prod() -> DelegateScope {
        DelegateScope::named("non-prod").with_environment_types([EnvironmentType::NonProd])
    }

    async fn verdict(model: ScopeModel, delegate: &Delegate, task: &DelegateTask) -> ScopeVerdict {
        let setup = setup();
        let registry = StaticTaskRegistry::default().with_group("HTTP", "HTTP");
        ScopeMatcher::new(&setup, &registry, model)
            .evaluate(delegate, task)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_environment_type_scopes() {
        let cases = vec![
            (vec![], vec![], true),
            (vec![prod()], vec![], true),
            (vec![prod()], vec![non_prod()], true),
            (vec![prod()], vec![prod()], false),
            (vec![], vec![non_prod()], true),
            (vec![], vec![prod()], false),
            (vec![non_prod()], vec![], false),
        ];

        for (include, exclude, allowed) in cases {
            let mut d = delegate();
            d.include_scopes = include;
            d.exclude_scopes = exclude;
            let v = verdict(ScopeModel::Legacy, &d, &task()).await;
            assert_eq!(v.is_allowed(), allowed, "{:?}", v);
        }
    }

    #[tokio::test]
    async fn test_first_matching_include_scope_wins() {
        let d = delegate()
            .with_include_scope(non_prod())
            .with_include_scope(DelegateScope::named("app").with_applications(["APP_ID"]));
        assert_eq!(verdict(ScopeModel::Legacy, &d, &task()).await, ScopeVerdict::Allowed);
    }

    #[tokio::test]
    async fn test_exclude_reports_scope_name() {
        let d = delegate().with_exclude_scope(prod());
        assert_eq!(
            verdict(ScopeModel::Legacy, &d, &task()).await,
            ScopeVerdict::Excluded {
                scope: "prod".into()
            }
        );
    }

    #[tokio::test]
    async fn test_all_populated_dimensions_must_match() {
        let scope = DelegateScope::named("app-and-env")
            .with_applications(["APP_ID"])
            .with_environments(["OTHER_ENV"]);
        let d = delegate().with_include_scope(scope);
        assert_eq!(
            verdict(ScopeModel::Legacy, &d, &task()).await,
            ScopeVerdict::NoIncludeMatch
        );
    }

    #[tokio::test]
    async fn test_wildcard_includes_but_never_excludes() {
        let wildcard_app = DelegateTask::new(AccountId::new("ACCOUNT_ID"), "HTTP")
            .with_app(SCOPE_WILDCARD)
            .with_env("ENV_ID");

        let d = delegate()
            .with_include_scope(DelegateScope::named("app").with_applications(["APPLICATION_ID"]));
        assert!(verdict(ScopeModel::Legacy, &d, &wildcard_app).await.is_allowed());

        let d = delegate()
            .with_exclude_scope(DelegateScope::named("app").with_applications(["APPLICATION_ID"]));
        assert!(verdict(ScopeModel::Legacy, &d, &wildcard_app).await.is_allowed());
    }

    #[tokio::test]
    async fn test_missing_task_value_does_not_match() {
        let no_env = DelegateTask::new(AccountId::new("ACCOUNT_ID"), "HTTP").with_app("APP_ID");
        let d = delegate().with_include_scope(prod());
        assert_eq!(
            verdict(ScopeModel::Legacy, &d, &no_env).await,
            ScopeVerdict::NoIncludeMatch
        );
    }

    #[tokio::test]
    async fn test_infrastructure_definition_model() {
        let scope = DelegateScope::named("infra")
            .with_infrastructure_definitions(["INFRA_DEF_ID"])
            .with_services(["SERVICE_ID"]);
        let d = delegate().with_include_scope(scope);

        let mapped = task().with_infrastructure_mapping("INFRA_MAPPING_ID");
        assert!(verdict(ScopeModel::InfrastructureDefinitions, &d, &mapped).await.is_allowed());

        let unknown = task().with_infrastructure_mapping("WRONG_INFRA_MAPPING_ID");
        assert_eq!(
            verdict(ScopeModel::InfrastructureDefinitions, &d, &unknown).await,
            ScopeVerdict::NoIncludeMatch
        );
    }

    #[tokio::test]
    async fn test_legacy_model_uses_service_infrastructures() {
        let scope = DelegateScope::named("legacy").with_service_infrastructures(["INFRA_MAPPING_ID"]);
        let d = delegate().with_include_scope(scope);

        let mapped = task().with_infrastructure_mapping("INFRA_MAPPING_ID");
        assert!(verdict(ScopeModel::Legacy, &d, &mapped).await.is_allowed());

        let other = task().with_infrastructure_mapping("OTHER");
        assert!(!verdict(ScopeModel::Legacy, &d, &other).await.is_allowed());
    }

    #[tokio::test]
    async fn test_task_group_dimension() {
        let scope = DelegateScope::named("scripts").with_task_types(["SCRIPT"]);
        let d = delegate().with_include_scope(scope);
        assert_eq!(
            verdict(ScopeModel::Legacy, &d, &task()).await,
            ScopeVerdict::NoIncludeMatch
        );
    }

    #[tokio::test]
    async fn test_empty_scope_is_configuration_error() {
        let setup = setup();
        let registry = StaticTaskRegistry::default();
        let d = delegate().with_exclude_scope(DelegateScope::named("empty"));
        let result = ScopeMatcher::new(&setup, &registry, ScopeModel::Legacy)
            .evaluate(&d, &task())
            .await;
        assert!(matches!(result, Err(CoreError::InvalidScope(name)) if name == "empty"));
    }
}
