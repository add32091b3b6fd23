//! Delegate assignment - decides which delegate may run a task.
//!
//! A delegate can run a task when its scopes admit the task and it carries
//! every selector the task requires. Among eligible delegates with a recent
//! heartbeat, those with a validated connection result for the task's
//! criteria are whitelisted and preferred for the first dispatch attempt.

mod diagnose;
pub mod scope;
pub mod selector;
mod whitelist;

use std::sync::Arc;

use tracing::debug;

use waypoint_core::{AccountId, Delegate, DelegateTask, ScopeModel};

use crate::cache::{AccountDelegatesCache, ConnectionResultCache};
use crate::error::AssignError;
use crate::state::CoordinatorState;

pub use scope::{ScopeMatcher, ScopeVerdict};
pub use selector::{effective_tags, match_selectors, SelectorMatch};

/// Selects the infrastructure-definition scope model when on.
pub const INFRA_MAPPING_REFACTOR: &str = "INFRA_MAPPING_REFACTOR";

/// Adds host and delegate name to a delegate's selectable tags when on.
pub const DELEGATE_NAME_SELECTORS: &str = "DELEGATE_NAME_SELECTORS";

/// Feature-flag decisions for one account, resolved once and passed down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountContext {
    pub scope_model: ScopeModel,
    pub host_name_selectors: bool,
}

/// Delegate assignment engine.
pub struct AssignmentEngine {
    state: Arc<CoordinatorState>,
    connection_cache: ConnectionResultCache,
    live_delegates: AccountDelegatesCache,
}

impl AssignmentEngine {
    /// Create a new AssignmentEngine, building its caches.
    pub fn new(state: Arc<CoordinatorState>) -> Self {
        let config = &state.config;
        let connection_cache = ConnectionResultCache::new(
            state.connection_results.clone(),
            state.clock.clone(),
            config.connection_cache_ttl,
            config.connection_cache_capacity,
        );
        let live_delegates = AccountDelegatesCache::new(
            state.delegates.clone(),
            state.clock.clone(),
            config.heartbeat_liveness,
            config.account_delegates_ttl,
            config.account_delegates_capacity,
        );

        Self {
            state,
            connection_cache,
            live_delegates,
        }
    }

    /// Resolve the account's feature flags.
    pub async fn account_context(&self, account_id: &AccountId) -> AccountContext {
        let scope_model = if self.state.flags.is_enabled(INFRA_MAPPING_REFACTOR, account_id).await {
            ScopeModel::InfrastructureDefinitions
        } else {
            ScopeModel::Legacy
        };
        let host_name_selectors = self
            .state
            .flags
            .is_enabled(DELEGATE_NAME_SELECTORS, account_id)
            .await;

        AccountContext {
            scope_model,
            host_name_selectors,
        }
    }

    /// Whether `delegate` may run `task`: scopes and selectors both pass.
    pub async fn can_assign(
        &self,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<bool, AssignError> {
        let ctx = self.account_context(&task.account_id).await;
        self.can_assign_with(&ctx, delegate, task).await
    }

    /// `can_assign` with the account context already resolved.
    pub async fn can_assign_with(
        &self,
        ctx: &AccountContext,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<bool, AssignError> {
        let assignable = self.can_assign_scopes(ctx, delegate, task).await?
            && self.can_assign_selectors(ctx, delegate, task);

        self.state.metrics.record_assignment(assignable);
        debug!(
            delegate_id = %delegate.id,
            task_id = %task.id,
            assignable,
            "Evaluated delegate for task"
        );
        Ok(assignable)
    }

    pub async fn can_assign_scopes(
        &self,
        ctx: &AccountContext,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<bool, AssignError> {
        Ok(self.scope_verdict(ctx, delegate, task).await?.is_allowed())
    }

    pub fn can_assign_selectors(
        &self,
        ctx: &AccountContext,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> bool {
        match_selectors(delegate, task, ctx.host_name_selectors).is_match()
    }

    pub async fn scope_verdict(
        &self,
        ctx: &AccountContext,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<ScopeVerdict, AssignError> {
        let matcher = ScopeMatcher::new(
            self.state.setup.as_ref(),
            self.state.registry.as_ref(),
            ctx.scope_model,
        );
        Ok(matcher.evaluate(delegate, task).await?)
    }

    /// Non-blank criteria of the task.
    fn criteria(&self, task: &DelegateTask) -> Vec<String> {
        self.state
            .registry
            .criteria_for(task)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::memory::MemoryBackend;
    use chrono::{DateTime, TimeZone, Utc};
    use waypoint_core::{DelegateId, DelegateScope, EnvironmentType};

    pub(crate) fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn fixture() -> (Arc<MemoryBackend>, Arc<ManualClock>, AssignmentEngine) {
        let clock = Arc::new(ManualClock::new(start()));
        let backend = Arc::new(MemoryBackend::default());
        backend.registry.set_group("HTTP", "HTTP");
        backend.registry.set_criteria("HTTP", "criteria");
        backend
            .setup
            .add_environment("APP_ID", "ENV_ID", EnvironmentType::Prod);
        let state = backend.state(Config::default(), clock.clone());
        (backend, clock, AssignmentEngine::new(state))
    }

    pub(crate) fn delegate(id: &str) -> Delegate {
        Delegate::new(DelegateId::new(id), AccountId::new("ACCOUNT_ID"), format!("{id}-host"))
            .with_heartbeat(start())
    }

    pub(crate) fn task() -> DelegateTask {
        DelegateTask::new(AccountId::new("ACCOUNT_ID"), "HTTP")
            .with_app("APP_ID")
            .with_env("ENV_ID")
    }

    #[tokio::test]
    async fn test_untagged_delegate_cannot_take_tagged_task() {
        let (_, _, engine) = fixture();
        let d1 = delegate("d1");
        let t = task().with_tag("canary");
        assert!(!engine.can_assign(&d1, &t).await.unwrap());
    }

    #[tokio::test]
    async fn test_can_assign_is_conjunction_of_scopes_and_selectors() {
        let (_, _, engine) = fixture();
        let ctx = engine.account_context(&AccountId::new("ACCOUNT_ID")).await;

        let delegates = vec![
            delegate("plain"),
            delegate("tagged").with_tag("canary"),
            delegate("prod-only").with_include_scope(
                DelegateScope::named("prod").with_environment_types([EnvironmentType::Prod]),
            ),
            delegate("no-prod").with_tag("canary").with_exclude_scope(
                DelegateScope::named("prod").with_environment_types([EnvironmentType::Prod]),
            ),
        ];
        let tasks = vec![task(), task().with_tag("canary")];

        for d in &delegates {
            for t in &tasks {
                let scopes = engine.can_assign_scopes(&ctx, d, t).await.unwrap();
                let selectors = engine.can_assign_selectors(&ctx, d, t);
                assert_eq!(engine.can_assign(d, t).await.unwrap(), scopes && selectors);
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_scope_surfaces_to_caller() {
        let (_, _, engine) = fixture();
        let d = delegate("d").with_include_scope(DelegateScope::named("empty"));
        assert!(matches!(
            engine.can_assign(&d, &task()).await,
            Err(AssignError::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn test_account_context_follows_flags() {
        let (backend, _, engine) = fixture();
        let account = AccountId::new("ACCOUNT_ID");
        assert_eq!(engine.account_context(&account).await, AccountContext::default());

        backend.flags.enable(INFRA_MAPPING_REFACTOR, &account);
        backend.flags.enable(DELEGATE_NAME_SELECTORS, &account);
        let ctx = engine.account_context(&account).await;
        assert_eq!(ctx.scope_model, ScopeModel::InfrastructureDefinitions);
        assert!(ctx.host_name_selectors);
    }

    #[tokio::test]
    async fn test_host_name_selector_behind_flag() {
        let (backend, _, engine) = fixture();
        let d = delegate("d1");
        let t = task().with_tag("D1-HOST");
        assert!(!engine.can_assign(&d, &t).await.unwrap());

        backend
            .flags
            .enable(DELEGATE_NAME_SELECTORS, &AccountId::new("ACCOUNT_ID"));
        assert!(engine.can_assign(&d, &t).await.unwrap());
    }
}
