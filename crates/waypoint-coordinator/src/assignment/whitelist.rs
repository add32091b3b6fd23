//! Connection-result whitelist: lookups, revalidation and persistence.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use waypoint_core::{
    AccountId, ConnectionKey, DelegateConnectionResult, DelegateId, DelegateTask,
};

use super::AssignmentEngine;
use crate::error::{AssignError, StoreError};

impl AssignmentEngine {
    /// Whether every criteria of `task` has a validated result for
    /// `delegate_id` updated within the whitelist TTL.
    ///
    /// A task without criteria is whitelisted. Lookup failures count as not
    /// whitelisted.
    pub async fn is_whitelisted(&self, task: &DelegateTask, delegate_id: &DelegateId) -> bool {
        let now = self.state.clock.now();
        let ttl = self.state.config.whitelist_ttl;

        for criteria in self.criteria(task) {
            let key = ConnectionKey::new(task.account_id.clone(), delegate_id.clone(), criteria);
            let fresh = match self.connection_cache.get(&key).await {
                Ok(Some(result)) => result.validated && now - result.last_updated_at < ttl,
                Ok(None) => false,
                Err(e) => {
                    warn!(
                        delegate_id = %delegate_id,
                        criteria = %key.criteria,
                        error = %e,
                        "Connection result lookup failed"
                    );
                    false
                }
            };
            if !fresh {
                self.state.metrics.record_whitelist(false);
                return false;
            }
        }

        self.state.metrics.record_whitelist(true);
        true
    }

    /// Whether `delegate_id` should be asked to validate its connectivity
    /// for `task` before it is trusted with it.
    pub async fn should_validate(&self, task: &DelegateTask, delegate_id: &DelegateId) -> bool {
        let criteria = self.criteria(task);
        if criteria.is_empty() {
            return true;
        }

        let now = self.state.clock.now();
        let interval = self.state.config.revalidation_interval;

        for criteria in criteria {
            let key = ConnectionKey::new(task.account_id.clone(), delegate_id.clone(), criteria);
            match self.connection_cache.get(&key).await {
                Ok(Some(result)) => {
                    if result.validated || now - result.last_updated_at > interval {
                        return true;
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!(delegate_id = %delegate_id, error = %e, "Connection result lookup failed");
                    return true;
                }
            }
        }

        self.connected_whitelisted_delegates(task).await.is_empty()
    }

    /// Live delegates that can run `task` and are whitelisted for it.
    ///
    /// Delegates whose evaluation fails are skipped.
    pub async fn connected_whitelisted_delegates(&self, task: &DelegateTask) -> Vec<DelegateId> {
        let live = match self.live_delegates.live_delegates(&task.account_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(account_id = %task.account_id, error = %e, "Live delegate lookup failed");
                return Vec::new();
            }
        };

        let ctx = self.account_context(&task.account_id).await;
        let mut connected = Vec::new();
        for delegate in live.iter() {
            match self.can_assign_with(&ctx, delegate, task).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(delegate_id = %delegate.id, task_id = %task.id, error = %e, "Skipping delegate");
                    continue;
                }
            }
            if self.is_whitelisted(task, &delegate.id).await {
                connected.push(delegate.id.clone());
            }
        }
        connected
    }

    /// Uniform random pick among the connected, whitelisted delegates.
    pub async fn pick_first_attempt_delegate(&self, task: &DelegateTask) -> Option<DelegateId> {
        let candidates = self.connected_whitelisted_delegates(task).await;
        let picked = candidates.choose(&mut OsRng).cloned();
        debug!(task_id = %task.id, candidates = candidates.len(), picked = ?picked, "First attempt pick");
        picked
    }

    /// Extend validated results older than the refresh interval.
    ///
    /// Each extension is conditional on the record being unchanged since it
    /// was read. Returns how many records were extended.
    pub async fn refresh_whitelist(&self, task: &DelegateTask, delegate_id: &DelegateId) -> usize {
        let now = self.state.clock.now();
        let config = &self.state.config;
        let mut refreshed = 0;

        for criteria in self.criteria(task) {
            let key = ConnectionKey::new(task.account_id.clone(), delegate_id.clone(), criteria);
            let current = match self.state.connection_results.find(&key).await {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(e) => {
                    warn!(delegate_id = %delegate_id, error = %e, "Whitelist refresh lookup failed");
                    continue;
                }
            };
            if !current.validated || now - current.last_updated_at <= config.whitelist_refresh_interval {
                continue;
            }

            match self
                .state
                .connection_results
                .refresh_if_unchanged(&key, current.last_updated_at, now, now + config.whitelist_ttl)
                .await
            {
                Ok(true) => {
                    self.connection_cache.invalidate(&key);
                    refreshed += 1;
                }
                Ok(false) => {
                    debug!(delegate_id = %delegate_id, criteria = %key.criteria, "Whitelist entry changed concurrently");
                }
                Err(e) => {
                    warn!(delegate_id = %delegate_id, error = %e, "Whitelist refresh failed");
                }
            }
        }
        refreshed
    }

    /// Record connection results reported by delegates.
    ///
    /// Existing records only get their validated flag updated. Results with
    /// a blank criteria are ignored.
    pub async fn save_connection_results(
        &self,
        results: &[DelegateConnectionResult],
    ) -> Result<(), AssignError> {
        let store = &self.state.connection_results;

        for result in results.iter().filter(|r| !r.criteria.trim().is_empty()) {
            let key = result.key();
            let now = self.state.clock.now();

            if !store.set_validated(&key, result.validated, now).await? {
                let mut fresh = result.clone();
                fresh.last_updated_at = now;
                fresh.valid_until = now + self.state.config.whitelist_ttl;

                match store.insert(fresh).await {
                    Ok(()) => {}
                    Err(StoreError::DuplicateKey(k)) => {
                        debug!(key = %k, "Connection result inserted concurrently");
                        store.set_validated(&key, result.validated, now).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            self.connection_cache.invalidate(&key);
        }
        Ok(())
    }

    /// Delete the account's connection results, optionally for one delegate.
    pub async fn clear_connection_results(
        &self,
        account_id: &AccountId,
        delegate_id: Option<&DelegateId>,
    ) -> Result<u64, AssignError> {
        let deleted = self
            .state
            .connection_results
            .delete(account_id, delegate_id)
            .await?;
        self.connection_cache.invalidate_account(account_id, delegate_id);
        debug!(account_id = %account_id, deleted, "Cleared connection results");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{delegate, fixture, start, task};
    use super::*;
    use crate::clock::Clock;
    use crate::config::Config;
    use crate::memory::MemoryConnectionResultStore;
    use crate::state::CoordinatorState;
    use crate::store::ConnectionResultStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use waypoint_core::{DelegateScope, EnvironmentType};

    /// Another writer inserts the record between the first update attempt
    /// and the insert.
    #[derive(Default)]
    struct RacingStore {
        inner: MemoryConnectionResultStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl ConnectionResultStore for RacingStore {
        async fn find(
            &self,
            key: &ConnectionKey,
        ) -> Result<Option<DelegateConnectionResult>, StoreError> {
            self.inner.find(key).await
        }

        async fn insert(&self, result: DelegateConnectionResult) -> Result<(), StoreError> {
            self.inner.insert(result).await
        }

        async fn set_validated(
            &self,
            key: &ConnectionKey,
            validated: bool,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let winner = DelegateConnectionResult::new(
                    key.account_id.clone(),
                    key.delegate_id.clone(),
                    key.criteria.clone(),
                    !validated,
                    now,
                );
                self.inner.insert(winner).await?;
                return Ok(false);
            }
            self.inner.set_validated(key, validated, now).await
        }

        async fn refresh_if_unchanged(
            &self,
            key: &ConnectionKey,
            expected: DateTime<Utc>,
            last_updated_at: DateTime<Utc>,
            valid_until: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner
                .refresh_if_unchanged(key, expected, last_updated_at, valid_until)
                .await
        }

        async fn delete(
            &self,
            account_id: &AccountId,
            delegate_id: Option<&DelegateId>,
        ) -> Result<u64, StoreError> {
            self.inner.delete(account_id, delegate_id).await
        }
    }

    fn result(delegate: &str, validated: bool) -> DelegateConnectionResult {
        DelegateConnectionResult::new(
            AccountId::new("ACCOUNT_ID"),
            DelegateId::new(delegate),
            "criteria",
            validated,
            start(),
        )
    }

    #[tokio::test]
    async fn test_whitelist_expires_exactly_at_ttl() {
        let (_, clock, engine) = fixture();
        engine.save_connection_results(&[result("d1", true)]).await.unwrap();
        let d1 = DelegateId::new("d1");

        clock.advance(Duration::hours(6) - Duration::seconds(1));
        assert!(engine.is_whitelisted(&task(), &d1).await);

        clock.advance(Duration::seconds(1));
        assert!(!engine.is_whitelisted(&task(), &d1).await);
    }

    #[tokio::test]
    async fn test_unvalidated_result_is_not_whitelisted() {
        let (_, _, engine) = fixture();
        engine.save_connection_results(&[result("d1", false)]).await.unwrap();
        assert!(!engine.is_whitelisted(&task(), &DelegateId::new("d1")).await);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let (backend, _, engine) = fixture();
        engine.save_connection_results(&[result("d1", true)]).await.unwrap();
        engine.save_connection_results(&[result("d1", true)]).await.unwrap();
        assert_eq!(backend.connection_results.len(), 1);
    }

    #[tokio::test]
    async fn test_save_updates_only_validated_flag() {
        let (backend, clock, engine) = fixture();
        engine.save_connection_results(&[result("d1", true)]).await.unwrap();
        let key = result("d1", true).key();
        let valid_until = backend.connection_results.get(&key).unwrap().valid_until;

        clock.advance(Duration::minutes(1));
        engine.save_connection_results(&[result("d1", false)]).await.unwrap();

        let stored = backend.connection_results.get(&key).unwrap();
        assert!(!stored.validated);
        assert_eq!(stored.valid_until, valid_until);
        assert!(!engine.is_whitelisted(&task(), &DelegateId::new("d1")).await);
    }

    #[tokio::test]
    async fn test_blank_criteria_not_saved() {
        let (backend, _, engine) = fixture();
        let mut blank = result("d1", true);
        blank.criteria = "  ".into();
        engine.save_connection_results(&[blank]).await.unwrap();
        assert_eq!(backend.connection_results.len(), 0);
    }

    #[tokio::test]
    async fn test_should_validate_without_other_whitelisted_delegates() {
        let (backend, _, engine) = fixture();
        backend.delegates.add(delegate("d1"));
        engine.save_connection_results(&[result("d1", false)]).await.unwrap();

        // Fresh, unvalidated entry; but nobody is whitelisted.
        assert!(engine.connected_whitelisted_delegates(&task()).await.is_empty());
        assert!(engine.should_validate(&task(), &DelegateId::new("d1")).await);
    }

    #[tokio::test]
    async fn test_should_validate_gates() {
        let (backend, clock, engine) = fixture();
        backend.delegates.add(delegate("d1"));
        backend.delegates.add(delegate("d2"));
        engine
            .save_connection_results(&[result("d1", true), result("d2", false)])
            .await
            .unwrap();
        let d1 = DelegateId::new("d1");
        let d2 = DelegateId::new("d2");

        // d1 is whitelisted, so d2's fresh failure does not need a recheck.
        assert!(!engine.should_validate(&task(), &d2).await);
        // Validated entries are always rechecked.
        assert!(engine.should_validate(&task(), &d1).await);
        // Unknown delegates must validate.
        assert!(engine.should_validate(&task(), &DelegateId::new("d3")).await);

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        engine.connection_cache.invalidate_account(&AccountId::new("ACCOUNT_ID"), None);
        assert!(engine.should_validate(&task(), &d2).await);
    }

    #[tokio::test]
    async fn test_task_without_criteria_always_validates() {
        let (backend, _, engine) = fixture();
        backend.registry.set_group("SCRIPT", "SCRIPT");
        let t = DelegateTask::new(AccountId::new("ACCOUNT_ID"), "SCRIPT");
        assert!(engine.should_validate(&t, &DelegateId::new("d1")).await);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_excluded_from_connected_set() {
        let (backend, clock, engine) = fixture();
        backend.delegates.add(delegate("d1"));
        backend
            .delegates
            .add(delegate("stale").with_heartbeat(start() - Duration::minutes(6)));
        engine
            .save_connection_results(&[result("d1", true), result("stale", true)])
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));

        let connected = engine.connected_whitelisted_delegates(&task()).await;
        assert_eq!(connected, vec![DelegateId::new("d1")]);
        assert_eq!(
            engine.pick_first_attempt_delegate(&task()).await,
            Some(DelegateId::new("d1"))
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_falls_back_to_update() {
        let (backend, clock, _) = fixture();
        let racing = Arc::new(RacingStore::default());
        let base = backend.state(Config::default(), clock);
        let state = Arc::new(CoordinatorState {
            config: base.config.clone(),
            clock: base.clock.clone(),
            metrics: base.metrics.clone(),
            delegates: base.delegates.clone(),
            connection_results: racing.clone(),
            barriers: base.barriers.clone(),
            executions: base.executions.clone(),
            setup: base.setup.clone(),
            registry: base.registry.clone(),
            flags: base.flags.clone(),
            notifier: base.notifier.clone(),
        });
        let engine = AssignmentEngine::new(state);

        engine.save_connection_results(&[result("d1", true)]).await.unwrap();

        let stored = racing.inner.get(&result("d1", true).key()).unwrap();
        assert!(stored.validated);
        assert_eq!(racing.inner.len(), 1);
        assert!(engine.is_whitelisted(&task(), &DelegateId::new("d1")).await);
    }

    #[tokio::test]
    async fn test_connected_set_requires_can_assign() {
        let (backend, _, engine) = fixture();
        let prod = DelegateScope::named("prod").with_environment_types([EnvironmentType::Prod]);
        backend
            .delegates
            .add(delegate("broken").with_tag("canary").with_include_scope(DelegateScope::named("empty")));
        backend
            .delegates
            .add(delegate("excluded").with_tag("canary").with_exclude_scope(prod));
        backend.delegates.add(delegate("tagged").with_tag("canary"));
        backend.delegates.add(delegate("untagged"));
        engine
            .save_connection_results(&[
                result("broken", true),
                result("excluded", true),
                result("tagged", true),
                result("untagged", true),
            ])
            .await
            .unwrap();

        let canary = task().with_tag("canary");
        assert_eq!(
            engine.connected_whitelisted_delegates(&canary).await,
            vec![DelegateId::new("tagged")]
        );

        let gpu = task().with_tag("gpu");
        assert!(engine.connected_whitelisted_delegates(&gpu).await.is_empty());
        assert_eq!(engine.pick_first_attempt_delegate(&gpu).await, None);
    }

    #[tokio::test]
    async fn test_pick_none_when_nobody_whitelisted() {
        let (backend, _, engine) = fixture();
        backend.delegates.add(delegate("d1"));
        assert_eq!(engine.pick_first_attempt_delegate(&task()).await, None);
    }

    #[tokio::test]
    async fn test_refresh_extends_only_stale_validated_entries() {
        let (backend, clock, engine) = fixture();
        engine
            .save_connection_results(&[result("d1", true), result("d2", false)])
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(engine.refresh_whitelist(&task(), &DelegateId::new("d1")).await, 0);

        clock.advance(Duration::minutes(6));
        assert_eq!(engine.refresh_whitelist(&task(), &DelegateId::new("d1")).await, 1);
        assert_eq!(engine.refresh_whitelist(&task(), &DelegateId::new("d2")).await, 0);

        let stored = backend.connection_results.get(&result("d1", true).key()).unwrap();
        assert!(stored.validated);
        assert_eq!(stored.last_updated_at, clock.now());
        assert_eq!(stored.valid_until, clock.now() + Duration::hours(6));
    }

    #[tokio::test]
    async fn test_clear_connection_results() {
        let (backend, _, engine) = fixture();
        engine
            .save_connection_results(&[result("d1", true), result("d2", true)])
            .await
            .unwrap();
        let account = AccountId::new("ACCOUNT_ID");

        let d1 = DelegateId::new("d1");
        assert!(engine.is_whitelisted(&task(), &d1).await);
        assert_eq!(engine.clear_connection_results(&account, Some(&d1)).await.unwrap(), 1);
        assert!(!engine.is_whitelisted(&task(), &d1).await);

        assert_eq!(engine.clear_connection_results(&account, None).await.unwrap(), 1);
        assert_eq!(backend.connection_results.len(), 0);
    }
}
