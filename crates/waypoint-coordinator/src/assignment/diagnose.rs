//! Human-readable explanations for tasks no delegate picked up.

use std::fmt::Write;

use tracing::warn;

use waypoint_core::{Delegate, DelegateTask};

use super::{match_selectors, AccountContext, AssignmentEngine, ScopeVerdict};
use crate::error::AssignError;

const NO_ACTIVE_DELEGATES: &str = "There were no active delegates to complete the task.";
const NONE_ELIGIBLE: &str = "None of the active delegates were eligible to complete the task.";
const UNKNOWN: &str = "Unknown";

impl AssignmentEngine {
    /// Explain why `task` was not completed.
    ///
    /// Never fails; if the explanation itself cannot be built the answer is
    /// "Unknown".
    pub async fn diagnose_assignment_failure(&self, task: &DelegateTask) -> String {
        match self.try_diagnose(task).await {
            Ok(message) => message,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Failed to diagnose assignment");
                UNKNOWN.to_string()
            }
        }
    }

    async fn try_diagnose(&self, task: &DelegateTask) -> Result<String, AssignError> {
        let live = self.live_delegates.live_delegates(&task.account_id).await?;
        if live.is_empty() {
            return Ok(NO_ACTIVE_DELEGATES.to_string());
        }

        if self.connected_whitelisted_delegates(task).await.is_empty() {
            let ctx = self.account_context(&task.account_id).await;
            let mut message = format!("{NONE_ELIGIBLE}\n\n");
            for delegate in live.iter() {
                let reason = match self.ineligibility(&ctx, delegate, task).await {
                    Ok(reason) => reason,
                    Err(e) => {
                        warn!(delegate_id = %delegate.id, error = %e, "Delegate evaluation failed");
                        "Unknown error".to_string()
                    }
                };
                writeln!(message, " ===> {}: {}", delegate.display_host(), reason).ok();
            }
            return Ok(message);
        }

        if let Some(delegate_id) = &task.delegate_id {
            let host = self
                .state
                .delegates
                .get(&task.account_id, delegate_id)
                .await?
                .map(|d| d.display_host().to_string())
                .unwrap_or_else(|| delegate_id.to_string());
            return Ok(format!(
                "Delegate {host} ({delegate_id}) was assigned the task but did not complete it in time."
            ));
        }

        Ok("No delegate picked up the task before it timed out.".to_string())
    }

    // The first check a delegate fails, in evaluation order.
    async fn ineligibility(
        &self,
        ctx: &AccountContext,
        delegate: &Delegate,
        task: &DelegateTask,
    ) -> Result<String, AssignError> {
        match self.scope_verdict(ctx, delegate, task).await? {
            ScopeVerdict::Allowed => {}
            ScopeVerdict::NoIncludeMatch => {
                return Ok("Not in scope: no include scope matched the task".to_string());
            }
            ScopeVerdict::Excluded { scope } => {
                return Ok(format!("Not in scope: excluded by scope '{scope}'"));
            }
        }

        let selectors = match_selectors(delegate, task, ctx.host_name_selectors);
        if selectors.no_tags {
            return Ok(format!(
                "Missing selectors: delegate has no tags, task requires [{}]",
                selectors.missing.join(", ")
            ));
        }
        if !selectors.missing.is_empty() {
            return Ok(format!("Missing selectors: [{}]", selectors.missing.join(", ")));
        }

        if !self.is_whitelisted(task, &delegate.id).await {
            return Ok("Not whitelisted: no recent validated connection for the task".to_string());
        }

        Ok("Eligible".to_string())
    }
}
