//! Delegate identity as seen by the coordination core.

use crate::{AccountId, DelegateId, DelegateScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker process registered for an account.
///
/// Owned by the delegate registry; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegate {
    /// Unique delegate identifier.
    pub id: DelegateId,

    /// Account the delegate serves.
    pub account_id: AccountId,

    /// User-assigned tags.
    pub tags: Vec<String>,

    /// Hostname of the delegate machine.
    pub host_name: String,

    /// Display name of the delegate.
    pub delegate_name: String,

    /// Scopes the delegate may serve. Empty means unrestricted.
    pub include_scopes: Vec<DelegateScope>,

    /// Scopes the delegate must never serve.
    pub exclude_scopes: Vec<DelegateScope>,

    /// Timestamp of the last heartbeat.
    pub last_heartbeat: DateTime<Utc>,
}

impl Delegate {
    /// Create a new Delegate with no tags or scopes.
    pub fn new(id: DelegateId, account_id: AccountId, host_name: impl Into<String>) -> Self {
        Self {
            id,
            account_id,
            tags: Vec::new(),
            host_name: host_name.into(),
            delegate_name: String::new(),
            include_scopes: Vec::new(),
            exclude_scopes: Vec::new(),
            last_heartbeat: Utc::now(),
        }
    }

    /// Builder method to add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method to set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.delegate_name = name.into();
        self
    }

    /// Builder method to add an include scope.
    pub fn with_include_scope(mut self, scope: DelegateScope) -> Self {
        self.include_scopes.push(scope);
        self
    }

    /// Builder method to add an exclude scope.
    pub fn with_exclude_scope(mut self, scope: DelegateScope) -> Self {
        self.exclude_scopes.push(scope);
        self
    }

    /// Builder method to set the last heartbeat.
    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat = at;
        self
    }

    /// Name used in human-readable messages.
    pub fn display_host(&self) -> &str {
        if self.host_name.is_empty() {
            self.id.as_str()
        } else {
            &self.host_name
        }
    }
}
