//! Cached delegate connectivity results.

use crate::{AccountId, DelegateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key of a connection result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub account_id: AccountId,
    pub delegate_id: DelegateId,
    pub criteria: String,
}

impl ConnectionKey {
    pub fn new(account_id: AccountId, delegate_id: DelegateId, criteria: impl Into<String>) -> Self {
        Self {
            account_id,
            delegate_id,
            criteria: criteria.into(),
        }
    }
}

/// Outcome of a delegate validating that it can serve a criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateConnectionResult {
    pub account_id: AccountId,
    pub delegate_id: DelegateId,
    pub criteria: String,
    pub validated: bool,
    pub last_updated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl DelegateConnectionResult {
    /// Create a result reported at `now`.
    pub fn new(
        account_id: AccountId,
        delegate_id: DelegateId,
        criteria: impl Into<String>,
        validated: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            delegate_id,
            criteria: criteria.into(),
            validated,
            last_updated_at: now,
            valid_until: now,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(
            self.account_id.clone(),
            self.delegate_id.clone(),
            self.criteria.clone(),
        )
    }
}
