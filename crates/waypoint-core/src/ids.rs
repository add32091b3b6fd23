//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

define_id!(
    /// Unique identifier for an Account (tenant).
    AccountId
);

define_id!(
    /// Unique identifier for a Delegate.
    DelegateId
);

define_id!(
    /// Unique identifier for a DelegateTask.
    TaskId
);

define_id!(
    /// Unique identifier for a BarrierInstance.
    BarrierId
);

define_id!(
    /// Identifier of a pipeline, workflow, phase or step execution instance.
    ExecutionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_id_generate() {
        let id1 = DelegateId::generate();
        let id2 = DelegateId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_display() {
        let id = BarrierId::new("barrier-123");
        assert_eq!(format!("{}", id), "barrier-123");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = AccountId::new("acct");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acct\"");
    }
}
