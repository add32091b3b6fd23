//! Core domain errors.

use thiserror::Error;

/// Core domain errors for Waypoint.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A scope rule constrains nothing. This is a configuration error, never
    /// a vacuous match.
    #[error("Delegate scope '{0}' has no populated dimension")]
    InvalidScope(String),
}
