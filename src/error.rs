//! Error types for the session trust agent.

use crate::session::SessionId;
use thiserror::Error;

/// Errors surfaced to callers of the session manager.
#[derive(Debug, Error)]
pub enum TrustError {
    /// No session with this id exists (never created, or swept).
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from the external reputation lookup. These never abort an
/// analysis; the network analyzer treats them as an unknown origin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup timed out after {0}ms")]
    Timeout(u64),

    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}
