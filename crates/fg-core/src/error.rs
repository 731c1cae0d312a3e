//! Error type for the decision engine.

use crate::types::TabId;

/// Errors surfaced by the engine and its collaborators.
///
/// None of these are fatal: callers log them and carry on, failing open on
/// unparseable URLs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Tab operation failed for tab {tab_id}: {reason}")]
    TabOperationFailed { tab_id: TabId, reason: String },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Website already listed as {0}")]
    AlreadyListed(String),
}
