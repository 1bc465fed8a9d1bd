//! Error types for the reconciliation engine

use bo_sync_core::api::{ArtifactKind, DirectoryError};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A directory call failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// An object that must exist was not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: ArtifactKind, id: String },

    /// Bad caller input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Unsupported config type: {0}")]
    UnsupportedConfigType(String),

    #[error("Synchronization is already in progress")]
    AlreadyInProgress,

    /// A spawned run panicked or was aborted
    #[error("Sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Retry predicate of the reconcile wrapper.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Directory(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Directory(e) => e.is_not_found(),
            SyncError::NotFound { .. } => true,
            _ => false,
        }
    }

    pub fn not_found(kind: ArtifactKind, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_directory_errors_retry() {
        let unavailable = SyncError::from(DirectoryError::Server {
            status: 503,
            message: "down".to_string(),
        });
        assert!(unavailable.is_transient());

        assert!(!SyncError::from(DirectoryError::NotFound).is_transient());
        assert!(!SyncError::validation("Report ID cannot be empty").is_transient());
        assert!(SyncError::from(DirectoryError::NotFound).is_not_found());
        assert!(!unavailable.is_not_found());
        assert!(!SyncError::AlreadyInProgress.is_transient());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            SyncError::AlreadyInProgress.to_string(),
            "Synchronization is already in progress"
        );
        assert_eq!(
            SyncError::not_found(ArtifactKind::Universe, "u1").to_string(),
            "Universe not found: u1"
        );
    }
}
