//! BusinessObjects directory access.
//!
//! [`DirectoryService`] is the contract the engine talks to. It is
//! implemented by [`BoRestClient`] over the infostore REST API and by
//! [`MemoryDirectory`] for fixtures and tests.

pub mod auth;
pub mod client;
pub mod crud;
pub mod directory;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{BoRestClient, RestDirectoryFactory, RestDirectoryFactoryBuilder};
pub use directory::{DirectoryFactory, DirectoryHandle, DirectoryService};
pub use error::{DirectoryError, Result};
pub use memory::{
    Call, CallJournal, FailureMode, Fixture, MemoryDirectory, MemoryDirectoryFactory, Operation,
};
pub use types::*;

pub use auth::{AuthManager, AuthState};
pub use crud::CrudOperations;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transience() {
        let rate_limit_error = DirectoryError::RateLimit { retry_after: Some(60) };
        assert!(rate_limit_error.is_transient());
        assert_eq!(rate_limit_error.retry_after(), Some(60));

        let auth_error = DirectoryError::Authentication("invalid credentials".to_string());
        assert!(!auth_error.is_transient());

        let server_error = DirectoryError::Server {
            status: 503,
            message: "service unavailable".to_string(),
        };
        assert!(server_error.is_transient());

        let client_error = DirectoryError::Server {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client_error.is_transient());
        assert!(!DirectoryError::NotFound.is_transient());
        assert!(DirectoryError::NotFound.is_not_found());
    }

    #[test]
    fn test_blank_id_message() {
        let err = DirectoryError::blank_id("Report");
        assert_eq!(err.to_string(), "Validation error: Report ID cannot be empty");
    }
}
