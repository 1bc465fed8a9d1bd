//! Core types for bo-sync.
//!
//! This crate holds the artifact model shared by every environment, the
//! [`DirectoryService`](api::DirectoryService) contract with its REST and
//! in-memory implementations, and the configuration file model.

pub mod api;
pub mod config;

pub use api::{
    Artifact, ArtifactKind, ArtifactRef, Connection, DirectoryError, DirectoryFactory,
    DirectoryHandle, DirectoryService, ListOptions, Report, Universe,
};
pub use config::{Backend, BoSyncConfig, Environment};
