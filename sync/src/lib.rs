//! Reconciliation engine for BusinessObjects environments.
//!
//! Copies folders, connections, universes and reports from a source
//! environment into a target environment:
//! - per-type reconcilers with existence gating and forced overwrite
//! - batched concurrent report writes
//! - universe dependency propagation
//! - ordered full and incremental runs
//! - configuration comparison between environments
//! - a single-flight scheduler with run status

pub mod batch;
pub mod comparator;
pub mod dependencies;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod options;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

pub use batch::run_batched;
pub use comparator::{ComparisonDocument, ConfigComparator, ConfigType};
pub use dependencies::DependencyPropagator;
pub use environment::EnvironmentResolver;
pub use error::{Result, SyncError};
pub use metrics::{MetricsCollector, RunMetrics};
pub use options::{Selector, SyncOptions};
pub use orchestrator::{OrchestratorSettings, SyncOrchestrator};
pub use reconcile::{FolderReconciler, Reconcilable, Reconciler};
pub use retry::{with_retry, RetryPolicy};
pub use scheduler::{join_run, SyncRunner, SyncScheduler, SyncStatus};

#[cfg(test)]
mod scenario_tests;
