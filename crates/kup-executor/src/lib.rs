//! Backup-aware update execution
//!
//! Applies approved updates to downstream files through per-category
//! strategies, in fixed-size batches with concurrency inside each batch.
//! Every file is snapshotted before it is touched; individual updates roll
//! back on critical validation failures, and a batch past the failure
//! threshold rolls back its successes and aborts the run.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod executor;
pub mod result;
pub mod strategy;

pub use executor::{ExecutorConfig, ExecutorMetrics, UpdateExecutor};
pub use result::{UpdateResult, UpdateStatus, UpdateValidation, ValidationVerdict};
pub use strategy::{
    default_strategies, AppliedUpdate, CommandStrategy, ConfigStrategy, KnowledgeStrategy,
    UpdateError, UpdateStrategy,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
