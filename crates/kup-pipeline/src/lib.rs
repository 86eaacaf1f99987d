//! Quality-gated knowledge-update pipeline
//!
//! The orchestrator drives each detected technology change through a fixed
//! stage sequence: impact analysis, approval processing, update execution,
//! and post-update validation. Stages are gated by per-stage circuit
//! breakers, concurrent executions are capped with rejection backpressure,
//! and a validation score below the configured floor rolls back every
//! touched file.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod breaker;
pub mod config;
pub mod execution;
pub mod orchestrator;

pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{
    BackupConfig, ConfigError, OrchestratorConfig, PipelineConfig, ValidationConfig,
};
pub use execution::{PipelineExecution, PipelineStage, PipelineStatus, ValidationSummary};
pub use orchestrator::{
    HealthState, PipelineError, PipelineHealth, PipelineMetrics, PipelineOrchestrator,
    StageBreakerHealth,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
