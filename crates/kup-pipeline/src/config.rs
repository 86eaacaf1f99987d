//! Pipeline configuration
//!
//! One YAML document covers the orchestrator plus the tuning knobs of the
//! components it drives. Every field has a default, so an empty document is
//! a valid configuration.

use kup_executor::ExecutorConfig;
use kup_impact::ImpactConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration load failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Orchestrator-level knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// In-flight execution cap; excess calls are rejected, not queued
    pub max_concurrent_executions: usize,
    /// Per-stage timeout; a timeout counts as a stage failure
    pub stage_timeout_secs: u64,
    /// Consecutive failures before a stage breaker opens
    pub breaker_failure_threshold: u32,
    /// Seconds an open breaker waits before allowing a trial
    pub breaker_cooldown_secs: u64,
    /// Retired executions kept before trimming
    pub history_max: usize,
    /// History size after a trim
    pub history_trim_to: usize,
    /// Interval of the approval-expiry sweeper
    pub approval_sweep_interval_secs: u64,
    /// Poll interval while an execution waits on a pending approval
    pub approval_poll_interval_ms: u64,
    /// Failure rate above which health degrades
    pub failure_rate_alert_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            stage_timeout_secs: 3600,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 300,
            history_max: 1000,
            history_trim_to: 500,
            approval_sweep_interval_secs: 60,
            approval_poll_interval_ms: 250,
            failure_rate_alert_threshold: 0.2,
        }
    }
}

/// Post-update quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    /// Mean quality score (0..100) below which the run is rolled back
    pub min_quality_score: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_quality_score: 75.0,
        }
    }
}

/// Backup store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: PathBuf,
    pub retention_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
            retention_days: 30,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: OrchestratorConfig,
    pub impact: ImpactConfig,
    pub execution: ExecutorConfig,
    pub validation: ValidationConfig,
    pub backup: BackupConfig,
}

impl PipelineConfig {
    /// Load from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
