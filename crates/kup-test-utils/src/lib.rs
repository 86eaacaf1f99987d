//! Testing utilities for the KUP workspace
//!
//! Collaborator test doubles and change fixtures shared by the crate test
//! suites.

#![allow(missing_docs)]

use async_trait::async_trait;
use kup_types::{
    ChangeCategory, CollaboratorError, DependencyRecord, DependencyStore, EntityKind,
    FileValidation, ImpactLevel, QualityValidator, StateStore, TechnologyChange, UrgencyLevel,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Dependency-mapping double backed by a fixed map
#[derive(Default)]
pub struct InMemoryDependencyStore {
    records: Mutex<HashMap<String, Vec<DependencyRecord>>>,
    fail: Mutex<bool>,
}

impl InMemoryDependencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, technology: &str, records: Vec<DependencyRecord>) {
        self.records.lock().insert(technology.to_string(), records);
    }

    /// Make every subsequent call fail with an unavailability error
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl DependencyStore for InMemoryDependencyStore {
    async fn dependencies_for(
        &self,
        technology: &str,
    ) -> Result<Vec<DependencyRecord>, CollaboratorError> {
        if *self.fail.lock() {
            return Err(CollaboratorError::Unavailable(
                "dependency store offline".to_string(),
            ));
        }
        Ok(self
            .records
            .lock()
            .get(technology)
            .cloned()
            .unwrap_or_default())
    }
}

/// Quality-framework double returning scripted per-path scores
pub struct ScriptedValidator {
    scores: Mutex<HashMap<PathBuf, f64>>,
    default_score: f64,
    fail: Mutex<bool>,
}

impl ScriptedValidator {
    /// Validator returning `default_score` for unscripted paths
    #[must_use]
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
            default_score,
            fail: Mutex::new(false),
        }
    }

    pub fn script(&self, path: impl Into<PathBuf>, score: f64) {
        self.scores.lock().insert(path.into(), score);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl QualityValidator for ScriptedValidator {
    async fn validate_file(&self, path: &Path) -> Result<FileValidation, CollaboratorError> {
        if *self.fail.lock() {
            return Err(CollaboratorError::Backend(
                "validation framework offline".to_string(),
            ));
        }
        let score = self
            .scores
            .lock()
            .get(path)
            .copied()
            .unwrap_or(self.default_score);
        if score >= 60.0 {
            Ok(FileValidation::passing(score))
        } else {
            Ok(FileValidation::failing(
                score,
                vec!["scripted quality issue".to_string()],
            ))
        }
    }
}

/// State-store double recording every write
#[derive(Default)]
pub struct RecordingStateStore {
    saved: Mutex<Vec<(EntityKind, serde_json::Value)>>,
    fail: Mutex<bool>,
}

impl RecordingStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Everything saved so far
    #[must_use]
    pub fn saved(&self) -> Vec<(EntityKind, serde_json::Value)> {
        self.saved.lock().clone()
    }

    /// Number of writes for one entity kind
    #[must_use]
    pub fn saved_count(&self, entity: EntityKind) -> usize {
        self.saved.lock().iter().filter(|(e, _)| *e == entity).count()
    }
}

#[async_trait]
impl StateStore for RecordingStateStore {
    async fn save(
        &self,
        entity: EntityKind,
        record: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if *self.fail.lock() {
            return Err(CollaboratorError::Unavailable(
                "state store offline".to_string(),
            ));
        }
        self.saved.lock().push((entity, record));
        Ok(())
    }

    async fn query(
        &self,
        entity: EntityKind,
        filter: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, CollaboratorError> {
        if *self.fail.lock() {
            return Err(CollaboratorError::Unavailable(
                "state store offline".to_string(),
            ));
        }
        let filter_map = filter.as_object().cloned().unwrap_or_default();
        Ok(self
            .saved
            .lock()
            .iter()
            .filter(|(e, record)| {
                *e == entity
                    && filter_map
                        .iter()
                        .all(|(k, v)| record.get(k) == Some(v))
            })
            .map(|(_, record)| record.clone())
            .collect())
    }
}

/// A breaking change with versions, high impact, immediate urgency
#[must_use]
pub fn breaking_change(technology: &str) -> TechnologyChange {
    TechnologyChange::new(technology, ChangeCategory::Breaking)
        .with_versions(Some("13.4.0".to_string()), Some("14.0.0".to_string()))
        .with_impact(ImpactLevel::High)
        .with_urgency(UrgencyLevel::Immediate)
        .with_confidence(0.9)
}

/// A low-stakes bug fix that auto-approval rules accept
#[must_use]
pub fn trivial_fix(technology: &str) -> TechnologyChange {
    TechnologyChange::new(technology, ChangeCategory::BugFix)
        .with_impact(ImpactLevel::Low)
        .with_urgency(UrgencyLevel::Low)
        .with_confidence(0.9)
}

/// An urgent high-confidence security update
#[must_use]
pub fn security_update(technology: &str) -> TechnologyChange {
    TechnologyChange::new(technology, ChangeCategory::Security)
        .with_impact(ImpactLevel::High)
        .with_urgency(UrgencyLevel::Immediate)
        .with_confidence(0.95)
}

/// A temp workspace with a knowledge file, a command file, and a config file
/// all referencing the given technology and version
pub struct FixtureWorkspace {
    pub dir: tempfile::TempDir,
    pub knowledge: PathBuf,
    pub command: PathBuf,
    pub config: PathBuf,
}

impl FixtureWorkspace {
    pub async fn create(technology: &str, version: &str) -> Self {
        let dir = tempfile::TempDir::new().expect("temp workspace");
        let knowledge_dir = dir.path().join("knowledge");
        let command_dir = dir.path().join("commands");
        tokio::fs::create_dir_all(&knowledge_dir).await.expect("mkdir");
        tokio::fs::create_dir_all(&command_dir).await.expect("mkdir");

        let knowledge = knowledge_dir.join("knowledge.md");
        tokio::fs::write(
            &knowledge,
            format!("# Stack notes\n\n{technology}: {version} is pinned here.\n"),
        )
        .await
        .expect("write knowledge");

        let command = command_dir.join("setup.md");
        tokio::fs::write(
            &command,
            format!("```bash\nnpm install {technology}@{version}\n```\n"),
        )
        .await
        .expect("write command");

        let config = dir.path().join("package.json");
        tokio::fs::write(
            &config,
            format!("{{\"dependencies\":{{\"{}\":\"{version}\"}}}}", technology.to_lowercase()),
        )
        .await
        .expect("write config");

        Self {
            dir,
            knowledge,
            command,
            config,
        }
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }
}
