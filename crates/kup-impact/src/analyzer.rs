//! Impact analyzer
//!
//! Orchestrates the analysis steps: dependency resolution, optional pattern
//! scanning, graph construction, cascade traversal, and the risk/effort/
//! quality heuristics. Internal failures degrade the assessment (error marker
//! in the risk field, safe-default impact level) instead of propagating, so
//! the pipeline can proceed conservatively.

use crate::graph::{DependencyGraph, PathHeuristic, RelatednessPolicy};
use crate::patterns::{categorize_path, PatternRegistry};
use crate::types::{
    assessment_id_for, AffectedFile, DependencyKind, EffortEstimate, ImpactAssessment,
    QualityImpact, RiskAssessment, RiskLevel, UpdatePriority,
};
use chrono::Utc;
use kup_types::{
    ChangeCategory, CollaboratorError, Criticality, DependencyRecord, DependencyStore,
    FileCategory, ImpactLevel, TechnologyChange, UrgencyLevel, ValidationStatus,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Confidence assigned to files found only by pattern scanning
const PATTERN_MATCH_CONFIDENCE: f64 = 0.6;

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Scan candidate files for pattern matches beyond known dependents
    pub comprehensive_scan: bool,
    /// Fixed candidate file set for the comprehensive scan
    pub scan_paths: Vec<PathBuf>,
    /// Cascade DFS depth bound
    pub max_cascade_depth: usize,
    /// Paths longer than this are flagged high-risk
    pub high_risk_cascade_len: usize,
    /// Assessment cache TTL in seconds
    pub cache_ttl_secs: u64,
    /// Assessment cache capacity
    pub cache_capacity: u64,
    /// Per-file confidence below this counts as a risk factor
    pub low_confidence_cutoff: f64,
    /// Affected-file count above this counts as a risk factor
    pub many_files_threshold: usize,
    /// Path tokens the default relatedness heuristic treats as related
    pub related_tokens: Vec<String>,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            comprehensive_scan: true,
            scan_paths: Vec::new(),
            max_cascade_depth: 3,
            high_risk_cascade_len: 3,
            cache_ttl_secs: 24 * 3600,
            cache_capacity: 100,
            low_confidence_cutoff: 0.6,
            many_files_threshold: 50,
            related_tokens: vec![
                "knowledge".to_string(),
                "commands".to_string(),
                "docs".to_string(),
            ],
        }
    }
}

/// Analyzer metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct ImpactMetrics {
    pub analyses: u64,
    pub cache_hits: u64,
    pub degraded_analyses: u64,
    pub avg_analysis_ms: f64,
    pub avg_affected_files: f64,
}

/// Cached, degradation-tolerant impact analyzer
pub struct ImpactAnalyzer {
    dependency_store: Arc<dyn DependencyStore>,
    config: ImpactConfig,
    patterns: PatternRegistry,
    policy: Arc<dyn RelatednessPolicy>,
    cache: Cache<String, Arc<ImpactAssessment>>,
    metrics: Mutex<ImpactMetrics>,
}

impl ImpactAnalyzer {
    /// Create an analyzer with the default relatedness policy and patterns
    #[must_use]
    pub fn new(dependency_store: Arc<dyn DependencyStore>, config: ImpactConfig) -> Self {
        let policy = Arc::new(PathHeuristic::new(config.related_tokens.clone()));
        Self::with_policy(dependency_store, config, PatternRegistry::with_defaults(), policy)
    }

    /// Create an analyzer with a custom relatedness policy and pattern registry
    #[must_use]
    pub fn with_policy(
        dependency_store: Arc<dyn DependencyStore>,
        config: ImpactConfig,
        patterns: PatternRegistry,
        policy: Arc<dyn RelatednessPolicy>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();
        Self {
            dependency_store,
            config,
            patterns,
            policy,
            cache,
            metrics: Mutex::new(ImpactMetrics::default()),
        }
    }

    /// Analyze a change, idempotently
    ///
    /// Never fails: a cache hit within the TTL returns the prior assessment
    /// unchanged; an internal error returns a degraded assessment whose risk
    /// field carries the error marker.
    pub async fn analyze(&self, change: &TechnologyChange) -> Arc<ImpactAssessment> {
        let id = assessment_id_for(change);

        if let Some(cached) = self.cache.get(id.as_str()).await {
            tracing::debug!(technology = %change.technology, "impact assessment served from cache");
            self.metrics.lock().await.cache_hits += 1;
            return cached;
        }

        let started = Instant::now();
        let (assessment, degraded) = match self.run_analysis(change).await {
            Ok(assessment) => (assessment, false),
            Err(e) => {
                tracing::warn!(technology = %change.technology, error = %e, "impact analysis degraded");
                (self.degraded_assessment(change, &e), true)
            }
        };

        let assessment = Arc::new(assessment);
        self.cache
            .insert(id.as_str().to_string(), Arc::clone(&assessment))
            .await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut metrics = self.metrics.lock().await;
        metrics.analyses += 1;
        if degraded {
            metrics.degraded_analyses += 1;
        }
        let n = metrics.analyses as f64;
        metrics.avg_analysis_ms = (metrics.avg_analysis_ms * (n - 1.0) + elapsed_ms) / n;
        metrics.avg_affected_files =
            (metrics.avg_affected_files * (n - 1.0) + assessment.affected_count() as f64) / n;
        drop(metrics);

        tracing::info!(
            technology = %change.technology,
            affected = assessment.affected_count(),
            risk = ?assessment.risk.level,
            "impact analysis completed"
        );
        assessment
    }

    /// Metrics snapshot
    pub async fn metrics(&self) -> ImpactMetrics {
        self.metrics.lock().await.clone()
    }

    /// Cached assessment count
    #[inline]
    #[must_use]
    pub fn cached_assessments(&self) -> u64 {
        self.cache.entry_count()
    }

    async fn run_analysis(
        &self,
        change: &TechnologyChange,
    ) -> Result<ImpactAssessment, CollaboratorError> {
        let dependencies = self
            .dependency_store
            .dependencies_for(&change.technology)
            .await?;

        let mut affected = Vec::with_capacity(dependencies.len());
        for dep in &dependencies {
            affected.push(self.resolve_dependent(change, dep).await);
        }

        if self.config.comprehensive_scan {
            let scanned = self.scan_candidates(change).await;
            affected = merge_by_confidence(affected, scanned);
        }

        let graph = DependencyGraph::build(&mut affected, self.policy.as_ref());
        let cascade = graph.cascades(
            self.config.max_cascade_depth,
            self.config.high_risk_cascade_len,
        );

        let risk = self.assess_risk(change, &affected, &cascade);
        let effort = estimate_effort(&affected, cascade.paths.len());
        let quality_impact = predict_quality_impact(change, &affected);
        let recommendations = recommend(change, &affected);

        let overall_impact = if affected.is_empty() {
            ImpactLevel::Minimal
        } else {
            overall_impact(change, affected.len(), cascade.high_risk_paths.len(), &self.config)
        };
        let overall_urgency = overall_urgency(change, &risk);
        let confidence = blended_confidence(change, &affected, &dependencies);

        Ok(ImpactAssessment {
            assessment_id: assessment_id_for(change),
            change: change.clone(),
            affected_files: affected,
            dependency_graph: graph.edges().clone(),
            cascade,
            recommendations,
            risk,
            effort,
            quality_impact,
            overall_impact,
            overall_urgency,
            confidence,
            analyzed_at: Utc::now(),
        })
    }

    async fn resolve_dependent(
        &self,
        change: &TechnologyChange,
        dep: &DependencyRecord,
    ) -> AffectedFile {
        let severity = severity_for(change.impact_level, dep.criticality);
        let priority = UpdatePriority::derive(change.urgency_level, severity);
        let sections = affected_sections(&dep.file_path, &change.technology).await;
        let edits = suggest_edits(change, dep.file_category);

        let mut confidence = change.confidence + 0.1 * sections.len().min(5) as f64;
        match dep.validation_status {
            ValidationStatus::Validated => confidence += 0.1,
            ValidationStatus::Unvalidated => confidence -= 0.1,
            ValidationStatus::Unknown => {}
        }

        let kind = if dep.file_category == FileCategory::Config {
            DependencyKind::Config
        } else {
            DependencyKind::DirectReference
        };

        let mut file = AffectedFile::new(dep.file_path.clone(), dep.file_category, kind)
            .with_severity(severity)
            .with_priority(priority)
            .with_confidence(confidence);
        file.affected_sections = sections;
        file.suggested_edits = edits;
        file
    }

    async fn scan_candidates(&self, change: &TechnologyChange) -> Vec<AffectedFile> {
        let mut found = Vec::new();
        for path in &self.config.scan_paths {
            let Ok(content) = tokio::fs::read_to_string(path).await else {
                continue;
            };
            if self.patterns.content_matches(&change.technology, &content) {
                found.push(
                    AffectedFile::new(
                        path.clone(),
                        categorize_path(path),
                        DependencyKind::PatternMatch,
                    )
                    .with_severity(ImpactLevel::Low)
                    .with_priority(UpdatePriority::Low)
                    .with_confidence(PATTERN_MATCH_CONFIDENCE),
                );
            }
        }
        found
    }

    fn assess_risk(
        &self,
        change: &TechnologyChange,
        affected: &[AffectedFile],
        cascade: &crate::CascadeAnalysis,
    ) -> RiskAssessment {
        let mut score: f64 = 0.0;
        let mut factors = Vec::new();

        match change.category {
            ChangeCategory::Breaking => {
                score += 0.3;
                factors.push("breaking change may cause compatibility issues".to_string());
            }
            ChangeCategory::Security => {
                score += 0.2;
                factors.push("security update requires immediate attention".to_string());
            }
            _ => {}
        }

        if affected.len() > self.config.many_files_threshold {
            score += 0.2;
            factors.push(format!(
                "{} affected files increases coordination complexity",
                affected.len()
            ));
        }

        if !cascade.high_risk_paths.is_empty() {
            score += 0.15;
            factors.push(format!(
                "{} high-risk dependency cascades detected",
                cascade.high_risk_paths.len()
            ));
        }

        let low_confidence = affected
            .iter()
            .filter(|f| f.confidence < self.config.low_confidence_cutoff)
            .count();
        if low_confidence > 0 {
            score += 0.1;
            factors.push(format!(
                "low confidence in impact assessment for {low_confidence} files"
            ));
        }

        let score = score.clamp(0.0, 1.0);
        let level = if score > 0.7 {
            RiskLevel::High
        } else if score > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let mut mitigations = Vec::new();
        if change.category == ChangeCategory::Breaking {
            mitigations.push("stage the rollout with rollback enabled".to_string());
        }
        if affected.len() > 20 {
            mitigations.push("validate each batch before proceeding".to_string());
        }

        RiskAssessment {
            level,
            score,
            factors,
            mitigations,
            error: None,
        }
    }

    fn degraded_assessment(
        &self,
        change: &TechnologyChange,
        error: &CollaboratorError,
    ) -> ImpactAssessment {
        ImpactAssessment {
            assessment_id: assessment_id_for(change),
            change: change.clone(),
            affected_files: Vec::new(),
            dependency_graph: std::collections::BTreeMap::new(),
            cascade: crate::CascadeAnalysis::default(),
            recommendations: Vec::new(),
            risk: RiskAssessment::degraded(error.to_string()),
            effort: EffortEstimate::default(),
            quality_impact: QualityImpact::default(),
            overall_impact: ImpactLevel::Medium,
            overall_urgency: change.urgency_level,
            confidence: 0.0,
            analyzed_at: Utc::now(),
        }
    }
}

/// Severity for one file: the change's base impact adjusted by criticality
#[must_use]
pub fn severity_for(base: ImpactLevel, criticality: Criticality) -> ImpactLevel {
    match criticality {
        Criticality::Essential => base.escalate(),
        Criticality::Optional => base.deescalate(),
        Criticality::Moderate => base,
    }
}

/// Merge pattern-scan hits into dependency hits, keeping the entry with the
/// higher confidence for duplicate paths
fn merge_by_confidence(
    primary: Vec<AffectedFile>,
    additional: Vec<AffectedFile>,
) -> Vec<AffectedFile> {
    let mut by_path: HashMap<PathBuf, AffectedFile> = HashMap::new();
    for file in primary.into_iter().chain(additional) {
        match by_path.get(&file.path) {
            Some(existing) if existing.confidence >= file.confidence => {}
            _ => {
                by_path.insert(file.path.clone(), file);
            }
        }
    }
    let mut merged: Vec<AffectedFile> = by_path.into_values().collect();
    merged.sort_by(|a, b| a.path.cmp(&b.path));
    merged
}

async fn affected_sections(path: &std::path::Path, technology: &str) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    let needle = technology.to_lowercase();
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.to_lowercase().contains(&needle))
        .map(|(i, line)| format!("line {}: {}", i + 1, line.trim()))
        .take(10)
        .collect()
}

fn suggest_edits(change: &TechnologyChange, category: FileCategory) -> Vec<String> {
    let mut edits = Vec::new();
    match change.category {
        ChangeCategory::Breaking => {
            edits.push("review and update deprecated usage".to_string());
        }
        ChangeCategory::Security => {
            edits.push("update to the secure version immediately".to_string());
        }
        ChangeCategory::Deprecation => {
            edits.push("replace deprecated references before removal".to_string());
        }
        ChangeCategory::Feature => {
            edits.push("document newly available capabilities".to_string());
        }
        ChangeCategory::BugFix => {
            edits.push("remove workarounds made obsolete by the fix".to_string());
        }
        ChangeCategory::Config => {
            edits.push("align configuration keys with the new format".to_string());
        }
    }
    if let (Some(old), Some(new)) = (&change.old_version, &change.new_version) {
        edits.push(format!("update version references from {old} to {new}"));
    }
    if category == FileCategory::Command {
        edits.push("re-verify command invocations against the new version".to_string());
    }
    edits
}

fn estimate_effort(affected: &[AffectedFile], cascade_path_count: usize) -> EffortEstimate {
    let mut estimate = EffortEstimate::default();

    for file in affected {
        let base = base_hours(file.category, file.priority);
        let hours = base * (2.0 - file.confidence);
        estimate.total_hours += hours;
        *estimate
            .by_priority
            .entry(file.priority.as_str().to_string())
            .or_default() += hours;
        *estimate
            .by_category
            .entry(file.category.as_str().to_string())
            .or_default() += hours;
    }

    if cascade_path_count > 10 {
        estimate.total_hours *= 1.2;
        estimate
            .complexity_factors
            .push("deep dependency cascades (+20% effort)".to_string());
    }
    if affected.len() > 30 {
        estimate.total_hours *= 1.15;
        estimate
            .complexity_factors
            .push("large batch processing (+15% effort)".to_string());
    }

    estimate.total_hours = (estimate.total_hours * 10.0).round() / 10.0;
    estimate
}

fn base_hours(category: FileCategory, priority: UpdatePriority) -> f64 {
    let row: [f64; 5] = match category {
        FileCategory::Knowledge => [0.25, 0.5, 1.0, 1.5, 2.0],
        FileCategory::Command => [0.2, 0.3, 0.8, 1.0, 1.5],
        FileCategory::Documentation => [0.1, 0.2, 0.5, 0.8, 1.0],
        FileCategory::Config => [0.05, 0.1, 0.2, 0.3, 0.5],
        FileCategory::Unknown => [0.25, 0.5, 1.0, 1.0, 1.0],
    };
    match priority {
        UpdatePriority::Deferred => row[0],
        UpdatePriority::Low => row[1],
        UpdatePriority::Medium => row[2],
        UpdatePriority::High => row[3],
        UpdatePriority::Immediate => row[4],
    }
}

fn predict_quality_impact(change: &TechnologyChange, affected: &[AffectedFile]) -> QualityImpact {
    let mut quality = QualityImpact::default();

    match change.category {
        ChangeCategory::Security => {
            quality.score_delta += 0.1;
            quality
                .positive
                .push("security improvements raise overall quality".to_string());
        }
        ChangeCategory::BugFix => {
            quality.score_delta += 0.05;
            quality
                .positive
                .push("bug fixes improve reliability".to_string());
        }
        ChangeCategory::Breaking => {
            quality.score_delta -= 0.1;
            quality
                .negative
                .push("breaking changes may temporarily reduce stability".to_string());
        }
        _ => {}
    }

    let knowledge_files = affected
        .iter()
        .filter(|f| f.category == FileCategory::Knowledge)
        .count();
    if knowledge_files > 10 {
        quality.score_delta -= 0.05;
        quality
            .negative
            .push("many core knowledge files affected".to_string());
    }

    quality.score_delta = (quality.score_delta * 1000.0).round() / 1000.0;
    quality
}

fn recommend(change: &TechnologyChange, affected: &[AffectedFile]) -> Vec<String> {
    let mut recommendations = Vec::new();

    let immediate = affected
        .iter()
        .filter(|f| f.priority == UpdatePriority::Immediate)
        .count();
    if immediate > 0 {
        recommendations.push(format!("update {immediate} critical files first"));
    }
    match change.category {
        ChangeCategory::Breaking => {
            recommendations.push("test all affected functionality after updates".to_string());
        }
        ChangeCategory::Security => {
            recommendations.push("apply across all affected files without delay".to_string());
        }
        _ => {}
    }
    if affected.len() > 10 {
        recommendations.push("process updates in staged batches with validation".to_string());
    }
    recommendations
}

fn overall_impact(
    change: &TechnologyChange,
    affected_count: usize,
    high_risk_cascades: usize,
    config: &ImpactConfig,
) -> ImpactLevel {
    let mut impact = change.impact_level;
    if affected_count > config.many_files_threshold {
        impact = impact.escalate();
    }
    if high_risk_cascades > 5 {
        impact = impact.escalate();
    }
    impact
}

fn overall_urgency(change: &TechnologyChange, risk: &RiskAssessment) -> UrgencyLevel {
    if risk.level == RiskLevel::High {
        change.urgency_level.escalate()
    } else {
        change.urgency_level
    }
}

fn blended_confidence(
    change: &TechnologyChange,
    affected: &[AffectedFile],
    dependencies: &[DependencyRecord],
) -> f64 {
    let mut confidence = change.confidence;

    if !affected.is_empty() {
        let mean: f64 =
            affected.iter().map(|f| f.confidence).sum::<f64>() / affected.len() as f64;
        confidence = (confidence + mean) / 2.0;
    }

    if !dependencies.is_empty() {
        let validated = dependencies
            .iter()
            .filter(|d| d.validation_status == ValidationStatus::Validated)
            .count() as f64;
        let fraction = validated / dependencies.len() as f64;
        confidence *= 0.5 + 0.5 * fraction;
    }

    confidence.clamp(0.0, 1.0)
}
