//! Per-category update strategies
//!
//! A strategy knows how to rewrite one class of file and how to judge the
//! shape of its own output. Rewrites are conservative: only version
//! references and technology-specific patterns the strategy recognizes are
//! touched, and a file with nothing to change is a successful no-op.

use crate::result::{UpdateValidation, ValidationVerdict};
use async_trait::async_trait;
use chrono::Utc;
use kup_impact::AffectedFile;
use kup_types::{ChangeCategory, FileCategory, TechnologyChange};
use regex::RegexBuilder;
use std::path::{Path, PathBuf};

/// Failure applying one file update
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Target file does not exist
    #[error("file not found: {0}")]
    SourceMissing(PathBuf),

    /// I/O failure on the target file
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a strategy's rewrite pass
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    /// Whether the file content actually changed
    pub changed: bool,
    pub description: String,
    pub changes: Vec<String>,
}

impl AppliedUpdate {
    fn unchanged() -> Self {
        Self {
            changed: false,
            description: "no changes required".to_string(),
            changes: Vec::new(),
        }
    }
}

/// One class of file the executor knows how to update
#[async_trait]
pub trait UpdateStrategy: Send + Sync {
    /// Strategy name for logs and results
    fn name(&self) -> &'static str;

    /// Whether this strategy handles the given file
    fn can_handle(&self, path: &Path, category: FileCategory) -> bool;

    /// Rewrite the file in place
    async fn apply(
        &self,
        path: &Path,
        change: &TechnologyChange,
        file: &AffectedFile,
    ) -> Result<AppliedUpdate, UpdateError>;

    /// Judge the shape of the rewritten content
    async fn validate(&self, path: &Path, original: &str, updated: &str) -> UpdateValidation;
}

async fn read_target(path: &Path) -> Result<String, UpdateError> {
    if !matches!(tokio::fs::try_exists(path).await, Ok(true)) {
        return Err(UpdateError::SourceMissing(path.to_path_buf()));
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| UpdateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_target(path: &Path, content: &str) -> Result<(), UpdateError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| UpdateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace `old` with `new` wherever one of `patterns` matches
///
/// Patterns are matched case-insensitively; the replacement swaps the old
/// version substring inside each match, preserving surrounding text.
fn rewrite_versions(
    content: &str,
    patterns: &[String],
    old: &str,
    new: &str,
    changes: &mut Vec<String>,
    note: &str,
) -> String {
    let mut content = content.to_string();
    for pattern in patterns {
        let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
            continue;
        };
        if re.is_match(&content) {
            content = re
                .replace_all(&content, |caps: &regex::Captures<'_>| {
                    caps[0].replace(old, new)
                })
                .into_owned();
            changes.push(note.to_string());
        }
    }
    content
}

fn length_delta_check(original: &str, updated: &str, validation: &mut UpdateValidation) -> f64 {
    validation
        .checks_performed
        .push("content_length_check".to_string());
    let ratio = (updated.len() as f64 - original.len() as f64).abs()
        / (original.len().max(1) as f64);
    if ratio > 0.1 {
        validation
            .issues
            .push(format!("content length changed by {:.0}%", ratio * 100.0));
        validation.quality_score -= 0.1;
    }
    ratio
}

fn finalize(mut validation: UpdateValidation, length_ratio: f64) -> UpdateValidation {
    validation.verdict = ValidationVerdict::from_score(validation.quality_score);
    if !validation.issues.is_empty() {
        validation
            .recommendations
            .push("review and fix identified issues".to_string());
    }
    if length_ratio > 0.05 {
        validation
            .recommendations
            .push("verify all intended changes were applied".to_string());
    }
    validation
}

/// Strategy for knowledge-base and documentation markdown
///
/// Rewrites version references and prepends a change notification for
/// breaking and security changes. Validation checks length drift, code-fence
/// parity, and `@path` cross-references against the workspace root.
pub struct KnowledgeStrategy {
    workspace_root: Option<PathBuf>,
}

impl KnowledgeStrategy {
    #[must_use]
    pub fn new(workspace_root: Option<PathBuf>) -> Self {
        Self { workspace_root }
    }

    fn change_notification(change: &TechnologyChange) -> String {
        format!(
            "<!-- updated for {} {} - {} -->",
            change.technology,
            change.new_version.as_deref().unwrap_or("latest"),
            Utc::now().format("%Y-%m-%d")
        )
    }

    /// Insert `note` after YAML frontmatter, or at the top when there is none
    fn insert_after_frontmatter(content: &str, note: &str) -> String {
        let lines: Vec<&str> = content.lines().collect();
        let mut insert_at = 0;
        if lines.first().map(|l| l.trim()) == Some("---") {
            if let Some(end) = lines.iter().skip(1).position(|l| l.trim() == "---") {
                insert_at = end + 2;
            }
        }
        let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
        out.extend(&lines[..insert_at]);
        out.push(note);
        out.extend(&lines[insert_at..]);
        out.join("\n")
    }
}

#[async_trait]
impl UpdateStrategy for KnowledgeStrategy {
    fn name(&self) -> &'static str {
        "knowledge"
    }

    fn can_handle(&self, path: &Path, category: FileCategory) -> bool {
        matches!(
            category,
            FileCategory::Knowledge | FileCategory::Documentation
        ) || (category == FileCategory::Unknown
            && path.extension().is_some_and(|e| e == "md"))
    }

    async fn apply(
        &self,
        path: &Path,
        change: &TechnologyChange,
        _file: &AffectedFile,
    ) -> Result<AppliedUpdate, UpdateError> {
        let original = read_target(path).await?;
        let mut changes = Vec::new();
        let mut content = original.clone();

        if let (Some(old), Some(new)) = (&change.old_version, &change.new_version) {
            let tech = regex::escape(&change.technology);
            let old_escaped = regex::escape(old);
            let patterns = vec![
                format!(r#"\b{tech}\s*[:\-]\s*["']?{old_escaped}"#),
                format!(r#"version\s*[:\-]\s*["']?{old_escaped}"#),
                old_escaped,
            ];
            content = rewrite_versions(
                &content,
                &patterns,
                old,
                new,
                &mut changes,
                &format!("updated version reference from {old} to {new}"),
            );
        }

        if matches!(
            change.category,
            ChangeCategory::Breaking | ChangeCategory::Security
        ) {
            let note = Self::change_notification(change);
            if !content.contains(&note) {
                content = Self::insert_after_frontmatter(&content, &note);
                changes.push(format!("added change notification for {}", change.technology));
            }
        }

        if content == original {
            return Ok(AppliedUpdate::unchanged());
        }
        write_target(path, &content).await?;
        Ok(AppliedUpdate {
            changed: true,
            description: format!(
                "updated {} patterns in {}",
                changes.len(),
                path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned()
                )
            ),
            changes,
        })
    }

    async fn validate(&self, _path: &Path, original: &str, updated: &str) -> UpdateValidation {
        let mut validation = UpdateValidation::passed(Vec::new());
        let ratio = length_delta_check(original, updated, &mut validation);

        validation
            .checks_performed
            .push("markdown_syntax_check".to_string());
        if updated.matches("```").count() % 2 != 0 {
            validation
                .issues
                .push("unmatched code block markers".to_string());
            validation.quality_score -= 0.2;
        }

        validation
            .checks_performed
            .push("cross_reference_check".to_string());
        if let Some(root) = &self.workspace_root {
            let re = regex::Regex::new(r"@([A-Za-z0-9\-_/.]+)")
                .unwrap_or_else(|_| unreachable!());
            for caps in re.captures_iter(updated).take(5) {
                let target = root.join(&caps[1]);
                if !matches!(tokio::fs::try_exists(&target).await, Ok(true)) {
                    validation
                        .issues
                        .push(format!("broken cross-reference: @{}", &caps[1]));
                    validation.quality_score -= 0.05;
                }
            }
        }

        finalize(validation, ratio)
    }
}

/// Strategy for command / runbook documents
pub struct CommandStrategy;

#[async_trait]
impl UpdateStrategy for CommandStrategy {
    fn name(&self) -> &'static str {
        "command"
    }

    fn can_handle(&self, path: &Path, category: FileCategory) -> bool {
        category == FileCategory::Command || path.to_string_lossy().contains("/commands/")
    }

    async fn apply(
        &self,
        path: &Path,
        change: &TechnologyChange,
        _file: &AffectedFile,
    ) -> Result<AppliedUpdate, UpdateError> {
        let original = read_target(path).await?;
        let mut changes = Vec::new();
        let mut content = original.clone();

        if let (Some(old), Some(new)) = (&change.old_version, &change.new_version) {
            let tech = regex::escape(&change.technology);
            let old_escaped = regex::escape(old);
            let patterns = vec![
                format!(r"(npm install\s+{tech}@){old_escaped}"),
                format!(r"(yarn add\s+{tech}@){old_escaped}"),
                format!(r"({tech}@){old_escaped}"),
            ];
            content = rewrite_versions(
                &content,
                &patterns,
                old,
                new,
                &mut changes,
                &format!("updated CLI version reference to {new}"),
            );
        }

        if change.technology.eq_ignore_ascii_case("docker") {
            if let Some(new) = &change.new_version {
                let re = regex::Regex::new(r"(FROM\s+[^\s:]+:)(\S+)")
                    .unwrap_or_else(|_| unreachable!());
                if re.is_match(&content) {
                    content = re.replace_all(&content, format!("${{1}}{new}")).into_owned();
                    changes.push(format!("updated image tag to {new}"));
                }
            }
        }

        if content == original {
            return Ok(AppliedUpdate::unchanged());
        }
        write_target(path, &content).await?;
        Ok(AppliedUpdate {
            changed: true,
            description: format!("updated {} command patterns", changes.len()),
            changes,
        })
    }

    async fn validate(&self, _path: &Path, original: &str, updated: &str) -> UpdateValidation {
        let mut validation = UpdateValidation::passed(vec![
            "syntax_check".to_string(),
            "command_validity_check".to_string(),
        ]);
        let ratio = length_delta_check(original, updated, &mut validation);

        let re = regex::Regex::new(r"(?s)```(?:bash|sh)?\s*\n(.*?)\n```")
            .unwrap_or_else(|_| unreachable!());
        for caps in re.captures_iter(updated) {
            if caps[1].trim().is_empty() {
                validation.issues.push("empty code block".to_string());
                validation.quality_score -= 0.1;
            }
        }
        if updated.contains("sudo") {
            validation.issues.push("sudo usage found".to_string());
            validation.quality_score -= 0.05;
        }

        finalize(validation, ratio)
    }
}

/// Strategy for configuration files
///
/// Only version strings are rewritten; validation re-parses JSON and YAML to
/// catch structural breakage.
pub struct ConfigStrategy;

#[async_trait]
impl UpdateStrategy for ConfigStrategy {
    fn name(&self) -> &'static str {
        "config"
    }

    fn can_handle(&self, path: &Path, category: FileCategory) -> bool {
        category == FileCategory::Config
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "json" | "yaml" | "yml" | "toml"))
    }

    async fn apply(
        &self,
        path: &Path,
        change: &TechnologyChange,
        _file: &AffectedFile,
    ) -> Result<AppliedUpdate, UpdateError> {
        let original = read_target(path).await?;
        let mut changes = Vec::new();
        let mut content = original.clone();

        if let (Some(old), Some(new)) = (&change.old_version, &change.new_version) {
            let old_escaped = regex::escape(old);
            // Quoted version values and caret/tilde ranges.
            let patterns = vec![
                format!(r#"(["'])\^?~?{old_escaped}(["'])"#),
                format!(r"@{old_escaped}\b"),
            ];
            for pattern in patterns {
                let Ok(re) = regex::Regex::new(&pattern) else {
                    continue;
                };
                if re.is_match(&content) {
                    content = re
                        .replace_all(&content, |caps: &regex::Captures<'_>| {
                            caps[0].replace(old, new)
                        })
                        .into_owned();
                    changes.push(format!("updated pinned version from {old} to {new}"));
                }
            }
        }

        if content == original {
            return Ok(AppliedUpdate::unchanged());
        }
        write_target(path, &content).await?;
        Ok(AppliedUpdate {
            changed: true,
            description: format!("updated {} version pins", changes.len()),
            changes,
        })
    }

    async fn validate(&self, path: &Path, original: &str, updated: &str) -> UpdateValidation {
        let mut validation = UpdateValidation::passed(Vec::new());
        let ratio = length_delta_check(original, updated, &mut validation);

        validation
            .checks_performed
            .push("structure_parse_check".to_string());
        let parse_ok = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<serde_json::Value>(updated).is_ok(),
            Some("yaml" | "yml") => serde_yaml::from_str::<serde_yaml::Value>(updated).is_ok(),
            _ => true,
        };
        if !parse_ok {
            validation
                .issues
                .push("updated content no longer parses".to_string());
            validation.quality_score -= 0.5;
        }

        finalize(validation, ratio)
    }
}

/// Built-in strategies in evaluation order
///
/// Command files are claimed before knowledge files so a markdown runbook
/// under `commands/` gets command handling.
#[must_use]
pub fn default_strategies(workspace_root: Option<PathBuf>) -> Vec<Box<dyn UpdateStrategy>> {
    vec![
        Box::new(CommandStrategy),
        Box::new(KnowledgeStrategy::new(workspace_root)),
        Box::new(ConfigStrategy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kup_impact::DependencyKind;
    use tempfile::TempDir;

    fn affected(path: &Path, category: FileCategory) -> AffectedFile {
        AffectedFile::new(path, category, DependencyKind::DirectReference)
    }

    fn versioned_change() -> TechnologyChange {
        TechnologyChange::new("React", ChangeCategory::Breaking)
            .with_versions(Some("17.0.2".to_string()), Some("18.2.0".to_string()))
    }

    #[tokio::test]
    async fn knowledge_strategy_rewrites_version_references() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.md");
        tokio::fs::write(&path, "# Stack\n\nReact: 17.0.2 is pinned\n")
            .await
            .unwrap();

        let strategy = KnowledgeStrategy::new(None);
        let applied = strategy
            .apply(&path, &versioned_change(), &affected(&path, FileCategory::Knowledge))
            .await
            .unwrap();

        assert!(applied.changed);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("React: 18.2.0"));
        assert!(!content.contains("17.0.2"));
        // Breaking change also gets a notification comment.
        assert!(content.contains("<!-- updated for React 18.2.0"));
    }

    #[tokio::test]
    async fn notification_lands_after_frontmatter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.md");
        tokio::fs::write(&path, "---\ntitle: stack\n---\n# Body\n")
            .await
            .unwrap();

        let strategy = KnowledgeStrategy::new(None);
        strategy
            .apply(&path, &versioned_change(), &affected(&path, FileCategory::Knowledge))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[2], "---");
        assert!(lines[3].starts_with("<!-- updated for React"));
    }

    #[tokio::test]
    async fn missing_file_is_an_explicit_error() {
        let strategy = KnowledgeStrategy::new(None);
        let path = Path::new("/nonexistent/knowledge.md");
        let err = strategy
            .apply(&path, &versioned_change(), &affected(path, FileCategory::Knowledge))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn no_op_apply_reports_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        tokio::fs::write(&path, "nothing relevant here\n").await.unwrap();

        let strategy = KnowledgeStrategy::new(None);
        let change = TechnologyChange::new("React", ChangeCategory::Feature);
        let applied = strategy
            .apply(&path, &change, &affected(&path, FileCategory::Documentation))
            .await
            .unwrap();
        assert!(!applied.changed);
    }

    #[tokio::test]
    async fn unbalanced_fences_fail_validation() {
        let strategy = KnowledgeStrategy::new(None);
        let original = "a\n```\ncode\n```\n";
        let updated = "a\n```\ncode\n"; // fence lost

        let validation = strategy
            .validate(Path::new("k.md"), original, updated)
            .await;
        assert!(validation
            .issues
            .iter()
            .any(|i| i.contains("unmatched code block")));
        assert!(validation.quality_score < 1.0);
    }

    #[tokio::test]
    async fn broken_cross_reference_is_reported() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("real.md"), "x").await.unwrap();

        let strategy = KnowledgeStrategy::new(Some(dir.path().to_path_buf()));
        let updated = "see @real.md and @missing.md";
        let validation = strategy.validate(Path::new("k.md"), updated, updated).await;

        assert_eq!(
            validation
                .issues
                .iter()
                .filter(|i| i.contains("broken cross-reference"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn command_strategy_rewrites_install_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("setup.md");
        tokio::fs::write(&path, "```bash\nnpm install React@17.0.2\n```\n")
            .await
            .unwrap();

        let strategy = CommandStrategy;
        let applied = strategy
            .apply(&path, &versioned_change(), &affected(&path, FileCategory::Command))
            .await
            .unwrap();

        assert!(applied.changed);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("npm install React@18.2.0"));
    }

    #[tokio::test]
    async fn docker_image_tags_are_retagged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.md");
        tokio::fs::write(&path, "FROM node:20-alpine\n").await.unwrap();

        let change = TechnologyChange::new("Docker", ChangeCategory::Feature)
            .with_versions(Some("24".to_string()), Some("25".to_string()));
        let applied = CommandStrategy
            .apply(&path, &change, &affected(&path, FileCategory::Command))
            .await
            .unwrap();

        assert!(applied.changed);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("FROM node:25"));
    }

    #[tokio::test]
    async fn command_validation_flags_empty_blocks_and_sudo() {
        let updated = "```bash\n\n```\nsudo rm -rf /tmp/x\n";
        let validation = CommandStrategy
            .validate(Path::new("c.md"), updated, updated)
            .await;
        assert!(validation.issues.iter().any(|i| i.contains("empty code block")));
        assert!(validation.issues.iter().any(|i| i.contains("sudo")));
    }

    #[tokio::test]
    async fn config_strategy_updates_pins_and_checks_parse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.json");
        tokio::fs::write(&path, "{\"dependencies\":{\"react\":\"^17.0.2\"}}")
            .await
            .unwrap();

        let strategy = ConfigStrategy;
        let applied = strategy
            .apply(&path, &versioned_change(), &affected(&path, FileCategory::Config))
            .await
            .unwrap();
        assert!(applied.changed);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("^18.2.0"));

        let validation = strategy.validate(&path, "{}", &content).await;
        assert!(!validation
            .issues
            .iter()
            .any(|i| i.contains("no longer parses")));

        let broken = strategy.validate(&path, "{}", "{not json").await;
        assert_eq!(broken.verdict, ValidationVerdict::Failed);
    }

    #[test]
    fn strategy_routing() {
        let strategies = default_strategies(None);
        let pick = |path: &str, category: FileCategory| {
            strategies
                .iter()
                .find(|s| s.can_handle(Path::new(path), category))
                .map(|s| s.name())
        };

        assert_eq!(pick("vault/knowledge.md", FileCategory::Knowledge), Some("knowledge"));
        assert_eq!(pick("ops/commands/deploy.md", FileCategory::Command), Some("command"));
        assert_eq!(pick("svc/config.yaml", FileCategory::Config), Some("config"));
        assert_eq!(pick("notes.md", FileCategory::Unknown), Some("knowledge"));
        assert_eq!(pick("bin/tool", FileCategory::Unknown), None);
    }
}
