//! Technology content patterns
//!
//! Regex patterns keyed by technology name, used by the comprehensive scan to
//! find files the dependency store doesn't know about, plus a path-based file
//! categorizer.

use kup_types::FileCategory;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::path::Path;

/// Registry of per-technology content patterns
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: HashMap<String, Vec<Regex>>,
}

impl PatternRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: HashMap::new(),
        }
    }

    /// Registry with built-in patterns for common technologies
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "React",
            &[r"react\s+hooks?", r"\bjsx\b|\btsx\b", r"useEffect|useState|useContext"],
        );
        registry.register(
            "TypeScript",
            &[r"typescript|\btsc\b", r"tsconfig\.json", r"\binterface\s+\w+"],
        );
        registry.register(
            "Next.js",
            &[r"next\.?js", r"next\.config\.", r"getServerSideProps|getStaticProps"],
        );
        registry.register(
            "Node.js",
            &[r"node\.?js", r"package\.json", r"\bnpm\b|\byarn\b|\bpnpm\b"],
        );
        registry.register("Jest", &[r"\bjest\b", r"jest\.config\.", r"describe\(|it\(|test\("]);
        registry.register("Docker", &[r"docker|dockerfile", r"^FROM\s+", r"docker-compose"]);
        registry
    }

    /// Register case-insensitive patterns for a technology
    ///
    /// Patterns that fail to compile are dropped with a warning rather than
    /// failing registration.
    pub fn register(&mut self, technology: impl Into<String>, patterns: &[&str]) {
        let technology = technology.into();
        let compiled: Vec<Regex> = patterns
            .iter()
            .filter_map(|p| {
                match RegexBuilder::new(p).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(technology = %technology, pattern = p, error = %e, "invalid pattern dropped");
                        None
                    }
                }
            })
            .collect();
        self.patterns.entry(technology).or_default().extend(compiled);
    }

    /// Patterns registered for a technology
    #[inline]
    #[must_use]
    pub fn for_technology(&self, technology: &str) -> &[Regex] {
        self.patterns.get(technology).map_or(&[], Vec::as_slice)
    }

    /// Whether `content` mentions `technology`, by name or by pattern
    #[must_use]
    pub fn content_matches(&self, technology: &str, content: &str) -> bool {
        if content.to_lowercase().contains(&technology.to_lowercase()) {
            return true;
        }
        self.for_technology(technology)
            .iter()
            .any(|re| re.is_match(content))
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Categorize a file by its path
#[must_use]
pub fn categorize_path(path: &Path) -> FileCategory {
    let path_str = path.to_string_lossy();
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());

    if name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case("knowledge.md"))
        || path_str.contains("/knowledge/")
    {
        return FileCategory::Knowledge;
    }
    if path_str.contains("/commands/") {
        return FileCategory::Command;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => FileCategory::Documentation,
        Some("json" | "yaml" | "yml" | "toml") => FileCategory::Config,
        _ => FileCategory::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_registry_matches_react_content() {
        let registry = PatternRegistry::with_defaults();
        assert!(registry.content_matches("React", "uses useEffect for data fetching"));
        assert!(!registry.content_matches("React", "plain prose about databases"));
    }

    #[test]
    fn technology_name_match_is_case_insensitive() {
        let registry = PatternRegistry::empty();
        assert!(registry.content_matches("Docker", "see the DOCKER setup guide"));
    }

    #[test]
    fn invalid_pattern_is_dropped() {
        let mut registry = PatternRegistry::empty();
        registry.register("Broken", &["[unclosed", r"\bvalid\b"]);
        assert_eq!(registry.for_technology("Broken").len(), 1);
    }

    #[test]
    fn path_categorization() {
        assert_eq!(
            categorize_path(&PathBuf::from("vault/knowledge/react.md")),
            FileCategory::Knowledge
        );
        assert_eq!(
            categorize_path(&PathBuf::from("ops/commands/deploy.md")),
            FileCategory::Command
        );
        assert_eq!(
            categorize_path(&PathBuf::from("docs/setup.md")),
            FileCategory::Documentation
        );
        assert_eq!(
            categorize_path(&PathBuf::from("service/config.yaml")),
            FileCategory::Config
        );
        assert_eq!(
            categorize_path(&PathBuf::from("bin/tool")),
            FileCategory::Unknown
        );
    }
}
