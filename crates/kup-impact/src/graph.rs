//! Heuristic dependency graph and cascade traversal
//!
//! The graph among affected files is intentionally approximate: it is built
//! from a relatedness policy (default: same directory or a shared "related"
//! path token), not a true import graph. The policy is swappable so callers
//! can plug in something sharper without touching the analyzer.

use crate::types::AffectedFile;
use crate::CascadeAnalysis;
use kup_types::FileCategory;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Policy deciding whether one affected file plausibly depends on another
pub trait RelatednessPolicy: Send + Sync {
    /// Does `from` depend on `to`?
    fn related(&self, from: &AffectedFile, to: &AffectedFile) -> bool;
}

/// Default path-based heuristic
///
/// Knowledge files depend on command files when both live in the same
/// directory or share one of the configured path tokens.
#[derive(Debug, Clone)]
pub struct PathHeuristic {
    related_tokens: Vec<String>,
}

impl PathHeuristic {
    #[must_use]
    pub fn new(related_tokens: Vec<String>) -> Self {
        Self { related_tokens }
    }

    fn paths_related(&self, a: &Path, b: &Path) -> bool {
        if a.parent() == b.parent() {
            return true;
        }
        let a_str = a.to_string_lossy();
        let b_str = b.to_string_lossy();
        self.related_tokens
            .iter()
            .any(|token| a_str.contains(token.as_str()) && b_str.contains(token.as_str()))
    }
}

impl Default for PathHeuristic {
    fn default() -> Self {
        Self::new(vec![
            "knowledge".to_string(),
            "commands".to_string(),
            "docs".to_string(),
        ])
    }
}

impl RelatednessPolicy for PathHeuristic {
    fn related(&self, from: &AffectedFile, to: &AffectedFile) -> bool {
        // Only knowledge -> command edges; everything else stays disconnected
        // to keep false edges down.
        from.category == FileCategory::Knowledge
            && to.category == FileCategory::Command
            && self.paths_related(&from.path, &to.path)
    }
}

/// Directed dependency graph over affected files
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyGraph {
    /// Build a graph among `files`, filling in their forward/back edges
    #[must_use]
    pub fn build(files: &mut [AffectedFile], policy: &dyn RelatednessPolicy) -> Self {
        let mut edges: BTreeMap<PathBuf, Vec<PathBuf>> = files
            .iter()
            .map(|f| (f.path.clone(), Vec::new()))
            .collect();

        for i in 0..files.len() {
            for j in 0..files.len() {
                if i == j {
                    continue;
                }
                if policy.related(&files[i], &files[j]) {
                    let (from, to) = (files[i].path.clone(), files[j].path.clone());
                    edges.entry(from.clone()).or_default().push(to.clone());
                    files[i].depends_on.push(to);
                    files[j].dependents.push(from);
                }
            }
        }

        Self { edges }
    }

    /// Adjacency map (path -> paths it depends on)
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &BTreeMap<PathBuf, Vec<PathBuf>> {
        &self.edges
    }

    /// Node count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Bounded-depth cascade traversal from every node
    ///
    /// Returns all simple paths up to `max_depth` nodes; paths longer than
    /// `high_risk_len` are flagged high-risk. Cycle-safe: a node never
    /// repeats within one path.
    #[must_use]
    pub fn cascades(&self, max_depth: usize, high_risk_len: usize) -> CascadeAnalysis {
        let mut analysis = CascadeAnalysis::default();

        for start in self.edges.keys() {
            let mut visited: HashSet<&Path> = HashSet::new();
            visited.insert(start.as_path());
            let mut current = vec![start.clone()];
            self.walk(start, max_depth, &mut visited, &mut current, &mut analysis.paths);
        }

        for path in &analysis.paths {
            analysis.max_depth = analysis.max_depth.max(path.len());
            if path.len() > high_risk_len {
                analysis.high_risk_paths.push(path.clone());
            }
        }
        analysis
    }

    fn walk<'a>(
        &'a self,
        node: &'a Path,
        max_depth: usize,
        visited: &mut HashSet<&'a Path>,
        current: &mut Vec<PathBuf>,
        out: &mut Vec<Vec<PathBuf>>,
    ) {
        if current.len() >= max_depth {
            out.push(current.clone());
            return;
        }
        let next: Vec<&PathBuf> = self
            .edges
            .get(node)
            .map(|deps| deps.iter().filter(|d| !visited.contains(d.as_path())).collect())
            .unwrap_or_default();

        if next.is_empty() {
            out.push(current.clone());
            return;
        }
        for dep in next {
            visited.insert(dep.as_path());
            current.push(dep.clone());
            self.walk(dep, max_depth, visited, current, out);
            current.pop();
            visited.remove(dep.as_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DependencyKind;

    fn file(path: &str, category: FileCategory) -> AffectedFile {
        AffectedFile::new(path, category, DependencyKind::DirectReference)
    }

    #[test]
    fn same_directory_knowledge_depends_on_command() {
        let mut files = vec![
            file("vault/a/knowledge.md", FileCategory::Knowledge),
            file("vault/a/run.md", FileCategory::Command),
        ];
        let graph = DependencyGraph::build(&mut files, &PathHeuristic::default());

        assert_eq!(
            graph.edges()[&PathBuf::from("vault/a/knowledge.md")],
            vec![PathBuf::from("vault/a/run.md")]
        );
        assert_eq!(files[0].depends_on.len(), 1);
        assert_eq!(files[1].dependents.len(), 1);
    }

    #[test]
    fn unrelated_files_stay_disconnected() {
        let mut files = vec![
            file("x/knowledge.md", FileCategory::Knowledge),
            file("y/other.md", FileCategory::Documentation),
        ];
        let graph = DependencyGraph::build(&mut files, &PathHeuristic::default());
        assert!(graph.edges().values().all(Vec::is_empty));
    }

    #[test]
    fn shared_token_relates_across_directories() {
        let mut files = vec![
            file("vault/knowledge/react.md", FileCategory::Knowledge),
            file("ops/knowledge/run.md", FileCategory::Command),
        ];
        let graph = DependencyGraph::build(&mut files, &PathHeuristic::default());
        assert_eq!(graph.edges()[&PathBuf::from("vault/knowledge/react.md")].len(), 1);
    }

    #[test]
    fn cascade_paths_are_bounded_and_cycle_safe() {
        // a -> b -> a cycle: traversal must terminate and never repeat a node.
        let mut graph = DependencyGraph::default();
        graph
            .edges
            .insert(PathBuf::from("a"), vec![PathBuf::from("b")]);
        graph
            .edges
            .insert(PathBuf::from("b"), vec![PathBuf::from("a")]);

        let cascades = graph.cascades(3, 3);
        assert!(cascades.paths.iter().all(|p| p.len() <= 3));
        for path in &cascades.paths {
            let unique: HashSet<_> = path.iter().collect();
            assert_eq!(unique.len(), path.len());
        }
    }

    #[test]
    fn long_paths_are_flagged_high_risk() {
        let mut graph = DependencyGraph::default();
        graph
            .edges
            .insert(PathBuf::from("a"), vec![PathBuf::from("b")]);
        graph
            .edges
            .insert(PathBuf::from("b"), vec![PathBuf::from("c")]);
        graph
            .edges
            .insert(PathBuf::from("c"), vec![PathBuf::from("d")]);
        graph.edges.insert(PathBuf::from("d"), Vec::new());

        let cascades = graph.cascades(4, 3);
        assert_eq!(cascades.max_depth, 4);
        assert!(!cascades.high_risk_paths.is_empty());
    }
}
