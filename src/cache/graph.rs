//! Bidirectional dependency graph used by the cache for cascade invalidation,
//! over arbitrary declared-dependency edges between normalized paths.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Forward edges: file → the files it declares as dependencies.
/// Reverse edges: file → the files that declare *it* as a dependency.
///
/// Invariant: `forward` and `reverse` always agree — `b` is in
/// `forward[a]` iff `a` is in `reverse[b]`.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    forward: HashMap<PathBuf, HashSet<PathBuf>>,
    reverse: HashMap<PathBuf, HashSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `file`'s declared dependencies, updating reverse edges to
    /// match. Dependencies are not required to have their own entries yet.
    pub fn set_dependencies(&mut self, file: &Path, deps: impl IntoIterator<Item = PathBuf>) {
        self.remove_forward_edges(file);
        let deps: HashSet<PathBuf> = deps.into_iter().collect();
        for dep in &deps {
            self.reverse.entry(dep.clone()).or_default().insert(file.to_path_buf());
        }
        self.forward.insert(file.to_path_buf(), deps);
    }

    fn remove_forward_edges(&mut self, file: &Path) {
        if let Some(old_deps) = self.forward.remove(file) {
            for dep in old_deps {
                if let Some(dependents) = self.reverse.get_mut(&dep) {
                    dependents.remove(file);
                    if dependents.is_empty() {
                        self.reverse.remove(&dep);
                    }
                }
            }
        }
    }

    /// Removes `file` from the graph entirely: its forward edges are
    /// dropped and every reverse edge pointing at it is dropped too, so no
    /// dangling reverse edge survives.
    pub fn remove(&mut self, file: &Path) {
        self.remove_forward_edges(file);
        if let Some(dependents) = self.reverse.remove(file) {
            for dependent in dependents {
                if let Some(deps) = self.forward.get_mut(&dependent) {
                    deps.remove(file);
                }
            }
        }
    }

    pub fn dependencies_of(&self, file: &Path) -> impl Iterator<Item = &PathBuf> {
        self.forward.get(file).into_iter().flatten()
    }

    pub fn dependents_of(&self, file: &Path) -> impl Iterator<Item = &PathBuf> {
        self.reverse.get(file).into_iter().flatten()
    }

    /// BFS over the reverse-dependency graph starting at `file`, returning
    /// every reachable file including `file` itself. Terminates on cyclic
    /// graphs via a visited set.
    pub fn cascade(&self, file: &Path) -> Vec<PathBuf> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: std::collections::VecDeque<PathBuf> = std::collections::VecDeque::new();
        visited.insert(file.to_path_buf());
        queue.push_back(file.to_path_buf());
        let mut order = Vec::new();

        while let Some(current) = queue.pop_front() {
            order.push(current.clone());
            for dependent in self.dependents_of(&current) {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        order
    }

    /// Asserts the forward/reverse invariant; used in tests and debug
    /// assertions, never on the hot path.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        for (file, deps) in &self.forward {
            for dep in deps {
                if !self.reverse.get(dep).is_some_and(|d| d.contains(file)) {
                    return false;
                }
            }
        }
        for (dep, dependents) in &self.reverse {
            for dependent in dependents {
                if !self.forward.get(dependent).is_some_and(|d| d.contains(dep)) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn cascade_from_cycle_terminates_and_covers_all_members() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("a"), [p("b")]);
        graph.set_dependencies(&p("b"), [p("c")]);
        graph.set_dependencies(&p("c"), [p("a")]);
        assert!(graph.is_consistent());

        let mut cascade = graph.cascade(&p("a"));
        cascade.sort();
        assert_eq!(cascade, vec![p("a"), p("b"), p("c")]);
    }

    #[test]
    fn remove_leaves_no_dangling_reverse_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("a"), [p("b")]);
        graph.remove(&p("b"));
        assert_eq!(graph.dependents_of(&p("b")).count(), 0);
        assert!(graph.is_consistent());
    }

    #[test]
    fn resetting_dependencies_drops_stale_reverse_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("a"), [p("b")]);
        graph.set_dependencies(&p("a"), [p("c")]);
        assert_eq!(graph.dependents_of(&p("b")).count(), 0);
        assert_eq!(graph.dependents_of(&p("c")).count(), 1);
        assert!(graph.is_consistent());
    }
}
