//! Stream dependency graph construction and depth ordering
//!
//! Raw dependency references come from task metadata and may be stream IDs
//! or task-title fragments. Resolution and depth assignment happen once per
//! run; the graph is read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};

use streamstore::StreamInfo;
use tracing::{debug, warn};

/// Resolved dependency relationships and depth ordering for one run
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Resolved dependencies per stream. Every known stream has an entry.
    deps: BTreeMap<String, BTreeSet<String>>,

    /// Depth per stream: 0 for independent streams, 1 + max dependency depth otherwise
    depths: BTreeMap<String, usize>,

    /// Set when depth assignment hit a cycle
    cycle_detected: bool,
}

impl DependencyGraph {
    /// Build the graph from the full stream set
    ///
    /// Unresolvable references are dropped with a warning; they never abort
    /// construction. Cycles are broken by assigning the entire unresolved
    /// remainder the current depth, which unblocks scheduling but does not
    /// order cyclic members relative to each other.
    pub fn build(streams: &[StreamInfo]) -> Self {
        let ids: BTreeSet<String> = streams.iter().map(|s| s.stream_id.clone()).collect();

        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for stream in streams {
            let resolved = deps.entry(stream.stream_id.clone()).or_default();
            for reference in &stream.dependencies {
                match resolve_reference(reference, &ids) {
                    Some(dep_id) => {
                        resolved.insert(dep_id);
                    }
                    None => {
                        warn!(
                            stream = %stream.stream_id,
                            reference = %reference,
                            "Dropped dependency reference that matches no known stream"
                        );
                    }
                }
            }
        }

        let (depths, cycle_detected) = assign_depths(&ids, &deps);

        debug!(streams = ids.len(), cycle_detected, "Built dependency graph");
        Self {
            deps,
            depths,
            cycle_detected,
        }
    }

    /// Resolved dependencies of one stream
    pub fn dependencies_of(&self, stream_id: &str) -> BTreeSet<String> {
        self.deps.get(stream_id).cloned().unwrap_or_default()
    }

    /// Depth of one stream (0 for unknown streams)
    pub fn depth_of(&self, stream_id: &str) -> usize {
        self.depths.get(stream_id).copied().unwrap_or(0)
    }

    /// Streams grouped by depth, each group sorted by ID
    pub fn by_depth(&self) -> BTreeMap<usize, Vec<String>> {
        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (stream_id, depth) in &self.depths {
            groups.entry(*depth).or_default().push(stream_id.clone());
        }
        groups
    }

    /// Whether depth assignment hit a cycle
    pub fn cycle_detected(&self) -> bool {
        self.cycle_detected
    }
}

/// Resolve a raw reference against the known stream ID set
///
/// A reference that is itself a stream ID resolves directly. Otherwise the
/// task-title forms "<id>: ..." and "[<id>] ..." resolve to <id>.
fn resolve_reference(reference: &str, ids: &BTreeSet<String>) -> Option<String> {
    if ids.contains(reference) {
        return Some(reference.to_string());
    }

    for id in ids {
        if reference.starts_with(&format!("{}:", id)) || reference.starts_with(&format!("[{}]", id)) {
            return Some(id.clone());
        }
    }

    None
}

/// Assign depths by iterative level-peeling
fn assign_depths(
    ids: &BTreeSet<String>,
    deps: &BTreeMap<String, BTreeSet<String>>,
) -> (BTreeMap<String, usize>, bool) {
    let mut depths: BTreeMap<String, usize> = BTreeMap::new();
    let mut remaining: BTreeSet<String> = ids.clone();
    let mut current_depth = 0;

    while !remaining.is_empty() {
        // Streams whose dependencies are all already leveled
        let ready: Vec<String> = remaining
            .iter()
            .filter(|id| {
                deps.get(*id)
                    .map(|d| d.iter().all(|dep| depths.contains_key(dep)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            // Cycle: force the entire remainder to the current depth
            warn!(streams = ?remaining, "Dependency cycle detected, assigning remaining streams to depth {}", current_depth);
            for id in &remaining {
                depths.insert(id.clone(), current_depth);
            }
            return (depths, true);
        }

        for id in ready {
            let depth = deps
                .get(&id)
                .filter(|d| !d.is_empty())
                .and_then(|d| d.iter().map(|dep| depths.get(dep).copied().unwrap_or(0)).max())
                .map(|max_dep| max_dep + 1)
                .unwrap_or(0);
            depths.insert(id.clone(), depth);
            remaining.remove(&id);
        }

        current_depth += 1;
    }

    (depths, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, deps: &[&str]) -> StreamInfo {
        StreamInfo {
            stream_id: id.to_string(),
            stream_name: format!("{} stream", id),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_dag_depths() {
        let streams = vec![stream("a", &[]), stream("b", &["a"]), stream("c", &["a", "b"])];
        let graph = DependencyGraph::build(&streams);

        assert_eq!(graph.depth_of("a"), 0);
        assert_eq!(graph.depth_of("b"), 1);
        assert_eq!(graph.depth_of("c"), 2);
        assert!(!graph.cycle_detected());
    }

    #[test]
    fn test_depths_independent_of_input_order() {
        let forward = vec![stream("a", &[]), stream("b", &["a"]), stream("c", &["a", "b"])];
        let reversed = vec![stream("c", &["a", "b"]), stream("b", &["a"]), stream("a", &[])];

        let g1 = DependencyGraph::build(&forward);
        let g2 = DependencyGraph::build(&reversed);

        for id in ["a", "b", "c"] {
            assert_eq!(g1.depth_of(id), g2.depth_of(id));
        }
    }

    #[test]
    fn test_cycle_terminates_with_equal_depths() {
        let streams = vec![stream("a", &["b"]), stream("b", &["a"])];
        let graph = DependencyGraph::build(&streams);

        assert!(graph.cycle_detected());
        assert_eq!(graph.depth_of("a"), graph.depth_of("b"));
    }

    #[test]
    fn test_cycle_after_clean_levels() {
        // "root" levels normally; the cycle members land one depth later
        let streams = vec![stream("root", &[]), stream("x", &["root", "y"]), stream("y", &["x"])];
        let graph = DependencyGraph::build(&streams);

        assert!(graph.cycle_detected());
        assert_eq!(graph.depth_of("root"), 0);
        assert_eq!(graph.depth_of("x"), 1);
        assert_eq!(graph.depth_of("y"), 1);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let streams = vec![stream("a", &["a"])];
        let graph = DependencyGraph::build(&streams);

        assert!(graph.cycle_detected());
        assert_eq!(graph.depth_of("a"), 0);
    }

    #[test]
    fn test_reference_resolution_forms() {
        let streams = vec![
            stream("a", &[]),
            stream("b", &["a: set up the schema"]),
            stream("c", &["[b] wire the API"]),
        ];
        let graph = DependencyGraph::build(&streams);

        assert_eq!(graph.dependencies_of("b"), BTreeSet::from(["a".to_string()]));
        assert_eq!(graph.dependencies_of("c"), BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_unresolvable_reference_is_dropped() {
        let streams = vec![stream("a", &[]), stream("b", &["a", "finish the thing eventually"])];
        let graph = DependencyGraph::build(&streams);

        // Construction survives and only the resolvable reference remains
        assert_eq!(graph.dependencies_of("b"), BTreeSet::from(["a".to_string()]));
        assert_eq!(graph.depth_of("b"), 1);
    }

    #[test]
    fn test_by_depth_grouping() {
        let streams = vec![stream("a", &[]), stream("b", &[]), stream("c", &["a"])];
        let graph = DependencyGraph::build(&streams);

        let groups = graph.by_depth();
        assert_eq!(groups.get(&0), Some(&vec!["a".to_string(), "b".to_string()]));
        assert_eq!(groups.get(&1), Some(&vec!["c".to_string()]));
    }

    #[test]
    fn test_empty_stream_set() {
        let graph = DependencyGraph::build(&[]);
        assert!(graph.by_depth().is_empty());
        assert!(!graph.cycle_detected());
    }
}
