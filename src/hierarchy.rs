// src/hierarchy.rs

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::cascade_client::CascadeHierarchyNode;

/// Depth of the organizational tree. Cascade models six named levels;
/// anything outside 1..=6 in the source data is ignored.
pub const MAX_HIERARCHY_DEPTH: usize = 6;

/// Id-keyed lookup over the fetched hierarchy nodes. Built once per run,
/// read-only afterwards.
pub struct HierarchyIndex {
    nodes: HashMap<String, CascadeHierarchyNode>,
}

impl HierarchyIndex {
    /// Duplicate ids keep the record seen last, matching the fetch-dedup
    /// policy.
    pub fn build(nodes: Vec<CascadeHierarchyNode>) -> Self {
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            map.insert(node.id.clone(), node);
        }
        HierarchyIndex { nodes: map }
    }

    pub fn get(&self, id: &str) -> Option<&CascadeHierarchyNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Titles along one walk from a node to its root, keyed by level 1..=6.
/// Sparse: levels the walk never touched stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPath {
    titles: [Option<String>; MAX_HIERARCHY_DEPTH],
}

impl ResolvedPath {
    /// Title recorded at `level` (1-based). Out-of-range levels are `None`.
    pub fn title(&self, level: usize) -> Option<&str> {
        if (1..=MAX_HIERARCHY_DEPTH).contains(&level) {
            self.titles[level - 1].as_deref()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.titles.iter().all(|t| t.is_none())
    }

    fn set(&mut self, level: u32, title: String) {
        let level = level as usize;
        if (1..=MAX_HIERARCHY_DEPTH).contains(&level) {
            self.titles[level - 1] = Some(title);
        }
    }
}

/// Walks parent links from `start_id` towards the root, recording each
/// node's title at its level. A start id that is not in the index yields a
/// fully empty path; missing parents stop the walk. A visited set and a hop
/// cap keep malformed data (cycles, over-deep chains) from looping.
pub fn resolve_path(index: &HierarchyIndex, start_id: &str) -> ResolvedPath {
    let mut path = ResolvedPath::default();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = index.get(start_id);

    while let Some(node) = current {
        if visited.len() >= MAX_HIERARCHY_DEPTH {
            warn!(
                "Hierarchy walk from '{}' exceeded {} levels, stopping at '{}'",
                start_id, MAX_HIERARCHY_DEPTH, node.id
            );
            break;
        }
        if !visited.insert(node.id.as_str()) {
            warn!(
                "Cycle in hierarchy parent links at '{}' (walk from '{}')",
                node.id, start_id
            );
            break;
        }
        if let Some(title) = &node.title {
            path.set(node.level, title.clone());
        }
        current = node.parent_id.as_deref().and_then(|pid| index.get(pid));
    }

    path
}
