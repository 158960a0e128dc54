use std::collections::{HashMap, HashSet, VecDeque};

use tiering_domain::value_objects::DeploymentMode;

/// Directed graph of directly allowed transitions. Legality of a switch is
/// decided by reachability, not by a direct edge.
#[derive(Debug, Clone)]
pub struct CompatibilityGraph {
    edges: HashMap<DeploymentMode, Vec<DeploymentMode>>,
}

impl CompatibilityGraph {
    pub fn from_edges(edges: impl IntoIterator<Item = (DeploymentMode, DeploymentMode)>) -> Self {
        let mut adjacency: HashMap<DeploymentMode, Vec<DeploymentMode>> = HashMap::new();
        for (from, to) in edges {
            let targets = adjacency.entry(from).or_default();
            if !targets.contains(&to) {
                targets.push(to);
            }
        }
        Self { edges: adjacency }
    }

    pub fn neighbors(&self, mode: DeploymentMode) -> &[DeploymentMode] {
        self.edges.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_edge(&self, from: DeploymentMode, to: DeploymentMode) -> bool {
        self.neighbors(from).contains(&to)
    }

    /// Breadth-first search; every mode reaches itself.
    pub fn is_reachable(&self, from: DeploymentMode, to: DeploymentMode) -> bool {
        self.path(from, to).is_some()
    }

    /// Shortest path of declared edges, both ends included.
    pub fn path(&self, from: DeploymentMode, to: DeploymentMode) -> Option<Vec<DeploymentMode>> {
        if from == to {
            return Some(vec![from]);
        }

        let mut visited = HashSet::from([from]);
        let mut parents: HashMap<DeploymentMode, DeploymentMode> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(mode) = queue.pop_front() {
            for &next in self.neighbors(mode) {
                if !visited.insert(next) {
                    continue;
                }
                parents.insert(next, mode);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(&cursor) {
                        path.push(parent);
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

impl Default for CompatibilityGraph {
    /// Edges add or remove one backend, plus the two cross migrations
    /// between external-backed and object-backed modes.
    fn default() -> Self {
        use DeploymentMode::*;
        Self::from_edges([
            (LocalOnly, LocalExternal),
            (LocalOnly, LocalObject),
            (LocalExternal, LocalOnly),
            (LocalExternal, LocalExternalObject),
            (LocalExternal, LocalObject),
            (LocalObject, LocalOnly),
            (LocalObject, LocalExternalObject),
            (LocalObject, LocalExternal),
            (LocalExternalObject, LocalExternal),
            (LocalExternalObject, LocalObject),
        ])
    }
}
