//! Dependency graph module.
//!
//! Provides [`DependencyGraph`], the persistent record of which nodes read
//! which other nodes during their last evaluation. An edge `a -> b` means
//! "b depends on a": changing `a` invalidates `b`. The calculator walks the
//! outgoing edges to invalidate cached values and uses nodes without
//! dependents as reclamation candidates.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

use crate::error::ReclamationError;
use crate::selector::NodeKey;
use crate::stat::Stat;

/// Directed graph of node dependencies.
///
/// Uses a stable graph so node indices stay valid across removals.
///
/// # Examples
///
/// ```rust
/// use modcalc::graph::DependencyGraph;
/// use modcalc::{NodeKey, Stat};
///
/// let mut graph = DependencyGraph::new();
/// let strength = NodeKey::total(Stat::new("Strength"));
/// let life = NodeKey::total(Stat::new("Life"));
///
/// // Life reads Strength
/// graph.set_dependencies(&life, [strength.clone()]);
/// assert_eq!(graph.dependents(&strength), vec![life.clone()]);
/// assert_eq!(graph.dependencies(&life), vec![strength]);
/// ```
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<NodeKey, ()>,
    node_map: HashMap<NodeKey, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph if it doesn't exist.
    ///
    /// Returns the index of the new or existing node.
    pub fn add_node(&mut self, key: NodeKey) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(&key) {
            idx
        } else {
            let idx = self.graph.add_node(key.clone());
            self.node_map.insert(key, idx);
            idx
        }
    }

    /// Replace the recorded dependencies of `key`.
    ///
    /// Missing nodes are created. Duplicate dependencies collapse into one
    /// edge.
    pub fn set_dependencies(&mut self, key: &NodeKey, dependencies: impl IntoIterator<Item = NodeKey>) {
        let idx = self.add_node(key.clone());
        let stale: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for dependency in dependencies {
            let dep_idx = self.add_node(dependency);
            if self.graph.find_edge(dep_idx, idx).is_none() {
                self.graph.add_edge(dep_idx, idx, ());
            }
        }
    }

    /// Nodes that read `key`.
    pub fn dependents(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Nodes `key` read during its last evaluation.
    pub fn dependencies(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: &NodeKey, direction: Direction) -> Vec<NodeKey> {
        match self.node_map.get(key) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, direction)
                .filter_map(|n| self.graph.node_weight(n).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn has_dependents(&self, key: &NodeKey) -> bool {
        self.node_map.get(key).is_some_and(|&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .is_some()
        })
    }

    /// Nodes nothing depends on.
    pub fn unreferenced(&self) -> Vec<NodeKey> {
        self.node_map
            .iter()
            .filter(|(_, &idx)| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove a node and all of its edges.
    ///
    /// Fails if the index map and the graph disagree about the node.
    pub fn remove_node(&mut self, key: &NodeKey) -> Result<(), ReclamationError> {
        let idx = match self.node_map.remove(key) {
            Some(idx) => idx,
            None => return Ok(()),
        };
        match self.graph.remove_node(idx) {
            Some(_) => Ok(()),
            None => Err(ReclamationError::StaleIndex(key.clone())),
        }
    }

    pub fn contains_node(&self, key: &NodeKey) -> bool {
        self.node_map.contains_key(key)
    }

    /// Whether any node of `stat` is still in the graph.
    pub fn has_nodes_of(&self, stat: &Stat) -> bool {
        self.node_map.keys().any(|key| key.stat == *stat)
    }

    /// Nodes of `stat`.
    pub fn nodes_of(&self, stat: &Stat) -> Vec<NodeKey> {
        self.node_map
            .keys()
            .filter(|key| key.stat == *stat)
            .cloned()
            .collect()
    }

    pub fn nodes(&self) -> Vec<NodeKey> {
        self.node_map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{NodeType, PathDefinition};

    fn key(name: &str) -> NodeKey {
        NodeKey::total(Stat::new(name))
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(key("A"));
        let b = graph.add_node(key("A"));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_set_dependencies_replaces_previous() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key("Life"), [key("Strength"), key("Level")]);
        assert_eq!(graph.dependencies(&key("Life")).len(), 2);

        graph.set_dependencies(&key("Life"), [key("Level")]);
        assert_eq!(graph.dependencies(&key("Life")), vec![key("Level")]);
        assert!(graph.dependents(&key("Strength")).is_empty());
        // The node itself stays until reclaimed.
        assert!(graph.contains_node(&key("Strength")));
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key("Life"), [key("Strength"), key("Strength")]);
        assert_eq!(graph.dependencies(&key("Life")), vec![key("Strength")]);
    }

    #[test]
    fn test_unreferenced_and_remove() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&key("Life"), [key("Strength")]);
        assert_eq!(graph.unreferenced(), vec![key("Life")]);
        assert!(graph.has_dependents(&key("Strength")));

        graph.remove_node(&key("Life")).unwrap();
        assert!(!graph.has_dependents(&key("Strength")));
        assert_eq!(graph.unreferenced(), vec![key("Strength")]);
        assert!(graph.remove_node(&key("Missing")).is_ok());
    }

    #[test]
    fn test_has_nodes_of_stat() {
        let mut graph = DependencyGraph::new();
        let life = Stat::new("Life");
        graph.add_node(NodeKey::new(life.clone(), NodeType::BaseAdd, PathDefinition::main()));
        assert!(graph.has_nodes_of(&life));
        assert!(!graph.has_nodes_of(&Stat::new("Mana")));
        assert_eq!(graph.nodes_of(&life).len(), 1);
        assert!(graph.nodes_of(&Stat::new("Mana")).is_empty());
    }
}
