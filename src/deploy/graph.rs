//! Ordering of declared effects
//!
//! Builds a directed acyclic graph from "must run after" edges and performs
//! a topological sort to decide execution order.

use std::collections::{BTreeMap, BTreeSet};

use super::EffectId;

/// Dependency graph over effect identities
#[derive(Debug, Default)]
pub struct EffectGraph {
    /// Edges: node -> nodes that must run BEFORE this node
    edges: BTreeMap<EffectId, BTreeSet<EffectId>>,
    /// All known nodes
    nodes: BTreeSet<EffectId>,
}

impl EffectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: EffectId) {
        self.nodes.insert(id);
    }

    /// `after` must run after `before`
    /// Only creates the edge if both ends are known nodes
    pub fn add_edge(&mut self, before: &EffectId, after: &EffectId) {
        if !self.nodes.contains(before) || !self.nodes.contains(after) {
            return;
        }
        self.edges
            .entry(after.clone())
            .or_default()
            .insert(before.clone());
    }

    /// Direct dependencies of a node (nodes that must run before it)
    pub fn dependencies(&self, id: &EffectId) -> impl Iterator<Item = &EffectId> {
        self.edges.get(id).into_iter().flat_map(|s| s.iter())
    }

    /// Topological sort using Kahn's algorithm
    /// Ties are broken by `EffectId` order so the result is stable
    pub fn toposort(&self) -> Result<Vec<EffectId>, CycleError> {
        let mut in_degree: BTreeMap<&EffectId, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.dependencies(n).count()))
            .collect();

        let mut ready: BTreeSet<&EffectId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            result.push(node.clone());

            // Release every node that was waiting on this one
            for (dependent, deps) in &self.edges {
                if deps.contains(node) {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let remaining = self
                .nodes
                .iter()
                .filter(|n| !result.contains(n))
                .cloned()
                .collect();
            return Err(CycleError { nodes: remaining });
        }

        Ok(result)
    }
}

/// Error when effects depend on each other in a loop
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Effect cycle detected involving: {}", display_ids(.nodes))]
pub struct CycleError {
    pub nodes: Vec<EffectId>,
}

fn display_ids(ids: &[EffectId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
