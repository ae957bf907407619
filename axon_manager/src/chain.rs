//! Chain topology over controllers.
//!
//! A controller that names another controller's exported interface in its
//! own configuration creates a "feeds into" relation:
//!
//! - command interface with prefix `P` → the current controller *precedes*
//!   `P` (it writes `P`'s reference inputs); `P` is a *following*
//!   controller of the current one,
//! - state interface with prefix `P` → the current controller *follows*
//!   `P` (it reads `P`'s exported outputs).
//!
//! The execution order puts following controllers first, so that by the
//! time a preceding controller reads, its followings have already produced
//! fresh outputs in the same cycle. Edges are stored following → preceding
//! in a `petgraph` stable graph and the order is a plain topological sort;
//! ties fall back to node insertion order. Cycles are rejected when the
//! edges are rebuilt at configure time.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use axon_interface::split_full_name;

use crate::error::{ManagerError, ManagerResult};

/// Which configuration list an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    /// The contributor writes the target's reference interfaces.
    Command,
    /// The contributor reads the target's exported state interfaces.
    State,
}

#[derive(Debug, Clone)]
struct Contribution {
    /// The controller whose exported interfaces are referenced.
    target: String,
    kind: EdgeKind,
}

/// The chain graph plus the caches derived from it.
#[derive(Default)]
pub struct ChainGraph {
    graph: StableDiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    /// Edges contributed by each controller's configuration, so a
    /// reconfigure can replace exactly its own edges.
    contributions: HashMap<String, Vec<Contribution>>,
}

impl ChainGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node for a freshly loaded controller.
    pub fn add_controller(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            let index = self.graph.add_node(name.to_string());
            self.nodes.insert(name.to_string(), index);
        }
    }

    /// Remove a controller and every edge touching it.
    pub fn remove_controller(&mut self, name: &str) {
        self.clear_contributions(name);
        if let Some(index) = self.nodes.remove(name) {
            self.graph.remove_node(index);
        }
        // Other controllers may still contribute edges naming this one;
        // those edges died with the node, so drop their records too.
        for contributions in self.contributions.values_mut() {
            contributions.retain(|contribution| contribution.target != name);
        }
        self.contributions.remove(name);
    }

    /// Drop every edge contributed by `name`'s configuration (cleanup and
    /// re-configure both go through here).
    pub fn clear_contributions(&mut self, name: &str) {
        let Some(contributions) = self.contributions.remove(name) else {
            return;
        };
        let Some(&self_index) = self.nodes.get(name) else {
            return;
        };
        for contribution in contributions {
            let Some(&target_index) = self.nodes.get(&contribution.target) else {
                continue;
            };
            let (from, to) = match contribution.kind {
                // following → preceding
                EdgeKind::Command => (target_index, self_index),
                EdgeKind::State => (self_index, target_index),
            };
            if let Some(edge) = self.graph.find_edge(from, to) {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Rebuild the edges contributed by one controller's configuration.
    ///
    /// `command_interfaces` / `state_interfaces` are the explicitly named
    /// interfaces; a prefix matching another loaded controller creates an
    /// edge. Rejects (and rolls back) configurations that would close a
    /// cycle.
    pub fn rebuild_edges(
        &mut self,
        name: &str,
        command_interfaces: &[String],
        state_interfaces: &[String],
    ) -> ManagerResult<()> {
        self.clear_contributions(name);
        let self_index = match self.nodes.get(name) {
            Some(&index) => index,
            None => {
                self.add_controller(name);
                self.nodes[name]
            }
        };

        let mut contributions = Vec::new();
        let mut add_edge = |graph: &mut StableDiGraph<String, ()>,
                            target_index: NodeIndex,
                            target: &str,
                            kind: EdgeKind| {
            let (from, to) = match kind {
                EdgeKind::Command => (target_index, self_index),
                EdgeKind::State => (self_index, target_index),
            };
            if graph.find_edge(from, to).is_none() {
                graph.add_edge(from, to, ());
            }
            contributions.push(Contribution {
                target: target.to_string(),
                kind,
            });
        };

        for interface in command_interfaces {
            let (prefix, _) = split_full_name(interface);
            if prefix == name {
                continue;
            }
            if let Some(&target_index) = self.nodes.get(prefix) {
                add_edge(&mut self.graph, target_index, prefix, EdgeKind::Command);
            }
        }
        for interface in state_interfaces {
            let (prefix, _) = split_full_name(interface);
            if prefix == name {
                continue;
            }
            if let Some(&target_index) = self.nodes.get(prefix) {
                add_edge(&mut self.graph, target_index, prefix, EdgeKind::State);
            }
        }
        self.contributions.insert(name.to_string(), contributions);

        if toposort(&self.graph, None).is_err() {
            self.clear_contributions(name);
            return Err(ManagerError::ChainCycle {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Execution order: following controllers first. Ties resolve to node
    /// insertion order.
    pub fn ordered_names(&self) -> ManagerResult<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .map(|index| self.graph[index].clone())
                .collect()),
            Err(cycle) => Err(ManagerError::ChainCycle {
                name: self.graph[cycle.node_id()].clone(),
            }),
        }
    }

    /// Controllers that write `name`'s reference interfaces (preceding via
    /// command edges).
    pub fn reference_preceding(&self, name: &str) -> Vec<String> {
        self.preceding_of(name, EdgeKind::Command)
    }

    /// Controllers that read `name`'s exported state interfaces.
    pub fn state_preceding(&self, name: &str) -> Vec<String> {
        self.preceding_of(name, EdgeKind::State)
    }

    fn preceding_of(&self, name: &str, kind: EdgeKind) -> Vec<String> {
        self.contributions
            .iter()
            .filter(|(_, contributions)| {
                contributions
                    .iter()
                    .any(|c| c.target == name && c.kind == kind)
            })
            .map(|(contributor, _)| contributor.clone())
            .collect()
    }

    /// Following controllers of `name` (targets of its command edges).
    pub fn following_of(&self, name: &str) -> Vec<String> {
        self.contributions
            .get(name)
            .map(|contributions| {
                contributions
                    .iter()
                    .filter(|c| c.kind == EdgeKind::Command)
                    .map(|c| c.target.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `name` currently has any chain edges.
    pub fn has_edges(&self, name: &str) -> bool {
        let contributes = self
            .contributions
            .get(name)
            .is_some_and(|contributions| !contributions.is_empty());
        contributes
            || self
                .contributions
                .values()
                .any(|contributions| contributions.iter().any(|c| c.target == name))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
