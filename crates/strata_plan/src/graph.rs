//! Relationship graph over resource ids.
//!
//! Edges hold ids, not resources: a resource can be removed from the
//! registry without touching edge bookkeeping. Dangling edges surface in
//! [`RelationshipGraph::validate`].

use crate::registry::Registry;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use strata_core::{CoreError, CoreResult, Dependency, EdgeKind, NetworkEdge, ResourceId};

type EdgeKey = (ResourceId, ResourceId, u32);

/// Directed graph of structural and network-allow edges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipGraph {
    dependencies: IndexSet<Dependency>,
    network: IndexMap<EdgeKey, NetworkEdge>,
}

impl RelationshipGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` cannot be materialized before `to`.
    ///
    /// Endpoint existence is checked by the owning stack. Returns `false`
    /// when the edge was already present.
    ///
    /// # Errors
    ///
    /// Returns `SelfDependency` if `from == to`
    pub fn add_dependency(&mut self, from: ResourceId, to: ResourceId) -> CoreResult<bool> {
        if from == to {
            return Err(CoreError::SelfDependency { id: from });
        }
        Ok(self.dependencies.insert(Dependency::new(from, to)))
    }

    /// Record a network-allow edge. Idempotent on (from, to, port); a repeat
    /// keeps the first label unless the first had none.
    ///
    /// Returns `false` when an identical edge was already present.
    pub fn add_network_allow(&mut self, edge: NetworkEdge) -> bool {
        let key = (edge.from.clone(), edge.to.clone(), edge.port);
        match self.network.get_mut(&key) {
            Some(existing) => {
                if existing.label.is_none() {
                    existing.label = edge.label;
                }
                false
            }
            None => {
                self.network.insert(key, edge);
                true
            }
        }
    }

    /// Structural edges in insertion order
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    /// Network-allow edges in insertion order
    pub fn network_edges(&self) -> impl Iterator<Item = &NetworkEdge> {
        self.network.values()
    }

    /// Number of edges of a kind
    #[must_use]
    pub fn edge_count(&self, kind: EdgeKind) -> usize {
        match kind {
            EdgeKind::Structural => self.dependencies.len(),
            EdgeKind::NetworkAllow => self.network.len(),
        }
    }

    /// Targets of `id`'s outgoing edges of a kind
    #[must_use]
    pub fn neighbors(&self, id: &str, kind: EdgeKind) -> IndexSet<ResourceId> {
        match kind {
            EdgeKind::Structural => self
                .dependencies
                .iter()
                .filter(|d| d.from.as_str() == id)
                .map(|d| d.to.clone())
                .collect(),
            EdgeKind::NetworkAllow => self
                .network
                .values()
                .filter(|e| e.from.as_str() == id)
                .map(|e| e.to.clone())
                .collect(),
        }
    }

    /// Resources that structurally depend on `id`
    #[must_use]
    pub fn dependents(&self, id: &str) -> IndexSet<ResourceId> {
        self.dependencies
            .iter()
            .filter(|d| d.to.as_str() == id)
            .map(|d| d.from.clone())
            .collect()
    }

    /// Adjacency lists for one edge kind, keyed in first-appearance order
    #[must_use]
    pub fn adjacency(&self, kind: EdgeKind) -> IndexMap<ResourceId, IndexSet<ResourceId>> {
        let mut adjacency: IndexMap<ResourceId, IndexSet<ResourceId>> = IndexMap::new();
        let mut link = |from: &ResourceId, to: &ResourceId| {
            adjacency.entry(from.clone()).or_default().insert(to.clone());
            adjacency.entry(to.clone()).or_default();
        };
        match kind {
            EdgeKind::Structural => {
                for d in &self.dependencies {
                    link(&d.from, &d.to);
                }
            }
            EdgeKind::NetworkAllow => {
                for e in self.network.values() {
                    link(&e.from, &e.to);
                }
            }
        }
        adjacency
    }

    /// Cycles among edges of a kind, nodes ordered by first appearance.
    ///
    /// Structural cycles are fatal for planning; network-allow cycles are
    /// legal (two services may talk to each other).
    #[must_use]
    pub fn detect_cycles(&self, kind: EdgeKind) -> Vec<Vec<ResourceId>> {
        let adjacency = self.adjacency(kind);
        let order: Vec<ResourceId> = adjacency.keys().cloned().collect();
        find_cycles(&order, &adjacency)
    }

    /// Cycles among edges of a kind, nodes ordered by `order`
    #[must_use]
    pub fn detect_cycles_in_order<'a>(
        &self,
        kind: EdgeKind,
        order: impl IntoIterator<Item = &'a ResourceId>,
    ) -> Vec<Vec<ResourceId>> {
        let adjacency = self.adjacency(kind);
        let mut nodes: IndexSet<ResourceId> = order.into_iter().cloned().collect();
        nodes.extend(adjacency.keys().cloned());
        let nodes: Vec<ResourceId> = nodes.into_iter().collect();
        find_cycles(&nodes, &adjacency)
    }

    /// Check that every edge endpoint is defined
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` for the first dangling endpoint
    pub fn validate(&self, registry: &Registry) -> CoreResult<()> {
        for d in &self.dependencies {
            if !registry.contains(d.from.as_str()) {
                return Err(CoreError::unknown_resource(
                    &d.from,
                    format!("dependent in `{} -> {}`", d.from, d.to),
                ));
            }
            if !registry.contains(d.to.as_str()) {
                return Err(CoreError::unknown_resource(
                    &d.to,
                    format!("dependency of `{}`", d.from),
                ));
            }
        }
        for e in self.network.values() {
            for endpoint in [&e.from, &e.to] {
                if !registry.contains(endpoint.as_str()) {
                    return Err(CoreError::unknown_resource(
                        endpoint,
                        format!("endpoint of network-allow {e}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Find cycles with Tarjan's strongly connected components.
///
/// Each component with more than one member, or a single member with a
/// self-loop, yields one closed path. The path starts at the member that
/// comes first in `order` and the components are reported in that order.
pub(crate) fn find_cycles(
    order: &[ResourceId],
    adjacency: &IndexMap<ResourceId, IndexSet<ResourceId>>,
) -> Vec<Vec<ResourceId>> {
    let rank: HashMap<&ResourceId, usize> = order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    let mut tarjan = Tarjan::new(adjacency);
    for id in order {
        if adjacency.contains_key(id) && !tarjan.indices.contains_key(id) {
            tarjan.strongconnect(id);
        }
    }

    let mut cycles: Vec<(usize, Vec<ResourceId>)> = Vec::new();
    for component in tarjan.components {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|id| adjacency.get(*id).is_some_and(|next| next.contains(*id)));
        if !is_cycle {
            continue;
        }
        let Some(start) = component
            .iter()
            .copied()
            .min_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX))
        else {
            continue;
        };
        let members: HashSet<&ResourceId> = component.iter().copied().collect();
        let path = cycle_path(start, &members, adjacency);
        cycles.push((rank.get(start).copied().unwrap_or(usize::MAX), path));
    }
    cycles.sort_by_key(|(rank, _)| *rank);
    cycles.into_iter().map(|(_, path)| path).collect()
}

struct Tarjan<'g> {
    adjacency: &'g IndexMap<ResourceId, IndexSet<ResourceId>>,
    next_index: usize,
    indices: HashMap<&'g ResourceId, usize>,
    lowlink: HashMap<&'g ResourceId, usize>,
    stack: Vec<&'g ResourceId>,
    on_stack: HashSet<&'g ResourceId>,
    components: Vec<Vec<&'g ResourceId>>,
}

impl<'g> Tarjan<'g> {
    fn new(adjacency: &'g IndexMap<ResourceId, IndexSet<ResourceId>>) -> Self {
        Self {
            adjacency,
            next_index: 0,
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            components: Vec::new(),
        }
    }

    fn strongconnect(&mut self, id: &ResourceId) {
        // Re-borrow through the adjacency map so every stored key lives for 'g
        let Some((v, successors)) = self.adjacency.get_key_value(id) else {
            return;
        };
        self.indices.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        for w in successors {
            if !self.indices.contains_key(w) {
                self.strongconnect(w);
                let low = self.lowlink[v].min(self.lowlink.get(w).copied().unwrap_or(usize::MAX));
                self.lowlink.insert(v, low);
            } else if self.on_stack.contains(w) {
                let low = self.lowlink[v].min(self.indices[w]);
                self.lowlink.insert(v, low);
            }
        }

        if self.lowlink[v] == self.indices[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

fn cycle_path(
    start: &ResourceId,
    members: &HashSet<&ResourceId>,
    adjacency: &IndexMap<ResourceId, IndexSet<ResourceId>>,
) -> Vec<ResourceId> {
    let mut path = vec![start.clone()];
    let mut visited: HashSet<&ResourceId> = HashSet::from([start]);
    walk_back_to(start, start, members, adjacency, &mut path, &mut visited);
    path
}

fn walk_back_to<'g>(
    start: &ResourceId,
    current: &ResourceId,
    members: &HashSet<&ResourceId>,
    adjacency: &'g IndexMap<ResourceId, IndexSet<ResourceId>>,
    path: &mut Vec<ResourceId>,
    visited: &mut HashSet<&'g ResourceId>,
) -> bool {
    let Some(successors) = adjacency.get(current) else {
        return false;
    };
    if successors.contains(start) {
        return true;
    }
    for next in successors {
        if members.contains(next) && visited.insert(next) {
            path.push(next.clone());
            if walk_back_to(start, next, members, adjacency, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}
