//! Provisioning planner.
//!
//! Places every resource into a stage with Kahn's algorithm over the union
//! of structural dependencies and the resolver's ordering constraints.
//! Each stage takes every resource whose prerequisites are all placed, so
//! stages are as wide as the graph allows. Ties inside a stage follow
//! registry order, which makes the plan and its fingerprint deterministic.

use crate::graph::{find_cycles, RelationshipGraph};
use crate::registry::Registry;
use crate::resolver::{ResolutionPlan, ResolvedValue};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strata_core::{AttrAddress, CoreError, CoreResult, Fingerprint, ResourceId, ResourceKind};
use strata_policy::{AllowRule, NetworkPolicy};
use tracing::debug;

/// Where a resource stands in a build or rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PlacementState {
    /// Not yet placed; still unplaced after sorting means blocked by a cycle
    Unvisited,
    /// Placed in a stage, not yet materialized
    InStage(usize),
    /// Reported materialized by the backend
    Materialized,
}

/// A resource as handed to the provisioning backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedResource {
    /// Resource id
    pub id: ResourceId,
    /// Resource kind
    pub kind: ResourceKind,
    /// Resolved attributes, in declaration order
    pub attributes: IndexMap<String, ResolvedValue>,
    /// Traffic allowed into this resource; empty means deny-all
    pub ingress: Vec<AllowRule>,
}

/// Resources safe to materialize concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Position in the plan, starting at 0
    pub index: usize,
    /// Resources in registry order
    pub resources: Vec<PlannedResource>,
}

impl Stage {
    /// Ids of the resources in this stage
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.iter().map(|r| &r.id)
    }

    /// Check if the stage holds `id`
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.iter().any(|r| r.id.as_str() == id)
    }
}

/// A pending binding with the stage its value becomes available at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedBinding {
    /// The attribute holding the reference
    pub consumer: AttrAddress,
    /// The attribute filled in by the backend
    pub producer: AttrAddress,
    /// Stage of the producer resource
    pub available_at_stage: usize,
}

/// Ordered stages plus binding schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    /// Stages in materialization order
    pub stages: Vec<Stage>,
    /// Every pending binding with its availability
    pub bindings: Vec<StagedBinding>,
    /// BLAKE3 over the canonical JSON of stages and bindings
    pub fingerprint: Fingerprint,
}

impl ProvisioningPlan {
    /// Stage holding `id`
    #[must_use]
    pub fn stage_of(&self, id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|stage| stage.contains(id))
            .map(|stage| stage.index)
    }

    /// Planned resource by id
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&PlannedResource> {
        self.stages
            .iter()
            .flat_map(|stage| stage.resources.iter())
            .find(|r| r.id.as_str() == id)
    }

    /// Number of planned resources
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.stages.iter().map(|s| s.resources.len()).sum()
    }

    /// Stage ids as plain lists, useful for display and assertions
    #[must_use]
    pub fn stage_ids(&self) -> Vec<Vec<&str>> {
        self.stages
            .iter()
            .map(|s| s.ids().map(ResourceId::as_str).collect())
            .collect()
    }
}

/// Provisioning planner
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Create a new planner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the provisioning plan for a validated snapshot.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if an edge or binding names a resource
    /// missing from `registry` or `policy`, and `UnsatisfiableGraph` naming
    /// the unplaced resources if ordering constraints form a cycle
    pub fn plan(
        &self,
        registry: &Registry,
        graph: &RelationshipGraph,
        resolution: &ResolutionPlan,
        policy: &NetworkPolicy,
    ) -> CoreResult<ProvisioningPlan> {
        let prerequisites = collect_prerequisites(registry, graph, resolution)?;
        let layers = stage_layers(registry, &prerequisites)?;

        let mut attributes = resolution.by_resource();
        let mut stage_index: IndexMap<&ResourceId, usize> = IndexMap::new();
        let mut stages = Vec::with_capacity(layers.len());
        for (index, layer) in layers.into_iter().enumerate() {
            let mut resources = Vec::with_capacity(layer.len());
            for id in layer {
                let resource = registry.get(id.as_str())?;
                let ingress = policy.for_destination(id.as_str())?.rules.clone();
                resources.push(PlannedResource {
                    id: resource.id.clone(),
                    kind: resource.kind,
                    attributes: attributes.swap_remove(id).unwrap_or_default(),
                    ingress,
                });
                stage_index.insert(id, index);
            }
            stages.push(Stage { index, resources });
        }

        let mut bindings = Vec::with_capacity(resolution.bindings.len());
        for binding in &resolution.bindings {
            let available_at_stage = stage_index
                .get(&binding.producer.resource)
                .copied()
                .ok_or_else(|| {
                    CoreError::unknown_resource(
                        &binding.producer.resource,
                        format!("producer of `{}`", binding.consumer),
                    )
                })?;
            bindings.push(StagedBinding {
                consumer: binding.consumer.clone(),
                producer: binding.producer.clone(),
                available_at_stage,
            });
        }

        let fingerprint = Fingerprint::of_json(&(&stages, &bindings))?;
        debug!(
            stages = stages.len(),
            resources = registry.len(),
            bindings = bindings.len(),
            fingerprint = %fingerprint.short(),
            "planned stages"
        );
        Ok(ProvisioningPlan {
            stages,
            bindings,
            fingerprint,
        })
    }
}

/// Prerequisites of every resource: structural targets plus producers
fn collect_prerequisites<'r>(
    registry: &'r Registry,
    graph: &RelationshipGraph,
    resolution: &ResolutionPlan,
) -> CoreResult<IndexMap<&'r ResourceId, IndexSet<&'r ResourceId>>> {
    let mut prerequisites: IndexMap<&ResourceId, IndexSet<&ResourceId>> =
        registry.ids().map(|id| (id, IndexSet::new())).collect();

    let structural = graph.dependencies().map(|d| (&d.from, &d.to, "dependency"));
    let constraints = resolution.ordering_constraints();
    let derived = constraints.iter().map(|(c, p)| (c, p, "producer"));
    for (from, to, role) in structural.chain(derived) {
        let Some((target, _)) = prerequisites.get_key_value(to) else {
            return Err(CoreError::unknown_resource(to, format!("{role} of `{from}`")));
        };
        let target = *target;
        let Some(entry) = prerequisites.get_mut(from) else {
            return Err(CoreError::unknown_resource(from, format!("dependent on `{to}`")));
        };
        if target != from {
            entry.insert(target);
        }
    }
    Ok(prerequisites)
}

/// Kahn's algorithm emitting maximal layers in registry order
fn stage_layers<'r>(
    registry: &'r Registry,
    prerequisites: &IndexMap<&'r ResourceId, IndexSet<&'r ResourceId>>,
) -> CoreResult<Vec<Vec<&'r ResourceId>>> {
    let mut remaining: IndexMap<&ResourceId, usize> = prerequisites
        .iter()
        .map(|(id, before)| (*id, before.len()))
        .collect();
    let mut dependents: IndexMap<&ResourceId, Vec<&ResourceId>> = IndexMap::new();
    for (id, before) in prerequisites {
        for target in before {
            dependents.entry(*target).or_default().push(*id);
        }
    }

    let mut placement: IndexMap<&ResourceId, PlacementState> = registry
        .ids()
        .map(|id| (id, PlacementState::Unvisited))
        .collect();
    let mut layers = Vec::new();
    let mut ready: Vec<&ResourceId> = registry
        .ids()
        .filter(|id| remaining.get(*id) == Some(&0))
        .collect();
    let mut placed = 0usize;

    while !ready.is_empty() {
        let mut next = Vec::new();
        for id in &ready {
            for dependent in dependents.get(*id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = remaining.get_mut(*dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        for id in &ready {
            if let Some(state) = placement.get_mut(*id) {
                *state = PlacementState::InStage(layers.len());
            }
        }
        placed += ready.len();
        layers.push(std::mem::take(&mut ready));
        next.sort_by_key(|id| registry.position(id.as_str()).unwrap_or(usize::MAX));
        ready = next;
    }

    if placed < registry.len() {
        let blocked =
            |id: &ResourceId| placement.get(id) == Some(&PlacementState::Unvisited);
        let left: Vec<ResourceId> = registry.ids().filter(|id| blocked(id)).cloned().collect();
        let adjacency: IndexMap<ResourceId, IndexSet<ResourceId>> = left
            .iter()
            .map(|id| {
                let targets = prerequisites
                    .get(id)
                    .map(|before| {
                        before
                            .iter()
                            .filter(|t| blocked(t))
                            .map(|t| (*t).clone())
                            .collect()
                    })
                    .unwrap_or_default();
                (id.clone(), targets)
            })
            .collect();
        let cycles = find_cycles(&left, &adjacency);
        return Err(CoreError::UnsatisfiableGraph {
            remaining: left,
            cycles,
        });
    }
    Ok(layers)
}
