//! Stack: the build façade over a registry and its relationship graph.
//!
//! A stack is built in one synchronous cycle:
//! `define -> add_dependency / add_network_allow -> resolve -> compile_policy -> plan`.
//! [`Stack::build`] runs the whole cycle and either returns every output or
//! the first error; no partial plan is ever exposed.

use crate::graph::RelationshipGraph;
use crate::planner::{Planner, ProvisioningPlan};
use crate::registry::{Registry, Resource, ResourceHandle};
use crate::resolver::{ResolutionPlan, Resolver};
use indexmap::IndexSet;
use serde::Serialize;
use strata_core::{
    AttributeValue, CoreError, CoreResult, EdgeKind, NetworkEdge, ResourceId, ResourceKind,
};
use strata_policy::{NetworkPolicy, PolicyCompiler};
use tracing::{debug, info, warn};

/// Everything a successful build produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutput {
    /// Resolved attributes and pending bindings
    pub resolution: ResolutionPlan,
    /// Per-destination ingress rules
    pub policy: NetworkPolicy,
    /// Ordered stages
    pub plan: ProvisioningPlan,
}

/// Declarative stack of resources and relationships
#[derive(Debug, Clone, Default)]
pub struct Stack {
    registry: Registry,
    graph: RelationshipGraph,
}

impl Stack {
    /// Create an empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Relationship graph
    #[must_use]
    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Define a resource. See [`Registry::define`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidId`, `DuplicateId` or `InvalidAttribute`
    pub fn define<S: Into<String>>(
        &mut self,
        kind: ResourceKind,
        id: &str,
        attributes: impl IntoIterator<Item = (S, AttributeValue)>,
    ) -> CoreResult<ResourceHandle> {
        let handle = self.registry.define(kind, id, attributes)?;
        debug!(resource = %handle.id(), %kind, "defined resource");
        Ok(handle)
    }

    /// Get a resource by id
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if absent
    pub fn get(&self, id: &str) -> CoreResult<&Resource> {
        self.registry.get(id)
    }

    /// Remove a resource. Edges naming it stay and fail the next build.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if absent
    pub fn remove(&mut self, id: &str) -> CoreResult<Resource> {
        self.registry.remove(id)
    }

    /// `from` cannot be materialized before `to`
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if either endpoint is undefined and
    /// `SelfDependency` if they are the same resource
    pub fn add_dependency(&mut self, from: &str, to: &str) -> CoreResult<()> {
        let from = self.endpoint(from, || format!("dependent on `{to}`"))?;
        let to = self.endpoint(to, || format!("dependency of `{from}`"))?;
        if !self.graph.add_dependency(from.clone(), to.clone())? {
            debug!(%from, %to, "dependency already declared");
        }
        Ok(())
    }

    /// `from` may open connections to `to` on `port`. Repeating an edge is
    /// a no-op.
    ///
    /// Ports are range-checked when the policy is compiled.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if either endpoint is undefined
    pub fn add_network_allow(
        &mut self,
        from: &str,
        to: &str,
        port: u32,
        label: Option<&str>,
    ) -> CoreResult<()> {
        let from = self.endpoint(from, || format!("source of network-allow to `{to}`"))?;
        let to = self.endpoint(to, || format!("destination of network-allow from `{from}`"))?;
        let mut edge = NetworkEdge::new(from, to, port);
        if let Some(label) = label {
            edge = edge.with_label(label);
        }
        if !self.graph.add_network_allow(edge) {
            debug!(%port, "network-allow already declared");
        }
        Ok(())
    }

    /// Network-allow on the destination kind's default port
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if either endpoint is undefined and
    /// `UnknownPort` (port 0) if the destination kind has no default port
    pub fn add_connection(&mut self, from: &str, to: &str, label: Option<&str>) -> CoreResult<()> {
        let destination = self.registry.get(to).map_err(|_| {
            CoreError::unknown_resource(to, format!("destination of connection from `{from}`"))
        })?;
        let Some(port) = destination.kind.default_port() else {
            return Err(CoreError::UnknownPort {
                from: self.endpoint(from, || format!("source of connection to `{to}`"))?,
                to: destination.id.clone(),
                port: 0,
            });
        };
        self.add_network_allow(from, to, u32::from(port), label)
    }

    /// Targets of `id`'s outgoing edges of a kind
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if `id` is undefined
    pub fn neighbors(&self, id: &str, kind: EdgeKind) -> CoreResult<IndexSet<ResourceId>> {
        self.registry.get(id)?;
        Ok(self.graph.neighbors(id, kind))
    }

    /// Cycles among edges of a kind, ordered by definition
    #[must_use]
    pub fn detect_cycles(&self, kind: EdgeKind) -> Vec<Vec<ResourceId>> {
        self.graph.detect_cycles_in_order(kind, self.registry.ids())
    }

    /// Edges of a kind as (from, to) pairs, in declaration order
    #[must_use]
    pub fn edges(&self, kind: EdgeKind) -> Vec<(&ResourceId, &ResourceId)> {
        match kind {
            EdgeKind::Structural => self.graph.dependencies().map(|d| (&d.from, &d.to)).collect(),
            EdgeKind::NetworkAllow => self.graph.network_edges().map(|e| (&e.from, &e.to)).collect(),
        }
    }

    /// Check edges and structural ordering without resolving attributes
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` for a dangling edge and
    /// `UnsatisfiableGraph` for structural cycles
    pub fn validate(&self) -> CoreResult<()> {
        self.graph.validate(&self.registry)?;

        let cycles = self.detect_cycles(EdgeKind::Structural);
        if !cycles.is_empty() {
            let members: IndexSet<&ResourceId> = cycles.iter().flatten().collect();
            let remaining = self
                .registry
                .ids()
                .filter(|id| members.contains(id))
                .cloned()
                .collect();
            return Err(CoreError::UnsatisfiableGraph { remaining, cycles });
        }

        let network_cycles = self.detect_cycles(EdgeKind::NetworkAllow);
        if !network_cycles.is_empty() {
            warn!(cycles = network_cycles.len(), "network-allow edges form cycles");
        }
        Ok(())
    }

    /// Resolve attributes
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`]
    pub fn resolve(&self) -> CoreResult<ResolutionPlan> {
        Resolver::new().resolve(&self.registry)
    }

    /// Compile the network policy for every resource
    ///
    /// # Errors
    ///
    /// Returns `UnknownPort` or `UnknownResource`
    pub fn compile_policy(&self) -> CoreResult<NetworkPolicy> {
        PolicyCompiler::new().compile(self.registry.ids(), self.graph.network_edges())
    }

    /// Run the full cycle and return only the plan
    ///
    /// # Errors
    ///
    /// See [`Stack::build`]
    pub fn plan(&self) -> CoreResult<ProvisioningPlan> {
        Ok(self.build()?.plan)
    }

    /// Validate, resolve, compile and plan.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step
    pub fn build(&self) -> CoreResult<BuildOutput> {
        debug!(
            resources = self.registry.len(),
            dependencies = self.graph.edge_count(EdgeKind::Structural),
            network_edges = self.graph.edge_count(EdgeKind::NetworkAllow),
            "building stack"
        );
        self.validate()?;
        let resolution = self.resolve()?;
        let policy = self.compile_policy()?;
        let plan = Planner::new().plan(&self.registry, &self.graph, &resolution, &policy)?;

        info!(
            stages = plan.stages.len(),
            resources = plan.resource_count(),
            bindings = plan.bindings.len(),
            fingerprint = %plan.fingerprint.short(),
            "stack built"
        );
        Ok(BuildOutput {
            resolution,
            policy,
            plan,
        })
    }

    fn endpoint(&self, id: &str, context: impl FnOnce() -> String) -> CoreResult<ResourceId> {
        self.registry
            .get(id)
            .map(|r| r.id.clone())
            .map_err(|_| CoreError::unknown_resource(id, context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedValue;
    use strata_core::AttrAddress;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn none() -> Vec<(String, AttributeValue)> {
        Vec::new()
    }

    fn three_tier() -> Stack {
        let mut stack = Stack::new();
        stack.define(ResourceKind::Network, "net", none()).unwrap();
        let db = stack.define(ResourceKind::Datastore, "db", none()).unwrap();
        stack
            .define(ResourceKind::Service, "svc", [("DB_HOST", db.attr("host").into())])
            .unwrap();
        stack.add_dependency("db", "net").unwrap();
        stack.add_dependency("svc", "db").unwrap();
        stack
    }

    #[test]
    fn test_three_tier_plan() {
        let stack = three_tier();
        let output = stack.build().unwrap();
        assert_eq!(output.plan.stage_ids(), vec![vec!["net"], vec!["db"], vec!["svc"]]);
        assert_eq!(
            output.resolution.value(&AttrAddress::new(id("svc"), "DB_HOST")),
            Some(&ResolvedValue::Pending(AttrAddress::new(id("db"), "host")))
        );
        assert_eq!(stack.plan().unwrap(), output.plan);
    }

    #[test]
    fn test_duplicate_allow_yields_one_rule() {
        let mut stack = three_tier();
        stack.add_network_allow("svc", "db", 5432, None).unwrap();
        stack.add_network_allow("svc", "db", 5432, None).unwrap();
        assert_eq!(stack.graph().edge_count(EdgeKind::NetworkAllow), 1);

        let policy = stack.compile_policy().unwrap();
        let db = policy.for_destination("db").unwrap();
        assert_eq!(db.rules.len(), 1);
        assert_eq!(db.rules[0].port, 5432);
        assert_eq!(db.rules[0].sources.iter().collect::<Vec<_>>(), vec![&id("svc")]);
        assert!(policy.for_destination("net").unwrap().is_deny_all());
    }

    #[test]
    fn test_structural_cycle_detected_and_fatal() {
        let mut stack = Stack::new();
        stack.define(ResourceKind::Service, "A", none()).unwrap();
        stack.define(ResourceKind::Service, "B", none()).unwrap();
        stack.add_dependency("A", "B").unwrap();
        stack.add_dependency("B", "A").unwrap();

        assert_eq!(
            stack.detect_cycles(EdgeKind::Structural),
            vec![vec![id("A"), id("B")]]
        );
        assert!(matches!(
            stack.plan(),
            Err(CoreError::UnsatisfiableGraph { ref remaining, .. }) if remaining == &vec![id("A"), id("B")]
        ));
    }

    #[test]
    fn test_network_cycles_are_legal() {
        let mut stack = Stack::new();
        stack.define(ResourceKind::Service, "web", none()).unwrap();
        stack.define(ResourceKind::Service, "worker", none()).unwrap();
        stack.add_network_allow("web", "worker", 8080, None).unwrap();
        stack.add_network_allow("worker", "web", 8080, None).unwrap();
        assert_eq!(stack.detect_cycles(EdgeKind::NetworkAllow).len(), 1);
        assert_eq!(stack.plan().unwrap().stage_ids(), vec![vec!["web", "worker"]]);
    }

    #[test]
    fn test_endpoints_must_exist() {
        let mut stack = three_tier();
        let err = stack.add_dependency("svc", "cache").unwrap_err();
        assert_eq!(err.to_string(), "unknown resource `cache` (dependency of `svc`)");
        assert!(matches!(
            stack.add_network_allow("ghost", "db", 5432, None),
            Err(CoreError::UnknownResource { .. })
        ));
        assert!(matches!(
            stack.add_dependency("svc", "svc"),
            Err(CoreError::SelfDependency { .. })
        ));
        assert!(matches!(
            stack.neighbors("ghost", EdgeKind::Structural),
            Err(CoreError::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_add_connection_uses_default_port() {
        let mut stack = three_tier();
        stack.add_connection("svc", "db", Some("database")).unwrap();
        let policy = stack.compile_policy().unwrap();
        assert!(policy.allows("svc", "db", 5432));
        assert_eq!(policy.for_destination("db").unwrap().rules[0].labels, vec!["database"]);

        let err = stack.add_connection("db", "svc", None).unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownPort {
                from: id("db"),
                to: id("svc"),
                port: 0,
            }
        );
    }

    #[test]
    fn test_invalid_port_fails_build() {
        let mut stack = three_tier();
        stack.add_network_allow("svc", "db", 70_000, None).unwrap();
        assert!(matches!(stack.build(), Err(CoreError::UnknownPort { port: 70_000, .. })));
    }

    #[test]
    fn test_removed_resource_leaves_dangling_edge() {
        let mut stack = three_tier();
        stack.remove("net").unwrap();
        let err = stack.build().unwrap_err();
        assert!(matches!(err, CoreError::UnknownResource { ref id, .. } if id == "net"));
        assert_eq!(stack.edges(EdgeKind::Structural).len(), 2);
    }

    #[test]
    fn test_neighbors_by_kind() {
        let mut stack = three_tier();
        stack.add_network_allow("svc", "db", 5432, None).unwrap();
        let structural = stack.neighbors("svc", EdgeKind::Structural).unwrap();
        assert_eq!(structural.into_iter().collect::<Vec<_>>(), vec![id("db")]);
        assert!(stack.neighbors("net", EdgeKind::NetworkAllow).unwrap().is_empty());
    }
}
