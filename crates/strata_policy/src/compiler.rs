//! Network policy compiler.
//!
//! Turns network-allow edges into per-destination rules. Edges sharing a
//! (destination, port) pair are merged into one rule with a source set, so
//! the rule count grows with distinct ports rather than with edges.

use crate::policy::{AllowRule, DestinationPolicy, NetworkPolicy};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;
use strata_core::{CoreError, CoreResult, NetworkEdge, ResourceId};
use tracing::debug;

#[derive(Default)]
struct PendingRule {
    sources: IndexSet<ResourceId>,
    labels: Vec<String>,
}

/// Policy compiler
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Create a new compiler
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compile edges into a policy covering every destination.
    ///
    /// `resources` lists every resource of the stack in registry order;
    /// each gets an entry, empty when nothing may reach it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPort` for a port outside 1-65535 and
    /// `UnknownResource` for an edge endpoint missing from `resources`
    pub fn compile<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a ResourceId>,
        edges: impl IntoIterator<Item = &'a NetworkEdge>,
    ) -> CoreResult<NetworkPolicy> {
        let mut pending: IndexMap<ResourceId, BTreeMap<u16, PendingRule>> = resources
            .into_iter()
            .map(|id| (id.clone(), BTreeMap::new()))
            .collect();

        let mut edge_count = 0usize;
        for edge in edges {
            edge_count += 1;
            let port = edge.validate_port()?;
            if !pending.contains_key(&edge.from) {
                return Err(CoreError::unknown_resource(
                    &edge.from,
                    format!("source of network-allow {edge}"),
                ));
            }
            let rules = pending.get_mut(&edge.to).ok_or_else(|| {
                CoreError::unknown_resource(&edge.to, format!("destination of network-allow {edge}"))
            })?;

            let rule = rules.entry(port).or_default();
            rule.sources.insert(edge.from.clone());
            if let Some(label) = &edge.label {
                if !rule.labels.contains(label) {
                    rule.labels.push(label.clone());
                }
            }
        }

        let destinations: IndexMap<ResourceId, DestinationPolicy> = pending
            .into_iter()
            .map(|(destination, rules)| {
                let rules = rules
                    .into_iter()
                    .map(|(port, rule)| AllowRule {
                        port,
                        sources: rule.sources,
                        labels: rule.labels,
                    })
                    .collect();
                (destination.clone(), DestinationPolicy { destination, rules })
            })
            .collect();

        let policy = NetworkPolicy { destinations };
        debug!(
            edges = edge_count,
            destinations = policy.len(),
            rules = policy.rule_count(),
            "compiled network policy"
        );
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<ResourceId> {
        names.iter().map(|n| id(n)).collect()
    }

    #[test]
    fn test_compile_empty_is_deny_by_default() {
        let resources = ids(&["net", "db", "svc"]);
        let policy = PolicyCompiler::new()
            .compile(&resources, &Vec::<NetworkEdge>::new())
            .unwrap();
        assert_eq!(policy.len(), 3);
        for destination in policy.iter() {
            assert!(destination.is_deny_all());
        }
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let resources = ids(&["svc", "db"]);
        let edges = vec![
            NetworkEdge::new(id("svc"), id("db"), 5432),
            NetworkEdge::new(id("svc"), id("db"), 5432),
        ];
        let policy = PolicyCompiler::new().compile(&resources, &edges).unwrap();
        let db = policy.for_destination("db").unwrap();
        assert_eq!(db.rules.len(), 1);
        assert_eq!(db.rules[0].port, 5432);
        assert_eq!(db.rules[0].sources.len(), 1);
        assert!(db.rules[0].admits("svc"));
        assert!(policy.for_destination("svc").unwrap().is_deny_all());
    }

    #[test]
    fn test_sources_merge_per_port() {
        let resources = ids(&["web", "worker", "db", "redis"]);
        let edges = vec![
            NetworkEdge::new(id("web"), id("db"), 5432).with_label("safe-cfg-database"),
            NetworkEdge::new(id("worker"), id("db"), 5432).with_label("safe-cfg-database"),
            NetworkEdge::new(id("web"), id("redis"), 6379).with_label("Redis"),
            NetworkEdge::new(id("web"), id("db"), 8001),
        ];
        let policy = PolicyCompiler::new().compile(&resources, &edges).unwrap();

        let db = policy.for_destination("db").unwrap();
        assert_eq!(db.rules.len(), 2);
        assert_eq!(db.rules[0].port, 5432);
        assert_eq!(
            db.rules[0].sources,
            ids(&["web", "worker"]).into_iter().collect::<IndexSet<_>>()
        );
        assert_eq!(db.rules[0].labels, vec!["safe-cfg-database".to_string()]);
        assert_eq!(db.rules[1].port, 8001);
        assert!(db.rules[1].labels.is_empty());

        assert!(policy.allows("web", "redis", 6379));
        assert!(!policy.allows("worker", "redis", 6379));
        assert_eq!(policy.rule_count(), 3);
    }

    #[test]
    fn test_self_loop_admits_destination() {
        let resources = ids(&["redis"]);
        let edges = vec![NetworkEdge::new(id("redis"), id("redis"), 6379)];
        let policy = PolicyCompiler::new().compile(&resources, &edges).unwrap();
        assert!(policy.allows("redis", "redis", 6379));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let resources = ids(&["svc", "db"]);
        for port in [0, 65_536] {
            let edges = vec![NetworkEdge::new(id("svc"), id("db"), port)];
            let err = PolicyCompiler::new().compile(&resources, &edges).unwrap_err();
            assert_eq!(
                err,
                CoreError::UnknownPort {
                    from: id("svc"),
                    to: id("db"),
                    port,
                }
            );
        }
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let resources = ids(&["svc"]);
        let edges = vec![NetworkEdge::new(id("svc"), id("db"), 5432)];
        let err = PolicyCompiler::new().compile(&resources, &edges).unwrap_err();
        assert!(matches!(err, CoreError::UnknownResource { ref id, .. } if id == "db"));

        let edges = vec![NetworkEdge::new(id("ghost"), id("svc"), 80)];
        let err = PolicyCompiler::new().compile(&resources, &edges).unwrap_err();
        assert!(matches!(err, CoreError::UnknownResource { ref id, .. } if id == "ghost"));
    }

    #[test]
    fn test_policy_serializes() {
        let resources = ids(&["svc", "db"]);
        let edges = vec![NetworkEdge::new(id("svc"), id("db"), 5432)];
        let policy = PolicyCompiler::new().compile(&resources, &edges).unwrap();
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["destinations"]["db"]["rules"][0]["port"], 5432);
        assert_eq!(json["destinations"]["svc"]["rules"].as_array().unwrap().len(), 0);
    }

    proptest! {
        #[test]
        fn prop_every_destination_present_and_edges_preserved(
            raw in proptest::collection::vec((0usize..5, 0usize..5, 1u32..6), 0..40)
        ) {
            let resources = ids(&["r0", "r1", "r2", "r3", "r4"]);
            let edges: Vec<NetworkEdge> = raw
                .iter()
                .map(|&(from, to, port)| {
                    NetworkEdge::new(resources[from].clone(), resources[to].clone(), port)
                })
                .collect();
            let policy = PolicyCompiler::new().compile(&resources, &edges).unwrap();

            prop_assert_eq!(policy.len(), resources.len());
            let distinct: IndexSet<_> = edges.iter().map(NetworkEdge::key).collect();
            let admitted: usize = policy
                .iter()
                .flat_map(|d| d.rules.iter())
                .map(|r| r.sources.len())
                .sum();
            prop_assert_eq!(admitted, distinct.len());
            for edge in &edges {
                let port = u16::try_from(edge.port).unwrap();
                prop_assert!(policy.allows(edge.from.as_str(), edge.to.as_str(), port));
            }
        }
    }
}
