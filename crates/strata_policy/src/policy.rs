//! Compiled network policy types.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strata_core::{CoreError, CoreResult, ResourceId};

/// One allow rule: any of `sources` may reach the destination on `port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    /// Destination port
    pub port: u16,
    /// Sources allowed on this port, in declaration order
    pub sources: IndexSet<ResourceId>,
    /// Labels of the edges merged into this rule
    pub labels: Vec<String>,
}

impl AllowRule {
    /// Check if `source` is admitted by this rule
    #[must_use]
    pub fn admits(&self, source: &str) -> bool {
        self.sources.contains(source)
    }
}

/// Ingress rules for a single destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPolicy {
    /// The protected resource
    pub destination: ResourceId,
    /// Rules ordered by port
    pub rules: Vec<AllowRule>,
}

impl DestinationPolicy {
    /// Create a deny-all policy
    #[must_use]
    pub fn deny_all(destination: ResourceId) -> Self {
        Self {
            destination,
            rules: Vec::new(),
        }
    }

    /// Check if no traffic at all is admitted
    #[must_use]
    pub fn is_deny_all(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule covering `port`, if any
    #[must_use]
    pub fn rule_for_port(&self, port: u16) -> Option<&AllowRule> {
        self.rules.iter().find(|rule| rule.port == port)
    }

    /// Check if `source` may reach this destination on `port`
    #[must_use]
    pub fn allows(&self, source: &str, port: u16) -> bool {
        self.rule_for_port(port).is_some_and(|rule| rule.admits(source))
    }
}

/// Compiled policy for every resource of a stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Per-destination rules, in registry order
    pub destinations: IndexMap<ResourceId, DestinationPolicy>,
}

impl NetworkPolicy {
    /// Policy for `destination`
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if the resource was not part of the compiled stack
    pub fn for_destination(&self, destination: &str) -> CoreResult<&DestinationPolicy> {
        self.destinations
            .get(destination)
            .ok_or_else(|| CoreError::unknown_resource(destination, "policy lookup"))
    }

    /// Check if `source` may reach `destination` on `port`
    #[must_use]
    pub fn allows(&self, source: &str, destination: &str, port: u16) -> bool {
        self.destinations
            .get(destination)
            .is_some_and(|policy| policy.allows(source, port))
    }

    /// Number of destinations covered
    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Check if the policy covers no destinations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Total number of merged rules
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.destinations.values().map(|p| p.rules.len()).sum()
    }

    /// Iterate destination policies in registry order
    pub fn iter(&self) -> impl Iterator<Item = &DestinationPolicy> {
        self.destinations.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn rule(port: u16, sources: &[&str]) -> AllowRule {
        AllowRule {
            port,
            sources: sources.iter().map(|s| id(s)).collect(),
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_deny_all() {
        let policy = DestinationPolicy::deny_all(id("db"));
        assert!(policy.is_deny_all());
        assert!(!policy.allows("svc", 5432));
    }

    #[test]
    fn test_destination_allows() {
        let policy = DestinationPolicy {
            destination: id("db"),
            rules: vec![rule(5432, &["web", "worker"])],
        };
        assert!(policy.allows("web", 5432));
        assert!(policy.allows("worker", 5432));
        assert!(!policy.allows("web", 5433));
        assert!(!policy.allows("scheduler", 5432));
    }

    #[test]
    fn test_for_destination_unknown() {
        let policy = NetworkPolicy::default();
        assert!(policy.is_empty());
        assert!(matches!(
            policy.for_destination("db"),
            Err(CoreError::UnknownResource { .. })
        ));
        assert!(!policy.allows("svc", "db", 5432));
    }
}
