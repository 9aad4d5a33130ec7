//! Resource kinds.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of infrastructure element a resource models.
///
/// A resource's kind is fixed when it is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Private network (VPC, subnets)
    Network,
    /// Relational database instance
    Datastore,
    /// In-memory cache cluster
    Cache,
    /// Message broker
    Broker,
    /// Named secret slots held by an external secret store
    SecretBundle,
    /// Compute service (container task + service)
    Service,
    /// Load balancer fronting one or more services
    LoadBalancer,
}

impl ResourceKind {
    /// All kinds, in declaration order
    pub const ALL: [ResourceKind; 7] = [
        Self::Network,
        Self::Datastore,
        Self::Cache,
        Self::Broker,
        Self::SecretBundle,
        Self::Service,
        Self::LoadBalancer,
    ];

    /// Port a connection to this kind uses when none is given
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::Datastore => Some(5432),
            Self::Cache => Some(6379),
            Self::Broker => Some(5671),
            Self::LoadBalancer => Some(80),
            Self::Network | Self::SecretBundle | Self::Service => None,
        }
    }

    /// Attributes the provisioning backend generates on materialization.
    ///
    /// These are valid reference targets even when the resource does not
    /// declare them; their value is only known once the resource exists.
    #[must_use]
    pub const fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::Network => &["id", "cidr"],
            Self::Datastore => &["host", "port", "endpoint", "arn"],
            Self::Cache => &["host", "port", "endpoint"],
            Self::Broker => &["host", "port", "endpoint", "arn"],
            Self::SecretBundle => &["arn"],
            Self::Service => &["name", "arn"],
            Self::LoadBalancer => &["dns_name", "arn"],
        }
    }

    /// Check if the kind generates the named attribute
    #[must_use]
    pub fn has_output(self, attribute: &str) -> bool {
        self.outputs().contains(&attribute)
    }

    /// Snake-case name, as used in manifests
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Datastore => "datastore",
            Self::Cache => "cache",
            Self::Broker => "broker",
            Self::SecretBundle => "secret_bundle",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CoreError::Manifest {
                message: format!("unknown resource kind `{s}`"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(ResourceKind::Datastore.default_port(), Some(5432));
        assert_eq!(ResourceKind::Cache.default_port(), Some(6379));
        assert_eq!(ResourceKind::Broker.default_port(), Some(5671));
        assert_eq!(ResourceKind::Service.default_port(), None);
    }

    #[test]
    fn test_outputs() {
        assert!(ResourceKind::Datastore.has_output("host"));
        assert!(ResourceKind::LoadBalancer.has_output("dns_name"));
        assert!(!ResourceKind::Network.has_output("host"));
    }

    #[test]
    fn test_name_roundtrip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.name().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("lambda".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ResourceKind::SecretBundle).unwrap();
        assert_eq!(json, "\"secret_bundle\"");
        let kind: ResourceKind = serde_json::from_str("\"load_balancer\"").unwrap();
        assert_eq!(kind, ResourceKind::LoadBalancer);
    }
}
