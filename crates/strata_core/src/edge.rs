//! Relationship edges between resources.
//!
//! Edges reference resources by id only; they never own resources.

use crate::error::{CoreError, CoreResult};
use crate::id::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowest valid network port
pub const MIN_PORT: u32 = 1;
/// Highest valid network port
pub const MAX_PORT: u32 = 65_535;

/// Kind of relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `from` cannot be materialized before `to`
    Structural,
    /// `from` may initiate traffic to `to` on a port
    NetworkAllow,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => f.write_str("structural"),
            Self::NetworkAllow => f.write_str("network_allow"),
        }
    }
}

impl FromStr for EdgeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structural" => Ok(Self::Structural),
            "network_allow" | "network" => Ok(Self::NetworkAllow),
            other => Err(CoreError::Manifest {
                message: format!("unknown edge kind `{other}`"),
            }),
        }
    }
}

/// Structural dependency: `from` depends on `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependent resource
    pub from: ResourceId,
    /// Resource that must exist first
    pub to: ResourceId,
}

impl Dependency {
    /// Create a new dependency edge
    #[must_use]
    pub fn new(from: ResourceId, to: ResourceId) -> Self {
        Self { from, to }
    }
}

/// Network-allow edge: `from` may open connections to `to` on `port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkEdge {
    /// Traffic source
    pub from: ResourceId,
    /// Traffic destination
    pub to: ResourceId,
    /// Destination port; validated when the policy is compiled
    pub port: u32,
    /// Optional human-readable label
    pub label: Option<String>,
}

impl NetworkEdge {
    /// Create a new edge without a label
    #[must_use]
    pub fn new(from: ResourceId, to: ResourceId, port: u32) -> Self {
        Self {
            from,
            to,
            port,
            label: None,
        }
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Identity used for deduplication; the label is not part of it
    #[must_use]
    pub fn key(&self) -> (&ResourceId, &ResourceId, u32) {
        (&self.from, &self.to, self.port)
    }

    /// Check if this edge points back at its source
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Validate the port range
    ///
    /// # Errors
    ///
    /// Returns `UnknownPort` if the port is outside 1-65535
    pub fn validate_port(&self) -> CoreResult<u16> {
        if (MIN_PORT..=MAX_PORT).contains(&self.port) {
            u16::try_from(self.port).map_err(|_| self.unknown_port())
        } else {
            Err(self.unknown_port())
        }
    }

    fn unknown_port(&self) -> CoreError {
        CoreError::UnknownPort {
            from: self.from.clone(),
            to: self.to.clone(),
            port: self.port,
        }
    }
}

impl fmt::Display for NetworkEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.from, self.to, self.port)?;
        if let Some(label) = &self.label {
            write!(f, " ({label})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_edge_key_ignores_label() {
        let a = NetworkEdge::new(id("svc"), id("db"), 5432).with_label("postgres");
        let b = NetworkEdge::new(id("svc"), id("db"), 5432);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(NetworkEdge::new(id("a"), id("b"), 1).validate_port().unwrap(), 1);
        assert_eq!(
            NetworkEdge::new(id("a"), id("b"), 65_535).validate_port().unwrap(),
            65_535
        );
        for port in [0, 65_536, u32::MAX] {
            assert!(matches!(
                NetworkEdge::new(id("a"), id("b"), port).validate_port(),
                Err(CoreError::UnknownPort { .. })
            ));
        }
    }

    #[test]
    fn test_self_loop() {
        assert!(NetworkEdge::new(id("redis"), id("redis"), 6379).is_self_loop());
        assert!(!NetworkEdge::new(id("svc"), id("redis"), 6379).is_self_loop());
    }

    #[test]
    fn test_edge_display() {
        let edge = NetworkEdge::new(id("svc"), id("db"), 5432).with_label("db");
        assert_eq!(edge.to_string(), "svc -> db:5432 (db)");
    }

    #[test]
    fn test_edge_kind_parse() {
        assert_eq!("structural".parse::<EdgeKind>().unwrap(), EdgeKind::Structural);
        assert_eq!("network".parse::<EdgeKind>().unwrap(), EdgeKind::NetworkAllow);
        assert!("other".parse::<EdgeKind>().is_err());
    }
}
