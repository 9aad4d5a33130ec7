//! Declarative stack manifests (YAML or JSON).
//!
//! ```yaml
//! resources:
//!   - id: db
//!     kind: datastore
//!     attributes: { DB_NAME: postgres }
//!     depends_on: [net]
//!   - id: svc
//!     kind: service
//!     attributes:
//!       DB_HOST: ${db.host}
//!     depends_on: [db]
//!     connects_to:
//!       - { to: db, label: database }
//! ```
//!
//! Attribute values use the text syntax of [`AttributeValue::parse`].
//! A connection without a port uses the destination kind's default port.

use crate::stack::Stack;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use strata_core::{AttributeValue, CoreError, CoreResult, ResourceKind};
use tracing::debug;

/// Scalar attribute as written in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// `true` / `false`
    Bool(bool),
    /// Whole number
    Integer(i64),
    /// Decimal number
    Float(f64),
    /// Text, possibly holding references
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Scalar {
    /// Convert to an attribute value; only text can hold references
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttribute` for malformed reference syntax
    pub fn to_value(&self) -> CoreResult<AttributeValue> {
        match self {
            Self::Text(text) => AttributeValue::parse(text),
            other => Ok(AttributeValue::literal(other.to_string())),
        }
    }
}

/// Network-allow declared from the source side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDecl {
    /// Destination id
    pub to: String,
    /// Destination port; the destination kind's default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    /// Unique id
    pub id: String,
    /// Kind, in snake case
    pub kind: ResourceKind,
    /// Attributes in declaration order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Scalar>,
    /// Resources that must be materialized first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Outgoing network-allow edges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connects_to: Vec<ConnectionDecl>,
}

/// A whole stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackManifest {
    /// Declarations in definition order
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

impl StackManifest {
    /// Parse a YAML manifest
    ///
    /// # Errors
    ///
    /// Returns `Manifest` on a syntax or schema error
    pub fn from_yaml_str(text: &str) -> CoreResult<Self> {
        serde_yaml::from_str(text).map_err(|e| CoreError::Manifest {
            message: format!("invalid YAML: {e}"),
        })
    }

    /// Parse a JSON manifest
    ///
    /// # Errors
    ///
    /// Returns `Manifest` on a syntax or schema error
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::Manifest {
            message: format!("invalid JSON: {e}"),
        })
    }

    /// Read a manifest file; `.json` is JSON, anything else YAML
    ///
    /// # Errors
    ///
    /// Returns `Manifest` if the file cannot be read or parsed
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::Manifest {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        };
        parsed.map_err(|e| match e {
            CoreError::Manifest { message } => CoreError::Manifest {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    /// Build the stack: every resource first, then every edge, so
    /// declarations may refer to resources declared further down.
    ///
    /// # Errors
    ///
    /// Returns the first definition or edge error
    pub fn into_stack(self) -> CoreResult<Stack> {
        let mut stack = Stack::new();
        for decl in &self.resources {
            let mut attributes = Vec::with_capacity(decl.attributes.len());
            for (name, scalar) in &decl.attributes {
                let value = scalar.to_value().map_err(|e| match e {
                    CoreError::InvalidAttribute { reason, .. } => CoreError::InvalidAttribute {
                        subject: format!("`{}.{name}`", decl.id),
                        reason,
                    },
                    other => other,
                })?;
                attributes.push((name.clone(), value));
            }
            stack.define(decl.kind, &decl.id, attributes)?;
        }

        for decl in &self.resources {
            for target in &decl.depends_on {
                stack.add_dependency(&decl.id, target)?;
            }
            for connection in &decl.connects_to {
                let label = connection.label.as_deref();
                match connection.port {
                    Some(port) => stack.add_network_allow(&decl.id, &connection.to, port, label)?,
                    None => stack.add_connection(&decl.id, &connection.to, label)?,
                }
            }
        }
        debug!(resources = self.resources.len(), "loaded manifest");
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::EdgeKind;

    const THREE_TIER: &str = r#"
resources:
  - id: svc
    kind: service
    attributes:
      DB_HOST: ${db.host}
      REPLICAS: 2
      DEBUG: false
    depends_on: [db]
    connects_to:
      - { to: db, label: database }
  - id: net
    kind: network
  - id: db
    kind: datastore
    attributes: { DB_NAME: postgres }
    depends_on: [net]
"#;

    #[test]
    fn test_yaml_manifest_into_stack() {
        let manifest = StackManifest::from_yaml_str(THREE_TIER).unwrap();
        assert_eq!(manifest.resources.len(), 3);
        assert_eq!(manifest.resources[0].attributes["REPLICAS"], Scalar::Integer(2));

        let stack = manifest.into_stack().unwrap();
        let svc = stack.get("svc").unwrap();
        assert_eq!(svc.attribute("REPLICAS"), Some(&AttributeValue::literal("2")));
        assert_eq!(svc.attribute("DEBUG"), Some(&AttributeValue::literal("false")));

        let plan = stack.plan().unwrap();
        assert_eq!(plan.stage_ids(), vec![vec!["net"], vec!["db"], vec!["svc"]]);
        let policy = stack.compile_policy().unwrap();
        assert!(policy.allows("svc", "db", 5432));
    }

    #[test]
    fn test_json_manifest() {
        let json = r#"{"resources": [
            {"id": "cache", "kind": "cache"},
            {"id": "svc", "kind": "service", "connects_to": [{"to": "cache", "port": 6380}]}
        ]}"#;
        let stack = StackManifest::from_json_str(json).unwrap().into_stack().unwrap();
        assert_eq!(stack.graph().edge_count(EdgeKind::NetworkAllow), 1);
        assert!(stack.compile_policy().unwrap().allows("svc", "cache", 6380));
    }

    #[test]
    fn test_manifest_errors() {
        let err = StackManifest::from_yaml_str("resources: [{id: x, kind: spaceship}]").unwrap_err();
        assert!(matches!(err, CoreError::Manifest { .. }));

        let err = StackManifest::from_yaml_str("resources: [{id: x, kind: service, extra: 1}]")
            .unwrap_err();
        assert!(matches!(err, CoreError::Manifest { .. }));

        let err = StackManifest::from_yaml_str("resources: [{id: x, kind: service, attributes: {A: '${x'}}]")
            .unwrap()
            .into_stack()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAttribute { ref subject, .. } if subject == "`x.A`"));

        let err = StackManifest::from_yaml_str("resources: [{id: x, kind: service, depends_on: [y]}]")
            .unwrap()
            .into_stack()
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownResource { ref id, .. } if id == "y"));
    }

    #[test]
    fn test_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("stack.yaml");
        std::fs::write(&yaml, THREE_TIER).unwrap();
        assert_eq!(StackManifest::from_path(&yaml).unwrap().resources.len(), 3);

        let json = dir.path().join("stack.json");
        std::fs::write(&json, r#"{"resources": [{"id": "net", "kind": "network"}]}"#).unwrap();
        assert_eq!(StackManifest::from_path(&json).unwrap().resources.len(), 1);

        let err = StackManifest::from_path(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::Manifest { ref message } if message.contains("missing.yaml")));
    }
}
