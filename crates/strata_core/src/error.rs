//! Core error types for strata.
//!
//! Every failure in a build cycle is one of these variants. None of them is
//! recoverable mid-build: the caller fixes the declarative input and builds
//! again. Each variant renders its full causal chain so that a single line
//! is enough to locate the faulty declaration.

use crate::id::{AttrAddress, ResourceId, SecretRef};
use std::fmt::Display;
use thiserror::Error;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A resource with this id is already defined
    #[error("duplicate resource id `{id}`")]
    DuplicateId {
        /// The id that was defined twice
        id: ResourceId,
    },

    /// A resource id was referenced but never defined
    #[error("unknown resource `{id}` ({context})")]
    UnknownResource {
        /// The missing id, as written by the caller
        id: String,
        /// Where the id was referenced from
        context: String,
    },

    /// A resource id is not well formed
    #[error("invalid resource id `{id}`: {reason}")]
    InvalidId {
        /// The rejected id
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// An attribute value is neither a literal nor a well-formed reference
    #[error("invalid attribute {subject}: {reason}")]
    InvalidAttribute {
        /// The attribute address or raw text that failed
        subject: String,
        /// Why it was rejected
        reason: String,
    },

    /// A reference names an attribute the producer neither declares nor outputs
    #[error("unknown attribute `{address}` referenced by `{referenced_by}`")]
    UnknownAttribute {
        /// The attribute that does not exist
        address: AttrAddress,
        /// The consumer attribute holding the reference
        referenced_by: AttrAddress,
    },

    /// A secret reference names a key the bundle does not declare
    #[error("secret key `{secret}` is not declared on its bundle (referenced by `{referenced_by}`)")]
    UndeclaredSecretKey {
        /// The missing slot
        secret: SecretRef,
        /// The consumer attribute holding the reference
        referenced_by: AttrAddress,
    },

    /// Attribute references form a cycle
    #[error("cyclic attribute reference: {}", join(.chain, " -> "))]
    CyclicReference {
        /// The reference chain, starting and ending on the same attribute
        chain: Vec<AttrAddress>,
    },

    /// A resource was declared to depend on itself
    #[error("resource `{id}` cannot depend on itself")]
    SelfDependency {
        /// The offending resource
        id: ResourceId,
    },

    /// A network-allow port is outside 1-65535
    #[error("unknown port {port} for network-allow `{from}` -> `{to}` (expected 1-65535)")]
    UnknownPort {
        /// Traffic source
        from: ResourceId,
        /// Traffic destination
        to: ResourceId,
        /// The rejected port
        port: u32,
    },

    /// Structural ordering cannot be satisfied
    #[error(
        "unsatisfiable graph: unresolved resources [{}]{}",
        join(.remaining, ", "),
        render_cycles(.cycles)
    )]
    UnsatisfiableGraph {
        /// Resources that could not be placed in any stage
        remaining: Vec<ResourceId>,
        /// Cycles found among the remaining resources
        cycles: Vec<Vec<ResourceId>>,
    },

    /// A rollout state transition is not legal
    #[error("invalid transition for `{id}`: {reason}")]
    InvalidTransition {
        /// The resource being transitioned
        id: ResourceId,
        /// Why the transition was refused
        reason: String,
    },

    /// A declarative manifest could not be read
    #[error("manifest error: {message}")]
    Manifest {
        /// Parser or I/O message
        message: String,
    },

    /// Canonical encoding failed
    #[error("encoding error: {message}")]
    Encoding {
        /// Encoder message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for an unknown resource referenced from `context`
    #[must_use]
    pub fn unknown_resource(id: impl Display, context: impl Into<String>) -> Self {
        Self::UnknownResource {
            id: id.to_string(),
            context: context.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }
}

fn join<T: Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn render_cycles(cycles: &[Vec<ResourceId>]) -> String {
    if cycles.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = cycles
        .iter()
        .map(|cycle| match cycle.first() {
            Some(first) => format!("{} -> {}", join(cycle, " -> "), first),
            None => String::new(),
        })
        .collect();
    format!("; cycles: {}", rendered.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::DuplicateId { id: id("db") };
        assert_eq!(err.to_string(), "duplicate resource id `db`");

        let err = CoreError::unknown_resource("cache", "dependency of `svc`");
        assert_eq!(
            err.to_string(),
            "unknown resource `cache` (dependency of `svc`)"
        );
    }

    #[test]
    fn test_cyclic_reference_names_chain() {
        let err = CoreError::CyclicReference {
            chain: vec![
                AttrAddress::new(id("a"), "x"),
                AttrAddress::new(id("b"), "y"),
                AttrAddress::new(id("a"), "x"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "cyclic attribute reference: a.x -> b.y -> a.x"
        );
    }

    #[test]
    fn test_unsatisfiable_graph_renders_cycles() {
        let err = CoreError::UnsatisfiableGraph {
            remaining: vec![id("a"), id("b")],
            cycles: vec![vec![id("a"), id("b")]],
        };
        assert_eq!(
            err.to_string(),
            "unsatisfiable graph: unresolved resources [a, b]; cycles: a -> b -> a"
        );

        let err = CoreError::UnsatisfiableGraph {
            remaining: vec![id("a")],
            cycles: Vec::new(),
        };
        assert_eq!(err.to_string(), "unsatisfiable graph: unresolved resources [a]");
    }

    #[test]
    fn test_unknown_port_display() {
        let err = CoreError::UnknownPort {
            from: id("svc"),
            to: id("db"),
            port: 70000,
        };
        let s = err.to_string();
        assert!(s.contains("70000"));
        assert!(s.contains("`svc` -> `db`"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::SelfDependency { id: id("a") };
        let err2 = CoreError::SelfDependency { id: id("a") };
        assert_eq!(err1, err2);
        assert_ne!(err1, CoreError::SelfDependency { id: id("b") });
    }
}
