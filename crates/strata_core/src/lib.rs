//! strata core types
//!
//! This crate contains pure types and logic with no I/O: resource
//! identifiers, resource kinds, attribute values and their textual form,
//! relationship edges, plan fingerprints, and the error taxonomy shared by
//! every other strata crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod edge;
pub mod error;
pub mod hash;
pub mod id;
pub mod kind;

// Re-exports
pub use attribute::{Attributes, AttributeValue, Segment};
pub use edge::{Dependency, EdgeKind, NetworkEdge, MAX_PORT, MIN_PORT};
pub use error::{CoreError, CoreResult};
pub use hash::Fingerprint;
pub use id::{AttrAddress, ResourceId, SecretRef};
pub use kind::ResourceKind;
