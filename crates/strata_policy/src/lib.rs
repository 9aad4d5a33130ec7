//! strata Network Policy
//!
//! Compiles declared network-allow edges into a minimal, deduplicated
//! allow-rule set per destination. Anything not allowed is denied; a
//! destination without rules is an explicit deny-all entry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod policy;

pub use compiler::PolicyCompiler;
pub use policy::{AllowRule, DestinationPolicy, NetworkPolicy};
