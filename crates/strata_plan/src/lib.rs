//! strata Planning
//!
//! This crate turns a declared stack into a provisioning plan:
//! - Registry: owns resource definitions
//! - Graph: structural and network-allow edges between resource ids
//! - Resolver: attribute references to literals, pending outputs and secret slots
//! - Planner: maximal concurrent stages via Kahn's algorithm
//! - Rollout: stage-by-stage materialization bookkeeping
//! - Manifest: YAML/JSON stack declarations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod manifest;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod rollout;
pub mod stack;

pub use graph::RelationshipGraph;
pub use manifest::{ConnectionDecl, ResourceDecl, Scalar, StackManifest};
pub use planner::{
    PlacementState, PlannedResource, Planner, ProvisioningPlan, Stage, StagedBinding,
};
pub use registry::{Registry, Resource, ResourceHandle};
pub use resolver::{
    PendingBinding, Producer, ResolutionPlan, ResolvedSegment, ResolvedValue, Resolver,
};
pub use rollout::Rollout;
pub use stack::{BuildOutput, Stack};
