//! Attribute resolver.
//!
//! Turns declared attribute values into values that are either known now
//! (literals) or bound to something the provisioning backend fills in after
//! materializing a producer (pending outputs and secret slots). No values
//! are computed; the resolver only checks referential integrity and records
//! which producer each consumer waits on.
//!
//! Two kinds of cycle are rejected:
//! - a declared attribute that reaches itself through references
//!   (`a.x = ${b.y}`, `b.y = ${a.x}`)
//! - a resource that waits on its own materialization, directly
//!   (`a.x = ${a.host}`) or through other resources
//!   (`a.x = ${b.host}`, `b.y = ${a.host}`)

use crate::registry::Registry;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use strata_core::{
    AttrAddress, AttributeValue, CoreError, CoreResult, ResourceId, ResourceKind, SecretRef,
    Segment,
};
use tracing::debug;

/// One piece of a resolved template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResolvedSegment {
    /// Known text
    Text(String),
    /// Output filled in once the producer is materialized
    Pending(AttrAddress),
    /// Secret slot injected by the secret store
    Secret(SecretRef),
}

/// Attribute value after resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    /// Known at definition time
    Literal(String),
    /// Output filled in once the producer is materialized
    Pending(AttrAddress),
    /// Secret slot injected by the secret store
    Secret(SecretRef),
    /// Secret bundle key generated by the secret store
    Generated,
    /// Text interleaved with pending outputs and secret slots
    Template(Vec<ResolvedSegment>),
}

/// What a value waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer<'a> {
    /// A producer output
    Output(&'a AttrAddress),
    /// A secret slot
    Secret(&'a SecretRef),
}

impl Producer<'_> {
    /// Resource that must be materialized first
    #[must_use]
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::Output(address) => &address.resource,
            Self::Secret(secret) => &secret.bundle,
        }
    }

    /// Address of the produced attribute
    #[must_use]
    pub fn address(&self) -> AttrAddress {
        match self {
            Self::Output(address) => (*address).clone(),
            Self::Secret(secret) => secret.address(),
        }
    }
}

impl ResolvedValue {
    /// Check if the value is fully known
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Producers this value waits on, in order of appearance
    #[must_use]
    pub fn producers(&self) -> Vec<Producer<'_>> {
        match self {
            Self::Literal(_) | Self::Generated => Vec::new(),
            Self::Pending(address) => vec![Producer::Output(address)],
            Self::Secret(secret) => vec![Producer::Secret(secret)],
            Self::Template(segments) => segments
                .iter()
                .filter_map(|segment| match segment {
                    ResolvedSegment::Text(_) => None,
                    ResolvedSegment::Pending(address) => Some(Producer::Output(address)),
                    ResolvedSegment::Secret(secret) => Some(Producer::Secret(secret)),
                })
                .collect(),
        }
    }

    fn from_segments(mut segments: Vec<ResolvedSegment>) -> Self {
        if segments.iter().all(|s| matches!(s, ResolvedSegment::Text(_))) {
            let text = segments
                .into_iter()
                .filter_map(|s| match s {
                    ResolvedSegment::Text(t) => Some(t),
                    _ => None,
                })
                .collect::<String>();
            return Self::Literal(text);
        }
        if segments.len() == 1 {
            match segments.pop() {
                Some(ResolvedSegment::Pending(address)) => return Self::Pending(address),
                Some(ResolvedSegment::Secret(secret)) => return Self::Secret(secret),
                Some(other) => segments.push(other),
                None => {}
            }
        }
        Self::Template(segments)
    }

    fn push_into(self, segments: &mut Vec<ResolvedSegment>) {
        match self {
            Self::Literal(text) => push_text(segments, text),
            Self::Pending(address) => segments.push(ResolvedSegment::Pending(address)),
            Self::Secret(secret) => segments.push(ResolvedSegment::Secret(secret)),
            // Generated keys are only reachable as secret slots
            Self::Generated => {}
            Self::Template(inner) => {
                for segment in inner {
                    match segment {
                        ResolvedSegment::Text(text) => push_text(segments, text),
                        other => segments.push(other),
                    }
                }
            }
        }
    }
}

impl fmt::Display for ResolvedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Pending(address) => write!(f, "<pending {address}>"),
            Self::Secret(secret) => write!(f, "<{secret}>"),
        }
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.write_str(text),
            Self::Pending(address) => write!(f, "<pending {address}>"),
            Self::Secret(secret) => write!(f, "<{secret}>"),
            Self::Generated => f.write_str("<generated>"),
            Self::Template(segments) => segments.iter().try_for_each(|s| write!(f, "{s}")),
        }
    }
}

fn push_text(segments: &mut Vec<ResolvedSegment>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(ResolvedSegment::Text(last)) = segments.last_mut() {
        last.push_str(&text);
    } else {
        segments.push(ResolvedSegment::Text(text));
    }
}

/// A consumer attribute waiting on a producer attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingBinding {
    /// The attribute holding the reference
    pub consumer: AttrAddress,
    /// The attribute filled in by the backend
    pub producer: AttrAddress,
}

/// Output of [`Resolver::resolve`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    /// Resolved value of every declared attribute, in registry order
    pub values: IndexMap<AttrAddress, ResolvedValue>,
    /// Every consumer/producer pair, in discovery order
    pub bindings: Vec<PendingBinding>,
}

impl ResolutionPlan {
    /// Resolved value of one attribute
    #[must_use]
    pub fn value(&self, address: &AttrAddress) -> Option<&ResolvedValue> {
        self.values.get(address)
    }

    /// Resolved attributes of one resource, in declaration order
    #[must_use]
    pub fn attributes_of(&self, id: &str) -> IndexMap<String, ResolvedValue> {
        self.values
            .iter()
            .filter(|(address, _)| address.resource.as_str() == id)
            .map(|(address, value)| (address.attribute.clone(), value.clone()))
            .collect()
    }

    /// Resolved attributes grouped by resource in one pass
    #[must_use]
    pub fn by_resource(&self) -> IndexMap<&ResourceId, IndexMap<String, ResolvedValue>> {
        let mut grouped: IndexMap<&ResourceId, IndexMap<String, ResolvedValue>> = IndexMap::new();
        for (address, value) in &self.values {
            grouped
                .entry(&address.resource)
                .or_default()
                .insert(address.attribute.clone(), value.clone());
        }
        grouped
    }

    /// Bindings whose consumer is `address`
    pub fn bindings_of<'a>(
        &'a self,
        address: &'a AttrAddress,
    ) -> impl Iterator<Item = &'a PendingBinding> + 'a {
        self.bindings.iter().filter(move |b| &b.consumer == address)
    }

    /// (consumer, producer) resource pairs the planner must honor
    #[must_use]
    pub fn ordering_constraints(&self) -> IndexSet<(ResourceId, ResourceId)> {
        self.bindings
            .iter()
            .filter(|b| b.consumer.resource != b.producer.resource)
            .map(|b| (b.consumer.resource.clone(), b.producer.resource.clone()))
            .collect()
    }

    /// Number of attributes still waiting on a producer
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.values.values().filter(|v| !v.is_literal()).count()
    }
}

/// Attribute resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver;

impl Resolver {
    /// Create a new resolver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve every attribute of every resource.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` for a reference to an undefined resource,
    /// `UnknownAttribute` for an attribute the producer neither declares nor
    /// outputs, `UndeclaredSecretKey` for a secret key missing on its bundle,
    /// `InvalidAttribute` for a secret reference to a non-bundle resource,
    /// and `CyclicReference` for either kind of cycle
    pub fn resolve(&self, registry: &Registry) -> CoreResult<ResolutionPlan> {
        let mut run = Run {
            registry,
            memo: HashMap::new(),
            path: IndexSet::new(),
        };

        let mut values = IndexMap::new();
        for resource in registry.all() {
            for (name, value) in &resource.attributes {
                let address = resource.address(name);
                let resolved = run.resolve_declared(&address, value)?;
                values.insert(address, resolved);
            }
        }

        check_materialization_cycles(registry, &values)?;

        let mut bindings: IndexSet<PendingBinding> = IndexSet::new();
        for (consumer, value) in &values {
            for producer in value.producers() {
                bindings.insert(PendingBinding {
                    consumer: consumer.clone(),
                    producer: producer.address(),
                });
            }
        }

        let plan = ResolutionPlan {
            values,
            bindings: bindings.into_iter().collect(),
        };
        debug!(
            attributes = plan.values.len(),
            pending = plan.pending_count(),
            bindings = plan.bindings.len(),
            "resolved attributes"
        );
        Ok(plan)
    }
}

struct Run<'r> {
    registry: &'r Registry,
    memo: HashMap<AttrAddress, ResolvedValue>,
    path: IndexSet<AttrAddress>,
}

impl Run<'_> {
    fn resolve_declared(
        &mut self,
        address: &AttrAddress,
        value: &AttributeValue,
    ) -> CoreResult<ResolvedValue> {
        if let Some(done) = self.memo.get(address) {
            return Ok(done.clone());
        }
        if let Some(start) = self.path.get_index_of(address) {
            let mut chain: Vec<AttrAddress> = self.path.iter().skip(start).cloned().collect();
            chain.push(address.clone());
            return Err(CoreError::CyclicReference { chain });
        }

        self.path.insert(address.clone());
        let resolved = self.resolve_value(address, value);
        self.path.pop();
        let resolved = resolved?;
        self.memo.insert(address.clone(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_value(
        &mut self,
        owner: &AttrAddress,
        value: &AttributeValue,
    ) -> CoreResult<ResolvedValue> {
        match value {
            AttributeValue::Literal(text) => Ok(ResolvedValue::Literal(text.clone())),
            AttributeValue::Generated => Ok(ResolvedValue::Generated),
            AttributeValue::Ref(target) => self.resolve_reference(owner, target),
            AttributeValue::Secret(secret) => self.resolve_secret(owner, secret),
            AttributeValue::Template(segments) => {
                let mut resolved = Vec::new();
                for segment in segments {
                    let piece = match segment {
                        Segment::Text(text) => ResolvedValue::Literal(text.clone()),
                        Segment::Ref(target) => self.resolve_reference(owner, target)?,
                        Segment::Secret(secret) => self.resolve_secret(owner, secret)?,
                    };
                    piece.push_into(&mut resolved);
                }
                Ok(ResolvedValue::from_segments(resolved))
            }
        }
    }

    fn resolve_reference(
        &mut self,
        owner: &AttrAddress,
        target: &AttrAddress,
    ) -> CoreResult<ResolvedValue> {
        let registry = self.registry;
        let producer = registry.get(target.resource.as_str()).map_err(|_| {
            CoreError::unknown_resource(&target.resource, format!("referenced by `{owner}`"))
        })?;

        match producer.attribute(&target.attribute) {
            // A generated key is only known to the secret store
            Some(AttributeValue::Generated) => Ok(ResolvedValue::Secret(SecretRef::new(
                producer.id.clone(),
                target.attribute.clone(),
            ))),
            Some(declared) => self.resolve_declared(target, declared),
            None if producer.kind.has_output(&target.attribute) => {
                Ok(ResolvedValue::Pending(target.clone()))
            }
            None => Err(CoreError::UnknownAttribute {
                address: target.clone(),
                referenced_by: owner.clone(),
            }),
        }
    }

    fn resolve_secret(
        &mut self,
        owner: &AttrAddress,
        secret: &SecretRef,
    ) -> CoreResult<ResolvedValue> {
        let registry = self.registry;
        let bundle = registry.get(secret.bundle.as_str()).map_err(|_| {
            CoreError::unknown_resource(&secret.bundle, format!("secret bundle referenced by `{owner}`"))
        })?;
        if bundle.kind != ResourceKind::SecretBundle {
            return Err(CoreError::InvalidAttribute {
                subject: format!("`{owner}`"),
                reason: format!(
                    "`{}` is a {}, not a secret bundle",
                    secret.bundle, bundle.kind
                ),
            });
        }
        let Some(declared) = bundle.attribute(&secret.key) else {
            return Err(CoreError::UndeclaredSecretKey {
                secret: secret.clone(),
                referenced_by: owner.clone(),
            });
        };
        // The slot's own value may reference other attributes
        self.resolve_declared(&secret.address(), declared)?;
        Ok(ResolvedValue::Secret(secret.clone()))
    }
}

/// Reject resources that wait on their own materialization.
///
/// Nodes are attribute addresses. A declared attribute points at what its
/// resolved value waits on. An output points at every declared attribute of
/// its resource, since those are inputs to the materialization that
/// produces it. A secret slot stands for its whole bundle, except when the
/// bundle refers to its own slots.
fn check_materialization_cycles(
    registry: &Registry,
    values: &IndexMap<AttrAddress, ResolvedValue>,
) -> CoreResult<()> {
    let declared_of = |id: &ResourceId| -> Vec<AttrAddress> {
        registry
            .get(id.as_str())
            .map(|r| r.attributes.keys().map(|name| r.address(name)).collect())
            .unwrap_or_default()
    };
    let successors = |node: &AttrAddress| -> Vec<AttrAddress> {
        match values.get(node) {
            Some(value) => value
                .producers()
                .into_iter()
                .flat_map(|producer| match producer {
                    Producer::Output(address) => vec![address.clone()],
                    Producer::Secret(secret) if secret.bundle == node.resource => Vec::new(),
                    Producer::Secret(secret) => declared_of(&secret.bundle),
                })
                .collect(),
            None => declared_of(&node.resource),
        }
    };

    let mut done: HashSet<AttrAddress> = HashSet::new();
    let mut path: IndexSet<AttrAddress> = IndexSet::new();
    for start in values.keys() {
        visit(start, &successors, &mut done, &mut path)?;
    }
    Ok(())
}

fn visit(
    node: &AttrAddress,
    successors: &dyn Fn(&AttrAddress) -> Vec<AttrAddress>,
    done: &mut HashSet<AttrAddress>,
    path: &mut IndexSet<AttrAddress>,
) -> CoreResult<()> {
    if done.contains(node) {
        return Ok(());
    }
    if let Some(start) = path.get_index_of(node) {
        let mut chain: Vec<AttrAddress> = path.iter().skip(start).cloned().collect();
        chain.push(node.clone());
        return Err(CoreError::CyclicReference { chain });
    }
    path.insert(node.clone());
    for next in successors(node) {
        visit(&next, successors, done, path)?;
    }
    path.pop();
    done.insert(node.clone());
    Ok(())
}
