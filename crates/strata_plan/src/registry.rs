//! Resource registry.
//!
//! The registry exclusively owns resource definitions. Everything else in
//! the build cycle refers to resources by id.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_core::id::validate_attribute_name;
use strata_core::{
    AttrAddress, AttributeValue, Attributes, CoreError, CoreResult, ResourceId, ResourceKind,
    SecretRef,
};

/// A defined resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique id
    pub id: ResourceId,
    /// Kind, fixed at definition
    pub kind: ResourceKind,
    /// Declared attributes, in declaration order
    pub attributes: Attributes,
}

impl Resource {
    /// Declared value of an attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Check if the attribute is declared on this resource
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Address of one of this resource's attributes
    #[must_use]
    pub fn address(&self, name: &str) -> AttrAddress {
        AttrAddress::new(self.id.clone(), name)
    }
}

/// Lightweight handle returned by [`Registry::define`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: ResourceId,
    kind: ResourceKind,
}

impl ResourceHandle {
    /// Resource id
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Resource kind
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Reference to one of this resource's attributes
    #[must_use]
    pub fn attr(&self, name: &str) -> AttrAddress {
        AttrAddress::new(self.id.clone(), name)
    }

    /// Reference to a secret slot on this resource
    #[must_use]
    pub fn secret(&self, key: &str) -> SecretRef {
        SecretRef::new(self.id.clone(), key)
    }
}

/// Registry of resource definitions, in definition order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    resources: IndexMap<ResourceId, Resource>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new resource.
    ///
    /// Only well-formedness is checked here. References may point at
    /// resources defined later; they are checked when the stack is resolved.
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` for a malformed id, `DuplicateId` if the id is
    /// taken, and `InvalidAttribute` for a malformed attribute name or value,
    /// an attribute declared twice, or `Generated` outside a secret bundle
    pub fn define<S: Into<String>>(
        &mut self,
        kind: ResourceKind,
        id: &str,
        attributes: impl IntoIterator<Item = (S, AttributeValue)>,
    ) -> CoreResult<ResourceHandle> {
        let id = ResourceId::parse(id)?;
        if self.resources.contains_key(&id) {
            return Err(CoreError::DuplicateId { id });
        }

        let mut declared = Attributes::new();
        for (name, value) in attributes {
            let name = name.into();
            validate_attribute_name(id.as_str(), &name)?;
            let address = AttrAddress::new(id.clone(), name.clone());
            value.validate(&address)?;
            if matches!(value, AttributeValue::Generated) && kind != ResourceKind::SecretBundle {
                return Err(CoreError::InvalidAttribute {
                    subject: format!("`{address}`"),
                    reason: format!("generated values are only allowed on secret bundles, not {kind}"),
                });
            }
            if declared.insert(name, value).is_some() {
                return Err(CoreError::InvalidAttribute {
                    subject: format!("`{address}`"),
                    reason: "attribute declared twice".to_string(),
                });
            }
        }

        let handle = ResourceHandle {
            id: id.clone(),
            kind,
        };
        self.resources.insert(
            id.clone(),
            Resource {
                id,
                kind,
                attributes: declared,
            },
        );
        Ok(handle)
    }

    /// Get a resource by id
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if absent
    pub fn get(&self, id: &str) -> CoreResult<&Resource> {
        self.resources
            .get(id)
            .ok_or_else(|| CoreError::unknown_resource(id, "registry lookup"))
    }

    /// Handle for an already defined resource
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if absent
    pub fn handle(&self, id: &str) -> CoreResult<ResourceHandle> {
        let resource = self.get(id)?;
        Ok(ResourceHandle {
            id: resource.id.clone(),
            kind: resource.kind,
        })
    }

    /// Remove a resource. Edges naming it are left in place and reported
    /// as dangling when the stack is next built.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if absent
    pub fn remove(&mut self, id: &str) -> CoreResult<Resource> {
        self.resources
            .shift_remove(id)
            .ok_or_else(|| CoreError::unknown_resource(id, "registry removal"))
    }

    /// All resources in definition order
    pub fn all(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// All ids in definition order
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    /// Definition position, used as the planner's tie-break
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.resources.get_index_of(id)
    }

    /// Check if a resource is defined
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Number of resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if no resources are defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
