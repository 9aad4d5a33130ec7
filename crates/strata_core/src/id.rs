//! Identifiers for resources, attributes, and secret slots.
//!
//! Resource ids are chosen by the declarer and stay stable across
//! redefinition, so they are validated strings rather than generated UUIDs.
//! A `.` never appears in an id; it separates the id from the attribute
//! name in references.

use crate::error::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("id pattern is a valid regex")
});

static ATTRIBUTE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("attribute pattern is a valid regex")
});

/// Resource identifier - unique within a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Parse and validate a resource id
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` if the id is empty or contains characters outside
    /// `[A-Za-z0-9_-]`
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidId {
                id,
                reason: "id must not be empty".to_string(),
            });
        }
        if !ID_PATTERN.is_match(&id) {
            return Err(CoreError::InvalidId {
                id,
                reason: "expected [A-Za-z0-9] followed by [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate an attribute (or secret key) name
///
/// # Errors
///
/// Returns `InvalidAttribute` if the name is not `[A-Za-z_][A-Za-z0-9_-]*`
pub fn validate_attribute_name(owner: &str, name: &str) -> CoreResult<()> {
    if ATTRIBUTE_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(CoreError::InvalidAttribute {
            subject: format!("`{owner}.{name}`"),
            reason: "attribute names must match [A-Za-z_][A-Za-z0-9_-]*".to_string(),
        })
    }
}

/// A (resource id, attribute name) pair, serialized as `resource.attribute`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttrAddress {
    /// Producer resource
    pub resource: ResourceId,
    /// Attribute on that resource
    pub attribute: String,
}

impl AttrAddress {
    /// Create a new address
    #[must_use]
    pub fn new(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            resource,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

impl FromStr for AttrAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((resource, attribute)) = s.split_once('.') else {
            return Err(CoreError::InvalidAttribute {
                subject: format!("`{s}`"),
                reason: "expected `resource.attribute`".to_string(),
            });
        };
        validate_attribute_name(resource, attribute)?;
        Ok(Self::new(ResourceId::parse(resource)?, attribute))
    }
}

impl TryFrom<String> for AttrAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttrAddress> for String {
    fn from(address: AttrAddress) -> Self {
        address.to_string()
    }
}

/// A named slot on a secret bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    /// The bundle holding the slot
    pub bundle: ResourceId,
    /// Key name within the bundle
    pub key: String,
}

impl SecretRef {
    /// Create a new secret reference
    #[must_use]
    pub fn new(bundle: ResourceId, key: impl Into<String>) -> Self {
        Self {
            bundle,
            key: key.into(),
        }
    }

    /// The bundle attribute backing this slot
    #[must_use]
    pub fn address(&self) -> AttrAddress {
        AttrAddress::new(self.bundle.clone(), self.key.clone())
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "secret:{}.{}", self.bundle, self.key)
    }
}
