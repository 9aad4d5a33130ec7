//! Attribute values and their textual form.
//!
//! An attribute is either a literal or points at something that only
//! exists once another resource has been materialized. The textual form
//! used by manifests:
//!
//! | Text                        | Value                          |
//! |-----------------------------|--------------------------------|
//! | `postgres`                  | `Literal("postgres")`          |
//! | `${db.host}`                | `Ref(db.host)`                 |
//! | `${secret:creds.password}`  | `Secret(creds.password)`       |
//! | `${generate}`               | `Generated` (secret bundles)   |
//! | `http://${lb.dns_name}/api` | `Template([...])`              |
//! | `$$HOME`                    | `Literal("$HOME")`             |

use crate::error::{CoreError, CoreResult};
use crate::id::{validate_attribute_name, AttrAddress, ResourceId, SecretRef};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute map of a resource, in declaration order
pub type Attributes = IndexMap<String, AttributeValue>;

const GENERATE: &str = "generate";
const SECRET_PREFIX: &str = "secret:";

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_-]*)$")
        .expect("reference pattern is a valid regex")
});

/// One piece of a template value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    /// Literal text
    Text(String),
    /// Another resource's attribute
    Ref(AttrAddress),
    /// A secret slot
    Secret(SecretRef),
}

/// Value of a resource attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Known at definition time
    Literal(String),
    /// Value of another resource's attribute
    Ref(AttrAddress),
    /// Value of a secret slot, injected by the secret store
    Secret(SecretRef),
    /// Text interleaved with references and secret slots
    Template(Vec<Segment>),
    /// A secret bundle key whose value the secret store generates
    Generated,
}

impl AttributeValue {
    /// Create a literal value
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Create a reference to `resource.attribute`
    #[must_use]
    pub fn reference(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Self::Ref(AttrAddress::new(resource, attribute))
    }

    /// Create a reference to a secret slot
    #[must_use]
    pub fn secret(bundle: ResourceId, key: impl Into<String>) -> Self {
        Self::Secret(SecretRef::new(bundle, key))
    }

    /// Parse the textual form of a value
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttribute` for an unterminated `${`, a placeholder
    /// that is not a well-formed reference, or `${generate}` mixed with
    /// other text
    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut segments = Vec::new();
        let mut generated = false;
        let mut text_buf = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            text_buf.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(stripped) = after.strip_prefix('$') {
                text_buf.push('$');
                rest = stripped;
                continue;
            }
            let Some(body) = after.strip_prefix('{') else {
                text_buf.push('$');
                rest = after;
                continue;
            };
            let Some(end) = body.find('}') else {
                return Err(invalid(text, "unterminated `${`"));
            };

            if !text_buf.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text_buf)));
            }
            let inner = body[..end].trim();
            if inner == GENERATE {
                generated = true;
            } else {
                segments.push(parse_placeholder(text, inner)?);
            }
            rest = &body[end + 1..];
        }
        text_buf.push_str(rest);
        if !text_buf.is_empty() {
            segments.push(Segment::Text(text_buf));
        }

        if generated {
            return if segments.is_empty() {
                Ok(Self::Generated)
            } else {
                Err(invalid(text, "`${generate}` cannot be combined with other text"))
            };
        }

        if segments.len() > 1 {
            return Ok(Self::Template(segments));
        }
        Ok(match segments.pop() {
            None => Self::Literal(String::new()),
            Some(Segment::Text(t)) => Self::Literal(t),
            Some(Segment::Ref(address)) => Self::Ref(address),
            Some(Segment::Secret(secret)) => Self::Secret(secret),
        })
    }

    /// Check the value is well formed.
    ///
    /// Values built through the typed constructors can still carry
    /// malformed attribute names or empty templates.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttribute` describing the first problem found
    pub fn validate(&self, owner: &AttrAddress) -> CoreResult<()> {
        match self {
            Self::Literal(_) | Self::Generated => Ok(()),
            Self::Ref(address) => {
                validate_attribute_name(address.resource.as_str(), &address.attribute)
            }
            Self::Secret(secret) => validate_attribute_name(secret.bundle.as_str(), &secret.key),
            Self::Template(segments) => {
                if segments.is_empty() {
                    return Err(CoreError::InvalidAttribute {
                        subject: format!("`{owner}`"),
                        reason: "template has no segments".to_string(),
                    });
                }
                for segment in segments {
                    match segment {
                        Segment::Text(_) => {}
                        Segment::Ref(address) => validate_attribute_name(
                            address.resource.as_str(),
                            &address.attribute,
                        )?,
                        Segment::Secret(secret) => {
                            validate_attribute_name(secret.bundle.as_str(), &secret.key)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Attribute references held by this value
    #[must_use]
    pub fn references(&self) -> Vec<&AttrAddress> {
        match self {
            Self::Ref(address) => vec![address],
            Self::Template(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Ref(address) => Some(address),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Secret slots held by this value
    #[must_use]
    pub fn secrets(&self) -> Vec<&SecretRef> {
        match self {
            Self::Secret(secret) => vec![secret],
            Self::Template(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Secret(secret) => Some(secret),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check if the value is known at definition time
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<AttrAddress> for AttributeValue {
    fn from(address: AttrAddress) -> Self {
        Self::Ref(address)
    }
}

impl From<SecretRef> for AttributeValue {
    fn from(secret: SecretRef) -> Self {
        Self::Secret(secret)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.write_str(&escape(text)),
            Self::Ref(address) => write!(f, "${{{address}}}"),
            Self::Secret(secret) => write!(f, "${{{secret}}}"),
            Self::Generated => write!(f, "${{{GENERATE}}}"),
            Self::Template(segments) => {
                for segment in segments {
                    match segment {
                        Segment::Text(text) => f.write_str(&escape(text))?,
                        Segment::Ref(address) => write!(f, "${{{address}}}")?,
                        Segment::Secret(secret) => write!(f, "${{{secret}}}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn parse_placeholder(text: &str, inner: &str) -> CoreResult<Segment> {
    let (is_secret, target) = match inner.strip_prefix(SECRET_PREFIX) {
        Some(target) => (true, target),
        None => (false, inner),
    };
    let captures = REFERENCE_PATTERN.captures(target).ok_or_else(|| {
        invalid(
            text,
            "expected `${resource.attribute}`, `${secret:bundle.key}` or `${generate}`",
        )
    })?;
    let resource = ResourceId::parse(&captures[1])?;
    let name = captures[2].to_string();
    Ok(if is_secret {
        Segment::Secret(SecretRef::new(resource, name))
    } else {
        Segment::Ref(AttrAddress::new(resource, name))
    })
}

fn invalid(text: &str, reason: &str) -> CoreError {
    CoreError::InvalidAttribute {
        subject: format!("value `{text}`"),
        reason: reason.to_string(),
    }
}

fn escape(text: &str) -> String {
    text.replace('$', "$$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            AttributeValue::parse("postgres").unwrap(),
            AttributeValue::literal("postgres")
        );
        assert_eq!(AttributeValue::parse("").unwrap(), AttributeValue::literal(""));
        assert_eq!(
            AttributeValue::parse("cost: $5").unwrap(),
            AttributeValue::literal("cost: $5")
        );
        assert_eq!(
            AttributeValue::parse("$${HOME}").unwrap(),
            AttributeValue::literal("${HOME}")
        );
    }

    #[test]
    fn test_parse_reference() {
        let value = AttributeValue::parse("${db.host}").unwrap();
        assert_eq!(value, AttributeValue::reference(id("db"), "host"));
        assert_eq!(value.references().len(), 1);
        assert!(!value.is_literal());
    }

    #[test]
    fn test_parse_secret_and_generated() {
        assert_eq!(
            AttributeValue::parse("${secret:app-secrets.AUTH_TOKEN}").unwrap(),
            AttributeValue::secret(id("app-secrets"), "AUTH_TOKEN")
        );
        assert_eq!(
            AttributeValue::parse("${generate}").unwrap(),
            AttributeValue::Generated
        );
    }

    #[test]
    fn test_parse_template() {
        let value = AttributeValue::parse(
            "psql://${secret:creds.username}:${secret:creds.password}@${db.host}:${db.port}/postgres",
        )
        .unwrap();
        let AttributeValue::Template(segments) = &value else {
            panic!("expected template, got {value:?}");
        };
        assert_eq!(segments.len(), 9);
        assert_eq!(value.references().len(), 2);
        assert_eq!(value.secrets().len(), 2);
        assert_eq!(
            value.to_string(),
            "psql://${secret:creds.username}:${secret:creds.password}@${db.host}:${db.port}/postgres"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["${db", "${db}", "${.host}", "${db.}", "${secret:db}", "x${generate}"] {
            let err = AttributeValue::parse(text).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidAttribute { .. }),
                "{text}: {err:?}"
            );
        }
    }

    #[test]
    fn test_display_escapes_dollar() {
        let value = AttributeValue::literal("${not-a-ref}");
        let text = value.to_string();
        assert_eq!(text, "$${not-a-ref}");
        assert_eq!(AttributeValue::parse(&text).unwrap(), value);
    }

    #[test]
    fn test_validate_typed_values() {
        let owner = AttrAddress::new(id("svc"), "X");
        assert!(AttributeValue::reference(id("db"), "host").validate(&owner).is_ok());
        assert!(matches!(
            AttributeValue::reference(id("db"), "bad name").validate(&owner),
            Err(CoreError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            AttributeValue::Template(Vec::new()).validate(&owner),
            Err(CoreError::InvalidAttribute { .. })
        ));
    }

    fn segment_strategy() -> impl Strategy<Value = Segment> {
        let resource = "[a-z][a-z0-9-]{0,6}".prop_map(|s| id(&s));
        let name = "[A-Za-z_][A-Za-z0-9_]{0,6}";
        prop_oneof![
            "[a-z $:{}./]{1,8}".prop_map(Segment::Text),
            (resource.clone(), name).prop_map(|(r, n)| Segment::Ref(AttrAddress::new(r, n))),
            (resource, name).prop_map(|(r, n)| Segment::Secret(SecretRef::new(r, n))),
        ]
    }

    /// The value `parse` would produce for these segments
    fn canonical(raw: Vec<Segment>) -> AttributeValue {
        let mut segments: Vec<Segment> = Vec::new();
        for segment in raw {
            match (segments.last_mut(), segment) {
                (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
                (_, segment) => segments.push(segment),
            }
        }
        if segments.len() > 1 {
            return AttributeValue::Template(segments);
        }
        match segments.pop() {
            None => AttributeValue::literal(""),
            Some(Segment::Text(t)) => AttributeValue::Literal(t),
            Some(Segment::Ref(address)) => AttributeValue::Ref(address),
            Some(Segment::Secret(secret)) => AttributeValue::Secret(secret),
        }
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(raw in proptest::collection::vec(segment_strategy(), 0..6)) {
            let value = canonical(raw);
            let text = value.to_string();
            prop_assert_eq!(AttributeValue::parse(&text).unwrap(), value);
        }

        #[test]
        fn prop_parse_is_stable(text in "[a-z$.{}:_ -]{0,24}") {
            if let Ok(value) = AttributeValue::parse(&text) {
                prop_assert_eq!(AttributeValue::parse(&value.to_string()).unwrap(), value);
            }
        }
    }
}
