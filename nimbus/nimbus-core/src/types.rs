//! Core types shared by the graph engine, the parsers and the store adapters.

use crate::error::{NimbusError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Identity Keys
// ============================================================================

/// Provider-native identity of an inventory object within its collection.
///
/// A key is an ordered, non-empty list of non-blank parts. Single provider
/// ids are one-part keys; composite keys come from `find_or_build_by`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryKey(Vec<String>);

impl InventoryKey {
    /// Create a single-part key
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(NimbusError::identity("blank identifier"));
        }
        Ok(Self(vec![id]))
    }

    /// Create a composite key from ordered parts
    pub fn composite<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(NimbusError::identity("empty composite key"));
        }
        if let Some(pos) = parts.iter().position(|p| p.trim().is_empty()) {
            return Err(NimbusError::identity(format!(
                "blank part at position {} of composite key",
                pos
            )));
        }
        Ok(Self(parts))
    }

    /// Key parts in order
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Whether the key has more than one part
    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }
}

impl fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Conversion into an identity key.
///
/// `None` and blank strings fail with an identity error, which callers treat
/// as "skip this record".
pub trait IntoKey {
    fn into_key(self) -> Result<InventoryKey>;
}

impl IntoKey for InventoryKey {
    fn into_key(self) -> Result<InventoryKey> {
        Ok(self)
    }
}

impl IntoKey for &InventoryKey {
    fn into_key(self) -> Result<InventoryKey> {
        Ok(self.clone())
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Result<InventoryKey> {
        InventoryKey::new(self)
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<InventoryKey> {
        InventoryKey::new(self)
    }
}

impl IntoKey for &String {
    fn into_key(self) -> Result<InventoryKey> {
        InventoryKey::new(self.as_str())
    }
}

impl IntoKey for &ObjectRef {
    fn into_key(self) -> Result<InventoryKey> {
        Ok(self.key.clone())
    }
}

impl<T: IntoKey> IntoKey for Option<T> {
    fn into_key(self) -> Result<InventoryKey> {
        match self {
            Some(inner) => inner.into_key(),
            None => Err(NimbusError::identity("missing identifier")),
        }
    }
}

// ============================================================================
// References
// ============================================================================

/// A concrete link to an object in a named collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub collection: String,
    pub key: InventoryKey,
}

impl ObjectRef {
    pub fn new(collection: impl Into<String>, key: InventoryKey) -> Self {
        Self {
            collection: collection.into(),
            key,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.key)
    }
}

/// An unresolved pointer to "the object with key K in collection C",
/// optionally projecting one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LazyReference {
    pub collection: String,
    pub key: InventoryKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
}

impl LazyReference {
    pub fn new(collection: impl Into<String>, key: InventoryKey) -> Self {
        Self {
            collection: collection.into(),
            key,
            projection: None,
        }
    }

    /// Project an attribute of the target instead of linking to it
    pub fn project(mut self, attribute: impl Into<String>) -> Self {
        self.projection = Some(attribute.into());
        self
    }

    /// The link this reference becomes when the target exists
    pub fn target(&self) -> ObjectRef {
        ObjectRef::new(self.collection.clone(), self.key.clone())
    }
}

// ============================================================================
// Attribute Values
// ============================================================================

/// Attribute value held by an inventory object.
///
/// `Lazy` only exists between parsing and resolution; committed values
/// never contain it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Link(ObjectRef),
    Lazy(LazyReference),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&ObjectRef> {
        match self {
            Value::Link(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this value, or anything nested in it, is still a lazy reference
    pub fn has_unresolved(&self) -> bool {
        match self {
            Value::Lazy(_) => true,
            Value::List(items) => items.iter().any(Value::has_unresolved),
            Value::Map(entries) => entries.values().any(Value::has_unresolved),
            _ => false,
        }
    }

    /// Identity key parts contributed by this value when used as a key attribute.
    ///
    /// A reference contributes its target collection followed by the target key,
    /// so equal ids in different collections never produce the same key.
    pub fn key_parts(&self) -> Result<Vec<String>> {
        match self {
            Value::Str(s) if !s.trim().is_empty() => Ok(vec![s.clone()]),
            Value::Int(i) => Ok(vec![i.to_string()]),
            Value::Bool(b) => Ok(vec![b.to_string()]),
            Value::Link(r) => Ok(reference_parts(&r.collection, &r.key)),
            Value::Lazy(r) => Ok(reference_parts(&r.collection, &r.key)),
            Value::Null => Err(NimbusError::identity("null key attribute")),
            Value::Str(_) => Err(NimbusError::identity("blank key attribute")),
            _ => Err(NimbusError::identity("key attribute must be a scalar or reference")),
        }
    }
}

fn reference_parts(collection: &str, key: &InventoryKey) -> Vec<String> {
    std::iter::once(collection.to_string())
        .chain(key.parts().iter().cloned())
        .collect()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Link(v)
    }
}

impl From<LazyReference> for Value {
    fn from(v: LazyReference) -> Self {
        Value::Lazy(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Attribute bag keyed by attribute name
pub type Attributes = BTreeMap<String, Value>;

// ============================================================================
// Scopes and Stored Rows
// ============================================================================

/// The manager (cloud account/region) a run is scoped to, plus its parent
/// manager for sub-managers sharing the parent's collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagerScope {
    pub manager_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl ManagerScope {
    pub fn new(manager_id: impl Into<String>) -> Self {
        Self {
            manager_id: manager_id.into(),
            parent_id: None,
        }
    }

    /// Scope of a sub-manager attached to `parent_id`
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Scope of the parent manager, if any
    pub fn parent(&self) -> Option<ManagerScope> {
        self.parent_id.as_ref().map(ManagerScope::new)
    }
}

impl fmt::Display for ManagerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent_id {
            Some(parent) => write!(f, "{}<{}", self.manager_id, parent),
            None => write!(f, "{}", self.manager_id),
        }
    }
}

/// A row as currently held by the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: InventoryKey,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(key: InventoryKey, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            key,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rejects_blank_and_missing() {
        assert!(InventoryKey::new("  ").is_err());
        assert!(None::<&str>.into_key().unwrap_err().is_record_scoped());
        assert!(InventoryKey::composite(Vec::<String>::new()).is_err());
        assert!(InventoryKey::composite(["a", ""]).is_err());
    }

    #[test]
    fn test_key_display() {
        let key = InventoryKey::composite(["s1", "vda"]).unwrap();
        assert!(key.is_composite());
        assert_eq!(key.to_string(), "s1/vda");
        assert_eq!(Some("t1").into_key().unwrap().to_string(), "t1");
    }

    #[test]
    fn test_key_parts_from_references() {
        let link = Value::Link(ObjectRef::new("vms", InventoryKey::new("s1").unwrap()));
        assert_eq!(link.key_parts().unwrap(), vec!["vms".to_string(), "s1".to_string()]);

        let lazy = Value::Lazy(LazyReference::new("vms", InventoryKey::new("s1").unwrap()).project("name"));
        assert_eq!(lazy.key_parts().unwrap(), link.key_parts().unwrap());

        let template = Value::Link(ObjectRef::new("miq_templates", InventoryKey::new("s1").unwrap()));
        assert_ne!(template.key_parts().unwrap(), link.key_parts().unwrap());
        assert!(Value::Null.key_parts().is_err());
        assert!(Value::Float(1.5).key_parts().is_err());
    }

    #[test]
    fn test_has_unresolved_nested() {
        let lazy = Value::Lazy(LazyReference::new("cloud_tenants", InventoryKey::new("t1").unwrap()));
        let list = Value::List(vec![Value::Int(1), lazy]);
        assert!(list.has_unresolved());
        assert!(!Value::List(vec![Value::Int(1)]).has_unresolved());
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1, "b": [true, "x"], "c": 2.5, "d": null});
        let value = Value::from(&json);
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["a"], Value::Int(1));
        assert_eq!(map["b"], Value::List(vec![Value::Bool(true), Value::from("x")]));
        assert_eq!(map["c"], Value::Float(2.5));
        assert!(map["d"].is_null());
    }

    #[test]
    fn test_scope_parent() {
        let scope = ManagerScope::new("cinder-1").with_parent("ems-1");
        assert_eq!(scope.parent(), Some(ManagerScope::new("ems-1")));
        assert_eq!(scope.to_string(), "cinder-1<ems-1");
    }
}
