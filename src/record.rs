//! Metadata records linking logical paths to physical locations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proxy::ProxyStore;
use crate::registry::ProxyRegistry;
use crate::{ByteStore, Result};

/// Opaque extension attributes stored alongside a record.
pub type Attributes = BTreeMap<String, Value>;

/// Extension attribute naming the owning entity's type.
pub const CONTENT_TYPE_ID: &str = "content_type_id";
/// Extension attribute naming the owning entity's id.
pub const OBJECT_ID: &str = "object_id";
/// Extension attribute naming the owning entity's field.
pub const FIELD: &str = "field";

/// Backend-assigned identifier of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// Relational row id.
    Row(i64),
    /// Document `_id`.
    Document(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Row(id) => write!(f, "{id}"),
            RecordId::Document(id) => f.write_str(id),
        }
    }
}

/// The attributes of a record, as passed to [`MetadataBackend::create`].
///
/// [`MetadataBackend::create`]: crate::MetadataBackend::create
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    pub path: String,
    #[serde(default)]
    pub original_storage_path: String,
    #[serde(default)]
    pub proxy_storage_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_storage_name: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl RecordData {
    pub fn new(path: impl Into<String>, original_storage_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_storage_path: original_storage_path.into(),
            ..Default::default()
        }
    }

    pub fn with_proxy_storage_name(mut self, name: impl Into<String>) -> Self {
        self.proxy_storage_name = name.into();
        self
    }

    pub fn with_original_storage_name(mut self, name: Option<String>) -> Self {
        self.original_storage_name = name;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A stored record, as returned by a metadata backend.
///
/// This is a snapshot: it does not follow later updates made through the
/// backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub id: RecordId,
    pub path: String,
    pub original_storage_path: String,
    pub proxy_storage_name: String,
    pub original_storage_name: Option<String>,
    pub attributes: Attributes,
}

impl MetadataRecord {
    pub fn from_data(id: RecordId, data: RecordData) -> Self {
        Self {
            id,
            path: data.path,
            original_storage_path: data.original_storage_path,
            proxy_storage_name: data.proxy_storage_name,
            original_storage_name: data.original_storage_name,
            attributes: data.attributes,
        }
    }

    pub fn into_data(self) -> RecordData {
        RecordData {
            path: self.path,
            original_storage_path: self.original_storage_path,
            proxy_storage_name: self.proxy_storage_name,
            original_storage_name: self.original_storage_name,
            attributes: self.attributes,
        }
    }

    /// Look up an extension attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The proxy store that produced this record.
    pub fn proxy_store<'r>(&self, registry: &'r ProxyRegistry) -> Result<&'r Arc<ProxyStore>> {
        registry.get(&self.proxy_storage_name)
    }

    /// The byte store holding this record's content.
    pub fn byte_store(&self, registry: &ProxyRegistry) -> Result<Arc<dyn ByteStore>> {
        self.proxy_store(registry)?.byte_store_for(Some(self))
    }

    /// Canonical full path of the content inside its byte store.
    pub fn original_storage_full_path(&self, registry: &ProxyRegistry) -> Result<String> {
        self.proxy_store(registry)?
            .original_storage_full_path(&self.original_storage_path, Some(self))
    }

    /// `"<proxy> <path> => <backend> <original path>"`.
    pub fn describe(&self, registry: &ProxyRegistry) -> Result<String> {
        let proxy = self.proxy_store(registry)?;
        let backend = match &self.original_storage_name {
            Some(name) => name.clone(),
            None => proxy
                .routing()
                .current_name()
                .unwrap_or_else(|| "default".to_string()),
        };
        Ok(format!(
            "{} {} => {} {}",
            proxy.name(),
            self.path,
            backend,
            self.original_storage_path
        ))
    }
}

/// A set of attributes to replace on an existing record.
///
/// Only the named attributes change; each is replaced whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub path: Option<String>,
    pub original_storage_path: Option<String>,
    pub proxy_storage_name: Option<String>,
    pub original_storage_name: Option<String>,
    pub attributes: Attributes,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn original_storage_path(mut self, path: impl Into<String>) -> Self {
        self.original_storage_path = Some(path.into());
        self
    }

    pub fn proxy_storage_name(mut self, name: impl Into<String>) -> Self {
        self.proxy_storage_name = Some(name.into());
        self
    }

    pub fn original_storage_name(mut self, name: impl Into<String>) -> Self {
        self.original_storage_name = Some(name.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.original_storage_path.is_none()
            && self.proxy_storage_name.is_none()
            && self.original_storage_name.is_none()
            && self.attributes.is_empty()
    }

    /// Apply the update in place. Both metadata backends go through this so
    /// they share one replacement rule.
    pub fn apply_to(&self, data: &mut RecordData) {
        if let Some(path) = &self.path {
            data.path = path.clone();
        }
        if let Some(path) = &self.original_storage_path {
            data.original_storage_path = path.clone();
        }
        if let Some(name) = &self.proxy_storage_name {
            data.proxy_storage_name = name.clone();
        }
        if let Some(name) = &self.original_storage_name {
            data.original_storage_name = Some(name.clone());
        }
        for (key, value) in &self.attributes {
            data.attributes.insert(key.clone(), value.clone());
        }
    }
}

/// Descriptor of the entity a proxied file belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub content_type_id: i64,
    pub object_id: i64,
    pub field: String,
}

impl Owner {
    pub fn new(content_type_id: i64, object_id: i64, field: impl Into<String>) -> Self {
        Self {
            content_type_id,
            object_id,
            field: field.into(),
        }
    }

    /// Whether `record` already carries this owner's attributes.
    pub fn is_bound_to(&self, record: &MetadataRecord) -> bool {
        record.attribute(CONTENT_TYPE_ID) == Some(&Value::from(self.content_type_id))
            && record.attribute(OBJECT_ID) == Some(&Value::from(self.object_id))
            && record.attribute(FIELD) == Some(&Value::from(self.field.as_str()))
    }

    /// The update writing this owner's attributes.
    pub fn to_update(&self) -> RecordUpdate {
        RecordUpdate::new()
            .attribute(CONTENT_TYPE_ID, self.content_type_id)
            .attribute(OBJECT_ID, self.object_id)
            .attribute(FIELD, self.field.as_str())
    }
}
