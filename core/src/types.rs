//! Entity types for the catalogue's action API.
//!
//! # Design
//! Entities are plain serde DTOs mapped 1:1 onto the wire schema. Decoding
//! is structural: unknown wire fields are ignored, missing optional fields
//! decode to `None`/empty via `#[serde(default)]`, never to an error. The
//! same types serve as outbound payloads; optional members are skipped when
//! unset so create payloads stay minimal.
//!
//! Arbitrary error mappings are deliberately *not* modeled here — the error
//! interpreter walks them as dynamic `serde_json::Value` trees, since error
//! shapes are not fixed schemas.

use serde::{Deserialize, Serialize};

use crate::error::CkanError;

/// One row of a datastore table: column name to scalar value.
///
/// Per-record key order is irrelevant to the service; the order of records
/// within [`DataStore::records`] is significant and round-trips.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A dataset ("package") in the catalogue.
///
/// The server is authoritative for read results; for create payloads the
/// dataset exclusively owns its resource list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    /// Free-text description; the package schema calls this `notes`.
    #[serde(default, rename = "notes")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

/// A file attachment to a dataset.
///
/// Content comes from exactly one of two sources: a `url` reference (JSON
/// flow) or an uploaded file (multipart flow). The upload path is not part
/// of the entity — it is passed separately to the upload operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unset until the server assigns one. On upload payloads an unset or
    /// empty id means "create new"; a non-empty id targets an existing
    /// resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Resource {
    /// The identifier to put on the wire, if any. Empty strings count as
    /// absent so callers can leave `id` defaulted when creating.
    pub(crate) fn wire_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A group of datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// How datastore rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMethod {
    Insert,
    Update,
    Upsert,
}

/// A column definition in a datastore table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column identifier. Must be non-empty; use [`Field::new`].
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Field {
    pub fn new(id: impl Into<String>) -> Result<Self, CkanError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CkanError::EmptyFieldId);
        }
        Ok(Self { id, value: None })
    }
}

/// A tabular datastore table attached to a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<WriteMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<String>>,
}

/// Result payload of a dataset search: total hit count plus the matching
/// datasets in server-provided order. Pagination is not modeled; callers
/// needing it extend the query string convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub results: Vec<Dataset>,
}

/// Derive a URL-safe identifier from a human-readable title: whitespace
/// becomes `-`, anything outside `[A-Za-z0-9_-]` is dropped, the rest is
/// lowercased.
pub fn slugify(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .to_lowercase()
}
