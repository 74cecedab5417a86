//! Documents and patches.
//!
//! A [`Document`] is an open map of fields wrapped around two typed members:
//! the identity key and the schema version. On the wire it is a flat JSON
//! object, e.g. `{"id": "x", "version": 2, "a": 1}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Version of a document that has never been migrated.
///
/// A missing `version` key and an explicit `0` mean the same thing. Documents
/// at this version are written without a `version` key.
pub const UNVERSIONED: u64 = 0;

/// Field name of the identity key.
pub const ID_FIELD: &str = "id";

/// Field name of the schema version stamp.
pub const VERSION_FIELD: &str = "version";

/// Fields produced by one migration step, merged into the working document.
pub type Patch = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_version",
        skip_serializing_if = "is_unversioned"
    )]
    version: u64,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

fn is_unversioned(version: &u64) -> bool {
    *version == UNVERSIONED
}

fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(UNVERSIONED))
}

impl Document {
    /// Creates an unversioned document with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: UNVERSIONED,
            fields: Map::new(),
        }
    }

    /// Reassembles a document from its stored parts. Reserved keys inside
    /// `fields` are dropped.
    pub fn from_parts(id: impl Into<String>, version: u64, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        fields.remove(VERSION_FIELD);
        Self {
            id: id.into(),
            version,
            fields,
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style version setter.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Open fields, excluding `id` and `version`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets an open field. Reserved names are routed to the typed members
    /// when the value has the right shape and ignored otherwise.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match name.as_str() {
            ID_FIELD => {
                if let Value::String(id) = value {
                    self.id = id;
                }
            }
            VERSION_FIELD => {
                if let Some(version) = value.as_u64() {
                    self.version = version;
                }
            }
            _ => {
                self.fields.insert(name, value);
            }
        }
    }

    /// Shallow-merges a patch into the open fields.
    ///
    /// Patch fields overwrite same-named fields; everything else is kept.
    /// `id` and `version` are owned by the store and the migrator, so patch
    /// entries for them are dropped.
    pub fn merge(&mut self, patch: Patch) {
        for (name, value) in patch {
            if name == ID_FIELD || name == VERSION_FIELD {
                tracing::warn!(document = %self.id, field = %name, "Ignoring reserved field in patch");
                continue;
            }
            self.fields.insert(name, value);
        }
    }

    /// Looks a field up by name, including the typed members.
    ///
    /// `version` resolves to `None` for unversioned documents so that
    /// "field absent" and "version 0" stay the same thing.
    pub fn field_value(&self, name: &str) -> Option<Value> {
        match name {
            ID_FIELD => Some(Value::String(self.id.clone())),
            VERSION_FIELD if self.version == UNVERSIONED => None,
            VERSION_FIELD => Some(Value::from(self.version)),
            _ => self.fields.get(name).cloned(),
        }
    }

    pub fn from_value(value: Value) -> crate::error::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> crate::error::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
