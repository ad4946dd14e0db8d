//! API schema table that providers customize

use std::collections::BTreeMap;

use serde::Serialize;

/// One API type as exposed to clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Type id (e.g. "bitbucketCloudProvider")
    pub id: String,
    /// Base type whose store this type is a subtype of
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype_of: Option<String>,
    /// Actions clients may invoke on objects of this type
    pub resource_actions: Vec<String>,
    /// Actions clients may invoke on the collection
    pub collection_actions: Vec<String>,
    /// Name of the provider that formats responses for this type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatter: Option<String>,
}

impl Schema {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Add a resource action unless already present
    pub fn add_resource_action(&mut self, action: &str) {
        if !self.resource_actions.iter().any(|a| a == action) {
            self.resource_actions.push(action.to_string());
        }
    }
}

/// Schemas keyed by type id
#[derive(Clone, Debug, Default, Serialize)]
pub struct Schemas {
    schemas: BTreeMap<String, Schema>,
}

impl Schemas {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema for `id`, created empty if missing
    pub fn schema_mut(&mut self, id: &str) -> &mut Schema {
        self.schemas
            .entry(id.to_string())
            .or_insert_with(|| Schema::new(id))
    }

    /// Schema for `id`, if present
    pub fn get(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    /// Number of schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Every type that is a subtype of `base`
    pub fn subtypes_of<'a>(&'a self, base: &'a str) -> impl Iterator<Item = &'a Schema> + 'a {
        self.schemas
            .values()
            .filter(move |s| s.subtype_of.as_deref() == Some(base))
    }
}
