//! Provider capability set and the registry holding one per vendor

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use chartwatch_common::Error;

use crate::schema::Schemas;
use crate::{SOURCE_CODE_PROVIDER_CONFIG_TYPE, SOURCE_CODE_PROVIDER_TYPE};

/// Capabilities every source-control vendor provides.
pub trait SourceCodeProvider: Send + Sync {
    /// Registry key (e.g. "bitbucketcloud")
    fn name(&self) -> &'static str;

    /// Schema id of the canonical provider record
    fn provider_type(&self) -> &'static str;

    /// Schema id of the stored configuration
    fn config_type(&self) -> &'static str;

    /// Translate a stored configuration object into a provider record
    fn transform_config(&self, config: &Value) -> Result<Value, Error>;

    /// Register this vendor's types on `schemas`.
    ///
    /// The default makes both types subtypes of the shared provider and
    /// config types and adds the login action to the provider record.
    fn customize_schema(&self, schemas: &mut Schemas) {
        let config = schemas.schema_mut(self.config_type());
        config.subtype_of = Some(SOURCE_CODE_PROVIDER_CONFIG_TYPE.to_string());
        config.formatter = Some(self.name().to_string());
        config.add_resource_action("disable");
        config.add_resource_action("testAndApply");

        let provider = schemas.schema_mut(self.provider_type());
        provider.subtype_of = Some(SOURCE_CODE_PROVIDER_TYPE.to_string());
        provider.formatter = Some(self.name().to_string());
        provider.add_resource_action("login");
    }
}

/// Fields every provider record carries, derived from the stored config.
///
/// `id` is `namespace:name` of the config object, `type` is the vendor's
/// provider type, and `projectId` is copied from `projectName`.
pub(crate) fn base_record(
    provider: &dyn SourceCodeProvider,
    config: &Value,
) -> Result<Map<String, Value>, Error> {
    let obj = config.as_object().ok_or_else(|| {
        Error::decode(
            provider.config_type(),
            format!("expected object, got {config}"),
        )
    })?;

    let mut record = Map::new();
    if let Some(meta) = obj.get("metadata").and_then(Value::as_object) {
        let field = |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or_default();
        record.insert(
            "id".to_string(),
            Value::String(format!("{}:{}", field("namespace"), field("name"))),
        );
    }
    if obj
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty())
    {
        record.insert(
            "type".to_string(),
            Value::String(provider.provider_type().to_string()),
        );
    }
    if let Some(project) = obj
        .get("projectName")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
    {
        record.insert("projectId".to_string(), Value::String(project.to_string()));
    }
    Ok(record)
}

/// Providers keyed by name, built once at startup.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Box<dyn SourceCodeProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::github::GithubProvider));
        registry.register(Box::new(crate::bitbucket::BitbucketCloudProvider));
        registry.register(Box::new(crate::bitbucket::BitbucketServerProvider));
        registry
    }

    /// Add or replace a provider
    pub fn register(&mut self, provider: Box<dyn SourceCodeProvider>) {
        debug!(provider = provider.name(), "Registered source code provider");
        self.providers.insert(provider.name(), provider);
    }

    /// Provider registered under `name`
    pub fn get(&self, name: &str) -> Option<&dyn SourceCodeProvider> {
        self.providers.get(name).map(|p| p.as_ref())
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    /// Transform `config` with the provider registered under `name`
    pub fn transform_config(&self, name: &str, config: &Value) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::config(format!("unknown source code provider {name}")))?
            .transform_config(config)
    }

    /// Let every provider customize `schemas`
    pub fn customize_schemas(&self, schemas: &mut Schemas) {
        for provider in self.providers.values() {
            provider.customize_schema(schemas);
        }
    }
}
