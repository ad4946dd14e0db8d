//! Bitbucket Cloud and Bitbucket Server providers

use serde_json::Value;

use chartwatch_common::Error;

use crate::provider::{base_record, SourceCodeProvider};
use crate::schema::Schemas;

const BITBUCKET_CLOUD_AUTHORIZE_URL: &str = "https://bitbucket.org/site/oauth2/authorize";

/// bitbucket.org, OAuth 2 with a client id
pub struct BitbucketCloudProvider;

impl SourceCodeProvider for BitbucketCloudProvider {
    fn name(&self) -> &'static str {
        "bitbucketcloud"
    }

    fn provider_type(&self) -> &'static str {
        "bitbucketCloudProvider"
    }

    fn config_type(&self) -> &'static str {
        "bitbucketCloudPipelineConfig"
    }

    fn transform_config(&self, config: &Value) -> Result<Value, Error> {
        let mut record = base_record(self, config)?;
        let client_id = config
            .get("clientId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        record.insert(
            "redirectUrl".to_string(),
            Value::String(format!(
                "{BITBUCKET_CLOUD_AUTHORIZE_URL}?client_id={client_id}&response_type=code"
            )),
        );
        Ok(Value::Object(record))
    }
}

/// Self-hosted Bitbucket Server, OAuth 1 request tokens
pub struct BitbucketServerProvider;

impl SourceCodeProvider for BitbucketServerProvider {
    fn name(&self) -> &'static str {
        "bitbucketserver"
    }

    fn provider_type(&self) -> &'static str {
        "bitbucketServerProvider"
    }

    fn config_type(&self) -> &'static str {
        "bitbucketServerPipelineConfig"
    }

    fn transform_config(&self, config: &Value) -> Result<Value, Error> {
        let mut record = base_record(self, config)?;
        let hostname = config
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::decode("bitbucketServerPipelineConfig.hostname", "missing"))?;
        let scheme = if config.get("tls").and_then(Value::as_bool).unwrap_or(true) {
            "https"
        } else {
            "http"
        };
        record.insert(
            "redirectUrl".to_string(),
            Value::String(format!(
                "{scheme}://{hostname}/plugins/servlet/oauth/authorize"
            )),
        );
        Ok(Value::Object(record))
    }

    fn customize_schema(&self, schemas: &mut Schemas) {
        let config = schemas.schema_mut(self.config_type());
        config.subtype_of = Some(crate::SOURCE_CODE_PROVIDER_CONFIG_TYPE.to_string());
        config.formatter = Some(self.name().to_string());
        config.add_resource_action("disable");
        // OAuth 1 needs a request token before the redirect
        config.add_resource_action("generateKeys");
        config.add_resource_action("requestLogin");
        config.add_resource_action("testAndApply");

        let provider = schemas.schema_mut(self.provider_type());
        provider.subtype_of = Some(crate::SOURCE_CODE_PROVIDER_TYPE.to_string());
        provider.formatter = Some(self.name().to_string());
        provider.add_resource_action("login");
    }
}
