//! GitHub and GitHub Enterprise provider

use serde_json::Value;

use chartwatch_common::Error;

use crate::provider::{base_record, SourceCodeProvider};

const GITHUB_DEFAULT_HOSTNAME: &str = "github.com";

/// GitHub, OAuth 2 with a client id; `hostname` selects an Enterprise server
pub struct GithubProvider;

impl SourceCodeProvider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn provider_type(&self) -> &'static str {
        "githubProvider"
    }

    fn config_type(&self) -> &'static str {
        "githubPipelineConfig"
    }

    fn transform_config(&self, config: &Value) -> Result<Value, Error> {
        let mut record = base_record(self, config)?;
        let hostname = config
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .unwrap_or(GITHUB_DEFAULT_HOSTNAME);
        let scheme = if config.get("tls").and_then(Value::as_bool).unwrap_or(true) {
            "https"
        } else {
            "http"
        };
        let client_id = config
            .get("clientId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        record.insert(
            "redirectUrl".to_string(),
            Value::String(format!(
                "{scheme}://{hostname}/login/oauth/authorize?client_id={client_id}"
            )),
        );
        Ok(Value::Object(record))
    }
}
