//! `chartwatch providers`: list source-code providers or transform a
//! stored provider configuration. Needs no cluster.

use std::path::PathBuf;

use clap::Args;
use serde_json::{json, Value};

use chartwatch_scm::{ProviderRegistry, Schemas};

use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ProvidersArgs {
    /// Provider to transform with (e.g. github, bitbucketcloud)
    #[arg(long)]
    pub transform: Option<String>,

    /// Stored provider configuration, YAML or JSON
    #[arg(long)]
    pub input: Option<PathBuf>,
}

pub fn run(args: ProvidersArgs) -> Result<()> {
    let registry = ProviderRegistry::with_defaults();
    let output = render(&registry, &args)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Provider names and customized schemas, or one transformed record
pub fn render(registry: &ProviderRegistry, args: &ProvidersArgs) -> Result<Value> {
    match (&args.transform, &args.input) {
        (Some(name), Some(path)) => {
            let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            let config: Value = serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
                path: path.clone(),
                source,
            })?;
            Ok(registry.transform_config(name, &config)?)
        }
        (None, None) => {
            let mut schemas = Schemas::new();
            registry.customize_schemas(&mut schemas);
            Ok(json!({
                "providers": registry.names(),
                "schemas": serde_json::to_value(&schemas)?,
            }))
        }
        _ => Err(Error::validation("--transform and --input must be given together")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shows_every_default_provider() {
        let registry = ProviderRegistry::with_defaults();
        let args = ProvidersArgs {
            transform: None,
            input: None,
        };

        let output = render(&registry, &args).unwrap();
        assert_eq!(
            output["providers"],
            json!(["bitbucketcloud", "bitbucketserver", "github"])
        );
        assert!(output["schemas"]["schemas"]["githubProvider"].is_object());
    }

    /// Story: a stored GitHub Enterprise config is turned into the provider
    /// record a client would see.
    #[test]
    fn story_transform_reads_stored_config() {
        let path = std::env::temp_dir().join(format!("chartwatch-scm-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "metadata: { namespace: p-abc, name: github }\nhostname: git.corp.local\nclientId: abc\n",
        )
        .unwrap();
        let args = ProvidersArgs {
            transform: Some("github".to_string()),
            input: Some(path.clone()),
        };

        let record = render(&ProviderRegistry::with_defaults(), &args).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(record["id"], "p-abc:github");
        assert_eq!(
            record["redirectUrl"],
            "https://git.corp.local/login/oauth/authorize?client_id=abc"
        );
    }

    #[test]
    fn test_unknown_provider_and_half_arguments_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let half = ProvidersArgs {
            transform: Some("github".to_string()),
            input: None,
        };
        assert!(matches!(render(&registry, &half), Err(Error::Validation { .. })));

        let missing = ProvidersArgs {
            transform: Some("gitlab".to_string()),
            input: Some(PathBuf::from("/nonexistent/chartwatch-provider.yaml")),
        };
        assert!(matches!(render(&registry, &missing), Err(Error::Io { .. })));
    }
}
