//! Source-control provider registry
//!
//! Each supported vendor implements [`SourceCodeProvider`]: it names
//! itself, translates its stored configuration into the canonical provider
//! record, and customizes the API schemas for its types. A
//! [`ProviderRegistry`] is built once at startup and passed by reference.

#![warn(missing_docs)]

pub mod bitbucket;
pub mod github;
pub mod provider;
pub mod schema;

pub use bitbucket::{BitbucketCloudProvider, BitbucketServerProvider};
pub use github::GithubProvider;
pub use provider::{ProviderRegistry, SourceCodeProvider};
pub use schema::{Schema, Schemas};

/// Schema id shared by every provider record
pub const SOURCE_CODE_PROVIDER_TYPE: &str = "sourceCodeProvider";

/// Schema id shared by every provider configuration
pub const SOURCE_CODE_PROVIDER_CONFIG_TYPE: &str = "sourceCodeProviderConfig";
