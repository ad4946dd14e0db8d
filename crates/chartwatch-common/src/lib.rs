//! Common building blocks for chartwatch: errors, retries, and kube helpers

#![warn(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod poll;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use kube_utils::ResourceKind;
pub use poll::{Polled, RetryPoller};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for every mutation chartwatch submits
pub const FIELD_MANAGER: &str = "chartwatch";

/// Label applied to every object chartwatch creates
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for chartwatch-owned objects
pub const LABEL_MANAGED_BY_CHARTWATCH: &str = "chartwatch";
