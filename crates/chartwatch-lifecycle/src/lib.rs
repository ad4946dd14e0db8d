//! Chart release lifecycle for chartwatch
//!
//! [`LifecycleOrchestrator`] installs, upgrades, and removes
//! [`ChartRelease`]s, confirming each step from the release's watch events
//! and registering teardown on a [`chartwatch_session::Session`].
//! [`PolicyEnforcer`] does the same for constraint templates and
//! constraints, and checks that forbidden namespaces are denied. Aggregate
//! checks without an event stream (policy audits, workload availability)
//! are polled.

#![warn(missing_docs)]

pub mod audit;
pub mod client;
pub mod orchestrator;
pub mod policy;
pub mod release;
pub mod state;
pub mod workloads;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{
    AggregateQuery, AggregateReader, ConstraintAudit, ConstraintAuditor, KubeAggregateReader,
};
pub use client::{ChartClient, KubeChartClient, ManifestClient};
pub use orchestrator::{LifecycleOperation, LifecycleOrchestrator, OrchestratorConfig};
pub use policy::{Constraint, ConstraintTemplate, DenialCheck, KindMatch, PolicyEnforcer};
pub use release::{helm_release_kind, ChartRelease, SourceRef};
pub use state::{LifecycleState, Transition};
pub use workloads::{WorkloadReadiness, WorkloadStatus};
