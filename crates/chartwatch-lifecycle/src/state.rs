//! Release lifecycle states and the transitions between them

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a release stands from the orchestrator's point of view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Nothing submitted, or removal confirmed
    #[default]
    Absent,
    /// Install submitted, waiting for readiness
    Installing,
    /// Ready at the last requested version
    Ready,
    /// Upgrade submitted, waiting for readiness at the new version
    Upgrading,
    /// Removal submitted, waiting for deletion
    Uninstalling,
    /// Last operation failed after submission
    Failed,
}

impl LifecycleState {
    /// Whether no operation is in flight
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Absent | Self::Ready | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Installing => write!(f, "Installing"),
            Self::Ready => write!(f, "Ready"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Uninstalling => write!(f, "Uninstalling"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Kind of lifecycle operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Absent -> Installing -> Ready
    Install,
    /// Ready -> Upgrading -> Ready
    Upgrade,
    /// Ready | Failed -> Uninstalling -> Absent
    Uninstall,
}

impl Transition {
    /// Whether this operation may start from `state`
    pub fn allowed_from(&self, state: LifecycleState) -> bool {
        use LifecycleState::*;
        match self {
            Self::Install => state == Absent,
            Self::Upgrade => state == Ready,
            Self::Uninstall => matches!(state, Ready | Failed),
        }
    }

    /// State held while the operation is in flight
    pub fn in_flight(&self) -> LifecycleState {
        match self {
            Self::Install => LifecycleState::Installing,
            Self::Upgrade => LifecycleState::Upgrading,
            Self::Uninstall => LifecycleState::Uninstalling,
        }
    }

    /// State reached when the operation succeeds
    pub fn target(&self) -> LifecycleState {
        match self {
            Self::Install | Self::Upgrade => LifecycleState::Ready,
            Self::Uninstall => LifecycleState::Absent,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}
