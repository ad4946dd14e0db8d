//! Watch events and resource selectors

use std::fmt;

use chartwatch_common::kube_utils::describe;
use chartwatch_common::ResourceKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;

/// Identity of the single resource a watch is scoped to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceSelector {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace, ignored for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceSelector {
    /// Select a namespaced object
    pub fn namespaced(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Select a cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Field selector restricting a watch to this object
    pub fn field_selector(&self) -> String {
        format!("metadata.name={}", self.name)
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(&self.kind, self.namespace.as_deref(), &self.name))
    }
}

/// Server-reported failure carried by an `Error` event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorStatus {
    /// HTTP-style status code (e.g. 410 for an expired resource version)
    pub code: u16,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

/// Discriminant of a [`WatchEvent`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Object appeared (or was replayed as current state)
    Added,
    /// Object changed
    Modified,
    /// Object was removed
    Deleted,
    /// Server-reported failure
    Error,
    /// Resource-version checkpoint with no object change
    Bookmark,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "Added"),
            Self::Modified => write!(f, "Modified"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Error => write!(f, "Error"),
            Self::Bookmark => write!(f, "Bookmark"),
        }
    }
}

/// One change notification with an immutable snapshot of the object.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// Object appeared
    Added(DynamicObject),
    /// Object changed
    Modified(DynamicObject),
    /// Object was removed; the snapshot is its last known state
    Deleted(DynamicObject),
    /// Server-reported failure on the stream
    Error(ErrorStatus),
    /// Checkpoint; the snapshot only carries a resource version
    Bookmark(DynamicObject),
}

impl WatchEvent {
    /// Event discriminant
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Modified(_) => EventType::Modified,
            Self::Deleted(_) => EventType::Deleted,
            Self::Error(_) => EventType::Error,
            Self::Bookmark(_) => EventType::Bookmark,
        }
    }

    /// Object snapshot, absent for `Error` events
    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) | Self::Bookmark(o) => Some(o),
            Self::Error(_) => None,
        }
    }

    /// Snapshot of an object whose current state is known (Added/Modified)
    pub fn live_object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Added(o) | Self::Modified(o) => Some(o),
            _ => None,
        }
    }

    /// Name of the object the event concerns, if any
    pub fn object_name(&self) -> Option<String> {
        self.object()
            .and_then(|o| o.metadata.name.as_ref())
            .cloned()
    }

    /// Resource version of the snapshot, if any
    pub fn resource_version(&self) -> Option<String> {
        self.object().and_then(|o| o.resource_version())
    }
}

impl From<kube::api::WatchEvent<DynamicObject>> for WatchEvent {
    fn from(event: kube::api::WatchEvent<DynamicObject>) -> Self {
        use kube::api::WatchEvent as Raw;
        match event {
            Raw::Added(o) => Self::Added(o),
            Raw::Modified(o) => Self::Modified(o),
            Raw::Deleted(o) => Self::Deleted(o),
            Raw::Bookmark(b) => Self::Bookmark(DynamicObject {
                types: Some(b.types),
                metadata: ObjectMeta {
                    resource_version: Some(b.metadata.resource_version),
                    annotations: Some(b.metadata.annotations),
                    ..Default::default()
                },
                data: serde_json::Value::Null,
            }),
            Raw::Error(e) => Self::Error(ErrorStatus {
                code: e.code,
                reason: e.reason,
                message: e.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {"name": name, "namespace": "ns", "resourceVersion": "42"}
        }))
        .unwrap()
    }

    #[test]
    fn test_selector_display_and_field_selector() {
        let selector = ResourceSelector::namespaced(
            ResourceKind::new("helm.toolkit.fluxcd.io/v2", "HelmRelease"),
            "cattle-gatekeeper-system",
            "rancher-gatekeeper",
        );
        assert_eq!(
            selector.to_string(),
            "HelmRelease cattle-gatekeeper-system/rancher-gatekeeper"
        );
        assert_eq!(selector.field_selector(), "metadata.name=rancher-gatekeeper");

        let ns = ResourceSelector::cluster(ResourceKind::namespace(), "cattle-gatekeeper-system");
        assert_eq!(ns.to_string(), "Namespace cattle-gatekeeper-system");
    }

    #[test]
    fn test_event_accessors() {
        let added = WatchEvent::Added(object("a"));
        assert_eq!(added.event_type(), EventType::Added);
        assert_eq!(added.object_name().as_deref(), Some("a"));
        assert_eq!(added.resource_version().as_deref(), Some("42"));
        assert!(added.live_object().is_some());

        let deleted = WatchEvent::Deleted(object("a"));
        assert!(deleted.live_object().is_none());
        assert!(deleted.object().is_some());

        let error = WatchEvent::Error(ErrorStatus {
            code: 410,
            reason: "Expired".into(),
            message: "too old resource version".into(),
        });
        assert_eq!(error.event_type(), EventType::Error);
        assert!(error.object().is_none());
        assert_eq!(error.object_name(), None);
    }

    #[test]
    fn test_kube_error_event_converts_to_status() {
        let raw: kube::api::WatchEvent<DynamicObject> = serde_json::from_value(serde_json::json!({
            "type": "ERROR",
            "object": {
                "status": "Failure",
                "message": "too old resource version",
                "reason": "Expired",
                "code": 410
            }
        }))
        .unwrap();
        match WatchEvent::from(raw) {
            WatchEvent::Error(status) => {
                assert_eq!(status.code, 410);
                assert_eq!(status.reason, "Expired");
            }
            other => panic!("expected Error event, got {other:?}"),
        }
    }
}
