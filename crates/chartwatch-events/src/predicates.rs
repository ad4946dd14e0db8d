//! Reusable predicates over watch events
//!
//! A predicate sees each event in order and answers `Ok(true)` when the
//! wait is satisfied, `Ok(false)` to keep waiting, or `Err(reason)` when
//! the resource has reached a state the wait can never recover from.

use std::sync::Arc;

use kube::api::DynamicObject;
use serde_json::Value;

use crate::event::WatchEvent;

/// Outcome of evaluating a predicate against one event
pub type PredicateResult = Result<bool, String>;

/// Shared predicate callable from any task
pub type Predicate = Arc<dyn Fn(&WatchEvent) -> PredicateResult + Send + Sync>;

/// Wrap a closure as a [`Predicate`]
pub fn from_fn<F>(f: F) -> Predicate
where
    F: Fn(&WatchEvent) -> PredicateResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Satisfied by a `Deleted` event
pub fn deleted() -> Predicate {
    from_fn(|event| Ok(matches!(event, WatchEvent::Deleted(_))))
}

/// Satisfied when the object carries `Ready=True`.
///
/// `Ready=False` with a reason ending in `Failed` (InstallFailed,
/// UpgradeFailed, ...) rejects the wait, as does deletion.
pub fn ready_condition() -> Predicate {
    from_fn(|event| match event {
        WatchEvent::Deleted(_) => Err("deleted while waiting for readiness".to_string()),
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => ready_status(obj),
        _ => Ok(false),
    })
}

/// Satisfied when the object is ready at the given chart version and the
/// controller has observed the latest generation.
pub fn ready_at_version(version: impl Into<String>) -> Predicate {
    let version = version.into();
    from_fn(move |event| match event {
        WatchEvent::Deleted(_) => Err("deleted while waiting for upgrade".to_string()),
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
            if !generation_observed(obj) {
                return Ok(false);
            }
            if observed_chart_version(obj).as_deref() != Some(version.as_str()) {
                return Ok(false);
            }
            ready_status(obj)
        }
        _ => Ok(false),
    })
}

/// Satisfied when the JSON value at `pointer` equals `expected`.
///
/// The pointer is evaluated against the whole object, e.g.
/// `/status/phase`.
pub fn field_equals(pointer: impl Into<String>, expected: Value) -> Predicate {
    let pointer = pointer.into();
    from_fn(move |event| {
        Ok(event
            .live_object()
            .and_then(|obj| object_value(obj).pointer(&pointer).cloned())
            .is_some_and(|v| v == expected))
    })
}

/// Chart version the controller last installed or attempted.
///
/// Reads `status.history[0].chartVersion`, falling back to
/// `status.lastAttemptedRevision`.
pub fn observed_chart_version(obj: &DynamicObject) -> Option<String> {
    let status = obj.data.get("status")?;
    status
        .pointer("/history/0/chartVersion")
        .or_else(|| status.get("lastAttemptedRevision"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn ready_status(obj: &DynamicObject) -> PredicateResult {
    let Some(ready) = condition(obj, "Ready") else {
        return Ok(false);
    };
    match ready.get("status").and_then(Value::as_str) {
        Some("True") => Ok(true),
        Some("False") => {
            let reason = ready.get("reason").and_then(Value::as_str).unwrap_or("");
            if reason.ends_with("Failed") {
                let message = ready.get("message").and_then(Value::as_str).unwrap_or("");
                Err(format!("{reason}: {message}"))
            } else {
                Ok(false)
            }
        }
        _ => Ok(false),
    }
}

fn condition<'a>(obj: &'a DynamicObject, type_: &str) -> Option<&'a Value> {
    obj.data
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
}

fn generation_observed(obj: &DynamicObject) -> bool {
    let Some(generation) = obj.metadata.generation else {
        return true;
    };
    obj.data
        .pointer("/status/observedGeneration")
        .and_then(Value::as_i64)
        .is_some_and(|observed| observed >= generation)
}

fn object_value(obj: &DynamicObject) -> Value {
    serde_json::to_value(obj).unwrap_or(Value::Null)
}
