//! Session-scoped cleanup for chartwatch
//!
//! A [`Session`] owns an ordered stack of teardown actions. Anything that
//! creates cluster state registers its inverse here *before* mutating, and
//! [`Session::cleanup`] unwinds the stack last-in-first-out when the scope
//! ends. One failing action never stops the rest; every failure is
//! reported together in a single [`Error::Cleanup`].
//!
//! Session handles are cheap to clone and all clones share one stack, so a
//! cleanup action can capture a handle and register follow-up work while
//! it runs. Follow-up actions are drained before `cleanup` returns.

#![warn(missing_docs)]

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chartwatch_common::error::CleanupFailure;
use chartwatch_common::Error;

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

struct Entry {
    description: String,
    action: CleanupAction,
}

struct Inner {
    name: String,
    stack: Mutex<Vec<Entry>>,
    // Serializes drains so actions never run concurrently
    drain: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pending = self.stack.get_mut().len();
        if pending > 0 {
            warn!(
                session = %self.name,
                pending,
                "Session dropped with cleanup actions that never ran"
            );
        }
    }
}

/// Scope owning a LIFO stack of cleanup actions.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("pending", &self.len())
            .finish()
    }
}

impl Session {
    /// Create an anonymous session
    pub fn new() -> Self {
        Self::named("session")
    }

    /// Create a session with a name used in log lines
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                stack: Mutex::new(Vec::new()),
                drain: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Push a cleanup action onto the stack.
    ///
    /// The closure runs at most once, during [`Session::cleanup`].
    pub fn register<F, Fut>(&self, description: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let description = description.into();
        debug!(session = %self.inner.name, action = %description, "Registered cleanup action");
        self.inner.stack.lock().push(Entry {
            description,
            action: Box::new(move || action().boxed()),
        });
    }

    /// Create a nested session whose cleanup is registered on this one.
    ///
    /// Draining the child directly runs its actions early; otherwise they
    /// run when the parent reaches the child's position in its stack.
    pub fn child(&self, name: impl Into<String>) -> Session {
        let child = Session::named(name);
        let handle = child.clone();
        self.register(format!("drain session {}", child.name()), move || async move {
            handle.cleanup().await
        });
        child
    }

    /// Number of actions waiting to run
    pub fn len(&self) -> usize {
        self.inner.stack.lock().len()
    }

    /// Whether no actions are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every pending action without running it, returning how many
    /// were dropped. Use when the state the session created should outlive
    /// it.
    pub fn release(&self) -> usize {
        let dropped = std::mem::take(&mut *self.inner.stack.lock());
        if !dropped.is_empty() {
            info!(
                session = %self.inner.name,
                actions = dropped.len(),
                "Released cleanup actions without running them"
            );
        }
        dropped.len()
    }

    /// Run every registered action in reverse registration order.
    ///
    /// The stack lock is released while each action runs, so an action may
    /// register more work; that work runs next. Concurrent callers wait
    /// for the in-flight drain. An action must not call `cleanup` on the
    /// session that is draining it.
    pub async fn cleanup(&self) -> Result<(), Error> {
        let _drain = self.inner.drain.lock().await;
        let started = Instant::now();
        let mut ran = 0usize;
        let mut failures = Vec::new();

        loop {
            let entry = self.inner.stack.lock().pop();
            let Some(Entry {
                description,
                action,
            }) = entry
            else {
                break;
            };

            ran += 1;
            debug!(session = %self.inner.name, action = %description, "Running cleanup action");
            if let Err(error) = action().await {
                warn!(
                    session = %self.inner.name,
                    action = %description,
                    error = %error,
                    "Cleanup action failed, continuing"
                );
                failures.push(CleanupFailure {
                    action: description,
                    error,
                });
            }
        }

        if ran > 0 {
            info!(
                session = %self.inner.name,
                actions = ran,
                failed = failures.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Session cleanup finished"
            );
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(session: &Session, log: &Arc<Mutex<Vec<String>>>, label: &str) {
        let log = log.clone();
        let label = label.to_string();
        session.register(label.clone(), move || async move {
            log.lock().push(label);
            Ok(())
        });
    }

    #[tokio::test]
    async fn story_actions_run_in_reverse_registration_order() {
        let session = Session::new();
        let log = recorder();
        for label in ["namespace", "crd chart", "chart"] {
            push(&session, &log, label);
        }
        assert_eq!(session.len(), 3);

        session.cleanup().await.unwrap();

        assert_eq!(*log.lock(), vec!["chart", "crd chart", "namespace"]);
        assert!(session.is_empty());
    }

    /// Story: one broken teardown step must not leave the rest of the
    /// cluster dirty; every failure shows up in the final report.
    #[tokio::test]
    async fn story_failures_do_not_stop_remaining_actions() {
        let session = Session::new();
        let log = recorder();
        push(&session, &log, "first");
        session.register("delete namespace", || async {
            Err(Error::transport("Namespace demo", "connection refused"))
        });
        push(&session, &log, "third");
        session.register("uninstall chart", || async {
            Err(Error::predicate("HelmRelease demo/app", "finalizer stuck"))
        });

        let err = session.cleanup().await.unwrap_err();

        assert_eq!(*log.lock(), vec!["third", "first"]);
        match err {
            Error::Cleanup { failures } => {
                let actions: Vec<_> = failures.iter().map(|f| f.action.as_str()).collect();
                assert_eq!(actions, vec!["uninstall chart", "delete namespace"]);
            }
            other => panic!("expected Cleanup error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn story_actions_registered_during_cleanup_run_depth_first() {
        let session = Session::new();
        let log = recorder();
        push(&session, &log, "outer-first");

        let nested = session.clone();
        let nested_log = log.clone();
        session.register("outer-second", move || async move {
            nested_log.lock().push("outer-second".to_string());
            push(&nested, &nested_log, "follow-up");
            Ok(())
        });

        session.cleanup().await.unwrap();

        assert_eq!(*log.lock(), vec!["outer-second", "follow-up", "outer-first"]);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let session = Session::new();
        let log = recorder();
        push(&session, &log, "only");

        session.cleanup().await.unwrap();
        session.cleanup().await.unwrap();

        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn story_child_session_drains_with_parent() {
        let parent = Session::named("suite");
        let log = recorder();
        push(&parent, &log, "parent-early");
        let child = parent.child("test-case");
        push(&child, &log, "child-a");
        push(&child, &log, "child-b");
        push(&parent, &log, "parent-late");

        parent.cleanup().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["parent-late", "child-b", "child-a", "parent-early"]
        );
        assert!(child.is_empty());
    }

    #[tokio::test]
    async fn test_child_drained_early_is_noop_for_parent() {
        let parent = Session::new();
        let log = recorder();
        let child = parent.child("case");
        push(&child, &log, "child");

        child.cleanup().await.unwrap();
        parent.cleanup().await.unwrap();

        assert_eq!(*log.lock(), vec!["child"]);
    }

    #[tokio::test(start_paused = true)]
    async fn story_concurrent_cleanups_never_overlap() {
        let session = Session::new();
        let active = Arc::new(Mutex::new(0u32));
        let peak = Arc::new(Mutex::new(0u32));
        for i in 0..4 {
            let active = active.clone();
            let peak = peak.clone();
            session.register(format!("slow-{i}"), move || async move {
                {
                    let mut a = active.lock();
                    *a += 1;
                    let mut p = peak.lock();
                    *p = (*p).max(*a);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                *active.lock() -= 1;
                Ok(())
            });
        }

        let (a, b) = tokio::join!(session.cleanup(), session.cleanup());
        a.unwrap();
        b.unwrap();

        assert_eq!(*peak.lock(), 1);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration_from_tasks() {
        let session = Session::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let s = session.clone();
            handles.push(tokio::spawn(async move {
                s.register(format!("task-{i}"), || async { Ok(()) });
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(session.len(), 16);
        session.cleanup().await.unwrap();
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_release_discards_without_running() {
        let session = Session::new();
        let ran = recorder();
        let r = ran.clone();
        session.register("never", move || async move {
            r.lock().push("ran".to_string());
            Ok(())
        });

        assert_eq!(session.release(), 1);
        session.cleanup().await.unwrap();
        assert!(ran.lock().is_empty());
    }
}
