//! Handler traits and the polymorphic [`Handler`] value.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Trait for handlers that run to completion inline.
///
/// Blocking handlers execute on the emitting task, so they should return
/// quickly. Slow work belongs in a [`SuspendingHandler`].
pub trait BlockingHandler: Send + Sync {
    /// Handle one emission.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failure of this handler; the remaining
    /// handlers of the emission still run.
    fn handle(&self, payload: &Value) -> anyhow::Result<()>;

    /// Optional name for diagnostics.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Trait for handlers that may suspend before completing.
#[async_trait]
pub trait SuspendingHandler: Send + Sync {
    /// Handle one emission.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failure of this handler; the remaining
    /// handlers of the emission still run.
    async fn handle(&self, payload: Arc<Value>) -> anyhow::Result<()>;

    /// Optional name for diagnostics.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// A registered unit of behavior.
///
/// Cloning a `Handler` is cheap and keeps its identity: two clones are the
/// same handler as far as the registry is concerned.
#[derive(Clone)]
pub enum Handler {
    /// Runs inline.
    Blocking(Arc<dyn BlockingHandler>),
    /// Awaited before the next handler starts.
    Suspending(Arc<dyn SuspendingHandler>),
}

impl Handler {
    /// Wrap a blocking closure.
    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(FnHandler::new(name, f)))
    }

    /// Wrap an async closure.
    pub fn suspending<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Suspending(Arc::new(AsyncFnHandler::new(name, f)))
    }

    /// Diagnostic name of the handler.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Blocking(h) => h.name(),
            Self::Suspending(h) => h.name(),
        }
    }

    /// Whether this handler runs inline.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }

    /// Whether both values refer to the same handler instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Blocking(a), Self::Blocking(b)) => Arc::ptr_eq(a, b),
            (Self::Suspending(a), Self::Suspending(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_blocking() {
            "blocking"
        } else {
            "suspending"
        };
        f.debug_struct("Handler")
            .field("name", &self.name())
            .field("kind", &kind)
            .finish()
    }
}

impl<H: BlockingHandler + 'static> From<Arc<H>> for Handler {
    fn from(handler: Arc<H>) -> Self {
        Self::Blocking(handler)
    }
}

/// Closure adapter for [`BlockingHandler`].
pub struct FnHandler<F>
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync,
{
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync,
{
    /// Create a new closure handler.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> BlockingHandler for FnHandler<F>
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, payload: &Value) -> anyhow::Result<()> {
        (self.f)(payload)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Closure adapter for [`SuspendingHandler`].
pub struct AsyncFnHandler<F> {
    name: String,
    f: F,
}

impl<F> AsyncFnHandler<F> {
    /// Create a new async closure handler.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> SuspendingHandler for AsyncFnHandler<F>
where
    F: Fn(Arc<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Arc<Value>) -> anyhow::Result<()> {
        (self.f)(payload).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Create a new handler ID.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by registration, used to unregister later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    event: String,
    id: HandlerId,
}

impl RegistrationHandle {
    pub(crate) fn new(event: impl Into<String>, id: HandlerId) -> Self {
        Self {
            event: event.into(),
            id,
        }
    }

    /// Event name the handler was registered under.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Identity of the registered handler.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }
}

/// A handler as stored in the registry.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    /// Handler identity.
    pub id: HandlerId,
    /// The handler itself.
    pub handler: Handler,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        count: AtomicUsize,
    }

    impl BlockingHandler for Counter {
        fn handle(&self, _payload: &Value) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_default_name() {
        let handler = Handler::from(Arc::new(Counter {
            count: AtomicUsize::new(0),
        }));
        assert_eq!(handler.name(), "anonymous");
        assert!(handler.is_blocking());
    }

    #[test]
    fn test_same_instance() {
        let a = Handler::blocking("a", |_| Ok(()));
        let b = Handler::blocking("a", |_| Ok(()));

        assert!(a.same_instance(&a.clone()));
        assert!(!a.same_instance(&b));
    }

    #[tokio::test]
    async fn test_closure_adapters() {
        let blocking = Handler::blocking("sync", |p| {
            anyhow::ensure!(p["ok"] == true, "not ok");
            Ok(())
        });
        let suspending = Handler::suspending("async", |p: Arc<Value>| async move {
            anyhow::ensure!(p["ok"] == true, "not ok");
            anyhow::Ok(())
        });

        assert_eq!(blocking.name(), "sync");
        assert_eq!(suspending.name(), "async");
        assert!(!suspending.is_blocking());

        let good = serde_json::json!({"ok": true});
        let bad = serde_json::json!({"ok": false});

        let Handler::Blocking(h) = &blocking else {
            panic!("expected blocking handler");
        };
        assert!(h.handle(&good).is_ok());
        assert!(h.handle(&bad).is_err());

        let Handler::Suspending(h) = &suspending else {
            panic!("expected suspending handler");
        };
        assert!(h.handle(Arc::new(good)).await.is_ok());
        assert!(h.handle(Arc::new(bad)).await.is_err());
    }

    #[test]
    fn test_debug_format() {
        let handler = Handler::suspending("notify", |_| async { anyhow::Ok(()) });
        let debug = format!("{handler:?}");
        assert!(debug.contains("notify"));
        assert!(debug.contains("suspending"));
    }
}
