//! Declarative handler registration.
//!
//! A [`HandlerSet`] collects `(event name, handler)` declarations at
//! bootstrap time. It is installed in one step with
//! [`EventBus::register_set`](crate::EventBus::register_set) or handed to a
//! [`BusHost`](crate::BusHost) before the bus exists.
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::Value;
//!
//! fn audit_signup(payload: &Value) -> anyhow::Result<()> {
//!     tracing::info!(%payload, "user signed up");
//!     Ok(())
//! }
//!
//! async fn send_welcome(payload: Arc<Value>) -> anyhow::Result<()> {
//!     let _email = payload["email"].as_str();
//!     Ok(())
//! }
//!
//! let set = beacon_bus::handler_set! {
//!     "user.created" => blocking audit_signup,
//!     "user.created" => suspending send_welcome,
//! };
//! assert_eq!(set.len(), 2);
//! ```

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BusResult;
use crate::handler::Handler;
use crate::registry::validate_registration;

/// One declared registration.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Event name to register under.
    pub event: String,
    /// Handler to register.
    pub handler: Handler,
}

/// An ordered collection of handler declarations.
#[derive(Debug, Clone, Default)]
pub struct HandlerSet {
    declarations: Vec<Declaration>,
}

impl HandlerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a handler.
    #[must_use]
    pub fn with_handler(mut self, event: impl Into<String>, handler: Handler) -> Self {
        self.declarations.push(Declaration {
            event: event.into(),
            handler,
        });
        self
    }

    /// Declare a blocking closure.
    #[must_use]
    pub fn on<F>(self, event: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.with_handler(event, Handler::blocking(name, f))
    }

    /// Declare an async closure.
    #[must_use]
    pub fn on_async<F, Fut>(self, event: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_handler(event, Handler::suspending(name, f))
    }

    /// Append every declaration of another set.
    pub fn extend(&mut self, other: HandlerSet) {
        self.declarations.extend(other.declarations);
    }

    /// Number of declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Iterate over the declarations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Declaration> {
        self.declarations.iter()
    }

    /// Check every declaration the way registration would, without
    /// registering anything.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidEventName`] or [`BusError::InvalidHandler`]
    /// for the first offending declaration.
    pub fn validate(&self) -> BusResult<()> {
        self.declarations
            .iter()
            .try_for_each(|d| validate_registration(&d.event, &d.handler))
    }
}

impl IntoIterator for HandlerSet {
    type Item = Declaration;
    type IntoIter = std::vec::IntoIter<Declaration>;

    fn into_iter(self) -> Self::IntoIter {
        self.declarations.into_iter()
    }
}

impl<'a> IntoIterator for &'a HandlerSet {
    type Item = &'a Declaration;
    type IntoIter = std::slice::Iter<'a, Declaration>;

    fn into_iter(self) -> Self::IntoIter {
        self.declarations.iter()
    }
}

/// Build a [`HandlerSet`] from named functions.
///
/// Each line is `"event.name" => blocking fn_name` or
/// `"event.name" => suspending fn_name`. The function name becomes the
/// handler name.
#[macro_export]
macro_rules! handler_set {
    (@add $set:expr, $event:expr, blocking, $func:ident) => {
        $set.on($event, stringify!($func), $func)
    };
    (@add $set:expr, $event:expr, suspending, $func:ident) => {
        $set.on_async($event, stringify!($func), $func)
    };
    ($($event:expr => $kind:ident $func:ident),* $(,)?) => {{
        let set = $crate::HandlerSet::new();
        $( let set = $crate::handler_set!(@add set, $event, $kind, $func); )*
        set
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::error::BusError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static AUDITED: AtomicUsize = AtomicUsize::new(0);
    static NOTIFIED: AtomicUsize = AtomicUsize::new(0);

    fn audit(_payload: &Value) -> anyhow::Result<()> {
        AUDITED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify(_payload: Arc<Value>) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        NOTIFIED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[test]
    fn test_builder_keeps_declaration_order() {
        let set = HandlerSet::new()
            .on("a", "first", |_| Ok(()))
            .on_async("b", "second", |_| async { anyhow::Ok(()) })
            .on("a", "third", |_| Ok(()));

        let names: Vec<_> = set.iter().map(|d| d.handler.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(set.len(), 3);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_extend() {
        let mut set = HandlerSet::new().on("a", "one", |_| Ok(()));
        set.extend(HandlerSet::new().on("b", "two", |_| Ok(())));

        let events: Vec<_> = (&set).into_iter().map(|d| d.event.as_str()).collect();
        assert_eq!(events, vec!["a", "b"]);
    }

    #[test]
    fn test_validate_rejects_blank_names() {
        let set = HandlerSet::new().on("", "x", |_| Ok(()));
        assert!(matches!(
            set.validate(),
            Err(BusError::InvalidEventName { .. })
        ));

        let set = HandlerSet::new().on("a", "", |_| Ok(()));
        assert!(matches!(
            set.validate(),
            Err(BusError::InvalidHandler { .. })
        ));
    }

    #[tokio::test]
    async fn test_macro_registers_named_functions() {
        let set = handler_set! {
            "user.created" => blocking audit,
            "user.created" => suspending notify,
        };

        let names: Vec<_> = set.iter().map(|d| d.handler.name().to_string()).collect();
        assert_eq!(names, vec!["audit", "notify"]);

        let bus = EventBus::new();
        let handles = bus.register_set(set).unwrap();
        assert_eq!(handles.len(), 2);

        bus.emit("user.created", json!({"id": 1})).await.unwrap();
        assert_eq!(AUDITED.load(Ordering::SeqCst), 1);
        assert_eq!(NOTIFIED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_macro() {
        let set = handler_set! {};
        assert!(set.is_empty());
    }
}
