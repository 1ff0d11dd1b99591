//! Event bus: dispatches emissions to registered handlers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::FutureExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{BusConfig, DispatchMode};
use crate::error::{BusError, BusResult, HandlerExecutionError, HandlerFailure};
use crate::handler::{
    BlockingHandler, Handler, HandlerEntry, RegistrationHandle, SuspendingHandler,
};
use crate::registration::HandlerSet;
use crate::registry::HandlerRegistry;

/// Lifecycle state of an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Accepts registrations and emissions.
    Active,
    /// Shut down; the registry has been cleared.
    Stopped,
}

/// Summary of a successful emission.
#[derive(Debug, Clone)]
pub struct EmitReport {
    /// Unique ID of this emission.
    pub emission_id: Uuid,
    /// Event name.
    pub event: String,
    /// Number of handlers invoked.
    pub invoked: usize,
    /// Wall time spent dispatching, in milliseconds.
    pub duration_ms: u64,
}

impl EmitReport {
    /// Whether no handler was registered for the event.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.invoked == 0
    }
}

/// What happened while running one snapshot.
struct Outcome {
    completed: usize,
    failures: Vec<HandlerFailure>,
    cancelled: bool,
}

/// In-process event bus.
///
/// Handlers are registered under event names and invoked, in registration
/// order, for every emission of that name. Clones share the same registry
/// and lifecycle state.
///
/// **WARNING:** A handler that captures a clone of the bus it is registered
/// on forms an `Arc` cycle. The cycle is broken when the handler is
/// unregistered or the bus is stopped.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    registry: HandlerRegistry,
    config: BusConfig,
    stopped: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a new event bus with the given configuration.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: HandlerRegistry::with_limit(config.max_handlers_per_event),
                config,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// The bus configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        if self.inner.stopped.load(Ordering::Acquire) {
            BusState::Stopped
        } else {
            BusState::Active
        }
    }

    /// Whether the bus still accepts registrations and emissions.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == BusState::Active
    }

    fn ensure_active(&self) -> BusResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BusError::BusStopped)
        }
    }

    /// Register a handler under an event name.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::BusStopped`] after [`stop`](Self::stop), or any
    /// registration error from [`HandlerRegistry::register`].
    pub fn register(
        &self,
        event: impl Into<String>,
        handler: Handler,
    ) -> BusResult<RegistrationHandle> {
        self.insert(event.into(), handler).map(|(handle, _)| handle)
    }

    fn insert(&self, event: String, handler: Handler) -> BusResult<(RegistrationHandle, bool)> {
        self.ensure_active()?;
        let (handle, created) = self.inner.registry.insert(event, handler)?;

        // A stop that raced this registration has already cleared the
        // registry, so take the handler back out.
        if !self.is_active() {
            self.inner.registry.unregister(&handle);
            return Err(BusError::BusStopped);
        }

        Ok((handle, created))
    }

    /// Register a blocking closure.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn on<F>(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> BusResult<RegistrationHandle>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event, Handler::blocking(name, f))
    }

    /// Register an async closure.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn on_async<F, Fut>(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> BusResult<RegistrationHandle>
    where
        F: Fn(Arc<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(event, Handler::suspending(name, f))
    }

    /// Register every declaration of a handler set, in declaration order.
    ///
    /// Either all declarations are registered or none are.
    ///
    /// # Errors
    ///
    /// Returns the first registration error; declarations registered before
    /// it are rolled back.
    pub fn register_set(&self, set: HandlerSet) -> BusResult<Vec<RegistrationHandle>> {
        let mut handles = Vec::with_capacity(set.len());
        let mut created = Vec::new();

        for declaration in set {
            match self.insert(declaration.event, declaration.handler) {
                Ok((handle, is_new)) => {
                    if is_new {
                        created.push(handle.clone());
                    }
                    handles.push(handle);
                },
                Err(e) => {
                    // Only undo entries this call created; idempotent hits
                    // belong to an earlier registration.
                    for handle in &created {
                        self.inner.registry.unregister(handle);
                    }
                    return Err(e);
                },
            }
        }

        Ok(handles)
    }

    /// Unregister a handler. Returns `true` if it was still registered.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        self.inner.registry.unregister(handle)
    }

    /// Snapshot of the handlers currently registered for an event name.
    #[must_use]
    pub fn handlers_for(&self, event: &str) -> Vec<HandlerEntry> {
        self.inner.registry.handlers_for(event)
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Remove every handler while keeping the bus active.
    ///
    /// Returns how many handlers were removed. Later emissions are no-ops
    /// until new handlers are registered.
    pub fn clear_all(&self) -> usize {
        self.inner.registry.clear_all()
    }

    /// Stop the bus and clear its registry.
    ///
    /// Returns `true` if this call performed the transition. Further calls
    /// are no-ops.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        let removed = self.inner.registry.clear_all();
        info!(removed_handlers = removed, "Event bus stopped");
        true
    }

    /// Emit an event to every handler registered under `event`.
    ///
    /// Emitting to a name without handlers succeeds and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::HandlerExecution`] carrying every per-handler
    /// failure once all handlers have run, or [`BusError::BusStopped`] after
    /// [`stop`](Self::stop).
    pub async fn emit(&self, event: &str, payload: Value) -> BusResult<EmitReport> {
        self.dispatch(event, payload, None).await
    }

    /// Emit an event, stopping early when `cancel` fires.
    ///
    /// The token is checked before each handler and raced against each
    /// suspending handler. On cancellation the in-flight handler future is
    /// dropped and no further handlers run.
    ///
    /// In [`DispatchMode::Concurrent`] blocking handlers already handed to
    /// the blocking pool cannot be interrupted. They are awaited after the
    /// token fires and their failures are part of [`BusError::Cancelled`].
    /// Dropping the returned future instead detaches them.
    ///
    /// # Errors
    ///
    /// As for [`emit`](Self::emit), plus [`BusError::Cancelled`].
    pub async fn emit_with_cancel(
        &self,
        event: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> BusResult<EmitReport> {
        self.dispatch(event, payload, Some(cancel)).await
    }

    async fn dispatch(
        &self,
        event: &str,
        payload: Value,
        cancel: Option<&CancellationToken>,
    ) -> BusResult<EmitReport> {
        self.ensure_active()?;

        let emission_id = Uuid::new_v4();
        let started = Instant::now();
        let snapshot = self.inner.registry.handlers_for(event);

        if snapshot.is_empty() {
            debug!(event = %event, "No handlers registered for event");
            return Ok(EmitReport {
                emission_id,
                event: event.to_string(),
                invoked: 0,
                duration_ms: 0,
            });
        }

        debug!(
            event = %event,
            emission_id = %emission_id,
            handler_count = snapshot.len(),
            mode = %self.inner.config.dispatch_mode,
            "Emitting event"
        );

        let payload = Arc::new(payload);
        let outcome = match self.inner.config.dispatch_mode {
            DispatchMode::Sequential => {
                self.run_sequential(event, &snapshot, &payload, cancel)
                    .await
            },
            DispatchMode::Concurrent => {
                self.run_concurrent(event, &snapshot, &payload, cancel)
                    .await
            },
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if outcome.cancelled {
            warn!(
                event = %event,
                emission_id = %emission_id,
                completed = outcome.completed,
                handler_count = snapshot.len(),
                "Emission cancelled"
            );
            return Err(BusError::Cancelled {
                event: event.to_string(),
                completed: outcome.completed,
                failures: outcome.failures,
            });
        }

        if !outcome.failures.is_empty() {
            return Err(BusError::HandlerExecution {
                event: event.to_string(),
                invoked: snapshot.len(),
                failures: outcome.failures,
            });
        }

        debug!(
            event = %event,
            emission_id = %emission_id,
            handler_count = snapshot.len(),
            duration_ms,
            "Event emitted"
        );

        Ok(EmitReport {
            emission_id,
            event: event.to_string(),
            invoked: snapshot.len(),
            duration_ms,
        })
    }

    async fn run_sequential(
        &self,
        event: &str,
        snapshot: &[HandlerEntry],
        payload: &Arc<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Outcome {
        let catch_panics = self.inner.config.catch_panics;
        let mut failures = Vec::new();

        for (position, entry) in snapshot.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Outcome {
                    completed: position,
                    failures,
                    cancelled: true,
                };
            }

            trace!(
                event = %event,
                handler_id = %entry.id,
                handler_name = %entry.handler.name(),
                position,
                "Invoking handler"
            );

            let result = match &entry.handler {
                Handler::Blocking(handler) => {
                    invoke_blocking(handler.as_ref(), payload, catch_panics)
                },
                Handler::Suspending(handler) => {
                    let call =
                        invoke_suspending(handler.as_ref(), Arc::clone(payload), catch_panics);
                    let finished = match cancel {
                        Some(token) => tokio::select! {
                            biased;
                            () = token.cancelled() => None,
                            result = call => Some(result),
                        },
                        None => Some(call.await),
                    };
                    let Some(result) = finished else {
                        return Outcome {
                            completed: position,
                            failures,
                            cancelled: true,
                        };
                    };
                    result
                },
            };

            if let Err(error) = result {
                failures.push(record_failure(event, position, entry, error));
            }
        }

        Outcome {
            completed: snapshot.len(),
            failures,
            cancelled: false,
        }
    }

    async fn run_concurrent(
        &self,
        event: &str,
        snapshot: &[HandlerEntry],
        payload: &Arc<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Outcome {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Outcome {
                completed: 0,
                failures: Vec::new(),
                cancelled: true,
            };
        }

        let catch_panics = self.inner.config.catch_panics;
        let mut blocking = FuturesUnordered::new();
        let mut suspending = FuturesUnordered::new();

        for (position, entry) in snapshot.iter().enumerate() {
            let payload = Arc::clone(payload);
            match &entry.handler {
                Handler::Blocking(handler) => {
                    let join = tokio::task::spawn_blocking({
                        let handler = Arc::clone(handler);
                        move || handler.handle(&payload)
                    });
                    blocking.push(async move {
                        (position, join_blocking(join, catch_panics).await)
                    });
                },
                Handler::Suspending(handler) => {
                    suspending.push(async move {
                        let result =
                            invoke_suspending(handler.as_ref(), payload, catch_panics).await;
                        (position, result)
                    });
                },
            }
        }

        let mut completed = 0_usize;
        let mut failures = Vec::new();
        let mut cancelled = false;

        while !(blocking.is_empty() && suspending.is_empty()) {
            let next = tokio::select! {
                biased;
                () = wait_cancelled(cancel) => None,
                Some(done) = blocking.next(), if !blocking.is_empty() => Some(done),
                Some(done) = suspending.next(), if !suspending.is_empty() => Some(done),
            };

            let Some((position, result)) = next else {
                cancelled = true;
                break;
            };

            completed = completed.saturating_add(1);
            if let Err(error) = result
                && let Some(entry) = snapshot.get(position)
            {
                failures.push(record_failure(event, position, entry, error));
            }
        }

        if cancelled {
            // Suspending handlers stop here. Blocking ones keep running on
            // the pool, so wait for them and keep their results.
            drop(suspending);
            while let Some((position, result)) = blocking.next().await {
                completed = completed.saturating_add(1);
                if let Err(error) = result
                    && let Some(entry) = snapshot.get(position)
                {
                    failures.push(record_failure(event, position, entry, error));
                }
            }
        }

        failures.sort_by_key(|failure: &HandlerFailure| failure.position);

        Outcome {
            completed,
            failures,
            cancelled,
        }
    }
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn invoke_blocking(
    handler: &dyn BlockingHandler,
    payload: &Value,
    catch_panics: bool,
) -> Result<(), HandlerExecutionError> {
    if !catch_panics {
        return handler.handle(payload).map_err(HandlerExecutionError::Failed);
    }

    match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(payload))) {
        Ok(result) => result.map_err(HandlerExecutionError::Failed),
        Err(panic) => Err(HandlerExecutionError::from_panic(&*panic)),
    }
}

async fn invoke_suspending(
    handler: &dyn SuspendingHandler,
    payload: Arc<Value>,
    catch_panics: bool,
) -> Result<(), HandlerExecutionError> {
    let call = handler.handle(payload);

    if !catch_panics {
        return call.await.map_err(HandlerExecutionError::Failed);
    }

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result.map_err(HandlerExecutionError::Failed),
        Err(panic) => Err(HandlerExecutionError::from_panic(&*panic)),
    }
}

async fn join_blocking(
    join: tokio::task::JoinHandle<anyhow::Result<()>>,
    catch_panics: bool,
) -> Result<(), HandlerExecutionError> {
    match join.await {
        Ok(result) => result.map_err(HandlerExecutionError::Failed),
        Err(join) if join.is_panic() => {
            let panic = join.into_panic();
            if !catch_panics {
                std::panic::resume_unwind(panic);
            }
            Err(HandlerExecutionError::from_panic(&*panic))
        },
        Err(join) => Err(HandlerExecutionError::Failed(anyhow::Error::new(join))),
    }
}

fn record_failure(
    event: &str,
    position: usize,
    entry: &HandlerEntry,
    error: HandlerExecutionError,
) -> HandlerFailure {
    warn!(
        event = %event,
        handler_id = %entry.id,
        handler_name = %entry.handler.name(),
        position,
        error = %error,
        "Handler failed"
    );

    HandlerFailure {
        handler_id: entry.id,
        handler_name: entry.handler.name().to_string(),
        position,
        error,
    }
}
