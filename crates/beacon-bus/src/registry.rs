//! Handler registry: event name to ordered handler list.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::error::{BusError, BusResult};
use crate::handler::{Handler, HandlerEntry, HandlerId, RegistrationHandle};

/// Registry mapping event names to their handlers in registration order.
///
/// Mutation is serialized per event name by the map's shard locks. Reads
/// return snapshots, so dispatch never holds a lock while a handler runs.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Vec<HandlerEntry>>,
    max_per_event: usize,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_count", &self.handlers.len())
            .field("handler_count", &self.len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry with no per-event limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Create an empty registry capping the handlers per event name.
    ///
    /// A limit of `0` means unlimited.
    #[must_use]
    pub fn with_limit(max_per_event: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            max_per_event,
        }
    }

    /// Register a handler under an event name.
    ///
    /// Registering the same handler instance again under the same name is
    /// idempotent and returns the handle of the existing registration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidEventName`] for a blank name,
    /// [`BusError::InvalidHandler`] for a handler with a blank name, and
    /// [`BusError::HandlerLimitReached`] when the per-event cap is hit.
    pub fn register(
        &self,
        event: impl Into<String>,
        handler: Handler,
    ) -> BusResult<RegistrationHandle> {
        self.insert(event.into(), handler).map(|(handle, _)| handle)
    }

    /// Register a handler, also reporting whether a new entry was created.
    pub(crate) fn insert(
        &self,
        event: String,
        handler: Handler,
    ) -> BusResult<(RegistrationHandle, bool)> {
        validate_registration(&event, &handler)?;

        // Handler code and logging stay outside the shard lock.
        let handler_name = handler.name().to_string();
        let blocking = handler.is_blocking();
        let id = HandlerId::new();

        let existing = {
            let mut entries = self.handlers.entry(event.clone()).or_default();

            if let Some(existing) = entries
                .iter()
                .find(|entry| entry.handler.same_instance(&handler))
            {
                Some(existing.id)
            } else if self.max_per_event > 0 && entries.len() >= self.max_per_event {
                return Err(BusError::HandlerLimitReached {
                    event,
                    limit: self.max_per_event,
                });
            } else {
                entries.push(HandlerEntry { id, handler });
                None
            }
        };

        if let Some(existing) = existing {
            debug!(
                event = %event,
                handler_id = %existing,
                handler_name = %handler_name,
                "Handler already registered"
            );
            return Ok((RegistrationHandle::new(event, existing), false));
        }

        info!(
            event = %event,
            handler_id = %id,
            handler_name = %handler_name,
            blocking,
            "Handler registered"
        );
        Ok((RegistrationHandle::new(event, id), true))
    }

    /// Unregister the handler behind a handle.
    ///
    /// Returns `true` if it was found and removed. The event name is dropped
    /// once its last handler is gone.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        // Hold removed entries until the shard lock is released so a handler
        // whose drop touches the registry cannot deadlock.
        let removed = match self.handlers.entry(handle.event().to_string()) {
            Entry::Occupied(mut occupied) => {
                let position = occupied
                    .get()
                    .iter()
                    .position(|entry| entry.id == handle.id());
                let removed = position.map(|pos| occupied.get_mut().remove(pos));
                let emptied = occupied.get().is_empty().then(|| occupied.remove());
                (removed, emptied)
            },
            Entry::Vacant(_) => (None, None),
        };

        let found = removed.0.is_some();
        if found {
            info!(
                event = %handle.event(),
                handler_id = %handle.id(),
                "Handler unregistered"
            );
        }

        drop(removed);
        found
    }

    /// Whether the handle still refers to a registered handler.
    #[must_use]
    pub fn contains(&self, handle: &RegistrationHandle) -> bool {
        self.handlers
            .get(handle.event())
            .is_some_and(|entries| entries.iter().any(|entry| entry.id == handle.id()))
    }

    /// Snapshot of the handlers for an event name, in registration order.
    #[must_use]
    pub fn handlers_for(&self, event: &str) -> Vec<HandlerEntry> {
        self.handlers
            .get(event)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Event names that currently have handlers.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Total number of registered handlers across all names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.iter().map(|entries| entries.len()).sum()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Remove every handler. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();

        let mut removed = 0_usize;
        for name in names {
            // `remove` hands the entries back, so they drop outside the lock.
            if let Some((_, entries)) = self.handlers.remove(&name) {
                removed = removed.saturating_add(entries.len());
            }
        }

        debug!(removed, "All handlers cleared");
        removed
    }
}

/// Reject blank event names and unnamed handlers.
pub(crate) fn validate_registration(event: &str, handler: &Handler) -> BusResult<()> {
    if event.trim().is_empty() {
        return Err(BusError::InvalidEventName {
            name: event.to_string(),
        });
    }
    if handler.name().trim().is_empty() {
        return Err(BusError::invalid_handler(format!(
            "handler for '{event}' has an empty name"
        )));
    }
    Ok(())
}
