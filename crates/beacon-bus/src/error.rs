//! Error types for the event bus.

use thiserror::Error;

use crate::handler::HandlerId;

/// Errors that can occur while registering handlers or emitting events.
#[derive(Debug, Error)]
pub enum BusError {
    /// The handler was rejected at registration time.
    #[error("invalid handler: {reason}")]
    InvalidHandler {
        /// Why the handler was rejected.
        reason: String,
    },

    /// The event name is empty or blank.
    #[error("invalid event name: {name:?}")]
    InvalidEventName {
        /// The rejected name.
        name: String,
    },

    /// The configured per-event handler cap was reached.
    #[error("handler limit reached for event '{event}' (limit {limit})")]
    HandlerLimitReached {
        /// Event name.
        event: String,
        /// Configured limit.
        limit: usize,
    },

    /// One or more handlers failed during an emission.
    #[error("{} of {invoked} handler(s) failed for event '{event}'", failures.len())]
    HandlerExecution {
        /// Event name.
        event: String,
        /// Number of handlers that were invoked.
        invoked: usize,
        /// Per-handler failures, in registration order.
        failures: Vec<HandlerFailure>,
    },

    /// The emission was cancelled before every handler ran.
    #[error("emission of '{event}' cancelled after {completed} handler(s)")]
    Cancelled {
        /// Event name.
        event: String,
        /// Number of handlers that finished before cancellation.
        completed: usize,
        /// Failures observed before cancellation.
        failures: Vec<HandlerFailure>,
    },

    /// The bus has been stopped.
    #[error("event bus is stopped")]
    BusStopped,

    /// The bus has not been started by its host yet.
    #[error("event bus is not initialized")]
    NotInitialized,
}

impl BusError {
    /// Create an invalid handler error.
    #[must_use]
    pub fn invalid_handler(reason: impl Into<String>) -> Self {
        Self::InvalidHandler {
            reason: reason.into(),
        }
    }

    /// Whether this error reports handler failures from an emission.
    #[must_use]
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::HandlerExecution { .. })
    }

    /// Whether this error reports a cancelled emission.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Per-handler failures carried by this error, if any.
    #[must_use]
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Self::HandlerExecution { failures, .. } | Self::Cancelled { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Why a single handler invocation failed.
#[derive(Debug, Error)]
pub enum HandlerExecutionError {
    /// The handler returned an error.
    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic message, when it was a string.
        message: String,
    },
}

impl HandlerExecutionError {
    /// Build a panic error from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

/// A failure recorded for one handler during an emission.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Identity of the failing handler.
    pub handler_id: HandlerId,
    /// Diagnostic name of the failing handler.
    pub handler_name: String,
    /// Position of the handler in the emission snapshot.
    pub position: usize,
    /// What went wrong.
    pub error: HandlerExecutionError,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler '{}' ({}) at position {}: {}",
            self.handler_name, self.handler_id, self.position, self.error
        )
    }
}
