//! Prelude module - commonly used types for convenient import.
//!
//! Use `use beacon_bus::prelude::*;` to import all essential types.

// Bus and lifecycle
pub use crate::{BusHost, BusState, EmitReport, EventBus, HostStatus};

// Handlers
pub use crate::{BlockingHandler, Handler, HandlerSet, RegistrationHandle, SuspendingHandler};

// Configuration
pub use crate::{BusConfig, DispatchMode};

// Errors
pub use crate::{BusError, BusResult, HandlerExecutionError, HandlerFailure};

pub use crate::CancellationToken;
