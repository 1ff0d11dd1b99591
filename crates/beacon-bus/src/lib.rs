//! Beacon Bus - in-process publish/subscribe for application events.
//!
//! This crate provides:
//! - A registry mapping event names to ordered handler lists
//! - An async dispatcher that runs every matching handler per emission
//! - Blocking and suspending handler variants behind one [`Handler`] type
//! - Declarative registration through [`HandlerSet`] and [`handler_set!`]
//! - A lifecycle host ([`BusHost`]) owned by the application
//!
//! # Architecture
//!
//! Handlers are registered under an event name. Emitting an event takes a
//! snapshot of that name's handlers and runs them in registration order,
//! awaiting each suspending handler before starting the next. A failing or
//! panicking handler never prevents the others from running; failures are
//! collected and returned together once the emission finishes.
//!
//! # Example
//!
//! ```rust
//! use beacon_bus::{EventBus, BusError};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), BusError> {
//! let bus = EventBus::new();
//!
//! bus.on("user.created", "audit", |payload| {
//!     println!("new user: {payload}");
//!     Ok(())
//! })?;
//!
//! bus.on_async("user.created", "welcome", |payload| async move {
//!     let _email = payload["email"].as_str();
//!     anyhow::Ok(())
//! })?;
//!
//! let report = bus.emit("user.created", json!({"email": "a@b.c"})).await?;
//! assert_eq!(report.invoked, 2);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod prelude;

mod bus;
mod error;
mod handler;
mod host;
mod registration;
mod registry;

pub use bus::{BusState, EmitReport, EventBus};
pub use config::{BusConfig, ConfigError, ConfigResult, DispatchMode};
pub use error::{BusError, BusResult, HandlerExecutionError, HandlerFailure};
pub use handler::{
    AsyncFnHandler, BlockingHandler, FnHandler, Handler, HandlerEntry, HandlerId,
    RegistrationHandle, SuspendingHandler,
};
pub use host::{BusHost, HostStatus};
pub use registration::{Declaration, HandlerSet};
pub use registry::HandlerRegistry;

/// Re-exported so callers can cancel emissions without a direct dependency.
pub use tokio_util::sync::CancellationToken;
