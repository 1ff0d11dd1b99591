//! Application-owned lifecycle around a single [`EventBus`].
//!
//! The host is created by the composition root, collects handler sets while
//! the application boots, builds the bus on [`BusHost::on_start`] and tears
//! it down on [`BusHost::on_stop`]. Components get the bus from
//! [`BusHost::bus`] or receive a cloned [`EventBus`] directly.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::bus::EventBus;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::handler::RegistrationHandle;
use crate::registration::HandlerSet;

/// Lifecycle status of a [`BusHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// Not started yet. Declarations are queued.
    Idle,
    /// The bus exists and accepts registrations and emissions.
    Running,
    /// The bus was stopped. It cannot be started again.
    Stopped,
}

#[derive(Debug)]
enum HostState {
    Idle,
    Running(EventBus),
    Stopped(EventBus),
}

#[derive(Debug)]
struct HostInner {
    state: HostState,
    pending: Vec<HandlerSet>,
}

/// Owns the bus instance for the lifetime of an application.
#[derive(Debug)]
pub struct BusHost {
    config: BusConfig,
    inner: Mutex<HostInner>,
}

impl Default for BusHost {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl BusHost {
    /// Create an idle host that will build its bus from `config`.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HostInner {
                state: HostState::Idle,
                pending: Vec::new(),
            }),
        }
    }

    /// Lock the host state, first catching up with a bus that was stopped
    /// through one of its clones.
    fn lock(&self) -> MutexGuard<'_, HostInner> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let HostState::Running(bus) = &inner.state
            && !bus.is_active()
        {
            debug!("Event bus was stopped outside the host");
            let stopped = bus.clone();
            inner.state = HostState::Stopped(stopped);
        }
        inner
    }

    /// Configuration the bus is (or will be) built from.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> HostStatus {
        match self.lock().state {
            HostState::Idle => HostStatus::Idle,
            HostState::Running(_) => HostStatus::Running,
            HostState::Stopped(_) => HostStatus::Stopped,
        }
    }

    /// Number of declarations waiting for [`on_start`](Self::on_start).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.iter().map(HandlerSet::len).sum()
    }

    /// Build the bus and install every pending handler set.
    ///
    /// Calling this again while running returns the existing bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::BusStopped`] once the host has been stopped, or
    /// the first registration error of the pending sets. On error nothing is
    /// installed, the host stays idle and the pending sets are kept.
    pub fn on_start(&self) -> BusResult<EventBus> {
        let mut inner = self.lock();

        match &inner.state {
            HostState::Running(bus) => {
                debug!("Event bus already started");
                return Ok(bus.clone());
            },
            HostState::Stopped(_) => return Err(BusError::BusStopped),
            HostState::Idle => {},
        }

        let mut declarations = HandlerSet::new();
        for set in &inner.pending {
            declarations.extend(set.clone());
        }

        // Pending sets still own every handler, so a rollback here never
        // runs a handler's drop while the lock is held.
        let bus = EventBus::with_config(self.config.clone());
        let installed = bus.register_set(declarations)?.len();

        inner.pending.clear();
        inner.state = HostState::Running(bus.clone());

        info!(
            handler_count = installed,
            dispatch_mode = %self.config.dispatch_mode,
            "Event bus started"
        );
        Ok(bus)
    }

    /// Stop the bus and clear its registry.
    ///
    /// Returns `true` if this call stopped a running bus. Before start and
    /// after stop this does nothing.
    pub fn on_stop(&self) -> bool {
        let bus = {
            let mut inner = self.lock();
            let HostState::Running(bus) = &inner.state else {
                return false;
            };
            let bus = bus.clone();
            inner.state = HostState::Stopped(bus.clone());
            bus
        };

        // Clearing the registry drops handlers, which may call back into
        // the host.
        bus.stop()
    }

    /// The bus owned by this host.
    ///
    /// Every call returns a handle to the same instance. After
    /// [`on_stop`](Self::on_stop) that instance is stopped and rejects
    /// further activity.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotInitialized`] before [`on_start`](Self::on_start).
    pub fn bus(&self) -> BusResult<EventBus> {
        match &self.lock().state {
            HostState::Idle => Err(BusError::NotInitialized),
            HostState::Running(bus) | HostState::Stopped(bus) => Ok(bus.clone()),
        }
    }

    /// Declare a handler set.
    ///
    /// Before start the set is validated and queued, and an empty handle list
    /// is returned. While running it is registered immediately.
    ///
    /// # Errors
    ///
    /// Returns validation or registration errors, or
    /// [`BusError::BusStopped`] after stop.
    pub fn declare(&self, set: HandlerSet) -> BusResult<Vec<RegistrationHandle>> {
        set.validate()?;

        let bus = {
            let mut inner = self.lock();
            match &inner.state {
                HostState::Idle => {
                    debug!(declarations = set.len(), "Handler set queued");
                    inner.pending.push(set);
                    return Ok(Vec::new());
                },
                HostState::Running(bus) => bus.clone(),
                HostState::Stopped(_) => return Err(BusError::BusStopped),
            }
        };

        // A rolled back set drops its handlers, so register unlocked.
        bus.register_set(set)
    }
}
