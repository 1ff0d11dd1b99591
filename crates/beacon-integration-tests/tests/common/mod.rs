//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};

use beacon_bus::Handler;
use serde_json::Value;

/// Ordered record of what handlers observed.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Trace {
    entries: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Trace {
    /// Append one entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// Everything recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// A blocking handler that records its own name.
    pub fn recorder(&self, name: &'static str) -> Handler {
        let trace = self.clone();
        Handler::blocking(name, move |_: &Value| {
            trace.push(name);
            Ok(())
        })
    }

    /// A blocking handler that records every payload it receives.
    pub fn collector(&self, name: &'static str) -> Handler {
        let trace = self.clone();
        Handler::blocking(name, move |payload: &Value| {
            trace.push(payload.to_string());
            Ok(())
        })
    }
}
