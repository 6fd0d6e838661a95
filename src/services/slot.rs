//! Owned replacement for the per-feature singleton accessor.
//!
//! A [`ServiceSlot`] holds at most one live service. `get_instance` builds it
//! on first use for the given auth token and returns the same instance until
//! `reset_instance` disconnects and discards it. Re-authenticating with a new
//! token therefore requires a reset first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::SessionError;
use crate::net::Transport;

/// A feature service that owns one transport.
pub trait SessionService: Send + Sync + 'static {
    fn transport(&self) -> &Transport;
}

type Factory<S> = Box<dyn Fn(&str) -> Result<S, SessionError> + Send + Sync>;

pub struct ServiceSlot<S> {
    factory: Factory<S>,
    current: Mutex<Option<Arc<S>>>,
}

impl<S: SessionService> ServiceSlot<S> {
    pub fn new(factory: impl Fn(&str) -> Result<S, SessionError> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            current: Mutex::new(None),
        }
    }

    /// Return the live instance, building one bound to `token` if none exists.
    ///
    /// # Errors
    ///
    /// Propagates the factory error (for example an unusable base URL).
    pub fn get_instance(&self, token: &str) -> Result<Arc<S>, SessionError> {
        let mut current = self.lock();
        if let Some(service) = current.as_ref() {
            return Ok(Arc::clone(service));
        }
        let service = Arc::new((self.factory)(token)?);
        debug!(endpoint = service.transport().endpoint(), "service: created");
        *current = Some(Arc::clone(&service));
        Ok(service)
    }

    /// The live instance, if any, without creating one.
    #[must_use]
    pub fn current(&self) -> Option<Arc<S>> {
        self.lock().clone()
    }

    /// Disconnect and discard the live instance. Returns whether one existed.
    pub fn reset_instance(&self) -> bool {
        let Some(service) = self.lock().take() else {
            return false;
        };
        service.transport().disconnect();
        debug!(endpoint = service.transport().endpoint(), "service: reset");
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<S>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "slot_test.rs"]
mod tests;
