//! Session controllers: the UI-facing drivers of the upload and chat services.
//!
//! ARCHITECTURE
//! ============
//! A controller owns a [`ServiceSlot`](crate::services::ServiceSlot), a state
//! value published through `tokio::sync::watch`, and the bookkeeping below.
//! Each operation (one upload batch or one chat turn) gets its own
//! [`CancellationToken`]; starting the next operation or unmounting cancels
//! it, which stops its timers and makes its late events no-ops.
//!
//! ```text
//!   Idle ─► Connecting ─► Connected ─► Busy ─► Draining ─► Disconnected
//!              │ retry (2^n s, capped)          │ grace delay, then
//!              └─► Disconnected on exhaustion   └─ slot reset
//! ```
//!
//! Service callbacks hold a `Weak` reference to the controller so the
//! service stored inside the controller never keeps it alive.

pub mod chat;
pub mod upload;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{SessionError, TransportError};
use crate::net::{RetryPolicy, Transport};
use crate::notify::{Level, Notifier};
use crate::services::{ServiceSlot, SessionService};

pub use chat::ChatController;
pub use upload::UploadController;

/// Shown when the controller gives up connecting.
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to connect to the server. Please try again later.";

/// Controller timing and completion knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub safety_timeout: Duration,
    pub disconnect_grace: Duration,
    pub last_file_shortcut: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retry: config.connect_retry,
            safety_timeout: config.safety_timeout,
            disconnect_grace: config.disconnect_grace,
            last_file_shortcut: config.last_file_shortcut,
        }
    }
}

/// Connect `transport`, retrying with `policy` until it opens, the retries
/// run out, or `cancel` fires.
///
/// # Errors
///
/// [`SessionError::Connect`] carrying the last transport failure, or
/// [`TransportError::Cancelled`] as its source when `cancel` fired first.
pub async fn connect_with_retry(
    transport: &Transport,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let mut retry = 0;
    loop {
        let error = tokio::select! {
            () = cancel.cancelled() => TransportError::Cancelled,
            result = transport.connect() => match result {
                Ok(()) => return Ok(()),
                Err(error) => error,
            },
        };
        if error == TransportError::Cancelled || retry >= policy.max_retries {
            return Err(SessionError::Connect {
                attempts: retry + 1,
                source: error,
            });
        }

        retry += 1;
        let delay = policy.delay(retry);
        warn!(
            endpoint = transport.endpoint(),
            retry,
            delay_ms = delay.as_millis(),
            error = %error,
            "session: connect failed, retrying"
        );
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(SessionError::Connect {
                    attempts: retry,
                    source: TransportError::Cancelled,
                });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Handle to one running operation.
#[derive(Clone, Debug)]
struct Operation {
    epoch: u64,
    token: CancellationToken,
}

/// Busy flag, connection ownership and the running operation.
#[derive(Default)]
struct Lifecycle {
    busy: bool,
    /// Set once this controller opened a connection it must close on unmount.
    maintain_connection: bool,
    epoch: u64,
    operation: Option<CancellationToken>,
}

impl Lifecycle {
    /// Claim the controller for a new operation, cancelling the previous one.
    fn begin(&mut self) -> Result<Operation, SessionError> {
        if self.busy {
            return Err(SessionError::Busy);
        }
        if let Some(previous) = self.operation.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.busy = true;
        self.maintain_connection = true;
        self.epoch += 1;
        self.operation = Some(token.clone());
        Ok(Operation {
            epoch: self.epoch,
            token,
        })
    }

    fn is_current(&self, operation: &Operation) -> bool {
        self.epoch == operation.epoch && !operation.token.is_cancelled()
    }
}

/// Pieces shared by both controllers.
struct Core<S: SessionService> {
    slot: Arc<ServiceSlot<S>>,
    token: String,
    options: SessionOptions,
    notifier: Arc<dyn Notifier>,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: SessionService> Core<S> {
    fn new(slot: Arc<ServiceSlot<S>>, token: String, options: SessionOptions, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            slot,
            token,
            options,
            notifier,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, level: Level, title: &str, message: &str) {
        self.notifier.notify(level, title, message);
    }

    /// Release the busy flag if `operation` still owns the controller.
    fn finish(&self, operation: &Operation) -> bool {
        let mut lifecycle = self.lifecycle();
        if !lifecycle.is_current(operation) || !lifecycle.busy {
            return false;
        }
        lifecycle.busy = false;
        true
    }

    /// Close the connection if this controller still owns one.
    fn release_connection(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle();
            if !lifecycle.maintain_connection {
                return false;
            }
            lifecycle.maintain_connection = false;
        }
        self.slot.reset_instance();
        true
    }

    /// Cancel the running operation and close the connection exactly once.
    fn unmount(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle();
            if let Some(operation) = lifecycle.operation.take() {
                operation.cancel();
            }
            lifecycle.busy = false;
        }
        let released = self.release_connection();
        if released {
            info!("session: unmounted, connection closed");
        }
        released
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
