//! Upload controller: one batch at a time, per-file progress, auto-disconnect.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use wire::UploadProgress;

use super::{CONNECT_FAILED_MESSAGE, Core, Operation, SessionOptions, connect_with_retry};
use crate::error::{SessionError, ValidationError};
use crate::notify::{Level, Notifier};
use crate::services::{Fault, ServiceSlot, SessionService, UploadService};
use crate::state::{SessionPhase, UploadState};

enum Batch {
    Paths(Vec<PathBuf>),
    Bytes(Vec<(String, Vec<u8>)>),
}

impl Batch {
    fn is_empty(&self) -> bool {
        match self {
            Self::Paths(paths) => paths.is_empty(),
            Self::Bytes(files) => files.is_empty(),
        }
    }
}

/// Drives [`UploadService`] for one user and publishes [`UploadState`].
///
/// Dropping the controller behaves like [`UploadController::unmount`].
pub struct UploadController {
    inner: Arc<Inner>,
}

struct Inner {
    core: Core<UploadService>,
    user_id: String,
    state: watch::Sender<UploadState>,
}

impl UploadController {
    pub fn new(
        slot: Arc<ServiceSlot<UploadService>>,
        token: impl Into<String>,
        user_id: impl Into<String>,
        options: SessionOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(UploadState::default());
        Self {
            inner: Arc::new(Inner {
                core: Core::new(slot, token.into(), options, notifier),
                user_id: user_id.into(),
                state,
            }),
        }
    }

    /// Receiver that observes every state snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> UploadState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.core.lifecycle().busy
    }

    /// Whether this controller owns an open (or opening) connection.
    #[must_use]
    pub fn maintains_connection(&self) -> bool {
        self.inner.core.lifecycle().maintain_connection
    }

    /// Read `paths` and upload them as one batch.
    ///
    /// Returns the number of files sent. Progress arrives through
    /// [`UploadController::subscribe`].
    ///
    /// # Errors
    ///
    /// [`SessionError::Busy`] while a batch runs, [`ValidationError::NoFiles`]
    /// for an empty list, otherwise the failure that ended the batch (already
    /// reported through the notifier).
    pub async fn upload_files<P: Into<PathBuf> + Clone>(&self, paths: &[P]) -> Result<usize, SessionError> {
        let paths = paths.iter().cloned().map(Into::into).collect();
        self.inner.run(Batch::Paths(paths)).await
    }

    /// Upload in-memory `(filename, bytes)` pairs as one batch.
    ///
    /// # Errors
    ///
    /// See [`UploadController::upload_files`].
    pub async fn upload_bytes(&self, files: Vec<(String, Vec<u8>)>) -> Result<usize, SessionError> {
        self.inner.run(Batch::Bytes(files)).await
    }

    /// Cancel the running batch and close the connection if this controller
    /// opened one. Safe to call repeatedly; only the first call disconnects.
    pub fn unmount(&self) -> bool {
        let released = self.inner.core.unmount();
        if released {
            self.inner.set_phase(SessionPhase::Disconnected);
        }
        released
    }
}

impl Drop for UploadController {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl Inner {
    async fn run(self: &Arc<Self>, batch: Batch) -> Result<usize, SessionError> {
        if batch.is_empty() {
            let error = SessionError::from(ValidationError::NoFiles);
            self.core.notify(Level::Warning, "No Files", &error.to_string());
            return Err(error);
        }
        let begun = self.core.lifecycle().begin();
        let operation = match begun {
            Ok(operation) => operation,
            Err(error) => {
                self.core
                    .notify(Level::Warning, "Upload In Progress", "Wait for the current upload to finish.");
                return Err(error);
            }
        };

        match self.drive(&operation, batch).await {
            Ok(count) => Ok(count),
            Err(error) => {
                self.abort(&operation, &error);
                Err(error)
            }
        }
    }

    async fn drive(self: &Arc<Self>, operation: &Operation, batch: Batch) -> Result<usize, SessionError> {
        let service = self.core.slot.get_instance(&self.core.token)?;
        self.install_callbacks(&service, operation);

        service.clear_staged();
        match batch {
            Batch::Paths(paths) => {
                for path in paths {
                    service.add_file(path).await?;
                }
            }
            Batch::Bytes(files) => {
                for (filename, bytes) in files {
                    service.add_file_bytes(filename, &bytes);
                }
            }
        }

        let connected = service.is_connected();
        let filenames = service.staged_filenames();
        self.state.send_modify(|state| {
            state.start_batch(filenames);
            state.phase = if connected {
                SessionPhase::Connected
            } else {
                SessionPhase::Connecting
            };
        });
        if !connected {
            connect_with_retry(service.transport(), self.core.options.retry, &operation.token).await?;
            self.set_phase(SessionPhase::Connected);
        }

        self.set_phase(SessionPhase::Busy);
        self.arm_safety_timer(operation);
        let count = service.start_upload(&self.user_id).await?;
        info!(user_id = %self.user_id, files = count, "upload: batch started");
        Ok(count)
    }

    fn install_callbacks(self: &Arc<Self>, service: &UploadService, operation: &Operation) {
        let weak = Arc::downgrade(self);
        let op = operation.clone();
        service.on_progress(move |progress| {
            if let Some(inner) = weak.upgrade() {
                inner.on_progress(&op, progress);
            }
        });

        let weak = Arc::downgrade(self);
        let op = operation.clone();
        service.on_error(move |fault| {
            if let Some(inner) = weak.upgrade() {
                inner.on_fault(&op, fault);
            }
        });
    }

    fn on_progress(self: &Arc<Self>, operation: &Operation, progress: &UploadProgress) {
        let busy = {
            let lifecycle = self.core.lifecycle();
            if !lifecycle.is_current(operation) {
                return;
            }
            lifecycle.busy
        };

        let shortcut = self.core.options.last_file_shortcut;
        let mut complete = false;
        let applied = self.state.send_if_modified(|state| {
            let applied = state.apply_progress(progress);
            complete = busy && applied && state.batch_complete(shortcut);
            applied
        });
        if !applied {
            debug!(filename = %progress.filename, status = ?progress.status, "upload: progress ignored");
        }
        if complete {
            self.complete(operation);
        }
    }

    fn on_fault(self: &Arc<Self>, operation: &Operation, fault: &Fault) {
        let busy = {
            let lifecycle = self.core.lifecycle();
            lifecycle.is_current(operation) && lifecycle.busy
        };
        // While connecting, the retry loop owns transport failures.
        if !busy || self.state.borrow().phase != SessionPhase::Busy || !fault.is_fatal() {
            warn!(error = %fault, "upload: transport reported an error");
            return;
        }
        if !self.core.finish(operation) {
            return;
        }

        let message = fault.to_string();
        self.state.send_modify(|state| {
            state.fail(message.clone());
            state.phase = SessionPhase::Draining;
        });
        self.core.notify(Level::Error, "Upload Error", &message);
        self.schedule_disconnect(operation);
    }

    fn complete(self: &Arc<Self>, operation: &Operation) {
        if !self.core.finish(operation) {
            return;
        }

        let mut summary = (0, 0);
        self.state.send_modify(|state| {
            state.finish();
            state.phase = SessionPhase::Draining;
            summary = (state.files.len(), state.failed_count());
        });
        let (total, failed) = summary;
        info!(files = total, failed, "upload: batch complete");
        if failed == 0 {
            self.core
                .notify(Level::Success, "Upload Complete", &format!("{total} file(s) uploaded."));
        } else {
            self.core.notify(
                Level::Warning,
                "Upload Finished With Errors",
                &format!("{failed} of {total} file(s) failed."),
            );
        }
        self.schedule_disconnect(operation);
    }

    /// End a batch that failed before or while sending.
    fn abort(&self, operation: &Operation, error: &SessionError) {
        if !self.core.finish(operation) {
            return;
        }

        let (title, message) = match error {
            SessionError::Connect { .. } => ("Connection Error", CONNECT_FAILED_MESSAGE.to_owned()),
            other => ("Upload Error", other.to_string()),
        };
        warn!(error = %error, "upload: batch aborted");
        operation.token.cancel();
        self.core.release_connection();
        self.state.send_modify(|state| {
            state.fail(message.clone());
            state.phase = SessionPhase::Disconnected;
        });
        self.core.notify(Level::Error, title, &message);
    }

    fn arm_safety_timer(self: &Arc<Self>, operation: &Operation) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let op = operation.clone();
        let timeout = self.core.options.safety_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = op.token.cancelled() => return,
                () = tokio::time::sleep(timeout) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.on_safety_timeout(&op);
            }
        });
    }

    fn on_safety_timeout(self: &Arc<Self>, operation: &Operation) {
        {
            let lifecycle = self.core.lifecycle();
            if !lifecycle.is_current(operation) || !lifecycle.busy {
                return;
            }
        }

        let shortcut = self.core.options.last_file_shortcut;
        let mut forced = 0;
        let mut complete = false;
        self.state.send_if_modified(|state| {
            forced = state.force_complete_stalled();
            complete = state.batch_complete(shortcut);
            forced > 0
        });
        warn!(forced, complete, "upload: safety timeout reached");
        if complete {
            self.complete(operation);
        }
    }

    /// Close the socket after the grace delay unless the operation was superseded.
    fn schedule_disconnect(self: &Arc<Self>, operation: &Operation) {
        let weak = Arc::downgrade(self);
        let op = operation.clone();
        let grace = self.core.options.disconnect_grace;
        tokio::spawn(async move {
            tokio::select! {
                () = op.token.cancelled() => return,
                () = tokio::time::sleep(grace) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.core.lifecycle().is_current(&op) {
                return;
            }
            op.token.cancel();
            if inner.core.release_connection() {
                inner.set_phase(SessionPhase::Disconnected);
                debug!("upload: disconnected after grace delay");
            }
        });
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state.send_if_modified(|state| {
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        });
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
