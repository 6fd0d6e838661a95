//! Upload service: stages files and streams per-file progress back.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};
use wire::{Envelope, Status, UploadFile, UploadProgress, UploadRequest};

use super::slot::{ServiceSlot, SessionService};
use super::{Fault, FaultHandler, UNKNOWN_SERVER_ERROR};
use crate::config::ClientConfig;
use crate::error::{SessionError, TransportError, ValidationError};
use crate::net::{Connector, ReconnectPolicy, Route, Transport};

pub type ProgressHandler = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// Statuses the upload endpoint reports per file.
const ROUTED: [Status; 7] = [
    Status::Processing,
    Status::Uploading,
    Status::Analyzing,
    Status::Complete,
    Status::Uploaded,
    Status::Exists,
    Status::Error,
];

#[derive(Default)]
struct Callbacks {
    on_progress: Option<ProgressHandler>,
    on_error: Option<FaultHandler>,
}

pub struct UploadService {
    transport: Transport,
    staged: Mutex<Vec<UploadFile>>,
    callbacks: Arc<Mutex<Callbacks>>,
}

impl SessionService for UploadService {
    fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl UploadService {
    #[must_use]
    pub fn new(url: impl Into<String>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let transport = Transport::new(url, connector, policy);
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));

        for status in ROUTED {
            let callbacks = Arc::clone(&callbacks);
            transport.add_message_handler(Route::Status(status), move |envelope| route(&callbacks, envelope));
        }
        let sink = Arc::clone(&callbacks);
        transport.set_error_handler(move |error: &TransportError| {
            emit_fault(&sink, &Fault::Transport(error.clone()));
        });

        Self {
            transport,
            staged: Mutex::new(Vec::new()),
            callbacks,
        }
    }

    /// Slot that builds upload services for the configured endpoint.
    #[must_use]
    pub fn slot(config: &ClientConfig, connector: Arc<dyn Connector>) -> ServiceSlot<Self> {
        let base = config.api_url.clone();
        let endpoint = config.upload_endpoint.clone();
        let policy = config.reconnect;
        ServiceSlot::new(move |token| {
            let url = wire::endpoint_url(&base, &endpoint, token)?;
            Ok(Self::new(url, Arc::clone(&connector), policy))
        })
    }

    pub fn on_progress(&self, handler: impl Fn(&UploadProgress) + Send + Sync + 'static) {
        lock(&self.callbacks).on_progress = Some(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&Fault) + Send + Sync + 'static) {
        lock(&self.callbacks).on_error = Some(Arc::new(handler));
    }

    /// Read `path` and stage it for the next batch.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the file cannot be read.
    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        self.add_file_bytes(filename, &bytes);
        Ok(())
    }

    /// Stage in-memory content under `filename`.
    pub fn add_file_bytes(&self, filename: impl Into<String>, bytes: &[u8]) {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        debug!(filename = %filename, size = bytes.len(), content_type = %content_type, "upload: staged");
        self.lock_staged().push(UploadFile {
            filename,
            content: STANDARD.encode(bytes),
            content_type,
        });
    }

    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.lock_staged().len()
    }

    /// Names of the staged files in the order they were added.
    #[must_use]
    pub fn staged_filenames(&self) -> Vec<String> {
        self.lock_staged().iter().map(|file| file.filename.clone()).collect()
    }

    pub fn clear_staged(&self) {
        self.lock_staged().clear();
    }

    /// Send every staged file as one batch and clear the stage.
    ///
    /// On a failed send the files stay staged so the caller can retry.
    ///
    /// # Errors
    ///
    /// [`ValidationError::NoFiles`] when nothing is staged (no network
    /// activity), [`SessionError::SendFailed`] when the socket refused the batch.
    pub async fn start_upload(&self, user_id: &str) -> Result<usize, SessionError> {
        let files = std::mem::take(&mut *self.lock_staged());
        if files.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }

        let request = UploadRequest::new(user_id, files);
        let count = request.total_files;
        if !self.transport.send(&request).await {
            let mut staged = self.lock_staged();
            let added_meanwhile = std::mem::replace(&mut *staged, request.files);
            staged.extend(added_meanwhile);
            return Err(SessionError::SendFailed);
        }

        info!(endpoint = self.transport.endpoint(), files = count, "upload: batch sent");
        Ok(count)
    }

    /// Open the socket now instead of on first send.
    ///
    /// # Errors
    ///
    /// Returns the transport's connect failure.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn lock_staged(&self) -> MutexGuard<'_, Vec<UploadFile>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(callbacks: &Mutex<Callbacks>) -> MutexGuard<'_, Callbacks> {
    callbacks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route(callbacks: &Mutex<Callbacks>, envelope: &Envelope) {
    match envelope.upload_progress() {
        Ok(progress) => {
            let handler = lock(callbacks).on_progress.clone();
            if let Some(handler) = handler {
                handler(&progress);
            }
        }
        // An error without a filename concerns the whole batch.
        Err(_) if envelope.status == Status::Error => {
            let message = envelope.error_message().unwrap_or(UNKNOWN_SERVER_ERROR).to_owned();
            emit_fault(callbacks, &Fault::Server(message));
        }
        Err(error) => {
            warn!(status = envelope.status.as_str(), error = %error, "upload: dropping malformed progress");
        }
    }
}

fn emit_fault(callbacks: &Mutex<Callbacks>, fault: &Fault) {
    let handler = lock(callbacks).on_error.clone();
    match handler {
        Some(handler) => handler(fault),
        None => warn!(error = %fault, "upload: unhandled error"),
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
