//! Feature services: one transport per feature, bound to an auth token.
//!
//! A service turns feature calls into wire payloads and routes inbound
//! messages by status to the callbacks its owner installed. Services never
//! hold UI state; that lives in the session controllers.

pub mod chat;
pub mod dedup;
pub mod slot;
pub mod upload;

use std::sync::Arc;

use crate::error::TransportError;

pub use chat::ChatService;
pub use dedup::SeenMessages;
pub use slot::{ServiceSlot, SessionService};
pub use upload::UploadService;

/// Failure delivered to a service's error callback.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The backend sent an `error` message.
    #[error("server error: {0}")]
    Server(String),
}

impl Fault {
    /// Whether the session cannot make further progress on its own.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Server(_) | Self::Transport(TransportError::RetriesExhausted { .. })
        )
    }
}

pub type FaultHandler = Arc<dyn Fn(&Fault) + Send + Sync>;

const UNKNOWN_SERVER_ERROR: &str = "unknown server error";
