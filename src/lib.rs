//! Realtime client for the document upload and chat-over-documents sessions.
//!
//! LAYERS
//! ======
//! - [`net`]: one WebSocket connection per endpoint with status-routed
//!   handlers and exponential-backoff reconnection.
//! - [`services`]: the upload and chat services that turn feature calls into
//!   wire payloads, held in an owned [`services::ServiceSlot`].
//! - [`session`]: controllers that own UI-facing [`state`], connect on
//!   demand, retry, time out stalled uploads and disconnect when done.
//!
//! The wire schema itself lives in the `wire` crate.

pub mod config;
pub mod error;
pub mod net;
pub mod notify;
pub mod services;
pub mod session;
pub mod state;

pub use config::{ClientConfig, ConfigError};
pub use error::{SessionError, TransportError, ValidationError};
pub use notify::{Level, Notifier, TracingNotifier};
pub use session::{ChatController, SessionOptions, UploadController};
