//! UI-facing session state and its pure update rules.
//!
//! Controllers own one state value each and publish a fresh snapshot after
//! every change; nothing in here touches the network or the clock.

pub mod chat;
pub mod upload;

pub use chat::{ChatProgressRecord, ChatState, ChatTurn, TurnOutcome};
pub use upload::{FileTransferRecord, UploadState};

/// Controller lifecycle as seen by the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// An upload batch or chat turn is running.
    Busy,
    /// Terminal state reached; the socket closes after the grace delay.
    Draining,
    Disconnected,
}

impl SessionPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Busy => "busy",
            Self::Draining => "draining",
            Self::Disconnected => "disconnected",
        }
    }
}
