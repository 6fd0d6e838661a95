//! Error types shared by the transport, services and session controllers.

/// Failure of the socket transport.
///
/// `Clone` so a single failed dial can be handed to every caller that joined
/// the same in-flight `connect()`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened (handshake, DNS, refused, ...).
    #[error("websocket connect failed: {0}")]
    Connect(String),
    /// The open socket reported an I/O or protocol error.
    #[error("websocket error: {0}")]
    Socket(String),
    /// The socket is not open and no connection could be established.
    #[error("websocket closed")]
    Closed,
    /// `disconnect()` ran while the attempt was in flight.
    #[error("connection attempt cancelled")]
    Cancelled,
    /// The reconnect ceiling was reached; no further attempts are scheduled.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Input rejected before any network activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyMessage,
    #[error("no files selected for upload")]
    NoFiles,
}

/// Failure of a feature-level operation (upload batch or chat turn).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Another upload batch or chat turn is still running on this controller.
    #[error("an operation is already in progress")]
    Busy,
    #[error("failed to connect after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// The payload could not be handed to the socket.
    #[error("failed to send message")]
    SendFailed,
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] wire::WireError),
}
