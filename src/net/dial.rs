//! Raw socket seam between the transport and the network.
//!
//! A [`Connector`] dials one URL and hands back a [`Socket`]: a pair of
//! channels pumped by a background task. The transport never touches the
//! WebSocket stream directly, which keeps its state machine testable with an
//! in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Frame written by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Close the socket with the given close code.
    Close(u16),
}

/// Event read from the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Socket-level error; usually followed by `Closed`.
    Error(String),
    /// The socket closed with the given code.
    Closed { code: u16 },
}

/// One open socket as seen by the transport.
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<Outgoing>,
    pub inbound: mpsc::UnboundedReceiver<Incoming>,
}

/// Opens sockets for a transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial `url` and return the open socket.
    async fn connect(&self, url: &str) -> Result<Socket, TransportError>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (mut ws_write, mut ws_read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Incoming>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(Outgoing::Text(text)) => {
                            if let Err(error) = ws_write.send(Message::Text(text.into())).await {
                                warn!(error = %error, "ws: send failed");
                                let _ = in_tx.send(Incoming::Error(error.to_string()));
                                let _ = in_tx.send(Incoming::Closed { code: wire::ABNORMAL_CLOSURE });
                                break;
                            }
                        }
                        Some(Outgoing::Close(code)) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "client disconnect".into(),
                            };
                            let _ = ws_write.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        None => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    },
                    incoming = ws_read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = in_tx.send(Incoming::Text(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(wire::NORMAL_CLOSURE, |f| u16::from(f.code));
                            let _ = in_tx.send(Incoming::Closed { code });
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            warn!(error = %error, "ws: recv failed");
                            let _ = in_tx.send(Incoming::Error(error.to_string()));
                            let _ = in_tx.send(Incoming::Closed { code: wire::ABNORMAL_CLOSURE });
                            break;
                        }
                        None => {
                            let _ = in_tx.send(Incoming::Closed { code: wire::ABNORMAL_CLOSURE });
                            break;
                        }
                    },
                }
            }
            debug!("ws: socket pump finished");
        });

        Ok(Socket {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
