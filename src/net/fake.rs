//! In-memory connector for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::dial::{Connector, Incoming, Outgoing, Socket};
use crate::error::TransportError;

#[derive(Default)]
struct FakeState {
    dials: usize,
    dial_times: Vec<tokio::time::Instant>,
    urls: Vec<String>,
    fail_next: usize,
    fail_always: bool,
    dial_delay: Duration,
    sockets: VecDeque<ServerEnd>,
}

/// Server half of a fake socket.
pub(crate) struct ServerEnd {
    pub to_client: mpsc::UnboundedSender<Incoming>,
    pub from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl ServerEnd {
    pub fn push_json(&self, value: serde_json::Value) {
        let _ = self.to_client.send(Incoming::Text(value.to_string()));
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(Incoming::Text(text.to_owned()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Incoming::Closed { code });
    }

    /// Drain everything the client wrote so far.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            out.push(frame);
        }
        out
    }

    /// Drain and parse the client's text frames.
    pub fn sent_json(&mut self) -> Vec<serde_json::Value> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Outgoing::Text(text) => serde_json::from_str(&text).ok(),
                Outgoing::Close(_) => None,
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dials(&self) -> usize {
        self.state.lock().unwrap().dials
    }

    /// Gaps between consecutive dials.
    pub fn dial_gaps(&self) -> Vec<Duration> {
        let times = self.state.lock().unwrap().dial_times.clone();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    pub fn fail_always(&self, fail: bool) {
        self.state.lock().unwrap().fail_always = fail;
    }

    pub fn set_dial_delay(&self, delay: Duration) {
        self.state.lock().unwrap().dial_delay = delay;
    }

    /// Take the server end of the oldest socket not yet taken.
    pub fn next_socket(&self) -> ServerEnd {
        self.state
            .lock()
            .unwrap()
            .sockets
            .pop_front()
            .expect("no socket was dialed")
    }

    pub fn pending_sockets(&self) -> usize {
        self.state.lock().unwrap().sockets.len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.dials += 1;
            state.dial_times.push(tokio::time::Instant::now());
            state.urls.push(url.to_owned());
            state.dial_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_always {
            return Err(TransportError::Connect("connection refused".to_owned()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Connect("connection refused".to_owned()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        state.sockets.push_back(ServerEnd { to_client, from_client });
        Ok(Socket { outbound, inbound })
    }
}

/// Let spawned reader tasks run to quiescence under a paused clock.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
