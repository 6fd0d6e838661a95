//! Chat service: sends prompts and streams the assistant's reply back.
//!
//! The service remembers the server-assigned conversation id so later
//! prompts continue the same conversation, and drops repeated completion
//! messages by `message_id`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use wire::{ChatProgress, ChatRequest, Envelope, Status};

use super::dedup::SeenMessages;
use super::slot::{ServiceSlot, SessionService};
use super::{Fault, FaultHandler, UNKNOWN_SERVER_ERROR};
use crate::config::ClientConfig;
use crate::error::{SessionError, TransportError, ValidationError};
use crate::net::{Connector, ReconnectPolicy, Route, Transport};

pub type ChatHandler = Arc<dyn Fn(&ChatProgress) + Send + Sync>;

struct Shared {
    conversation_id: Option<String>,
    seen: SeenMessages,
    on_message: Option<ChatHandler>,
    on_error: Option<FaultHandler>,
}

pub struct ChatService {
    transport: Transport,
    shared: Arc<Mutex<Shared>>,
}

impl SessionService for ChatService {
    fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl ChatService {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        dedup_capacity: usize,
    ) -> Self {
        let transport = Transport::new(url, connector, policy);
        let shared = Arc::new(Mutex::new(Shared {
            conversation_id: None,
            seen: SeenMessages::with_capacity(dedup_capacity),
            on_message: None,
            on_error: None,
        }));

        for status in [Status::InProgress, Status::Completed] {
            let shared = Arc::clone(&shared);
            transport.add_message_handler(Route::Status(status), move |envelope| match envelope.chat_progress() {
                Ok(progress) => {
                    process(&shared, &progress);
                }
                Err(error) => warn!(error = %error, "chat: dropping malformed progress"),
            });
        }
        let sink = Arc::clone(&shared);
        transport.add_message_handler(Route::Status(Status::Error), move |envelope: &Envelope| {
            let message = envelope.error_message().unwrap_or(UNKNOWN_SERVER_ERROR).to_owned();
            match envelope.chat_progress() {
                Ok(mut progress) => {
                    if progress.error.is_none() {
                        progress.error = Some(message);
                    }
                    process(&sink, &progress);
                }
                Err(_) => emit_fault(&sink, &Fault::Server(message)),
            }
        });
        let sink = Arc::clone(&shared);
        transport.set_error_handler(move |error: &TransportError| {
            emit_fault(&sink, &Fault::Transport(error.clone()));
        });

        Self { transport, shared }
    }

    /// Slot that builds chat services for the configured endpoint.
    #[must_use]
    pub fn slot(config: &ClientConfig, connector: Arc<dyn Connector>) -> ServiceSlot<Self> {
        let base = config.api_url.clone();
        let endpoint = config.chat_endpoint.clone();
        let policy = config.reconnect;
        let capacity = config.dedup_capacity;
        ServiceSlot::new(move |token| {
            let url = wire::endpoint_url(&base, &endpoint, token)?;
            Ok(Self::new(url, Arc::clone(&connector), policy, capacity))
        })
    }

    pub fn on_message(&self, handler: impl Fn(&ChatProgress) + Send + Sync + 'static) {
        lock(&self.shared).on_message = Some(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&Fault) + Send + Sync + 'static) {
        lock(&self.shared).on_error = Some(Arc::new(handler));
    }

    /// Send a prompt, continuing the active conversation if there is one.
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyMessage`] for blank content (checked before
    /// any transport call), [`SessionError::SendFailed`] when the socket
    /// refused the message.
    pub async fn send_message(&self, mut request: ChatRequest) -> Result<(), SessionError> {
        if request.content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        if request.conversation_id.is_none() {
            request.conversation_id = self.conversation_id();
        }

        if !self.transport.send(&request).await {
            return Err(SessionError::SendFailed);
        }
        info!(
            endpoint = self.transport.endpoint(),
            conversation_id = request.conversation_id.as_deref().unwrap_or("-"),
            "chat: message sent"
        );
        Ok(())
    }

    /// Deliver one progress message to the consumer.
    ///
    /// Returns `false` when a completion with an already-seen `message_id`
    /// was dropped.
    pub fn process_message(&self, progress: &ChatProgress) -> bool {
        process(&self.shared, progress)
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.shared).conversation_id.clone()
    }

    pub fn set_conversation_id(&self, conversation_id: Option<String>) {
        lock(&self.shared).conversation_id = conversation_id;
    }

    /// Forget the active conversation and the seen message ids.
    pub fn reset_conversation(&self) {
        let mut shared = lock(&self.shared);
        shared.conversation_id = None;
        shared.seen.clear();
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
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn process(shared: &Mutex<Shared>, progress: &ChatProgress) -> bool {
    let handler = {
        let mut shared = lock(shared);
        if let Some(id) = &progress.conversation_id {
            shared.conversation_id = Some(id.clone());
        }
        if progress.is_completion() {
            if let Some(id) = &progress.message_id {
                if !shared.seen.insert(id) {
                    debug!(message_id = %id, "chat: duplicate completion dropped");
                    return false;
                }
            }
        }
        shared.on_message.clone()
    };
    if let Some(handler) = handler {
        handler(progress);
    }
    true
}

fn emit_fault(shared: &Mutex<Shared>, fault: &Fault) {
    let handler = lock(shared).on_error.clone();
    match handler {
        Some(handler) => handler(fault),
        None => warn!(error = %fault, "chat: unhandled error"),
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
