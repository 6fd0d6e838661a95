//! Chat controller: one turn at a time, streamed reply, conversation memory.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use wire::{ChatProgress, ChatRequest};

use super::{CONNECT_FAILED_MESSAGE, Core, Operation, SessionOptions, connect_with_retry};
use crate::error::{SessionError, ValidationError};
use crate::notify::{Level, Notifier};
use crate::services::{ChatService, Fault, ServiceSlot, SessionService};
use crate::state::{ChatState, SessionPhase, TurnOutcome};

/// Drives [`ChatService`] and publishes [`ChatState`].
///
/// The conversation id lives in the controller, so it survives the
/// per-turn disconnect and is reused until [`ChatController::reset_conversation`].
pub struct ChatController {
    inner: Arc<Inner>,
}

struct Inner {
    core: Core<ChatService>,
    faiss_index_path: String,
    state: watch::Sender<ChatState>,
}

impl ChatController {
    pub fn new(
        slot: Arc<ServiceSlot<ChatService>>,
        token: impl Into<String>,
        faiss_index_path: impl Into<String>,
        options: SessionOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            inner: Arc::new(Inner {
                core: Core::new(slot, token.into(), options, notifier),
                faiss_index_path: faiss_index_path.into(),
                state,
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ChatState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.inner.state.borrow().is_typing
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.core.lifecycle().busy
    }

    #[must_use]
    pub fn maintains_connection(&self) -> bool {
        self.inner.core.lifecycle().maintain_connection
    }

    /// Send `content` about the documents in `pdf_ids`.
    ///
    /// Resolves once the prompt is on the wire; the reply streams into the
    /// state published by [`ChatController::subscribe`].
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyMessage`] for blank content, [`SessionError::Busy`]
    /// while a reply is streaming, otherwise the failure that ended the turn.
    pub async fn send_message(&self, content: &str, pdf_ids: Vec<String>) -> Result<(), SessionError> {
        self.inner.send(content, pdf_ids).await
    }

    /// Continue a conversation started elsewhere.
    pub fn resume_conversation(&self, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        self.inner
            .state
            .send_modify(|state| state.conversation_id = Some(conversation_id));
    }

    /// Forget the conversation and its history. The next prompt starts a new one.
    ///
    /// # Errors
    ///
    /// [`SessionError::Busy`] while a reply is still streaming.
    pub fn reset_conversation(&self) -> Result<(), SessionError> {
        if self.inner.core.lifecycle().busy {
            self.inner
                .core
                .notify(Level::Warning, "Please Wait", "The assistant is still answering.");
            return Err(SessionError::Busy);
        }
        self.inner.state.send_modify(ChatState::reset_conversation);
        if let Some(service) = self.inner.core.slot.current() {
            service.reset_conversation();
        }
        debug!("chat: conversation reset");
        Ok(())
    }

    /// Cancel the running turn and close the connection if this controller
    /// opened one. Only the first call disconnects.
    pub fn unmount(&self) -> bool {
        let released = self.inner.core.unmount();
        if released {
            self.inner.state.send_modify(|state| {
                state.is_typing = false;
                state.phase = SessionPhase::Disconnected;
            });
        }
        released
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl Inner {
    async fn send(self: &Arc<Self>, content: &str, pdf_ids: Vec<String>) -> Result<(), SessionError> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let begun = self.core.lifecycle().begin();
        let operation = match begun {
            Ok(operation) => operation,
            Err(error) => {
                self.core
                    .notify(Level::Warning, "Please Wait", "The assistant is still answering.");
                return Err(error);
            }
        };

        match self.drive(&operation, content, pdf_ids).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.abort(&operation, &error);
                Err(error)
            }
        }
    }

    async fn drive(self: &Arc<Self>, operation: &Operation, content: &str, pdf_ids: Vec<String>) -> Result<(), SessionError> {
        let service = self.core.slot.get_instance(&self.core.token)?;
        self.install_callbacks(&service, operation);

        let connected = service.is_connected();
        let mut conversation_id = None;
        self.state.send_modify(|state| {
            state.begin_turn(content);
            state.phase = if connected {
                SessionPhase::Connected
            } else {
                SessionPhase::Connecting
            };
            conversation_id.clone_from(&state.conversation_id);
        });
        if !connected {
            connect_with_retry(service.transport(), self.core.options.retry, &operation.token).await?;
            self.set_phase(SessionPhase::Connected);
        }

        self.set_phase(SessionPhase::Busy);
        service.set_conversation_id(conversation_id.clone());
        service
            .send_message(ChatRequest {
                content: content.to_owned(),
                faiss_index_path: self.faiss_index_path.clone(),
                conversation_id,
                pdf_ids,
            })
            .await?;
        info!(documents = self.faiss_index_path.as_str(), "chat: prompt sent");
        Ok(())
    }

    fn install_callbacks(self: &Arc<Self>, service: &ChatService, operation: &Operation) {
        let weak = Arc::downgrade(self);
        let op = operation.clone();
        service.on_message(move |progress| {
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

    fn on_progress(self: &Arc<Self>, operation: &Operation, progress: &ChatProgress) {
        if !self.core.lifecycle().is_current(operation) {
            return;
        }

        let mut outcome = TurnOutcome::Ignored;
        self.state.send_if_modified(|state| {
            outcome = state.apply_progress(progress);
            outcome != TurnOutcome::Ignored
        });
        match outcome {
            TurnOutcome::Completed => self.settle(operation, None),
            TurnOutcome::Failed => {
                let message = self.state.borrow().error.clone().unwrap_or_default();
                self.settle(operation, Some(message));
            }
            TurnOutcome::Streaming | TurnOutcome::Ignored => {}
        }
    }

    fn on_fault(self: &Arc<Self>, operation: &Operation, fault: &Fault) {
        let busy = {
            let lifecycle = self.core.lifecycle();
            lifecycle.is_current(operation) && lifecycle.busy
        };
        if !busy || self.state.borrow().phase != SessionPhase::Busy || !fault.is_fatal() {
            warn!(error = %fault, "chat: transport reported an error");
            return;
        }
        let message = fault.to_string();
        self.state.send_modify(|state| state.fail(message.clone()));
        self.settle(operation, Some(message));
    }

    /// Finish the turn and schedule the disconnect.
    fn settle(self: &Arc<Self>, operation: &Operation, error: Option<String>) {
        if !self.core.finish(operation) {
            return;
        }
        self.set_phase(SessionPhase::Draining);
        match error {
            Some(message) => self.core.notify(Level::Error, "Chat Error", &message),
            None => debug!("chat: reply complete"),
        }
        self.schedule_disconnect(operation);
    }

    fn abort(&self, operation: &Operation, error: &SessionError) {
        if !self.core.finish(operation) {
            return;
        }

        let (title, message) = match error {
            SessionError::Connect { .. } => ("Connection Error", CONNECT_FAILED_MESSAGE.to_owned()),
            other => ("Chat Error", other.to_string()),
        };
        warn!(error = %error, "chat: turn aborted");
        operation.token.cancel();
        self.core.release_connection();
        self.state.send_modify(|state| {
            state.fail(message.clone());
            state.phase = SessionPhase::Disconnected;
        });
        self.core.notify(Level::Error, title, &message);
    }

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
                debug!("chat: disconnected after grace delay");
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
#[path = "chat_test.rs"]
mod tests;
