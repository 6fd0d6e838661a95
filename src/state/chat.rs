//! Streamed reply state and finished-turn history for one chat controller.

use wire::{ChatProgress, ChatStatus};

use super::SessionPhase;

/// The reply currently streaming in. Replaced by the next send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatProgressRecord {
    pub status: ChatStatus,
    pub step: Option<String>,
    /// Fragments in arrival order; never rewritten.
    pub content: Vec<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

impl ChatProgressRecord {
    fn apply(&mut self, progress: &ChatProgress) {
        self.status = progress.status;
        if progress.step.is_some() {
            self.step.clone_from(&progress.step);
        }
        self.content.extend(progress.content.iter().cloned());
        if progress.conversation_id.is_some() {
            self.conversation_id.clone_from(&progress.conversation_id);
        }
        if progress.message_id.is_some() {
            self.message_id.clone_from(&progress.message_id);
        }
    }

    /// Reply text so far.
    #[must_use]
    pub fn reply(&self) -> String {
        self.content.concat()
    }
}

/// A finished prompt/reply exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    pub prompt: String,
    pub reply: String,
    pub message_id: Option<String>,
}

/// What a progress event did to the running turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No turn is running; the event was ignored.
    Ignored,
    Streaming,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatState {
    pub phase: SessionPhase,
    pub is_typing: bool,
    pub current: Option<ChatProgressRecord>,
    pub history: Vec<ChatTurn>,
    pub conversation_id: Option<String>,
    pub error: Option<String>,
    prompt: Option<String>,
}

impl ChatState {
    /// Start a new turn for `prompt`, replacing the previous record.
    pub fn begin_turn(&mut self, prompt: impl Into<String>) {
        self.prompt = Some(prompt.into());
        self.current = Some(ChatProgressRecord::default());
        self.is_typing = true;
        self.error = None;
    }

    pub fn apply_progress(&mut self, progress: &ChatProgress) -> TurnOutcome {
        if progress.conversation_id.is_some() {
            self.conversation_id.clone_from(&progress.conversation_id);
        }
        let Some(prompt) = self.prompt.as_ref() else {
            return TurnOutcome::Ignored;
        };
        let record = self.current.get_or_insert_with(ChatProgressRecord::default);
        record.apply(progress);

        if progress.status == ChatStatus::Error {
            let message = progress.error.clone().unwrap_or_else(|| "chat failed".to_owned());
            self.fail(message);
            return TurnOutcome::Failed;
        }
        if progress.is_completion() {
            self.history.push(ChatTurn {
                prompt: prompt.clone(),
                reply: record.reply(),
                message_id: record.message_id.clone(),
            });
            self.prompt = None;
            self.is_typing = false;
            return TurnOutcome::Completed;
        }
        TurnOutcome::Streaming
    }

    /// End the running turn with a user-facing error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.prompt = None;
        self.is_typing = false;
        self.error = Some(message.into());
    }

    #[must_use]
    pub fn turn_running(&self) -> bool {
        self.prompt.is_some()
    }

    /// Drop history and the conversation id; the next prompt starts fresh.
    pub fn reset_conversation(&mut self) {
        self.history.clear();
        self.conversation_id = None;
        self.current = None;
        self.prompt = None;
        self.is_typing = false;
        self.error = None;
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
