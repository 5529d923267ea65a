use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::agent::assembler::{assemble, HistoryWindow};
use crate::agent::gateway::{CompletionGateway, PromptMessage};
use crate::bus::{Event, NotificationLevel};
use crate::chat::ChatMessage;
use crate::manager::Manager;

/// Shown in place of the assistant reply when a turn fails.
pub const GENERIC_ERROR: &str = "Something went wrong. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyInput,
    NoActiveSession,
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was sent and the store is untouched.
    Skipped(SkipReason),
    Replied(ChatMessage),
    /// The user message stays in history; no reply was written.
    Failed,
}

/// Runs user turns against the store and the completion gateway.
///
/// Holds the loading flag and the last error the presentation layer renders.
pub struct Conversation {
    manager: Arc<Manager>,
    gateway: Arc<dyn CompletionGateway>,
    window: HistoryWindow,
    loading: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Clears the loading flag when the turn ends, however it ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Conversation {
    pub fn new(
        manager: Arc<Manager>,
        gateway: Arc<dyn CompletionGateway>,
        window: HistoryWindow,
    ) -> Self {
        Self {
            manager,
            gateway,
            window,
            loading: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Sends one user turn and records the reply in the session it started from.
    pub async fn send(&self, input: &str) -> TurnOutcome {
        if input.trim().is_empty() {
            return TurnOutcome::Skipped(SkipReason::EmptyInput);
        }
        let Some(session_id) = self.manager.current_session_id() else {
            return TurnOutcome::Skipped(SkipReason::NoActiveSession);
        };
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TurnOutcome::Skipped(SkipReason::Busy);
        }
        let _guard = LoadingGuard(&self.loading);

        // Pinned to the session captured above; a concurrent switch must not split the turn
        if !self
            .manager
            .append_to_session(&session_id, ChatMessage::user(input))
        {
            return TurnOutcome::Skipped(SkipReason::NoActiveSession);
        }
        *self.error.lock() = None;

        let history = self
            .manager
            .read(|s| s.session(&session_id).map(|session| session.messages.clone()))
            .unwrap_or_default();
        let prompt: Vec<PromptMessage> = assemble(&history, self.window)
            .iter()
            .map(PromptMessage::from)
            .collect();

        info!(
            "Sending {} of {} messages in session {} via {}",
            prompt.len(),
            history.len(),
            session_id,
            self.gateway.name()
        );

        match self.gateway.complete(&prompt).await {
            Ok(reply) => {
                let message = ChatMessage::assistant(reply);
                if !self.manager.append_to_session(&session_id, message.clone()) {
                    info!("Session {} was deleted before its reply arrived", session_id);
                }
                TurnOutcome::Replied(message)
            }
            Err(e) => {
                error!("Completion failed for session {}: {}", session_id, e);
                *self.error.lock() = Some(GENERIC_ERROR.to_string());
                self.manager.event_bus().publish(Event::SystemNotification {
                    level: NotificationLevel::Error,
                    message: GENERIC_ERROR.to_string(),
                });
                TurnOutcome::Failed
            }
        }
    }

    /// Selects a persona. With a session open, the session is cleared and re-grounded
    /// under that persona; without one, a new session is started for it.
    pub fn change_persona(&self, persona_id: &str) {
        self.manager.set_current_persona(persona_id);

        if self.manager.current_session_id().is_some() {
            let known = self.manager.read(|s| s.persona(persona_id).is_some());
            if known {
                self.manager.clear_current_session();
            }
        } else {
            self.manager.create_session(persona_id);
        }
    }
}
