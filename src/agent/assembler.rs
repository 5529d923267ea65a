//! Picks which messages of a session go out with each completion request.

use crate::chat::{ChatMessage, Role};

/// How many non-system messages are sent along with the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow(usize);

impl HistoryWindow {
    pub const DEFAULT: HistoryWindow = HistoryWindow(9);

    pub fn new(size: usize) -> Self {
        Self(size)
    }

    pub fn size(&self) -> usize {
        self.0
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Returns the first system message (if any) followed by the last `window`
/// non-system messages, in their original order.
///
/// Callers keep at most one system message per session; any later system
/// message is not sent.
pub fn assemble(messages: &[ChatMessage], window: HistoryWindow) -> Vec<ChatMessage> {
    let system = messages.iter().find(|m| m.role == Role::System);
    let chat: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let recent = &chat[chat.len().saturating_sub(window.size())..];

    system
        .into_iter()
        .chain(recent.iter().copied())
        .cloned()
        .collect()
}
