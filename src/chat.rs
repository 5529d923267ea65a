use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of a session's history.
///
/// Whether a message came from the user is derived from `role`; see
/// [`ChatMessage::is_user`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Message as exchanged with the browser client and `POST /api/chat`.
///
/// `is_user` only exists at this boundary; it is derived from `role` on the way out
/// and ignored on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageView {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub is_user: bool,
    pub timestamp: String,
}

impl From<&ChatMessage> for MessageView {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id.clone(),
            role: msg.role,
            content: msg.content.clone(),
            is_user: msg.is_user(),
            timestamp: msg.timestamp.to_rfc3339(),
        }
    }
}

/// Partial update applied by `update_message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    pub role: Option<Role>,
    pub content: Option<String>,
}

impl MessagePatch {
    pub fn apply(&self, msg: &mut ChatMessage) {
        if let Some(role) = self.role {
            msg.role = role;
        }
        if let Some(content) = &self.content {
            msg.content = content.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub persona_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Starts a session grounded by a single system message.
    pub fn new(persona_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            persona_id: persona_id.into(),
            messages: vec![ChatMessage::system(system_prompt)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Bumps `updated_at`. The new value is always strictly later than the old one,
    /// even when the clock has not advanced.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    pub fn system_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.role == Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_user_follows_role() {
        assert!(ChatMessage::user("hi").is_user());
        assert!(!ChatMessage::assistant("hello").is_user());
        assert!(!ChatMessage::system("be nice").is_user());
    }

    #[test]
    fn test_view_derives_is_user() {
        let msg = ChatMessage::user("hi");
        let view = MessageView::from(&msg);
        assert!(view.is_user);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["isUser"], true);
        assert_eq!(json["role"], "user");
        assert_eq!(
            DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).unwrap(),
            msg.timestamp
        );
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn test_touch_strictly_advances() {
        let mut session = ChatSession::new("cuteCat", "meow");
        let future = Utc::now() + Duration::hours(1);
        session.updated_at = future;
        session.touch();
        assert!(session.updated_at > future);
    }

    #[test]
    fn test_new_session_is_seeded() {
        let session = ChatSession::new("cuteCat", "meow");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.system_message().unwrap().content, "meow");
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn test_patch_merges_only_given_fields() {
        let mut msg = ChatMessage::user("draft");
        let id = msg.id.clone();
        MessagePatch {
            role: None,
            content: Some("final".into()),
        }
        .apply(&mut msg);
        assert_eq!(msg.content, "final");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.id, id);
    }
}
