//! In-memory personas, sessions and the current-session message mirror.
//!
//! Every mutation that touches a session's messages ends in [`ChatState::sync_current`],
//! so `current_messages` never drifts from the current session's history.

use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatSession, MessagePatch};
use crate::entity::{Persona, PersonaPatch, FALLBACK_PERSONA_ID};
use crate::error::StateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    personas: Vec<Persona>,
    current_persona_id: String,
    sessions: Vec<ChatSession>,
    current_session_id: Option<String>,
    #[serde(default)]
    current_messages: Vec<ChatMessage>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    /// First-run state: built-in personas, no sessions.
    pub fn new() -> Self {
        Self {
            personas: Persona::built_ins(),
            current_persona_id: FALLBACK_PERSONA_ID.to_string(),
            sessions: Vec::new(),
            current_session_id: None,
            current_messages: Vec::new(),
        }
    }

    // --- Projections ---

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn current_persona_id(&self) -> &str {
        &self.current_persona_id
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn current_messages(&self) -> &[ChatMessage] {
        &self.current_messages
    }

    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_persona(&self) -> Option<&Persona> {
        self.persona(&self.current_persona_id)
    }

    pub fn current_session(&self) -> Option<&ChatSession> {
        self.current_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    // --- Personas ---

    /// Appends without checking id uniqueness; callers supply fresh ids.
    pub fn add_persona(&mut self, persona: Persona) {
        self.personas.push(persona);
    }

    /// Returns `Ok(false)` when no persona has `id`.
    pub fn update_persona(&mut self, id: &str, patch: &PersonaPatch) -> Result<bool, StateError> {
        let Some(persona) = self.personas.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        if persona.is_built_in {
            return Err(StateError::BuiltInPersona(id.to_string()));
        }
        patch.apply(persona);
        Ok(true)
    }

    /// Sessions that reference the removed persona are left as they are.
    pub fn delete_persona(&mut self, id: &str) -> Result<bool, StateError> {
        let Some(index) = self.personas.iter().position(|p| p.id == id) else {
            return Ok(false);
        };
        if self.personas[index].is_built_in {
            return Err(StateError::BuiltInPersona(id.to_string()));
        }
        self.personas.remove(index);
        if self.current_persona_id == id {
            self.current_persona_id = FALLBACK_PERSONA_ID.to_string();
        }
        Ok(true)
    }

    /// Unconditional; the id is not checked against known personas.
    pub fn set_current_persona(&mut self, id: impl Into<String>) {
        self.current_persona_id = id.into();
    }

    // --- Sessions ---

    /// Returns the new session id, or `None` (and leaves state untouched) for an
    /// unknown persona.
    pub fn create_session(&mut self, persona_id: &str) -> Option<String> {
        let persona = self.persona(persona_id)?;
        let session = ChatSession::new(persona_id, persona.system_prompt.clone());
        let id = session.id.clone();
        self.sessions.push(session);
        self.current_session_id = Some(id.clone());
        self.sync_current();
        Some(id)
    }

    /// The only operation where the current persona follows the session.
    pub fn switch_session(&mut self, session_id: &str) -> bool {
        let Some(persona_id) = self.session(session_id).map(|s| s.persona_id.clone()) else {
            return false;
        };
        self.current_session_id = Some(session_id.to_string());
        self.current_persona_id = persona_id;
        self.sync_current();
        true
    }

    /// Deleting the current session moves to the first remaining one, if any.
    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        if self.sessions.len() == before {
            return false;
        }
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = self.sessions.first().map(|s| s.id.clone());
        }
        self.sync_current();
        true
    }

    pub fn clear_all_sessions(&mut self) {
        self.sessions.clear();
        self.current_session_id = None;
        self.sync_current();
    }

    // --- Messages ---

    /// Dropped when no session is current.
    pub fn add_message(&mut self, message: ChatMessage) -> bool {
        let Some(id) = self.current_session_id.clone() else {
            return false;
        };
        self.append_to_session(&id, message)
    }

    /// Appends to a specific session, current or not.
    pub fn append_to_session(&mut self, session_id: &str, message: ChatMessage) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            return false;
        };
        session.messages.push(message);
        session.touch();
        self.sync_current();
        true
    }

    pub fn update_message(&mut self, message_id: &str, patch: &MessagePatch) -> bool {
        let Some(session) = self.current_session_mut() else {
            return false;
        };
        let Some(msg) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        patch.apply(msg);
        session.touch();
        self.sync_current();
        true
    }

    pub fn delete_message(&mut self, message_id: &str) -> bool {
        let Some(session) = self.current_session_mut() else {
            return false;
        };
        let before = session.messages.len();
        session.messages.retain(|m| m.id != message_id);
        if session.messages.len() == before {
            return false;
        }
        session.touch();
        self.sync_current();
        true
    }

    /// Resets the current session to a single system message.
    ///
    /// The prompt comes from the globally selected persona, not the persona the
    /// session was created with. After a persona change without a session switch,
    /// clearing re-grounds the session under the newly selected persona.
    pub fn clear_current_session(&mut self) -> bool {
        let prompt = self
            .current_persona()
            .map(|p| p.system_prompt.clone())
            .unwrap_or_default();
        let Some(session) = self.current_session_mut() else {
            return false;
        };
        session.messages = vec![ChatMessage::system(prompt)];
        session.touch();
        self.sync_current();
        true
    }

    /// Rebuilds the mirror for state that came from outside (e.g. persistence).
    /// Returns true when the mirror or the current pointer had to be repaired.
    pub fn repair(&mut self) -> bool {
        let before_id = self.current_session_id.clone();
        let before_messages = std::mem::take(&mut self.current_messages);
        if self.current_session().is_none() {
            self.current_session_id = None;
        }
        self.sync_current();
        before_id != self.current_session_id || before_messages != self.current_messages
    }

    fn current_session_mut(&mut self) -> Option<&mut ChatSession> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn sync_current(&mut self) {
        self.current_messages = self
            .current_session()
            .map(|s| s.messages.clone())
            .unwrap_or_default();
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::chat::Role;
    use proptest::prelude::*;

    /// One store mutation. Indices pick an existing persona/session/message,
    /// wrapping around; past the end of an empty list they name a missing id.
    #[derive(Debug, Clone)]
    enum Op {
        AddPersona,
        UpdatePersona(usize),
        DeletePersona(usize),
        SetCurrentPersona(usize),
        CreateSession(usize),
        SwitchSession(usize),
        DeleteSession(usize),
        ClearAllSessions,
        AddMessage(Role),
        AppendToSession(usize),
        UpdateMessage(usize),
        DeleteMessage(usize),
        ClearCurrentSession,
        Repair,
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::System), Just(Role::User), Just(Role::Assistant)]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            1 => Just(Op::AddPersona),
            1 => any::<usize>().prop_map(Op::UpdatePersona),
            1 => any::<usize>().prop_map(Op::DeletePersona),
            1 => any::<usize>().prop_map(Op::SetCurrentPersona),
            3 => any::<usize>().prop_map(Op::CreateSession),
            2 => any::<usize>().prop_map(Op::SwitchSession),
            1 => any::<usize>().prop_map(Op::DeleteSession),
            1 => Just(Op::ClearAllSessions),
            4 => arb_role().prop_map(Op::AddMessage),
            2 => any::<usize>().prop_map(Op::AppendToSession),
            2 => any::<usize>().prop_map(Op::UpdateMessage),
            2 => any::<usize>().prop_map(Op::DeleteMessage),
            1 => Just(Op::ClearCurrentSession),
            1 => Just(Op::Repair),
        ]
    }

    fn pick(ids: Vec<String>, i: usize) -> String {
        if ids.is_empty() {
            "missing".to_string()
        } else {
            ids[i % ids.len()].clone()
        }
    }

    fn persona_id(state: &ChatState, i: usize) -> String {
        // One slot past the end is an unknown persona
        let mut ids: Vec<String> = state.personas().iter().map(|p| p.id.clone()).collect();
        ids.push("ghost".to_string());
        pick(ids, i)
    }

    fn session_id(state: &ChatState, i: usize) -> String {
        pick(state.sessions().iter().map(|s| s.id.clone()).collect(), i)
    }

    fn message_id(state: &ChatState, i: usize) -> String {
        pick(
            state
                .sessions()
                .iter()
                .flat_map(|s| s.messages.iter().map(|m| m.id.clone()))
                .collect(),
            i,
        )
    }

    fn apply(state: &mut ChatState, op: &Op, step: usize) {
        match op {
            Op::AddPersona => state.add_persona(Persona::new(
                format!("custom-{}", step),
                "Custom",
                "A custom persona prompt.",
                "",
            )),
            Op::UpdatePersona(i) => {
                let id = persona_id(state, *i);
                let patch = PersonaPatch {
                    system_prompt: Some(format!("Prompt number {}", step)),
                    ..PersonaPatch::default()
                };
                let _ = state.update_persona(&id, &patch);
            }
            Op::DeletePersona(i) => {
                let id = persona_id(state, *i);
                let _ = state.delete_persona(&id);
            }
            Op::SetCurrentPersona(i) => {
                let id = persona_id(state, *i);
                state.set_current_persona(id);
            }
            Op::CreateSession(i) => {
                let id = persona_id(state, *i);
                state.create_session(&id);
            }
            Op::SwitchSession(i) => {
                let id = session_id(state, *i);
                state.switch_session(&id);
            }
            Op::DeleteSession(i) => {
                let id = session_id(state, *i);
                state.delete_session(&id);
            }
            Op::ClearAllSessions => state.clear_all_sessions(),
            Op::AddMessage(role) => {
                state.add_message(ChatMessage::new(*role, format!("message {}", step)));
            }
            Op::AppendToSession(i) => {
                let id = session_id(state, *i);
                state.append_to_session(&id, ChatMessage::assistant(format!("reply {}", step)));
            }
            Op::UpdateMessage(i) => {
                let id = message_id(state, *i);
                let patch = MessagePatch {
                    role: None,
                    content: Some(format!("edited {}", step)),
                };
                state.update_message(&id, &patch);
            }
            Op::DeleteMessage(i) => {
                let id = message_id(state, *i);
                state.delete_message(&id);
            }
            Op::ClearCurrentSession => {
                state.clear_current_session();
            }
            // Nothing to repair when every change went through an operation
            Op::Repair => assert!(!state.repair(), "operations left a stale mirror"),
        }
    }

    proptest! {
        #[test]
        fn mirror_tracks_current_session(ops in prop::collection::vec(arb_op(), 1..60)) {
            let mut state = ChatState::new();
            for (step, op) in ops.iter().enumerate() {
                apply(&mut state, op, step);

                match state.current_session() {
                    Some(session) => prop_assert_eq!(
                        state.current_messages(),
                        session.messages.as_slice(),
                        "after {:?}", op
                    ),
                    None => {
                        prop_assert!(state.current_session_id().is_none(), "dangling id after {:?}", op);
                        prop_assert!(state.current_messages().is_empty(), "stale mirror after {:?}", op);
                    }
                }
                prop_assert!(state.personas().iter().filter(|p| p.is_built_in).count() == 2);
            }
        }
    }
}
