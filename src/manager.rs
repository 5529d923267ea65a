use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bus::{Change, Event, EventBus};
use crate::chat::{ChatMessage, ChatSession, MessagePatch};
use crate::entity::{Persona, PersonaPatch};
use crate::error::StateError;
use crate::state::ChatState;
use crate::store::Store;

enum PersistCommand {
    Save(ChatState),
    Flush(oneshot::Sender<()>),
}

/// Single owner of the chat state.
///
/// Each mutation runs to completion under one lock, then queues a snapshot for the
/// background writer and publishes a change event. Callers never wait on the write.
pub struct Manager {
    state: Mutex<ChatState>,
    persist_tx: mpsc::UnboundedSender<PersistCommand>,
    event_bus: Arc<EventBus>,
}

impl Manager {
    /// Restore the saved state (or start fresh) and spawn the persistence writer.
    pub async fn load(store: Store, event_bus: Arc<EventBus>) -> Result<Self> {
        let state = match store
            .load_state()
            .await
            .context("Failed to restore chat state")?
        {
            Some(mut state) => {
                if state.repair() {
                    warn!("Restored state had a stale current-session mirror, rebuilt it");
                }
                info!(
                    "Restored {} personas and {} sessions",
                    state.personas().len(),
                    state.sessions().len()
                );
                state
            }
            None => {
                info!("No saved chat state, starting with built-in personas");
                ChatState::new()
            }
        };

        Ok(Self::with_state(state, store, event_bus))
    }

    /// Must be called from within a Tokio runtime.
    pub fn with_state(state: ChatState, store: Store, event_bus: Arc<EventBus>) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, persist_rx));

        Self {
            state: Mutex::new(state),
            persist_tx,
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    // --- Reads ---

    pub fn snapshot(&self) -> ChatState {
        self.state.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&*self.state.lock())
    }

    pub fn current_persona(&self) -> Option<Persona> {
        self.read(|s| s.current_persona().cloned())
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        self.read(|s| s.current_session().cloned())
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.read(|s| s.current_session_id().map(str::to_string))
    }

    pub fn current_messages(&self) -> Vec<ChatMessage> {
        self.read(|s| s.current_messages().to_vec())
    }

    // --- Personas ---

    pub fn add_persona(&self, persona: Persona) {
        debug!("Adding persona {}", persona);
        self.write(
            Change::Personas,
            |s| {
                s.add_persona(persona);
                true
            },
            |changed| *changed,
        );
    }

    pub fn update_persona(&self, id: &str, patch: &PersonaPatch) -> Result<bool, StateError> {
        self.write(
            Change::Personas,
            |s| s.update_persona(id, patch),
            |res| matches!(res, Ok(true)),
        )
    }

    pub fn delete_persona(&self, id: &str) -> Result<bool, StateError> {
        self.write(
            Change::Personas,
            |s| s.delete_persona(id),
            |res| matches!(res, Ok(true)),
        )
    }

    pub fn set_current_persona(&self, id: &str) {
        self.write(
            Change::CurrentPersona,
            |s| {
                s.set_current_persona(id);
                true
            },
            |changed| *changed,
        );
    }

    // --- Sessions ---

    pub fn create_session(&self, persona_id: &str) -> Option<String> {
        let created = self.write(
            Change::Sessions,
            |s| s.create_session(persona_id),
            Option::is_some,
        );
        match &created {
            Some(id) => info!("Created session {} for persona {}", id, persona_id),
            None => warn!("Cannot create session for unknown persona {}", persona_id),
        }
        created
    }

    pub fn switch_session(&self, session_id: &str) -> bool {
        self.write(
            Change::CurrentSession,
            |s| s.switch_session(session_id),
            |changed| *changed,
        )
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.write(
            Change::Sessions,
            |s| s.delete_session(session_id),
            |changed| *changed,
        )
    }

    pub fn clear_all_sessions(&self) {
        self.write(
            Change::Sessions,
            |s| {
                s.clear_all_sessions();
                true
            },
            |changed| *changed,
        );
    }

    // --- Messages ---

    /// Appends to the current session. Dropped when none is current.
    pub fn add_message(&self, message: ChatMessage) -> bool {
        let mut state = self.state.lock();
        let Some(session_id) = state.current_session_id().map(str::to_string) else {
            debug!("No current session, dropping message {}", message.id);
            return false;
        };
        self.append_locked(&mut *state, session_id, message)
    }

    pub fn append_to_session(&self, session_id: &str, message: ChatMessage) -> bool {
        let mut state = self.state.lock();
        self.append_locked(&mut *state, session_id.to_string(), message)
    }

    pub fn update_message(&self, message_id: &str, patch: &MessagePatch) -> bool {
        self.write(
            Change::Messages,
            |s| s.update_message(message_id, patch),
            |changed| *changed,
        )
    }

    pub fn delete_message(&self, message_id: &str) -> bool {
        self.write(
            Change::Messages,
            |s| s.delete_message(message_id),
            |changed| *changed,
        )
    }

    pub fn clear_current_session(&self) -> bool {
        self.write(
            Change::Messages,
            |s| s.clear_current_session(),
            |changed| *changed,
        )
    }

    // --- Persistence ---

    /// Queue the current state and wait until it is on disk.
    pub async fn save(&self) -> Result<()> {
        self.persist(self.snapshot());
        self.flush().await
    }

    /// Wait for every queued write to finish.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.persist_tx
            .send(PersistCommand::Flush(ack_tx))
            .map_err(|_| anyhow::anyhow!("Persistence writer stopped"))?;
        ack_rx.await.context("Persistence writer dropped flush")?;
        Ok(())
    }

    fn write<T>(
        &self,
        change: Change,
        mutate: impl FnOnce(&mut ChatState) -> T,
        dirty: impl FnOnce(&T) -> bool,
    ) -> T {
        let mut state = self.state.lock();
        let out = mutate(&mut *state);
        if dirty(&out) {
            self.persist(state.clone());
            drop(state);
            self.event_bus.publish(Event::StateChanged { change });
        }
        out
    }

    fn append_locked(&self, state: &mut ChatState, session_id: String, message: ChatMessage) -> bool {
        if !state.append_to_session(&session_id, message.clone()) {
            return false;
        }
        self.persist(state.clone());
        self.event_bus.publish(Event::MessageAdded {
            session_id,
            message,
        });
        true
    }

    fn persist(&self, snapshot: ChatState) {
        if self.persist_tx.send(PersistCommand::Save(snapshot)).is_err() {
            error!("Persistence writer stopped, state change not saved");
        }
    }
}

/// Writes snapshots in order. Queued saves collapse into the newest one.
async fn run_writer(store: Store, mut rx: mpsc::UnboundedReceiver<PersistCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            PersistCommand::Save(mut state) => {
                let mut acks = Vec::new();
                while let Ok(next) = rx.try_recv() {
                    match next {
                        PersistCommand::Save(newer) => state = newer,
                        PersistCommand::Flush(ack) => acks.push(ack),
                    }
                }

                if let Err(e) = store.save_state(&state).await {
                    error!("Failed to persist chat state: {:#}", e);
                }

                for ack in acks {
                    let _ = ack.send(());
                }
            }
            PersistCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Persistence writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FALLBACK_PERSONA_ID;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("store.db")).await.unwrap();
        store.init().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_mutations_are_persisted_after_flush() {
        let (_dir, store) = temp_store().await;
        let manager = Manager::load(store.clone(), Arc::new(EventBus::new()))
            .await
            .unwrap();

        manager.create_session("cuteCat").unwrap();
        manager.add_message(ChatMessage::user("hello"));
        manager.flush().await.unwrap();

        let saved = store.load_state().await.unwrap().unwrap();
        assert_eq!(saved, manager.snapshot());
    }

    #[tokio::test]
    async fn test_reload_restores_state() {
        let (_dir, store) = temp_store().await;
        let bus = Arc::new(EventBus::new());
        let manager = Manager::load(store.clone(), bus.clone()).await.unwrap();
        manager.add_persona(Persona::new("pirate", "Pirate", "Talk like a pirate.", ""));
        let id = manager.create_session("pirate").unwrap();
        manager.add_message(ChatMessage::user("ahoy"));
        manager.save().await.unwrap();
        let before = manager.snapshot();

        let reloaded = Manager::load(store, bus).await.unwrap();
        assert_eq!(reloaded.snapshot(), before);
        assert_eq!(reloaded.current_session_id().as_deref(), Some(id.as_str()));
        assert_eq!(reloaded.current_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        let (_dir, store) = temp_store().await;
        let manager = Manager::load(store, Arc::new(EventBus::new())).await.unwrap();
        let mut rx = manager.event_bus().subscribe();

        let session_id = manager.create_session("cuteCat").unwrap();
        manager.add_message(ChatMessage::user("meow"));
        assert!(manager.create_session("nobody").is_none());

        match rx.recv().await.unwrap() {
            Event::StateChanged { change } => assert_eq!(change, Change::Sessions),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Event::MessageAdded { session_id: sid, message } => {
                assert_eq!(sid, session_id);
                assert_eq!(message.content, "meow");
            }
            other => panic!("unexpected event {:?}", other),
        }
        // The rejected create produced nothing.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_add_message_without_session() {
        let (_dir, store) = temp_store().await;
        let manager = Manager::load(store, Arc::new(EventBus::new())).await.unwrap();
        assert!(!manager.add_message(ChatMessage::user("lost")));
        assert!(manager.current_messages().is_empty());
    }

    #[tokio::test]
    async fn test_built_in_protection_passes_through() {
        let (_dir, store) = temp_store().await;
        let manager = Manager::load(store, Arc::new(EventBus::new())).await.unwrap();
        assert!(manager.delete_persona(FALLBACK_PERSONA_ID).is_err());
        assert_eq!(
            manager.current_persona().unwrap().id,
            FALLBACK_PERSONA_ID
        );
    }
}
