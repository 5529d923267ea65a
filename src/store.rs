use crate::state::ChatState;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// Key the whole chat state is stored under.
pub const STATE_KEY: &str = "chat-store";

const STATE_VERSION: u32 = 0;

/// Versioned envelope around the serialized state.
#[derive(Debug, Deserialize)]
struct PersistedState {
    state: ChatState,
    version: u32,
}

#[derive(Serialize)]
struct PersistedStateRef<'a> {
    state: &'a ChatState,
    version: u32,
}

/// Local key-value persistence backed by SQLite.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write key {}", key))?;

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read key {}", key))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .context("Failed to decode stored value")
    }

    /// Serialize the full chat state under [`STATE_KEY`].
    pub async fn save_state(&self, state: &ChatState) -> Result<()> {
        let blob = serde_json::to_string(&PersistedStateRef {
            state,
            version: STATE_VERSION,
        })
        .context("Failed to serialize chat state")?;
        self.put(STATE_KEY, &blob).await
    }

    /// Load the chat state, or `None` on first run.
    pub async fn load_state(&self) -> Result<Option<ChatState>> {
        let Some(blob) = self.get(STATE_KEY).await? else {
            return Ok(None);
        };
        let persisted: PersistedState =
            serde_json::from_str(&blob).context("Failed to parse stored chat state")?;
        if persisted.version != STATE_VERSION {
            anyhow::bail!("Unsupported chat state version {}", persisted.version);
        }
        Ok(Some(persisted.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;
    use crate::entity::Persona;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nested").join("store.db"))
            .await
            .unwrap();
        store.init().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_first_run_has_no_state() {
        let (_dir, store) = temp_store().await;
        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let (_dir, store) = temp_store().await;

        let mut state = ChatState::new();
        state.add_persona(Persona::new("pirate", "Pirate", "Talk like a pirate.", ""));
        state.create_session("pirate").unwrap();
        state.add_message(ChatMessage::user("ahoy"));
        state.add_message(ChatMessage::assistant("arr"));
        state.create_session("cuteCat").unwrap();

        store.save_state(&state).await.unwrap();
        let restored = store.load_state().await.unwrap().unwrap();

        assert_eq!(restored, state);
        assert_eq!(
            restored.sessions()[0].updated_at,
            state.sessions()[0].updated_at
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, store) = temp_store().await;
        store.put("k", "one").await.unwrap();
        store.put("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_an_error() {
        let (_dir, store) = temp_store().await;
        store.put(STATE_KEY, "{not json").await.unwrap();
        assert!(store.load_state().await.is_err());
    }

    #[tokio::test]
    async fn test_blob_uses_camel_case_keys() {
        let (_dir, store) = temp_store().await;
        store.save_state(&ChatState::new()).await.unwrap();
        let blob = store.get(STATE_KEY).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(value["version"], 0);
        assert_eq!(value["state"]["currentPersonaId"], "psychologist");
        assert!(value["state"]["currentSessionId"].is_null());
        assert!(value["state"]["personas"][0]["systemPrompt"].is_string());
    }
}
