//! 会话存储
//!
//! SessionStore 是纯持久化边界（load / save / delete），不含业务逻辑。
//! 提供两种实现：InMemorySessionStore（测试）与 SqliteSessionStore（生产，rusqlite）。
//! 两者都走同一条 JSON 序列化路径，时间戳按纳秒精度显式读写，保证无损往返。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::core::StoreError;
use crate::memory::ConversationState;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>, StoreError>;

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;
}

/// 内存会话存储：保存序列化后的 JSON，读取时反序列化出独立副本
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)?;
        self.sessions
            .write()
            .await
            .insert(state.session_id.clone(), raw);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// SQLite 会话存储：一行一个会话，状态以 JSON 存放，时间戳单独成列便于查询
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// 打开（或创建）数据库文件并建表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池上执行数据库操作
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Join("sqlite connection poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT state, created_at, updated_at FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((raw, created_at, updated_at)) = row else {
                return Ok(None);
            };
            let mut state: ConversationState = serde_json::from_str(&raw)?;
            // 列上的时间戳为权威值
            state.created_at = decode_ts(&created_at)?;
            state.updated_at = decode_ts(&updated_at)?;
            Ok(Some(state))
        })
        .await
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)?;
        let session_id = state.session_id.clone();
        let user_id = state.user_id.clone();
        let created_at = encode_ts(&state.created_at);
        let updated_at = encode_ts(&state.updated_at);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, user_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![session_id, user_id, raw, created_at, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Message, StepSpec, TaskContext, UserProfile};

    fn sample_state() -> ConversationState {
        let mut state = ConversationState::new("s-1", "u-1");
        state.messages.push(Message::system("User: Sam"));
        state.messages.push(Message::user("find me a row"));
        state.user_profile = Some(UserProfile {
            display_name: "Sam".into(),
            ..Default::default()
        });
        state.active_task = Some(TaskContext::new(
            "find_exercise",
            vec![StepSpec {
                name: "lookup".into(),
                description: "find".into(),
                required_tools: vec!["find_exercise".into()],
                dependencies: vec![],
            }],
        ));
        state
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_delete() {
        let store = InMemorySessionStore::new();
        let state = sample_state();
        store.save(&state).await.unwrap();
        assert_eq!(store.load("s-1").await.unwrap(), Some(state));
        store.delete("s-1").await.unwrap();
        assert!(store.load("s-1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_sqlite_open_reports_unusable_parent_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let result = SqliteSessionStore::open(blocker.join("sessions.db"));
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trips_timestamps_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("nested/sessions.db")).unwrap();
        let state = sample_state();
        store.save(&state).await.unwrap();

        let loaded = store.load("s-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.created_at, state.created_at);
        assert_eq!(loaded.messages[1].timestamp, state.messages[1].timestamp);
    }

    #[tokio::test]
    async fn test_sqlite_store_upsert_keeps_created_at() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let mut state = sample_state();
        store.save(&state).await.unwrap();
        let created = state.created_at;

        state.messages.push(Message::assistant("Dumbbell Row it is."));
        state.touch();
        store.save(&state).await.unwrap();

        let loaded = store.load("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.created_at, created);
        assert_eq!(loaded.updated_at, state.updated_at);

        store.delete("s-1").await.unwrap();
        assert!(store.load("s-1").await.unwrap().is_none());
    }
}
