//! 消息存储
//!
//! 持久化契约：add / update / delete / 按会话读取 / 「上次会话」指针 / 清空。
//! 全部按 id 幂等（add 已存在的 id 等同 update，且保持原插入顺序）；loading 消息一律不落盘。
//! 提供内存实现（有序表，按 id 索引）与 SQLite 实现（rusqlite，消息体存 JSON）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::session::Message;

/// 消息存储接口
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加消息；id 已存在时覆盖内容
    async fn add_message(&self, message: &Message) -> anyhow::Result<()>;

    /// 按 id 更新消息；id 不存在时插入
    async fn update_message(&self, message: &Message) -> anyhow::Result<()>;

    /// 按 id 删除，不存在时忽略
    async fn delete_message(&self, id: &str) -> anyhow::Result<()>;

    /// 按插入顺序返回会话内全部消息
    async fn get_messages_by_session_id(&self, session_id: &str) -> anyhow::Result<Vec<Message>>;

    async fn get_last_session_id(&self) -> anyhow::Result<Option<String>>;

    async fn set_last_session_id(&self, session_id: &str) -> anyhow::Result<()>;

    async fn clear_all_messages(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    order: Vec<String>,
    by_id: HashMap<String, Message>,
    last_session: Option<String>,
}

impl MemoryInner {
    fn upsert(&mut self, message: &Message) {
        if !self.by_id.contains_key(&message.id) {
            self.order.push(message.id.clone());
        }
        self.by_id.insert(message.id.clone(), message.clone());
    }
}

/// 内存存储：按插入顺序排列、按 id 索引
#[derive(Default, Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn add_message(&self, message: &Message) -> anyhow::Result<()> {
        if message.is_loading() {
            tracing::debug!(id = %message.id, "skip persisting loading message");
            return Ok(());
        }
        self.inner.write().await.upsert(message);
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> anyhow::Result<()> {
        self.add_message(message).await
    }

    async fn delete_message(&self, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if inner.by_id.remove(id).is_some() {
            inner.order.retain(|m| m != id);
        }
        Ok(())
    }

    async fn get_messages_by_session_id(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_last_session_id(&self) -> anyhow::Result<Option<String>> {
        Ok(self.inner.read().await.last_session.clone())
    }

    async fn set_last_session_id(&self, session_id: &str) -> anyhow::Result<()> {
        self.inner.write().await.last_session = Some(session_id.to_string());
        Ok(())
    }

    async fn clear_all_messages(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.order.clear();
        inner.by_id.clear();
        Ok(())
    }
}

const LAST_SESSION_KEY: &str = "last_session_id";

/// SQLite 存储：messages 表按 rowid 保序，upsert 不改变 rowid
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> anyhow::Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection poisoned"))?;
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn add_message(&self, message: &Message) -> anyhow::Result<()> {
        if message.is_loading() {
            tracing::debug!(id = %message.id, "skip persisting loading message");
            return Ok(());
        }
        let body = serde_json::to_string(message)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body",
                params![message.id, message.session_id, body],
            )
        })?;
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> anyhow::Result<()> {
        self.add_message(message).await
    }

    async fn delete_message(&self, id: &str) -> anyhow::Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM messages WHERE id = ?1", params![id]))?;
        Ok(())
    }

    async fn get_messages_by_session_id(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        let bodies: Vec<String> = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM messages WHERE session_id = ?1 ORDER BY rowid ASC")?;
            let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
            rows.collect()
        })?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(anyhow::Error::from))
            .collect()
    }

    async fn get_last_session_id(&self) -> anyhow::Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![LAST_SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn set_last_session_id(&self, session_id: &str) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![LAST_SESSION_KEY, session_id],
            )
        })?;
        Ok(())
    }

    async fn clear_all_messages(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM messages", []))?;
        Ok(())
    }
}
