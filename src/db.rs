//! Small persistent key-value store for long-lived settings and the
//! destination account's access token.

use anyhow::{anyhow, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const CLIENT_ID_KEY: &str = "spotify_client_id";
pub const ACCESS_TOKEN_KEY: &str = "spotify_access_token";
pub const SAVED_BLEND_URL_KEY: &str = "saved_blend_url";
pub const SAVED_FRIEND_USERNAME_KEY: &str = "saved_friend_username";
pub const SAVED_TARGET_URL_KEY: &str = "saved_target_url";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);";

/// Get/set string storage with no schema versioning.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn get_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1 LIMIT 1")?;
    let row = stmt
        .query_row(params![key], |r| r.get::<_, String>(0))
        .optional()?;
    Ok(row)
}

pub fn set_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

pub fn remove_value(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    Ok(())
}

/// SQLite-backed store behind an r2d2 connection pool.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).build(manager)?;
        run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        get_value(&*self.pool.get()?, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        set_value(&*self.pool.get()?, key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        remove_value(&*self.pool.get()?, key)
    }
}

/// Process-local store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        values.remove(key);
        Ok(())
    }
}

/// Read a key off the async executor.
pub async fn load(store: &Arc<dyn KvStore>, key: &str) -> Result<Option<String>> {
    let store = store.clone();
    let key = key.to_string();
    tokio::task::spawn_blocking(move || store.get(&key)).await?
}

/// Write a key off the async executor.
pub async fn save(store: &Arc<dyn KvStore>, key: &str, value: &str) -> Result<()> {
    let store = store.clone();
    let key = key.to_string();
    let value = value.to_string();
    tokio::task::spawn_blocking(move || store.set(&key, &value)).await?
}
