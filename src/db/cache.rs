//! Per-(site, database) SQLite pool cache.
//!
//! # Responsibilities
//! - Open `sites/<host>/databases/sqlite/<name>.db` through the path validator
//! - Probe liveness on every hand-out; drop and reopen dead pools
//! - Evict pools unused for longer than `max_age` from a background sweeper
//! - Close everything on shutdown
//!
//! # Design Decisions
//! - The map sits behind a reader/writer lock; hits only take the read side
//! - `last_used` is refreshed best effort under a small per-entry mutex
//! - Two tasks opening the same key concurrently keep the first pool

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Connection;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::config::DatabaseConfig;
use crate::observability::metrics;
use crate::sandbox::{PathError, PathValidator};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database name {0:?}")]
    InvalidName(String),

    #[error("database path refused: {0}")]
    Path(#[from] PathError),

    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),
}

type Key = (String, String);

struct DbEntry {
    pool: SqlitePool,
    last_used: Mutex<Instant>,
}

impl DbEntry {
    fn touch(&self) {
        *self.last_used.lock().expect("db entry mutex poisoned") = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock().expect("db entry mutex poisoned"))
    }
}

/// Shared cache of SQLite pools for every site.
pub struct DbCache {
    validator: Arc<PathValidator>,
    sites_dir: String,
    config: DatabaseConfig,
    entries: RwLock<HashMap<Key, Arc<DbEntry>>>,
}

impl DbCache {
    pub fn new(validator: Arc<PathValidator>, sites_dir: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            validator,
            sites_dir: sites_dir.into(),
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A live pool for `(host, name)`, opening one if needed.
    pub async fn get(&self, host: &str, name: &str) -> Result<SqlitePool, DbError> {
        validate_name(name)?;
        let key = (host.to_string(), name.to_string());

        let existing = self.entries.read().await.get(&key).cloned();
        if let Some(entry) = existing {
            if ping(&entry.pool).await {
                entry.touch();
                return Ok(entry.pool.clone());
            }
            tracing::warn!(host = %host, db = %name, "Database liveness probe failed, reopening");
            self.evict(&key, &entry).await;
        }

        let pool = self.open(host, name).await?;

        let mut entries = self.entries.write().await;
        if let Some(raced) = entries.get(&key) {
            raced.touch();
            let winner = raced.pool.clone();
            drop(entries);
            pool.close().await;
            return Ok(winner);
        }
        entries.insert(
            key,
            Arc::new(DbEntry {
                pool: pool.clone(),
                last_used: Mutex::new(Instant::now()),
            }),
        );
        metrics::set_db_connections(entries.len());
        Ok(pool)
    }

    async fn evict(&self, key: &Key, stale: &Arc<DbEntry>) {
        let removed = {
            let mut entries = self.entries.write().await;
            match entries.get(key) {
                Some(current) if Arc::ptr_eq(current, stale) => {
                    let removed = entries.remove(key);
                    metrics::set_db_connections(entries.len());
                    removed
                }
                _ => None,
            }
        };
        if let Some(entry) = removed {
            entry.pool.close().await;
        }
    }

    async fn open(&self, host: &str, name: &str) -> Result<SqlitePool, DbError> {
        let dir = format!("{}/{}/databases/sqlite", self.sites_dir, host);
        self.validator.mkdir(&dir).await?;
        let path = self.validator.resolve(&format!("{}/{}.db", dir, name))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_open)
            .min_connections(self.config.max_idle.min(self.config.max_open))
            .max_lifetime(Duration::from_secs(self.config.max_lifetime_secs))
            .idle_timeout(Duration::from_secs(self.config.idle_timeout_secs))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5)),
            )
            .await?;

        tracing::info!(host = %host, db = %name, "Opened database");
        Ok(pool)
    }

    /// Close every pool idle for longer than `max_age`. Returns how many
    /// were closed.
    pub async fn sweep(&self) -> usize {
        self.sweep_older_than(Duration::from_secs(self.config.max_age_secs)).await
    }

    async fn sweep_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(Key, Arc<DbEntry>)> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<Key> = entries
                .iter()
                .filter(|(_, entry)| entry.idle_for(now) > max_age)
                .map(|(key, _)| key.clone())
                .collect();
            let removed = keys
                .into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect();
            metrics::set_db_connections(entries.len());
            removed
        };

        for ((host, name), entry) in &expired {
            tracing::debug!(host = %host, db = %name, "Closing idle database");
            entry.pool.close().await;
        }
        expired.len()
    }

    /// Sweep every `sweep_interval_secs` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = self.sweep().await;
                    if closed > 0 {
                        tracing::info!(closed, "Evicted idle databases");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Close every cached pool.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<DbEntry>> = self.entries.write().await.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.pool.close().await;
        }
        metrics::set_db_connections(0);
        tracing::info!(closed = drained.len(), "Closed all databases");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

async fn ping(pool: &SqlitePool) -> bool {
    if pool.is_closed() {
        return false;
    }
    match pool.acquire().await {
        Ok(mut conn) => conn.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// Logical database names are plain identifiers.
fn validate_name(name: &str) -> Result<(), DbError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(DbError::InvalidName(name.to_string()))
    }
}

/// One site's view of the cache.
#[derive(Clone)]
pub struct TenantDatabases {
    cache: Arc<DbCache>,
    host: String,
}

impl TenantDatabases {
    pub fn new(cache: Arc<DbCache>, host: impl Into<String>) -> Self {
        Self {
            cache,
            host: host.into(),
        }
    }

    pub async fn get(&self, name: &str) -> Result<SqlitePool, DbError> {
        self.cache.get(&self.host, name).await
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, Arc<DbCache>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sites/a.test")).unwrap();
        let validator = Arc::new(PathValidator::new(dir.path()).unwrap());
        let config = DatabaseConfig {
            max_open: 2,
            max_idle: 0,
            ..DatabaseConfig::default()
        };
        (dir, Arc::new(DbCache::new(validator, "sites", config)))
    }

    #[tokio::test]
    async fn opens_once_and_reuses() {
        let (dir, cache) = cache();
        let first = cache.get("a.test", "main").await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&first).await.unwrap();
        let second = cache.get("a.test", "main").await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(&second).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(dir.path().join("sites/a.test/databases/sqlite/main.db").exists());
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let (_dir, cache) = cache();
        assert!(matches!(cache.get("a.test", "../x").await, Err(DbError::InvalidName(_))));
        assert!(matches!(cache.get("a.test", "").await, Err(DbError::InvalidName(_))));
        assert!(matches!(cache.get("../..", "x").await, Err(DbError::Path(_))));
    }

    #[tokio::test]
    async fn closed_pool_is_reopened() {
        let (_dir, cache) = cache();
        let first = cache.get("a.test", "main").await.unwrap();
        first.close().await;
        let second = cache.get("a.test", "main").await.unwrap();
        assert!(!second.is_closed());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_and_close_all() {
        let (_dir, cache) = cache();
        cache.get("a.test", "one").await.unwrap();
        cache.get("a.test", "two").await.unwrap();
        assert_eq!(cache.sweep().await, 0);
        assert_eq!(cache.sweep_older_than(Duration::ZERO).await, 2);
        assert!(cache.is_empty().await);

        let pool = cache.get("a.test", "one").await.unwrap();
        cache.close_all().await;
        assert!(pool.is_closed());
        assert!(cache.is_empty().await);
    }
}
