//! Per-site logger.
//!
//! Every entry goes three ways: a `tracing` event tagged with the site's
//! host, a bounded in-memory ring, and (when enabled) the site's `logs`
//! database, where a writer task keeps the newest `capacity` rows.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::TenantDatabases;

/// Logical database holding persisted log entries.
pub const LOG_DATABASE: &str = "logs";

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

pub struct TenantLogger {
    host: String,
    capacity: usize,
    ring: Mutex<VecDeque<LogEntry>>,
    tx: Mutex<Option<mpsc::Sender<LogEntry>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl TenantLogger {
    /// In-memory only logger.
    pub fn new(host: impl Into<String>, capacity: usize) -> Self {
        Self {
            host: host.into(),
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
            tx: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Logger that also persists entries to the site's `logs` database.
    pub fn persistent(host: impl Into<String>, capacity: usize, db: TenantDatabases) -> Self {
        let logger = Self::new(host, capacity);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_writer(db, rx, logger.capacity));
        *logger.tx.lock().expect("logger mutex poisoned") = Some(tx);
        *logger.writer.lock().expect("logger mutex poisoned") = Some(handle);
        logger
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(LogLevel::Debug, message, fields);
    }

    pub fn info(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(LogLevel::Info, message, fields);
    }

    pub fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(LogLevel::Warn, message, fields);
    }

    pub fn error(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(LogLevel::Error, message, fields);
    }

    pub fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        let mut rendered = String::new();
        for (k, v) in fields {
            let _ = write!(rendered, "{}={} ", k, v);
        }
        let rendered = rendered.trim_end();
        match level {
            LogLevel::Debug => tracing::debug!(host = %self.host, fields = %rendered, "{}", message),
            LogLevel::Info => tracing::info!(host = %self.host, fields = %rendered, "{}", message),
            LogLevel::Warn => tracing::warn!(host = %self.host, fields = %rendered, "{}", message),
            LogLevel::Error => tracing::error!(host = %self.host, fields = %rendered, "{}", message),
        }

        let entry = LogEntry {
            time: Utc::now(),
            level,
            message: message.to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };

        if let Some(tx) = self.tx.lock().expect("logger mutex poisoned").as_ref() {
            if tx.try_send(entry.clone()).is_err() {
                tracing::debug!(host = %self.host, "Log writer backlog full, entry kept in memory only");
            }
        }

        let mut ring = self.ring.lock().expect("logger mutex poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Up to `limit` newest entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let ring = self.ring.lock().expect("logger mutex poisoned");
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Stop the writer after it has flushed everything queued so far.
    pub async fn close(&self) {
        self.tx.lock().expect("logger mutex poisoned").take();
        let handle = self.writer.lock().expect("logger mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_writer(db: TenantDatabases, mut rx: mpsc::Receiver<LogEntry>, capacity: usize) {
    let mut schema_ready = false;
    while let Some(entry) = rx.recv().await {
        let pool = match db.get(LOG_DATABASE).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(host = %db.host(), error = %e, "Log database unavailable");
                continue;
            }
        };
        if !schema_ready {
            let created = sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS log_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    time TEXT NOT NULL,
                    level TEXT NOT NULL,
                    message TEXT NOT NULL,
                    fields TEXT NOT NULL
                )
                "#,
            )
            .execute(&pool)
            .await;
            if let Err(e) = created {
                tracing::warn!(host = %db.host(), error = %e, "Failed to create log table");
                continue;
            }
            schema_ready = true;
        }

        let fields = serde_json::to_string(&entry.fields).unwrap_or_else(|_| "{}".to_string());
        let inserted = sqlx::query("INSERT INTO log_entries (time, level, message, fields) VALUES (?, ?, ?, ?)")
            .bind(entry.time.to_rfc3339())
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(fields)
            .execute(&pool)
            .await;
        if let Err(e) = inserted {
            tracing::warn!(host = %db.host(), error = %e, "Failed to persist log entry");
            continue;
        }

        let trimmed = sqlx::query("DELETE FROM log_entries WHERE id <= (SELECT MAX(id) FROM log_entries) - ?")
            .bind(capacity as i64)
            .execute(&pool)
            .await;
        if let Err(e) = trimmed {
            tracing::debug!(host = %db.host(), error = %e, "Failed to trim log entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::DbCache;
    use crate::sandbox::PathValidator;

    #[test]
    fn ring_keeps_newest_entries() {
        let logger = TenantLogger::new("a.test", 3);
        for i in 0..5 {
            logger.info(&format!("entry {}", i), &[("n", i.to_string().as_str())]);
        }
        let recent = logger.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "entry 2");
        assert_eq!(recent[2].fields["n"], "4");
        assert_eq!(logger.recent(1)[0].message, "entry 4");
    }

    #[tokio::test]
    async fn persists_a_bounded_ring() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sites/a.test")).unwrap();
        let validator = Arc::new(PathValidator::new(dir.path()).unwrap());
        let cache = Arc::new(DbCache::new(validator, "sites", DatabaseConfig::default()));
        let db = TenantDatabases::new(Arc::clone(&cache), "a.test");

        let logger = TenantLogger::persistent("a.test", 2, db.clone());
        logger.warn("one", &[]);
        logger.error("two", &[("path", "/x")]);
        logger.info("three", &[]);
        logger.close().await;

        let pool = db.get(LOG_DATABASE).await.unwrap();
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT level, message FROM log_entries ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows, vec![("error".into(), "two".into()), ("info".into(), "three".into())]);
    }
}
