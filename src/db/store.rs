//! SQLite database store implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;
use super::sink::{ObservationSink, RecordSource};

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Timestamp layout used at rest. Lexicographic order equals time order.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Fixed delay between startup connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("invalid stored timestamp: {0}")]
    BadTimestamp(String),
    #[error("failed to connect after {attempts} attempt(s): {reason}")]
    Connect { attempts: u32, reason: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Observations staged for one transactional commit.
#[derive(Debug, Default)]
pub struct PendingBatch {
    rows: Vec<Observation>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Open the store, retrying up to `retries` times with a fixed delay.
    ///
    /// Only meant for startup; once connected, failures surface to the caller.
    pub async fn connect<P: AsRef<Path>>(path: P, retries: u32) -> Result<Self, DbError> {
        let attempts = retries.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match Self::new(path.as_ref()) {
                Ok(store) => return Ok(store),
                Err(e) => {
                    tracing::warn!(
                        "Store: connection attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    reason = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }

        Err(DbError::Connect { attempts, reason })
    }

    /// Run embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Insert observations inside a single transaction.
    pub fn insert_observations(&self, observations: &[Observation]) -> Result<usize, DbError> {
        if observations.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO uptime_log (endpoint, observed_at, source, is_up) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for o in observations {
                stmt.execute(params![
                    o.endpoint,
                    format_db_time(o.observed_at),
                    o.source,
                    o.is_up,
                ])?;
            }
        }

        tx.commit()?;
        Ok(observations.len())
    }

    /// Count stored observations.
    pub fn count_observations(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM uptime_log", [], |r| r.get(0))?)
    }
}

#[async_trait]
impl ObservationSink for Store {
    type Batch = PendingBatch;

    async fn begin_batch(&self) -> Result<PendingBatch, DbError> {
        Ok(PendingBatch::default())
    }

    async fn stage(&self, batch: &mut PendingBatch, observation: Observation) -> Result<(), DbError> {
        batch.rows.push(observation);
        Ok(())
    }

    async fn commit(&self, batch: PendingBatch) -> Result<usize, DbError> {
        self.insert_observations(&batch.rows)
    }

    async fn rollback(&self, batch: PendingBatch) {
        if !batch.is_empty() {
            tracing::warn!("Store: discarding {} staged observations", batch.len());
        }
    }
}

impl RecordSource for Store {
    fn get_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        endpoints: &[String],
    ) -> Result<Vec<Observation>, DbError> {
        let mut sql = String::from(
            "SELECT endpoint, observed_at, source, is_up FROM uptime_log
             WHERE observed_at >= ?1 AND observed_at <= ?2",
        );
        if !endpoints.is_empty() {
            let placeholders: Vec<String> =
                (0..endpoints.len()).map(|i| format!("?{}", i + 3)).collect();
            sql.push_str(&format!(" AND endpoint IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY endpoint ASC, source ASC, observed_at ASC");

        let mut values = vec![format_db_time(from), format_db_time(to)];
        values.extend(endpoints.iter().cloned());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(endpoint, time_str, source, is_up)| {
                let observed_at =
                    parse_db_time(&time_str).ok_or(DbError::BadTimestamp(time_str))?;
                Ok(Observation {
                    endpoint,
                    observed_at,
                    source,
                    is_up,
                })
            })
            .collect()
    }
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
