use crate::error::{Result, StorageError};
use crate::StorageEngine;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use telemon_common::types::{MetricKind, MetricRecord, MetricValue};

const METRICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    kind TEXT NOT NULL CHECK (kind IN ('gauge', 'counter')),
    name TEXT NOT NULL,
    gauge REAL,
    counter INTEGER,
    PRIMARY KEY (kind, name)
);
";

// Writes the final value of a row. Merging happens in Rust under the
// connection lock so counter overflow is caught before anything is stored.
// Gauge rows keep `counter` NULL and counter rows keep `gauge` NULL.
const SET_SQL: &str = "
INSERT INTO metrics (kind, name, gauge, counter) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (kind, name) DO UPDATE SET
    gauge = excluded.gauge,
    counter = excluded.counter
";

const SELECT_SQL: &str = "SELECT gauge, counter FROM metrics WHERE kind = ?1 AND name = ?2";

/// SQLite-backed storage; one row per `(kind, name)`.
pub struct SqliteStorageEngine {
    conn: Mutex<Connection>,
    in_memory: bool,
}

impl SqliteStorageEngine {
    /// Opens `path`, or a private in-memory database for `:memory:`.
    pub fn open(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let conn = if in_memory {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn
        };
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        tracing::debug!(path, "Opened SQLite database");
        Ok(Self {
            conn: Mutex::new(conn),
            in_memory,
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn select_in(conn: &Connection, kind: MetricKind, name: &str) -> Result<Option<MetricValue>> {
    let mut stmt = conn.prepare_cached(SELECT_SQL)?;
    let row: Option<(Option<f64>, Option<i64>)> = stmt
        .query_row(rusqlite::params![kind.as_str(), name], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    row.map(|(gauge, counter)| decode_value(kind, gauge, counter))
        .transpose()
}

fn set_in(tx: &Transaction<'_>, record: &MetricRecord) -> Result<()> {
    let (gauge, counter) = match record.value {
        MetricValue::Gauge(v) => (Some(v), None),
        MetricValue::Counter(d) => (None, Some(d)),
    };
    tx.prepare_cached(SET_SQL)?.execute(rusqlite::params![
        record.kind().as_str(),
        &record.name,
        gauge,
        counter
    ])?;
    Ok(())
}

fn upsert_in(tx: &Transaction<'_>, record: &MetricRecord) -> Result<MetricRecord> {
    let value = match select_in(tx, record.kind(), &record.name)? {
        Some(current) => current.merge(record.value)?,
        None => record.value,
    };
    let merged = MetricRecord {
        name: record.name.clone(),
        value,
    };
    set_in(tx, &merged)?;
    Ok(merged)
}

fn decode_value(kind: MetricKind, gauge: Option<f64>, counter: Option<i64>) -> Result<MetricValue> {
    match (kind, gauge, counter) {
        (MetricKind::Gauge, Some(v), _) => Ok(MetricValue::Gauge(v)),
        (MetricKind::Counter, _, Some(d)) => Ok(MetricValue::Counter(d)),
        (MetricKind::Gauge, None, _) => Err(StorageError::UnexpectedColumnType {
            column: "gauge",
            expected: "REAL",
        }),
        (MetricKind::Counter, _, None) => Err(StorageError::UnexpectedColumnType {
            column: "counter",
            expected: "INTEGER",
        }),
    }
}

impl StorageEngine for SqliteStorageEngine {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn init(&self) -> Result<()> {
        self.lock_conn().execute_batch(METRICS_SCHEMA)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.in_memory {
            self.lock_conn()
                .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.lock_conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn upsert(&self, record: &MetricRecord) -> Result<MetricRecord> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let merged = upsert_in(&tx, record)?;
        tx.commit()?;
        Ok(merged)
    }

    fn mass_upsert(&self, records: &[MetricRecord]) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        for record in records {
            upsert_in(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn replace_all(&self, records: &[MetricRecord]) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        for record in records {
            set_in(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, kind: MetricKind, name: &str) -> Result<MetricRecord> {
        let conn = self.lock_conn();
        let value = select_in(&conn, kind, name)?.ok_or_else(|| StorageError::NotFound {
            kind,
            name: name.to_string(),
        })?;
        Ok(MetricRecord {
            name: name.to_string(),
            value,
        })
    }

    fn get_all(&self) -> Result<Vec<MetricRecord>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare_cached("SELECT kind, name, gauge, counter FROM metrics ORDER BY kind, name")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, name, gauge, counter) = row?;
            let kind: MetricKind = kind.parse()?;
            records.push(MetricRecord {
                value: decode_value(kind, gauge, counter)?,
                name,
            });
        }
        Ok(records)
    }
}
