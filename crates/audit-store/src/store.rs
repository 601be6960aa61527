use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::record::{ApprovalRow, NewRequest, OverrideRow, PairedApprover, RequestRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored timestamp '{0}' is not RFC 3339")]
    BadTimestamp(String),
}

/// Cheap, cloneable handle to the gateway database.
#[derive(Clone)]
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
    /// Open (or create) the database at `path`, switch on WAL journaling,
    /// and run the additive schema migration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    // -- requests -----------------------------------------------------------

    /// Append one request row. Returns the assigned row id.
    pub async fn record_request(&self, req: NewRequest) -> Result<i64, StoreError> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO requests
               (timestamp, service, method, path, approved, response_status,
                agent_ip, request_body, response_body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ts(Utc::now()),
                req.service,
                req.method,
                req.path,
                req.approved as i64,
                req.response_status.map(|s| s as i64),
                req.agent_ip,
                req.request_body,
                req.response_body,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recent `limit` request rows, newest first.
    pub async fn recent_requests(&self, limit: u32) -> Result<Vec<RequestRecord>, StoreError> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, service, method, path, approved, response_status,
                    agent_ip, request_body, response_body
             FROM requests ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, service, method, path, approved, status, agent_ip, req_body, resp_body) =
                row?;
            out.push(RequestRecord {
                id,
                timestamp: parse_ts(&ts)?,
                service,
                method,
                path,
                approved: approved != 0,
                response_status: status.map(|s| s as u16),
                agent_ip,
                request_body: req_body,
                response_body: resp_body,
            });
        }
        Ok(out)
    }

    // -- approvals ----------------------------------------------------------

    /// Persist a freshly granted approval.
    pub async fn insert_approval(
        &self,
        service: &str,
        approved_by: &str,
        ttl_seconds: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO approvals (timestamp, service, approved_by, ttl_seconds, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ts(Utc::now()),
                service,
                approved_by,
                ttl_seconds,
                ts(expires_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark every live grant for `service` revoked. Returns the number of
    /// rows touched.
    pub async fn revoke_service(&self, service: &str) -> Result<usize, StoreError> {
        let conn = self.lock().await;
        let n = conn.execute(
            "UPDATE approvals SET revoked = 1
             WHERE service = ?1 AND revoked = 0 AND expires_at > ?2",
            params![service, ts(Utc::now())],
        )?;
        Ok(n)
    }

    /// Delete approval rows whose expiry has passed. Startup GC.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock().await;
        let n = conn.execute(
            "DELETE FROM approvals WHERE expires_at <= ?1",
            params![ts(now)],
        )?;
        if n > 0 {
            debug!(deleted = n, "expired approval rows removed");
        }
        Ok(n)
    }

    /// Non-revoked, non-expired approvals, newest first. Hydration keeps the
    /// first row it sees per service.
    pub async fn live_approvals(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRow>, StoreError> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, service, approved_by, ttl_seconds, expires_at, revoked
             FROM approvals
             WHERE revoked = 0 AND expires_at > ?1
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![ts(now)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, service, approved_by, ttl_seconds, expires_at, revoked) = row?;
            out.push(ApprovalRow {
                id,
                timestamp: parse_ts(&ts)?,
                service,
                approved_by,
                ttl_seconds,
                expires_at: parse_ts(&expires_at)?,
                revoked: revoked != 0,
            });
        }
        Ok(out)
    }

    // -- paired approvers ---------------------------------------------------

    pub async fn pair_approver(&self, chat_id: i64, name: &str) -> Result<(), StoreError> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO paired_approvers (chat_id, name, paired_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET name = excluded.name",
            params![chat_id, name, ts(Utc::now())],
        )?;
        Ok(())
    }

    pub async fn unpair_approver(&self, chat_id: i64) -> Result<bool, StoreError> {
        let conn = self.lock().await;
        let n = conn.execute(
            "DELETE FROM paired_approvers WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(n > 0)
    }

    pub async fn is_paired(&self, chat_id: i64) -> Result<bool, StoreError> {
        let conn = self.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT chat_id FROM paired_approvers WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub async fn list_approvers(&self) -> Result<Vec<PairedApprover>, StoreError> {
        let conn = self.lock().await;
        let mut stmt =
            conn.prepare("SELECT chat_id, name, paired_at FROM paired_approvers ORDER BY paired_at")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (chat_id, name, paired_at) = row?;
            out.push(PairedApprover {
                chat_id,
                name,
                paired_at: parse_ts(&paired_at)?,
            });
        }
        Ok(out)
    }

    // -- service overrides --------------------------------------------------

    pub async fn upsert_override(
        &self,
        service_name: &str,
        config_json: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock().await;
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO service_overrides (service_name, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(service_name) DO UPDATE SET
                config_json = excluded.config_json,
                updated_at = excluded.updated_at",
            params![service_name, config_json, now],
        )?;
        Ok(())
    }

    pub async fn get_override(&self, service_name: &str) -> Result<Option<OverrideRow>, StoreError> {
        let conn = self.lock().await;
        let row = conn
            .query_row(
                "SELECT service_name, config_json, created_at, updated_at
                 FROM service_overrides WHERE service_name = ?1",
                params![service_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(service_name, config_json, created_at, updated_at)| {
            Ok(OverrideRow {
                service_name,
                config_json,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            })
        })
        .transpose()
    }

    pub async fn delete_override(&self, service_name: &str) -> Result<bool, StoreError> {
        let conn = self.lock().await;
        let n = conn.execute(
            "DELETE FROM service_overrides WHERE service_name = ?1",
            params![service_name],
        )?;
        Ok(n > 0)
    }

    pub async fn list_overrides(&self) -> Result<Vec<OverrideRow>, StoreError> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT service_name, config_json, created_at, updated_at
             FROM service_overrides ORDER BY service_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (service_name, config_json, created_at, updated_at) = row?;
            out.push(OverrideRow {
                service_name,
                config_json,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            });
        }
        Ok(out)
    }
}

/// Canonical timestamp encoding. One fixed shape keeps lexicographic
/// comparison and SQLite's strftime in agreement across every row.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::BadTimestamp(raw.to_string()))
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // WAL suits the single-writer, many-point-reader workload.
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    debug!(%mode, "journal mode set");
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS requests (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT NOT NULL,
            service         TEXT NOT NULL,
            method          TEXT NOT NULL,
            path            TEXT NOT NULL,
            approved        INTEGER NOT NULL,
            response_status INTEGER,
            agent_ip        TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS approvals (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT NOT NULL,
            service     TEXT NOT NULL,
            approved_by TEXT NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            expires_at  TEXT NOT NULL,
            revoked     INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS paired_approvers (
            chat_id   INTEGER PRIMARY KEY,
            name      TEXT NOT NULL,
            paired_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS service_overrides (
            service_name TEXT PRIMARY KEY,
            config_json  TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp);
        CREATE INDEX IF NOT EXISTS idx_approvals_service ON approvals(service);",
    )?;

    // Additive evolution: payload-capture columns arrived after the base
    // schema, so databases created before them get the columns here.
    ensure_column(conn, "requests", "request_body", "TEXT")?;
    ensure_column(conn, "requests", "response_body", "TEXT")?;

    info!("audit store schema ready");
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, ddl_type: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}"),
            [],
        )?;
        info!(table, column, "added column during migration");
    }
    Ok(())
}
