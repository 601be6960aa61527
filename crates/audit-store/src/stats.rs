use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::store::{ts, AuditStore, StoreError};

/// One group-by bucket.
#[derive(Debug, Clone, Serialize)]
pub struct CountRow {
    pub key: String,
    pub count: i64,
}

/// The aggregate view backing the dashboard, all computed since one cutoff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub since: DateTime<Utc>,
    pub total: i64,
    pub approved: i64,
    pub denied: i64,
    pub by_service: Vec<CountRow>,
    pub by_method: Vec<CountRow>,
    pub by_hour: Vec<CountRow>,
}

impl AuditStore {
    /// Run every dashboard aggregation since `since`.
    pub async fn dashboard_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<DashboardStats, StoreError> {
        let conn = self.lock().await;
        let cutoff = ts(since);

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE timestamp >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        let approved: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE timestamp >= ?1 AND approved = 1",
            params![cutoff],
            |row| row.get(0),
        )?;

        let group = |sql: &str| -> Result<Vec<CountRow>, StoreError> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok(CountRow {
                    key: row.get::<_, String>(0)?,
                    count: row.get::<_, i64>(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        };

        let by_service = group(
            "SELECT service, COUNT(*) FROM requests
             WHERE timestamp >= ?1 GROUP BY service ORDER BY COUNT(*) DESC",
        )?;
        let by_method = group(
            "SELECT method, COUNT(*) FROM requests
             WHERE timestamp >= ?1 GROUP BY method ORDER BY COUNT(*) DESC",
        )?;
        let by_hour = group(
            "SELECT strftime('%H', timestamp), COUNT(*) FROM requests
             WHERE timestamp >= ?1 GROUP BY 1 ORDER BY 1",
        )?;

        Ok(DashboardStats {
            since,
            total,
            approved,
            denied: total - approved,
            by_service,
            by_method,
            by_hour,
        })
    }
}
