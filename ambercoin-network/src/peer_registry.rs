use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;

/// `(host, downtime, last_seen)` table: the set of peers this node knows
/// about and whether they're currently considered reachable.
pub struct PeerRegistry {
    pool: SqlitePool,
    downtime_threshold: u32,
}

impl PeerRegistry {
    pub async fn connect(pool: SqlitePool, downtime_threshold: u32) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                host TEXT PRIMARY KEY,
                downtime INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool,
            downtime_threshold,
        })
    }

    pub async fn add_peer(&self, host: &str, now: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO peers (host, downtime, last_seen) VALUES (?1, 0, ?2)
             ON CONFLICT(host) DO UPDATE SET last_seen = excluded.last_seen",
        )
        .bind(host)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_downtime(&self, host: &str) -> Result<u32> {
        sqlx::query("UPDATE peers SET downtime = downtime + 1 WHERE host = ?1")
            .bind(host)
            .execute(&self.pool)
            .await?;
        let row: Option<(i64,)> = sqlx::query_as("SELECT downtime FROM peers WHERE host = ?1")
            .bind(host)
            .fetch_optional(&self.pool)
            .await?;
        let downtime = row.map(|r| r.0 as u32).unwrap_or(0);
        if downtime > self.downtime_threshold {
            debug!(host, downtime, "peer registry: peer crossed downtime threshold");
        }
        Ok(downtime)
    }

    pub async fn reset_downtime(&self, host: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE peers SET downtime = 0, last_seen = ?2 WHERE host = ?1")
            .bind(host)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_online(&self, host: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT downtime FROM peers WHERE host = ?1")
            .bind(host)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some((downtime,)) => (downtime as u32) <= self.downtime_threshold,
            None => false,
        })
    }

    /// Up to `max_peers`, lowest downtime first — the set broadcasts and
    /// sync attempts should prefer.
    pub async fn get_all_peers(&self, max_peers: u32) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT host FROM peers WHERE downtime <= ?1 ORDER BY downtime ASC, last_seen DESC LIMIT ?2",
        )
        .bind(self.downtime_threshold as i64)
        .bind(max_peers as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
