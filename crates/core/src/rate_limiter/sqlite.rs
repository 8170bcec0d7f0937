//! SQLite-backed slot store shared by every process opening the same file.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;

use super::slots::{SlotStore, SlotStoreError};

fn db(e: rusqlite::Error) -> SlotStoreError {
    SlotStoreError::Database(e.to_string())
}

pub struct SqliteSlotStore {
    conn: Mutex<Connection>,
}

impl SqliteSlotStore {
    pub fn new(path: &Path) -> Result<Self, SlotStoreError> {
        let conn = Connection::open(path).map_err(db)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, SlotStoreError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SlotStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_slots (
                user_id TEXT PRIMARY KEY,
                next_available_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db)
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        spacing: Duration,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, SlotStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        // All SET expressions read the pre-update row
        let reserved_ms: i64 = tx
            .query_row(
                r#"
                INSERT INTO rate_limit_slots (user_id, next_available_ms, expires_at_ms)
                VALUES (?1, ?2 + ?3, ?2 + ?3 + ?4)
                ON CONFLICT(user_id) DO UPDATE SET
                    next_available_ms =
                        (CASE WHEN expires_at_ms <= ?2 THEN ?2 ELSE MAX(next_available_ms, ?2) END) + ?3,
                    expires_at_ms =
                        (CASE WHEN expires_at_ms <= ?2 THEN ?2 ELSE MAX(next_available_ms, ?2) END) + ?3 + ?4
                RETURNING next_available_ms - ?3
                "#,
                params![
                    user_id,
                    now.timestamp_millis(),
                    spacing.num_milliseconds(),
                    ttl.num_milliseconds(),
                ],
                |row| row.get(0),
            )
            .map_err(db)?;

        tx.commit().map_err(db)?;

        Utc.timestamp_millis_opt(reserved_ms)
            .single()
            .ok_or_else(|| SlotStoreError::Database(format!("invalid slot time {}", reserved_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[tokio::test]
    async fn test_reservations_are_spaced() {
        let store = SqliteSlotStore::in_memory().unwrap();
        let now = at_millis(1_700_000_000_000);
        let spacing = Duration::seconds(15);
        let ttl = Duration::hours(1);

        assert_eq!(store.reserve("alice", now, spacing, ttl).await.unwrap(), now);
        assert_eq!(
            store.reserve("alice", now, spacing, ttl).await.unwrap(),
            now + spacing
        );
        assert_eq!(store.reserve("bob", now, spacing, ttl).await.unwrap(), now);
    }

    #[tokio::test]
    async fn test_expired_slot_is_ignored() {
        let store = SqliteSlotStore::in_memory().unwrap();
        let now = at_millis(1_700_000_000_000);
        let ttl = Duration::seconds(1);

        store
            .reserve("alice", now, Duration::hours(2), ttl)
            .await
            .unwrap();
        let later = now + Duration::hours(3);
        assert_eq!(
            store
                .reserve("alice", later, Duration::seconds(15), ttl)
                .await
                .unwrap(),
            later
        );
    }

    #[tokio::test]
    async fn test_shared_file_between_stores() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("slots.db");
        let first = SqliteSlotStore::new(&path).unwrap();
        let second = SqliteSlotStore::new(&path).unwrap();

        let now = at_millis(1_700_000_000_000);
        let spacing = Duration::seconds(15);
        let ttl = Duration::hours(1);

        assert_eq!(first.reserve("alice", now, spacing, ttl).await.unwrap(), now);
        assert_eq!(
            second.reserve("alice", now, spacing, ttl).await.unwrap(),
            now + spacing
        );
    }
}
