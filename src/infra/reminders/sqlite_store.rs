// SQLite-backed reminder store.
//
// Timestamps are stored as fixed-precision RFC 3339 text so the
// `(active, expires_at)` index sorts chronologically.

use crate::core::reminders::{Reminder, ReminderStore};
use crate::core::schedule::{StoreError, TimedStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteReminderStore {
    pool: Pool<Sqlite>,
}

impl SqliteReminderStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                guild_id INTEGER,
                channel_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reminders_active_expires
             ON reminders (active, expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reminders_user_active
             ON reminders (user_id, active)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Transport(format!("bad timestamp in row: {err}")))
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Transport(err.to_string()),
    }
}

fn row_to_reminder(row: &sqlx::sqlite::SqliteRow) -> Result<Reminder, StoreError> {
    Ok(Reminder {
        id: row.get("id"),
        created_at: decode_time(&row.get::<String, _>("created_at"))?,
        expires_at: decode_time(&row.get::<String, _>("expires_at"))?,
        active: row.get("active"),
        user_id: row.get::<i64, _>("user_id") as u64,
        channel_id: row.get::<i64, _>("channel_id") as u64,
        guild_id: row.get::<Option<i64>, _>("guild_id").map(|id| id as u64),
        text: row.get("text"),
    })
}

#[async_trait]
impl TimedStore for SqliteReminderStore {
    type Item = Reminder;

    async fn insert(&self, item: &Reminder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reminders (id, created_at, expires_at, user_id, guild_id, channel_id, text, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id)
        .bind(encode_time(item.created_at))
        .bind(encode_time(item.expires_at))
        .bind(item.user_id as i64)
        .bind(item.guild_id.map(|id| id as i64))
        .bind(item.channel_id as i64)
        .bind(&item.text)
        .bind(item.active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn mark_inactive(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE reminders SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn earliest_active_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM reminders
            WHERE active = 1 AND expires_at <= ?
            ORDER BY expires_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(encode_time(deadline))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(row_to_reminder).transpose()
    }
}

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn list_active_for(&self, user_id: u64) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reminders
            WHERE user_id = ? AND active = 1
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(row_to_reminder).collect()
    }

    async fn cancel(&self, id: i64, user_id: u64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE reminders SET active = 0 WHERE id = ? AND user_id = ? AND active = 1")
                .bind(id)
                .bind(user_id as i64)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_all_for(&self, user_id: u64) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE reminders SET active = 0 WHERE user_id = ? AND active = 1")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn reminder(id: i64, user_id: u64, expires_at: DateTime<Utc>) -> Reminder {
        Reminder {
            id,
            created_at: at(0),
            expires_at,
            active: true,
            user_id,
            channel_id: 42,
            guild_id: Some(1),
            text: format!("reminder {id}"),
        }
    }

    async fn memory_store() -> SqliteReminderStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteReminderStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = memory_store().await;
        let item = reminder(1, 7, at(100));

        store.insert(&item).await.unwrap();
        let err = store.insert(&item).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn earliest_query_orders_by_deadline_then_id() {
        let store = memory_store().await;
        store.insert(&reminder(5, 7, at(200))).await.unwrap();
        store.insert(&reminder(3, 7, at(100))).await.unwrap();
        store.insert(&reminder(2, 7, at(100))).await.unwrap();

        let earliest = store.earliest_active_before(at(500)).await.unwrap().unwrap();
        assert_eq!(earliest.id, 2);

        // Beyond-deadline rows are not returned.
        assert!(store.earliest_active_before(at(50)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_inactive_is_idempotent_but_requires_the_row() {
        let store = memory_store().await;
        store.insert(&reminder(1, 7, at(100))).await.unwrap();

        store.mark_inactive(1).await.unwrap();
        store.mark_inactive(1).await.unwrap();
        assert!(matches!(
            store.mark_inactive(404).await.unwrap_err(),
            StoreError::NotFound
        ));

        assert!(store.earliest_active_before(at(500)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_checks_owner_and_active_state() {
        let store = memory_store().await;
        store.insert(&reminder(1, 7, at(100))).await.unwrap();

        assert!(!store.cancel(1, 8).await.unwrap());
        assert!(store.cancel(1, 7).await.unwrap());
        assert!(!store.cancel(1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_all_counts_only_active_rows() {
        let store = memory_store().await;
        store.insert(&reminder(1, 7, at(100))).await.unwrap();
        store.insert(&reminder(2, 7, at(200))).await.unwrap();
        store.insert(&reminder(3, 8, at(300))).await.unwrap();
        store.mark_inactive(1).await.unwrap();

        assert_eq!(store.cancel_all_for(7).await.unwrap(), 1);
        assert_eq!(store.cancel_all_for(7).await.unwrap(), 0);
        assert_eq!(store.list_active_for(8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rows_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("reminders.db").display()
        );

        {
            let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
            let store = SqliteReminderStore::new(pool);
            store.migrate().await.unwrap();
            store.insert(&reminder(1, 7, at(100))).await.unwrap();
        }

        // A fresh process finds the still-active row and can fire it late.
        let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
        let store = SqliteReminderStore::new(pool);
        store.migrate().await.unwrap();
        let found = store.earliest_active_before(at(5000)).await.unwrap().unwrap();
        assert_eq!(found.id, 1);
        assert_eq!(found.text, "reminder 1");
    }
}
