// SQLite-backed modlog store.
//
// One pool serves both the case table and the per-guild channel config,
// mirroring how the reminder store lays out its schema. Timestamps are
// fixed-precision RFC 3339 text so the `(active, expires_at)` index sorts
// chronologically.

use crate::core::modlog::{CaseAction, CaseStore, ModlogCase, ModlogConfig, ModlogConfigStore};
use crate::core::schedule::{StoreError, TimedStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteCaseStore {
    pool: Pool<Sqlite>,
}

impl SqliteCaseStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS modlog_cases (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                guild_id INTEGER NOT NULL,
                action INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                reason TEXT,
                expires_at TEXT,
                active BOOLEAN NOT NULL DEFAULT 0,
                expired BOOLEAN NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cases_active_expires
             ON modlog_cases (active, expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cases_guild_target_active
             ON modlog_cases (guild_id, target_id, active)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS modlog_config (
                guild_id INTEGER PRIMARY KEY,
                enabled BOOLEAN NOT NULL DEFAULT 0,
                channel_id INTEGER
            );
            "#,
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

fn row_to_case(row: &sqlx::sqlite::SqliteRow) -> Result<ModlogCase, StoreError> {
    let action_code: i64 = row.get("action");
    let action = CaseAction::from_code(action_code)
        .ok_or_else(|| StoreError::Transport(format!("unknown case action {action_code}")))?;

    Ok(ModlogCase {
        id: row.get("id"),
        created_at: decode_time(&row.get::<String, _>("created_at"))?,
        expires_at: row
            .get::<Option<String>, _>("expires_at")
            .as_deref()
            .map(decode_time)
            .transpose()?,
        active: row.get("active"),
        guild_id: row.get::<i64, _>("guild_id") as u64,
        action,
        user_id: row.get::<i64, _>("user_id") as u64,
        target_id: row.get::<i64, _>("target_id") as u64,
        reason: row.get("reason"),
        expired: row.get("expired"),
    })
}

#[async_trait]
impl TimedStore for SqliteCaseStore {
    type Item = ModlogCase;

    async fn insert(&self, item: &ModlogCase) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO modlog_cases
                (id, created_at, guild_id, action, user_id, target_id, reason, expires_at, active, expired)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id)
        .bind(encode_time(item.created_at))
        .bind(item.guild_id as i64)
        .bind(item.action.code())
        .bind(item.user_id as i64)
        .bind(item.target_id as i64)
        .bind(&item.reason)
        .bind(item.expires_at.map(encode_time))
        .bind(item.active)
        .bind(item.expired)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn mark_inactive(&self, id: i64) -> Result<(), StoreError> {
        // Deactivating a timed case also sets the legacy `expired`
        // projection; untimed cases keep it at 0.
        let result = sqlx::query(
            r#"
            UPDATE modlog_cases
            SET active = 0,
                expired = CASE WHEN expires_at IS NULL THEN expired ELSE 1 END
            WHERE id = ?
            "#,
        )
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
    ) -> Result<Option<ModlogCase>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM modlog_cases
            WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?
            ORDER BY expires_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(encode_time(deadline))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(row_to_case).transpose()
    }
}

#[async_trait]
impl CaseStore for SqliteCaseStore {
    async fn get(&self, id: i64) -> Result<Option<ModlogCase>, StoreError> {
        let row = sqlx::query("SELECT * FROM modlog_cases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_case).transpose()
    }

    async fn list_for_guild(
        &self,
        guild_id: u64,
        limit: u32,
    ) -> Result<Vec<ModlogCase>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM modlog_cases WHERE guild_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(row_to_case).collect()
    }

    async fn update_reason(&self, id: i64, reason: &str) -> Result<ModlogCase, StoreError> {
        let result = sqlx::query("UPDATE modlog_cases SET reason = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        match self.get(id).await? {
            Some(case) => Ok(case),
            None => Err(StoreError::NotFound),
        }
    }

    async fn expire_bans_for(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let rows = sqlx::query(
            r#"
            SELECT id FROM modlog_cases
            WHERE guild_id = ? AND target_id = ? AND action = ? AND active = 1
            "#,
        )
        .bind(guild_id as i64)
        .bind(target_id as i64)
        .bind(CaseAction::Ban.code())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let ids: Vec<i64> = rows.iter().map(|row| row.get("id")).collect();
        for id in &ids {
            sqlx::query("UPDATE modlog_cases SET active = 0, expired = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(ids)
    }
}

#[async_trait]
impl ModlogConfigStore for SqliteCaseStore {
    async fn get_config(&self, guild_id: u64) -> anyhow::Result<Option<ModlogConfig>> {
        let row = sqlx::query("SELECT * FROM modlog_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ModlogConfig {
            guild_id,
            enabled: row.get("enabled"),
            channel_id: row.get::<Option<i64>, _>("channel_id").map(|id| id as u64),
        }))
    }

    async fn save_config(&self, config: ModlogConfig) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO modlog_config (guild_id, enabled, channel_id)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                enabled = excluded.enabled,
                channel_id = excluded.channel_id
            "#,
        )
        .bind(config.guild_id as i64)
        .bind(config.enabled)
        .bind(config.channel_id.map(|id| id as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_config(&self, guild_id: u64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM modlog_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
