// Modlog case lifecycle - opening, editing, timed expiry, bulk unwinding.
//
// Every case is persisted. Cases with no expiry are inserted already
// inactive and never enter the scheduler; timed cases go through the same
// short-path / durable split as reminders.

use super::modlog_models::{CaseAction, CaseEvent, ModlogCase, ModlogConfig};
use crate::core::schedule::{
    id_from_instant, regenerate_id, Clock, EventBus, Scheduler, ShortPath, StoreError, TimedStore,
    Tunables,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ModlogError {
    #[error("the expiry time must be in the future")]
    PastExpiry,

    #[error("no case with id {0}")]
    NoSuchCase(i64),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] anyhow::Error),
}

/// Storage port for modlog cases.
#[async_trait]
pub trait CaseStore: TimedStore<Item = ModlogCase> {
    async fn get(&self, id: i64) -> Result<Option<ModlogCase>, StoreError>;

    /// Most recent cases for a guild, newest first.
    async fn list_for_guild(&self, guild_id: u64, limit: u32)
        -> Result<Vec<ModlogCase>, StoreError>;

    /// Replace the reason and return the updated case. `NotFound` if the
    /// case does not exist.
    async fn update_reason(&self, id: i64, reason: &str) -> Result<ModlogCase, StoreError>;

    /// Deactivate every active Ban case for `(guild_id, target_id)`.
    /// Returns the ids that flipped.
    async fn expire_bans_for(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<Vec<i64>, StoreError>;
}

/// Persistence for the per-guild modlog channel setting.
#[async_trait]
pub trait ModlogConfigStore: Send + Sync {
    async fn get_config(&self, guild_id: u64) -> anyhow::Result<Option<ModlogConfig>>;
    async fn save_config(&self, config: ModlogConfig) -> anyhow::Result<()>;
    async fn clear_config(&self, guild_id: u64) -> anyhow::Result<()>;
}

/// Arguments for opening a case.
#[derive(Debug, Clone)]
pub struct OpenCase {
    pub guild_id: u64,
    pub action: CaseAction,
    pub moderator_id: u64,
    pub target_id: u64,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct ModlogService<S: CaseStore, C: ModlogConfigStore> {
    store: Arc<S>,
    config_store: Arc<C>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus<CaseEvent>>,
    scheduler: Arc<Scheduler<S, CaseEvent>>,
    short_path: ShortPath<S, CaseEvent>,
    tunables: Tunables,
}

impl<S: CaseStore, C: ModlogConfigStore> ModlogService<S, C> {
    pub fn new(
        store: Arc<S>,
        config_store: Arc<C>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus<CaseEvent>>,
        shutdown: CancellationToken,
        tunables: Tunables,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&bus),
            shutdown.clone(),
            tunables,
        ));
        let short_path = ShortPath::new(
            Arc::clone(&clock),
            Arc::clone(&bus),
            Arc::clone(&store),
            shutdown,
        );
        Self {
            store,
            config_store,
            clock,
            bus,
            scheduler,
            short_path,
            tunables,
        }
    }

    /// Start the background worker. Call once at startup, after the event
    /// bus subscribers are registered.
    pub fn spawn_worker(&self) -> tokio::task::JoinHandle<()> {
        self.scheduler.spawn()
    }

    /// Open a case. `case.opened` goes out right away, independent of any
    /// scheduling; only cases with an expiry enter the timer machinery.
    pub async fn open(&self, params: OpenCase) -> Result<ModlogCase, ModlogError> {
        let now = self.clock.now();
        if let Some(expires_at) = params.expires_at {
            if expires_at <= now {
                return Err(ModlogError::PastExpiry);
            }
        }

        let case = ModlogCase {
            id: id_from_instant(now),
            created_at: now,
            expires_at: params.expires_at,
            active: params.expires_at.is_some(),
            guild_id: params.guild_id,
            action: params.action,
            user_id: params.moderator_id,
            target_id: params.target_id,
            reason: params.reason,
            expired: false,
        };

        let case = self.insert_with_retry(case).await?;
        self.bus.emit(CaseEvent::Opened(case.clone())).await;

        if let Some(expires_at) = case.expires_at {
            if expires_at - now <= self.tunables.short_threshold {
                self.short_path.schedule(case.clone(), true);
            } else {
                self.scheduler.note_inserted(expires_at);
            }
        }

        Ok(case)
    }

    async fn insert_with_retry(&self, mut case: ModlogCase) -> Result<ModlogCase, ModlogError> {
        match self.store.insert(&case).await {
            Ok(()) => Ok(case),
            Err(StoreError::Conflict) => {
                case.id = regenerate_id(self.clock.now());
                self.store.insert(&case).await?;
                Ok(case)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replace a case's reason and re-announce it.
    pub async fn edit(&self, case_id: i64, new_reason: &str) -> Result<ModlogCase, ModlogError> {
        let case = match self.store.update_reason(case_id, new_reason).await {
            Ok(case) => case,
            Err(StoreError::NotFound) => return Err(ModlogError::NoSuchCase(case_id)),
            Err(err) => return Err(err.into()),
        };
        self.bus.emit(CaseEvent::Edited(case.clone())).await;
        Ok(case)
    }

    /// Expire a case ahead of its deadline. Subscribers perform the
    /// action-specific unwinding. Already-inactive cases are a no-op.
    pub async fn expire(&self, case_id: i64) -> Result<ModlogCase, ModlogError> {
        let Some(case) = self.store.get(case_id).await? else {
            return Err(ModlogError::NoSuchCase(case_id));
        };
        if !case.active {
            return Ok(case);
        }

        self.store.mark_inactive(case_id).await?;
        self.scheduler.note_removed(case_id);

        let case = ModlogCase {
            active: false,
            expired: true,
            ..case
        };
        self.bus.emit(CaseEvent::Expired(case.clone())).await;
        Ok(case)
    }

    /// A member was unbanned on the platform side: close every active ban
    /// case for them so the scheduler does not try to unban again later.
    /// The cancelled cases get no `case.expired` event - the unban itself
    /// is the record.
    pub async fn handle_member_unbanned(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<usize, ModlogError> {
        let ids = self.store.expire_bans_for(guild_id, target_id).await?;
        for id in &ids {
            self.scheduler.note_removed(*id);
        }
        Ok(ids.len())
    }

    pub async fn get_case(&self, case_id: i64) -> Result<Option<ModlogCase>, ModlogError> {
        Ok(self.store.get(case_id).await?)
    }

    pub async fn recent_cases(
        &self,
        guild_id: u64,
        limit: u32,
    ) -> Result<Vec<ModlogCase>, ModlogError> {
        Ok(self.store.list_for_guild(guild_id, limit).await?)
    }

    pub async fn get_config(&self, guild_id: u64) -> Result<Option<ModlogConfig>, ModlogError> {
        Ok(self.config_store.get_config(guild_id).await?)
    }

    pub async fn set_modlog_channel(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<(), ModlogError> {
        let config = ModlogConfig {
            guild_id,
            enabled: true,
            channel_id: Some(channel_id),
        };
        Ok(self.config_store.save_config(config).await?)
    }

    pub async fn disable_modlog(&self, guild_id: u64) -> Result<(), ModlogError> {
        if let Some(mut config) = self.config_store.get_config(guild_id).await? {
            config.enabled = false;
            self.config_store.save_config(config).await?;
        }
        Ok(())
    }

    /// Drop the configuration entirely. Used when the configured channel
    /// turns out to be gone or forbidden.
    pub async fn clear_config(&self, guild_id: u64) -> Result<(), ModlogError> {
        Ok(self.config_store.clear_config(guild_id).await?)
    }
}
