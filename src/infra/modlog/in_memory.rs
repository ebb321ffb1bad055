// In-memory implementation of the modlog case and config stores.
//
// Same contract as the SQLite implementation; used by tests.

use crate::core::modlog::{CaseAction, CaseStore, ModlogCase, ModlogConfig, ModlogConfigStore};
use crate::core::schedule::{StoreError, TimedStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub struct InMemoryCaseStore {
    cases: DashMap<i64, ModlogCase>,
    configs: DashMap<u64, ModlogConfig>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self {
            cases: DashMap::new(),
            configs: DashMap::new(),
        }
    }
}

impl Default for InMemoryCaseStore {
    fn default() -> Self {
        Self::new()
    }
}

fn deactivate(case: &mut ModlogCase) {
    case.active = false;
    if case.expires_at.is_some() {
        case.expired = true;
    }
}

#[async_trait]
impl TimedStore for InMemoryCaseStore {
    type Item = ModlogCase;

    async fn insert(&self, item: &ModlogCase) -> Result<(), StoreError> {
        match self.cases.entry(item.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(item.clone());
                Ok(())
            }
        }
    }

    async fn mark_inactive(&self, id: i64) -> Result<(), StoreError> {
        match self.cases.get_mut(&id) {
            Some(mut case) => {
                deactivate(&mut case);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn earliest_active_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Option<ModlogCase>, StoreError> {
        Ok(self
            .cases
            .iter()
            .filter(|case| case.active && case.expires_at.map_or(false, |at| at <= deadline))
            .min_by_key(|case| (case.expires_at, case.id))
            .map(|case| case.clone()))
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn get(&self, id: i64) -> Result<Option<ModlogCase>, StoreError> {
        Ok(self.cases.get(&id).map(|case| case.clone()))
    }

    async fn list_for_guild(
        &self,
        guild_id: u64,
        limit: u32,
    ) -> Result<Vec<ModlogCase>, StoreError> {
        let mut cases: Vec<ModlogCase> = self
            .cases
            .iter()
            .filter(|case| case.guild_id == guild_id)
            .map(|case| case.clone())
            .collect();
        cases.sort_by_key(|case| std::cmp::Reverse(case.id));
        cases.truncate(limit as usize);
        Ok(cases)
    }

    async fn update_reason(&self, id: i64, reason: &str) -> Result<ModlogCase, StoreError> {
        match self.cases.get_mut(&id) {
            Some(mut case) => {
                case.reason = Some(reason.to_string());
                Ok(case.clone())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn expire_bans_for(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut flipped = Vec::new();
        for mut case in self.cases.iter_mut() {
            if case.active
                && case.guild_id == guild_id
                && case.target_id == target_id
                && case.action == CaseAction::Ban
            {
                deactivate(&mut case);
                flipped.push(case.id);
            }
        }
        Ok(flipped)
    }
}

#[async_trait]
impl ModlogConfigStore for InMemoryCaseStore {
    async fn get_config(&self, guild_id: u64) -> anyhow::Result<Option<ModlogConfig>> {
        Ok(self.configs.get(&guild_id).map(|config| config.clone()))
    }

    async fn save_config(&self, config: ModlogConfig) -> anyhow::Result<()> {
        self.configs.insert(config.guild_id, config);
        Ok(())
    }

    async fn clear_config(&self, guild_id: u64) -> anyhow::Result<()> {
        self.configs.remove(&guild_id);
        Ok(())
    }
}
