//! In-process ledger backend
//!
//! Selected with `database_url: memory://`. Nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{
    Case, CaseAction, HardbanEntry, ModerationStore, NewCase, ProtectionToggle, StoreResult,
    Warning,
};

/// Ledger kept in concurrent maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    cases: Arc<DashMap<i64, Case>>,
    next_case_id: Arc<AtomicI64>,
    hardbans: Arc<DashMap<(u64, u64), HardbanEntry>>,
    protected: Arc<DashSet<(u64, u64)>>,
    jail_roles: Arc<DashMap<u64, u64>>,
    prefixes: Arc<DashMap<u64, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cases for a member matching `filter`, newest first
    fn cases_for(
        &self,
        guild_id: u64,
        user_id: u64,
        filter: impl Fn(&Case) -> bool,
    ) -> Vec<Case> {
        let mut cases: Vec<Case> = self
            .cases
            .iter()
            .filter_map(|entry| {
                let case = entry.value();
                if case.guild_id == guild_id && case.user_id == user_id && filter(case) {
                    Some(case.clone())
                } else {
                    None
                }
            })
            .collect();
        cases.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.case_id.cmp(&a.case_id))
        });
        cases
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn record_case(&self, case: NewCase) -> StoreResult<i64> {
        let case_id = self.next_case_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.cases.insert(
            case_id,
            Case {
                case_id,
                guild_id: case.guild_id,
                user_id: case.user_id,
                moderator_id: case.moderator_id,
                action: case.action,
                reason: case.reason,
                timestamp: Utc::now(),
            },
        );
        Ok(case_id)
    }

    async fn list_cases(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> StoreResult<Vec<Case>> {
        let mut cases = self.cases_for(guild_id, user_id, |_| true);
        cases.truncate(limit as usize);
        Ok(cases)
    }

    async fn record_warning(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> StoreResult<u64> {
        self.record_case(NewCase::new(
            guild_id,
            user_id,
            moderator_id,
            CaseAction::Warn,
            Some(reason),
        ))
        .await?;
        let total = self
            .cases
            .iter()
            .filter(|entry| {
                let case = entry.value();
                case.guild_id == guild_id
                    && case.user_id == user_id
                    && case.action == CaseAction::Warn
            })
            .count();
        Ok(total as u64)
    }

    async fn list_warnings(&self, guild_id: u64, user_id: u64) -> StoreResult<Vec<Warning>> {
        self.cases_for(guild_id, user_id, |case| case.action == CaseAction::Warn)
            .into_iter()
            .map(Warning::try_from)
            .collect()
    }

    async fn add_hardban(&self, entry: HardbanEntry) -> StoreResult<()> {
        self.hardbans.insert((entry.guild_id, entry.user_id), entry);
        Ok(())
    }

    async fn hardban_contains(&self, guild_id: u64, user_id: u64) -> StoreResult<bool> {
        Ok(self.hardbans.contains_key(&(guild_id, user_id)))
    }

    async fn list_hardbans(&self, guild_id: u64) -> StoreResult<Vec<HardbanEntry>> {
        Ok(self
            .hardbans
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn toggle_protection(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> StoreResult<ProtectionToggle> {
        if self.protected.remove(&(guild_id, user_id)).is_some() {
            Ok(ProtectionToggle::Removed)
        } else {
            self.protected.insert((guild_id, user_id));
            Ok(ProtectionToggle::Added)
        }
    }

    async fn is_protected(&self, guild_id: u64, user_id: u64) -> StoreResult<bool> {
        Ok(self.protected.contains(&(guild_id, user_id)))
    }

    async fn jail_set(&self, guild_id: u64, role_id: u64) -> StoreResult<()> {
        self.jail_roles.insert(guild_id, role_id);
        Ok(())
    }

    async fn jail_get(&self, guild_id: u64) -> StoreResult<Option<u64>> {
        Ok(self.jail_roles.get(&guild_id).map(|entry| *entry.value()))
    }

    async fn prefix_set(&self, guild_id: u64, prefix: &str) -> StoreResult<()> {
        self.prefixes.insert(guild_id, prefix.to_string());
        Ok(())
    }

    async fn prefix_get(&self, guild_id: u64) -> StoreResult<Option<String>> {
        Ok(self.prefixes.get(&guild_id).map(|entry| entry.value().clone()))
    }
}
