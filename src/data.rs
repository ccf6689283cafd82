use std::{ops::Deref, sync::Arc};

use poise::serenity_prelude::GuildId;
use tracing::warn;

use crate::config::BotConfig;
use crate::ledger::ModerationStore;
use crate::schedule::TaskService;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

/// Shared state behind [`Data`]
pub struct DataInner {
    pub config: BotConfig,
    /// Moderation ledger; `None` when persistence is unavailable
    pub ledger: Option<Arc<dyn ModerationStore>>,
    /// Temporary role scheduler
    pub tasks: TaskService,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("ledger", &self.ledger.is_some())
            .field("active_tasks", &self.tasks.store.get_all().len())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(
        config: BotConfig,
        ledger: Option<Arc<dyn ModerationStore>>,
        tasks: TaskService,
    ) -> Self {
        Self(Arc::new(DataInner {
            config,
            ledger,
            tasks,
        }))
    }

    /// The ledger, if persistence is available
    #[must_use]
    pub fn ledger(&self) -> Option<&dyn ModerationStore> {
        self.0.ledger.as_deref()
    }

    /// Command prefix for a guild, falling back to the configured default
    pub async fn prefix_for(&self, guild_id: Option<GuildId>) -> String {
        let (Some(guild_id), Some(ledger)) = (guild_id, self.ledger()) else {
            return self.config.default_prefix.clone();
        };

        match ledger.prefix_get(guild_id.get()).await {
            Ok(Some(prefix)) => prefix,
            Ok(None) => self.config.default_prefix.clone(),
            Err(e) => {
                warn!("Failed to look up prefix for guild {guild_id}: {e}");
                self.config.default_prefix.clone()
            }
        }
    }

    /// Whether a member is shielded from moderation actions
    ///
    /// Without persistence nobody is protected.
    pub async fn is_protected(&self, guild_id: GuildId, user_id: u64) -> bool {
        let Some(ledger) = self.ledger() else {
            return false;
        };
        match ledger.is_protected(guild_id.get(), user_id).await {
            Ok(protected) => protected,
            Err(e) => {
                warn!("Failed to check protection for {user_id} in {guild_id}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use crate::schedule::{MockRoleGateway, TaskStore};

    fn data_with(ledger: Option<Arc<dyn ModerationStore>>) -> Data {
        let tasks = TaskService::new(TaskStore::new(), Arc::new(MockRoleGateway::new()));
        Data::new(BotConfig::default(), ledger, tasks)
    }

    #[tokio::test]
    async fn test_prefix_falls_back_to_default() {
        let data = data_with(None);
        assert_eq!(data.prefix_for(Some(GuildId::new(1))).await, ",");
        assert!(data.ledger().is_none());
    }

    #[tokio::test]
    async fn test_prefix_uses_guild_override() {
        let store = MemoryStore::new();
        store.prefix_set(1, "!").await.unwrap();
        let data = data_with(Some(Arc::new(store)));

        assert_eq!(data.prefix_for(Some(GuildId::new(1))).await, "!");
        assert_eq!(data.prefix_for(Some(GuildId::new(2))).await, ",");
        assert_eq!(data.prefix_for(None).await, ",");
    }

    #[tokio::test]
    async fn test_protection_needs_persistence() {
        let store = MemoryStore::new();
        store.toggle_protection(1, 7).await.unwrap();

        assert!(data_with(Some(Arc::new(store))).is_protected(GuildId::new(1), 7).await);
        assert!(!data_with(None).is_protected(GuildId::new(1), 7).await);
    }
}
