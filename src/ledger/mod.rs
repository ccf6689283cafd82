//! Moderation ledger
//!
//! Cases, hardbans, protected members, jail roles and prefix overrides. The
//! rest of the bot only sees the [`ModerationStore`] trait; which backend
//! sits behind it is decided once at start-up.

mod error;
mod memory;
mod postgres;
mod record;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use record::{
    Case, CaseAction, HardbanEntry, NO_REASON, NewCase, ProtectionToggle, Warning,
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::MEMORY_DATABASE_URL;

/// Persistence capability shared by every command
///
/// Statements are independently atomic; multi-step operations such as
/// [`record_warning`](Self::record_warning) are not transactional and may
/// observe concurrent writes.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Append a case and return its identifier
    async fn record_case(&self, case: NewCase) -> StoreResult<i64>;

    /// Most recent cases for a member, newest first
    async fn list_cases(&self, guild_id: u64, user_id: u64, limit: u32)
    -> StoreResult<Vec<Case>>;

    /// Record a warning and return the member's warning total after it
    async fn record_warning(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> StoreResult<u64>;

    /// All warnings for a member, newest first
    async fn list_warnings(&self, guild_id: u64, user_id: u64) -> StoreResult<Vec<Warning>>;

    async fn add_hardban(&self, entry: HardbanEntry) -> StoreResult<()>;

    async fn hardban_contains(&self, guild_id: u64, user_id: u64) -> StoreResult<bool>;

    async fn list_hardbans(&self, guild_id: u64) -> StoreResult<Vec<HardbanEntry>>;

    /// Protect an unprotected member or unprotect a protected one
    async fn toggle_protection(&self, guild_id: u64, user_id: u64)
    -> StoreResult<ProtectionToggle>;

    async fn is_protected(&self, guild_id: u64, user_id: u64) -> StoreResult<bool>;

    /// Set the guild's jail role, replacing any previous one
    async fn jail_set(&self, guild_id: u64, role_id: u64) -> StoreResult<()>;

    async fn jail_get(&self, guild_id: u64) -> StoreResult<Option<u64>>;

    /// Set the guild's command prefix, replacing any previous one
    async fn prefix_set(&self, guild_id: u64, prefix: &str) -> StoreResult<()>;

    async fn prefix_get(&self, guild_id: u64) -> StoreResult<Option<String>>;
}

/// Open the backend named by `database_url`
///
/// `memory://` selects the in-process store. Without a URL, or when the
/// database cannot be reached, the bot runs without persistence.
pub async fn open(
    database_url: Option<&str>,
    max_connections: u32,
) -> Option<Arc<dyn ModerationStore>> {
    let url = database_url?;
    if url == MEMORY_DATABASE_URL {
        info!("Using in-memory moderation ledger");
        return Some(Arc::new(MemoryStore::new()));
    }

    match PgStore::connect(url, max_connections).await {
        Ok(store) => {
            info!("Connected to moderation ledger");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!("Moderation ledger unavailable, continuing without persistence: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_without_url_has_no_ledger() {
        assert!(open(None, 5).await.is_none());
    }

    #[tokio::test]
    async fn test_open_memory_ledger() {
        let ledger = open(Some(MEMORY_DATABASE_URL), 5).await.unwrap();
        ledger.prefix_set(1, "!").await.unwrap();
        assert_eq!(ledger.prefix_get(1).await.unwrap().as_deref(), Some("!"));
    }
}
