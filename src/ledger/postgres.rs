//! PostgreSQL ledger backend
//!
//! The schema is managed outside the bot; see `sql/schema.sql` for the
//! tables these statements expect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::instrument;

use super::{
    Case, CaseAction, HardbanEntry, ModerationStore, NewCase, ProtectionToggle, StoreResult,
    Warning,
};

/// Snowflakes are stored as BIGINT
#[allow(clippy::cast_possible_wrap)]
fn to_db(id: u64) -> i64 {
    id as i64
}

#[allow(clippy::cast_sign_loss)]
fn from_db(id: i64) -> u64 {
    id as u64
}

#[derive(Debug, FromRow)]
struct CaseRow {
    case_id: i64,
    guild_id: i64,
    user_id: i64,
    moderator_id: i64,
    action: String,
    reason: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<CaseRow> for Case {
    type Error = super::StoreError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            case_id: row.case_id,
            guild_id: from_db(row.guild_id),
            user_id: from_db(row.user_id),
            moderator_id: from_db(row.moderator_id),
            action: row.action.parse()?,
            reason: row.reason,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, FromRow)]
struct HardbanRow {
    guild_id: i64,
    user_id: i64,
    moderator_id: i64,
    reason: String,
}

impl From<HardbanRow> for HardbanEntry {
    fn from(row: HardbanRow) -> Self {
        Self {
            guild_id: from_db(row.guild_id),
            user_id: from_db(row.user_id),
            moderator_id: from_db(row.moderator_id),
            reason: row.reason,
        }
    }
}

/// Ledger backed by a Postgres connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`
    ///
    /// # Errors
    /// Returns the connection error if the database cannot be reached.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ModerationStore for PgStore {
    #[instrument(skip(self))]
    async fn record_case(&self, case: NewCase) -> StoreResult<i64> {
        let case_id = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO cases (guild_id, user_id, moderator_id, action, reason, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING case_id
            ",
        )
        .bind(to_db(case.guild_id))
        .bind(to_db(case.user_id))
        .bind(to_db(case.moderator_id))
        .bind(case.action.as_str())
        .bind(&case.reason)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(case_id)
    }

    #[instrument(skip(self))]
    async fn list_cases(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> StoreResult<Vec<Case>> {
        let rows = sqlx::query_as::<_, CaseRow>(
            r"
            SELECT case_id, guild_id, user_id, moderator_id, action, reason, timestamp
            FROM cases
            WHERE guild_id = $1 AND user_id = $2
            ORDER BY timestamp DESC, case_id DESC
            LIMIT $3
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Case::try_from).collect()
    }

    #[instrument(skip(self))]
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

        let total = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*) FROM cases
            WHERE guild_id = $1 AND user_id = $2 AND action = $3
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(CaseAction::Warn.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(from_db(total))
    }

    #[instrument(skip(self))]
    async fn list_warnings(&self, guild_id: u64, user_id: u64) -> StoreResult<Vec<Warning>> {
        let rows = sqlx::query_as::<_, CaseRow>(
            r"
            SELECT case_id, guild_id, user_id, moderator_id, action, reason, timestamp
            FROM cases
            WHERE guild_id = $1 AND user_id = $2 AND action = $3
            ORDER BY timestamp DESC, case_id DESC
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .bind(CaseAction::Warn.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Case::try_from(row).and_then(Warning::try_from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn add_hardban(&self, entry: HardbanEntry) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO hardban (guild_id, user_id, moderator_id, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, user_id) DO UPDATE SET moderator_id = $3, reason = $4
            ",
        )
        .bind(to_db(entry.guild_id))
        .bind(to_db(entry.user_id))
        .bind(to_db(entry.moderator_id))
        .bind(&entry.reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn hardban_contains(&self, guild_id: u64, user_id: u64) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r"
            SELECT EXISTS(SELECT 1 FROM hardban WHERE guild_id = $1 AND user_id = $2)
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn list_hardbans(&self, guild_id: u64) -> StoreResult<Vec<HardbanEntry>> {
        let rows = sqlx::query_as::<_, HardbanRow>(
            r"
            SELECT guild_id, user_id, moderator_id, reason
            FROM hardban
            WHERE guild_id = $1
            ",
        )
        .bind(to_db(guild_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HardbanEntry::from).collect())
    }

    #[instrument(skip(self))]
    async fn toggle_protection(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> StoreResult<ProtectionToggle> {
        let removed = sqlx::query(
            r"
            DELETE FROM mod WHERE guild_id = $1 AND user_id = $2
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .execute(&self.pool)
        .await?;

        if removed.rows_affected() > 0 {
            return Ok(ProtectionToggle::Removed);
        }

        sqlx::query(
            r"
            INSERT INTO mod (guild_id, user_id) VALUES ($1, $2)
            ON CONFLICT (guild_id, user_id) DO NOTHING
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .execute(&self.pool)
        .await?;

        Ok(ProtectionToggle::Added)
    }

    #[instrument(skip(self))]
    async fn is_protected(&self, guild_id: u64, user_id: u64) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r"
            SELECT EXISTS(SELECT 1 FROM mod WHERE guild_id = $1 AND user_id = $2)
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(user_id))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn jail_set(&self, guild_id: u64, role_id: u64) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO jail (guild_id, role_id) VALUES ($1, $2)
            ON CONFLICT (guild_id) DO UPDATE SET role_id = $2
            ",
        )
        .bind(to_db(guild_id))
        .bind(to_db(role_id))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn jail_get(&self, guild_id: u64) -> StoreResult<Option<u64>> {
        let role_id = sqlx::query_scalar::<_, i64>(
            r"
            SELECT role_id FROM jail WHERE guild_id = $1
            ",
        )
        .bind(to_db(guild_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(role_id.map(from_db))
    }

    #[instrument(skip(self))]
    async fn prefix_set(&self, guild_id: u64, prefix: &str) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO prefixes (guild_id, prefix) VALUES ($1, $2)
            ON CONFLICT (guild_id) DO UPDATE SET prefix = $2
            ",
        )
        .bind(to_db(guild_id))
        .bind(prefix)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn prefix_get(&self, guild_id: u64) -> StoreResult<Option<String>> {
        let prefix = sqlx::query_scalar::<_, String>(
            r"
            SELECT prefix FROM prefixes WHERE guild_id = $1
            ",
        )
        .bind(to_db(guild_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_conversion_preserves_bits() {
        for id in [0, 1, 1_234_567_890_123_456_789, u64::MAX] {
            assert_eq!(from_db(to_db(id)), id);
        }
    }

    #[test]
    fn test_case_row_mapping() {
        let row = CaseRow {
            case_id: 3,
            guild_id: 10,
            user_id: 20,
            moderator_id: 30,
            action: "softban".to_string(),
            reason: "alt account".to_string(),
            timestamp: Utc::now(),
        };
        let case = Case::try_from(row).unwrap();
        assert_eq!(case.action, CaseAction::Softban);
        assert_eq!(case.user_id, 20);

        let row = CaseRow {
            case_id: 4,
            guild_id: 10,
            user_id: 20,
            moderator_id: 30,
            action: "yeet".to_string(),
            reason: String::new(),
            timestamp: Utc::now(),
        };
        assert!(Case::try_from(row).is_err());
    }
}
