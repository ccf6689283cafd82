//! Role operations the scheduler performs against Discord

use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, GuildId, Http, RoleId, UserId};
use serenity::http::HttpError;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ScheduleResult;

/// Discord JSON error code for "Unknown Member"
const UNKNOWN_MEMBER: isize = 10007;

fn member_is_gone(status: u16, code: isize) -> bool {
    status == 404 || code == UNKNOWN_MEMBER
}

/// Whether a member lookup failed because the user is not in the guild
///
/// Rate limits, server errors and connection failures are not.
pub fn is_unknown_member(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if member_is_gone(response.status_code.as_u16(), response.error.code)
    )
}

/// The role calls a scheduled task needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleGateway: Send + Sync {
    /// Whether the member currently holds the role
    ///
    /// A member that has left the guild is reported as not holding it. Any
    /// other failure is an error so the caller can retry later.
    async fn member_has_role(&self, guild_id: u64, user_id: u64, role_id: u64)
    -> ScheduleResult<bool>;

    async fn add_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: Option<String>,
    ) -> ScheduleResult<()>;

    async fn remove_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: Option<String>,
    ) -> ScheduleResult<()>;
}

/// Gateway that talks to the Discord REST API
#[derive(Clone)]
pub struct HttpRoleGateway {
    http: Arc<Http>,
}

impl HttpRoleGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RoleGateway for HttpRoleGateway {
    async fn member_has_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> ScheduleResult<bool> {
        match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(member) => Ok(member.roles.contains(&RoleId::new(role_id))),
            Err(e) if is_unknown_member(&e) => {
                warn!(
                    user_id = %user_id,
                    guild_id = %guild_id,
                    "Member left the guild, treating role as gone"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn add_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: Option<String>,
    ) -> ScheduleResult<()> {
        debug!(user_id, guild_id, role_id, "Adding role");
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                reason.as_deref(),
            )
            .await?;
        Ok(())
    }

    async fn remove_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: Option<String>,
    ) -> ScheduleResult<()> {
        debug!(user_id, guild_id, role_id, "Removing role");
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                reason.as_deref(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduledTask, TaskService, TaskState, TaskStore};
    use ::serenity::http::HttpBuilder;

    /// Gateway whose requests can never reach Discord
    fn unreachable_gateway() -> HttpRoleGateway {
        let http = HttpBuilder::new("Bot token")
            .proxy("http://127.0.0.1:9")
            .build();
        HttpRoleGateway::new(Arc::new(http))
    }

    #[test]
    fn test_only_unknown_member_counts_as_gone() {
        assert!(member_is_gone(404, 0));
        assert!(member_is_gone(400, UNKNOWN_MEMBER));
        assert!(!member_is_gone(429, 0));
        assert!(!member_is_gone(500, 0));
        assert!(!member_is_gone(403, 50013));
        assert!(!is_unknown_member(&serenity::Error::Other("gateway closed")));
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let gateway = unreachable_gateway();
        assert!(gateway.member_has_role(67890, 12345, 42).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_failure_keeps_task_active() {
        let service = TaskService::new(TaskStore::new(), Arc::new(unreachable_gateway()));
        let task = ScheduledTask::role_revoke(67890, 12345, 42, 555, chrono::Utc::now());
        service.store.add(task.clone());

        assert!(service.expire(&task.id).await.is_err());
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Active);
    }
}
