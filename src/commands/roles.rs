//! Role toggles, temporary roles and the jail

use std::fmt::Write as _;
use std::time::Duration;

use poise::serenity_prelude::{self as serenity, GuildId, Mentionable, RoleId};

use super::{DATABASE_UNAVAILABLE, guild_id};
use crate::duration::{TEMPROLE_BOUNDS, humanize, parse_bounded};
use crate::hierarchy::{GuildHierarchy, MemberAction, authorize};
use crate::reply;
use crate::schedule::{ScheduleError, ScheduleResult, ScheduledTask, TaskKind, TaskService};
use crate::{Context, Error};

/// Warning for a scheduler error the moderator caused, if it is one
fn task_refusal(error: &ScheduleError, id: &str) -> Option<String> {
    match error {
        ScheduleError::NotFound(_) => Some(format!("No temporary role matches `{id}`")),
        ScheduleError::InvalidStateTransition => {
            Some("That temporary role has already ended".to_string())
        }
        ScheduleError::InvalidSchedule(reason) => Some(reason.clone()),
        _ => None,
    }
}

/// Parse `duration` and grant the role for that long
///
/// A duration that does not parse is returned as a refusal before Discord
/// or the scheduler is touched.
async fn grant_temporary_role(
    tasks: &TaskService,
    guild_id: u64,
    user_id: u64,
    role_id: u64,
    owner_id: u64,
    duration: &str,
) -> ScheduleResult<Result<(ScheduledTask, Duration), String>> {
    let length = match parse_bounded(duration, TEMPROLE_BOUNDS) {
        Ok(length) => length,
        Err(e) => return Ok(Err(e.to_string())),
    };
    tasks
        .grant(guild_id, user_id, role_id, owner_id, length)
        .await
        .map(|task| Ok((task, length)))
}

fn task_line(task: &ScheduledTask) -> String {
    let TaskKind::RoleRevoke { role_id } = task.kind;
    format!(
        "`{}` <@{}> <@&{role_id}> - ends <t:{}:R>",
        task.short_id(),
        task.user_id,
        task.fire_at.timestamp()
    )
}

/// Add a role to a member, or remove it if they already have it
#[poise::command(
    prefix_command,
    guild_only,
    category = "Roles",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
    #[rest]
    #[description = "Role"]
    role: serenity::Role,
) -> Result<(), Error> {
    let hierarchy = GuildHierarchy::load(ctx).await?;
    if let Err(refusal) = hierarchy.check_role(role.id) {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    if member.roles.contains(&role.id) {
        member.remove_role(ctx, role.id).await?;
        reply::success(
            ctx,
            format!("Removed {} from {}", role.mention(), member.mention()),
        )
        .await
    } else {
        member.add_role(ctx, role.id).await?;
        reply::success(
            ctx,
            format!("Added {} to {}", role.mention(), member.mention()),
        )
        .await
    }
}

/// Give a member a role for a limited time
///
/// The removal survives restarts. Use `temprole list` to see pending
/// removals.
#[poise::command(
    prefix_command,
    guild_only,
    category = "Roles",
    required_permissions = "MANAGE_ROLES",
    subcommands("temprole_list", "temprole_cancel", "temprole_extend")
)]
pub async fn temprole(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
    #[description = "Role"] role: serenity::Role,
    #[description = "Duration, e.g. 10m or 1d"] duration: String,
) -> Result<(), Error> {
    let hierarchy = GuildHierarchy::load(ctx).await?;
    if let Err(refusal) = hierarchy.check_role(role.id) {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let granted = grant_temporary_role(
        &ctx.data().tasks,
        guild_id(ctx)?.get(),
        member.user.id.get(),
        role.id.get(),
        ctx.author().id.get(),
        &duration,
    )
    .await?;
    let (task, length) = match granted {
        Ok(granted) => granted,
        Err(refusal) => return reply::warning(ctx, refusal).await,
    };

    reply::success(
        ctx,
        format!(
            "Gave {} {} for **{}** (`{}`)",
            member.mention(),
            role.mention(),
            humanize(length),
            task.short_id()
        ),
    )
    .await
}

/// List pending temporary roles in this server
#[poise::command(
    prefix_command,
    guild_only,
    rename = "list",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn temprole_list(ctx: Context<'_>) -> Result<(), Error> {
    let tasks = ctx.data().tasks.list_active(guild_id(ctx)?.get());
    if tasks.is_empty() {
        return reply::warning(ctx, "No active temporary roles").await;
    }

    let mut description = String::new();
    for task in &tasks {
        writeln!(description, "{}", task_line(task))?;
    }
    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title("Temporary Roles")
            .description(description),
    )
    .await
}

/// Stop a temporary role from being removed
#[poise::command(
    prefix_command,
    guild_only,
    rename = "cancel",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn temprole_cancel(
    ctx: Context<'_>,
    #[description = "Task ID or prefix"] id: String,
) -> Result<(), Error> {
    match ctx.data().tasks.cancel(&id, guild_id(ctx)?.get()).await {
        Ok(task) => {
            reply::success(
                ctx,
                format!(
                    "Cancelled `{}`; <@{}> keeps the role",
                    task.short_id(),
                    task.user_id
                ),
            )
            .await
        }
        Err(e) => match task_refusal(&e, &id) {
            Some(message) => reply::warning(ctx, message).await,
            None => Err(e.into()),
        },
    }
}

/// Push back the removal of a temporary role
#[poise::command(
    prefix_command,
    guild_only,
    rename = "extend",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn temprole_extend(
    ctx: Context<'_>,
    #[description = "Task ID or prefix"] id: String,
    #[description = "Extra time, e.g. 1h"] duration: String,
) -> Result<(), Error> {
    let extra = match parse_bounded(&duration, TEMPROLE_BOUNDS) {
        Ok(extra) => extra,
        Err(e) => return reply::warning(ctx, e.to_string()).await,
    };

    match ctx
        .data()
        .tasks
        .reschedule(&id, guild_id(ctx)?.get(), extra)
        .await
    {
        Ok(task) => {
            reply::success(
                ctx,
                format!(
                    "Extended `{}` by **{}**, now ends <t:{}:R>",
                    task.short_id(),
                    humanize(extra),
                    task.fire_at.timestamp()
                ),
            )
            .await
        }
        Err(e) => match task_refusal(&e, &id) {
            Some(message) => reply::warning(ctx, message).await,
            None => Err(e.into()),
        },
    }
}

/// The configured jail role, or the warning explaining why there is none
async fn jail_role(ctx: Context<'_>, guild_id: GuildId) -> Result<Result<RoleId, String>, Error> {
    let Some(ledger) = ctx.data().ledger() else {
        return Ok(Err(DATABASE_UNAVAILABLE.to_string()));
    };
    let Some(role_id) = ledger.jail_get(guild_id.get()).await? else {
        return Ok(Err("Jail system not setup".to_string()));
    };

    let role_id = RoleId::new(role_id);
    let exists = ctx
        .guild()
        .is_some_and(|guild| guild.roles.contains_key(&role_id));
    if exists {
        Ok(Ok(role_id))
    } else {
        Ok(Err("Jail role not found".to_string()))
    }
}

/// Put a member in the jail role
#[poise::command(
    prefix_command,
    guild_only,
    category = "Roles",
    required_permissions = "MANAGE_ROLES",
    subcommands("jail_setup")
)]
pub async fn jail(
    ctx: Context<'_>,
    #[description = "Member to jail"] member: serenity::Member,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let role_id = match jail_role(ctx, guild_id).await? {
        Ok(role_id) => role_id,
        Err(message) => return reply::warning(ctx, message).await,
    };

    if let Err(refusal) = authorize(ctx, guild_id, &member, MemberAction::Jail).await? {
        return reply::warning(ctx, refusal.to_string()).await;
    }
    if member.roles.contains(&role_id) {
        return reply::warning(ctx, format!("{} is already jailed", member.mention())).await;
    }

    member.add_role(ctx, role_id).await?;
    reply::success(ctx, format!("Jailed {}", member.mention())).await
}

/// Set the role used by the jail
#[poise::command(
    prefix_command,
    guild_only,
    rename = "setup",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn jail_setup(
    ctx: Context<'_>,
    #[rest]
    #[description = "Jail role"]
    role: serenity::Role,
) -> Result<(), Error> {
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };

    ledger.jail_set(guild_id(ctx)?.get(), role.id.get()).await?;
    reply::success(ctx, format!("Jail role set to {}", role.mention())).await
}

/// List members currently in the jail role
#[poise::command(prefix_command, guild_only, category = "Roles")]
pub async fn jailed(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let role_id = match jail_role(ctx, guild_id).await? {
        Ok(role_id) => role_id,
        Err(message) => return reply::warning(ctx, message).await,
    };

    let members: Vec<String> = ctx
        .guild()
        .map(|guild| {
            guild
                .members
                .values()
                .filter(|member| member.roles.contains(&role_id))
                .map(|member| member.mention().to_string())
                .collect()
        })
        .unwrap_or_default();
    if members.is_empty() {
        return reply::warning(ctx, "No jailed members").await;
    }

    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title("Jailed Members")
            .description(members.join("\n")),
    )
    .await
}

/// Release a member from the jail role
#[poise::command(
    prefix_command,
    guild_only,
    category = "Roles",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn unjail(
    ctx: Context<'_>,
    #[description = "Member to release"] member: serenity::Member,
) -> Result<(), Error> {
    let role_id = match jail_role(ctx, guild_id(ctx)?).await? {
        Ok(role_id) => role_id,
        Err(message) => return reply::warning(ctx, message).await,
    };

    if !member.roles.contains(&role_id) {
        return reply::warning(ctx, format!("{} is not jailed", member.mention())).await;
    }

    member.remove_role(ctx, role_id).await?;
    reply::success(ctx, format!("Unjailed {}", member.mention())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{MockRoleGateway, TaskStore};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unparsable_duration_grants_nothing() {
        let mut gateway = MockRoleGateway::new();
        gateway.expect_add_member_role().never();
        let tasks = TaskService::new(TaskStore::new(), Arc::new(gateway));

        let granted = grant_temporary_role(&tasks, 67890, 12345, 42, 555, "abc")
            .await
            .unwrap();
        assert!(granted.is_err());
        assert!(tasks.store.get_all().is_empty());
    }

    #[tokio::test]
    async fn test_temporary_role_is_granted_and_scheduled() {
        let mut gateway = MockRoleGateway::new();
        gateway
            .expect_add_member_role()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let tasks = TaskService::new(TaskStore::new(), Arc::new(gateway));

        let (task, length) = grant_temporary_role(&tasks, 67890, 12345, 42, 555, "10m")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(length, Duration::from_secs(600));
        assert_eq!(tasks.list_active(67890).len(), 1);
        assert_eq!(task.kind, TaskKind::RoleRevoke { role_id: 42 });
    }

    #[test]
    fn test_refusals_for_moderator_mistakes() {
        assert_eq!(
            task_refusal(&ScheduleError::NotFound("ab".to_string()), "ab").as_deref(),
            Some("No temporary role matches `ab`")
        );
        assert_eq!(
            task_refusal(&ScheduleError::InvalidStateTransition, "ab").as_deref(),
            Some("That temporary role has already ended")
        );
        let io = std::io::Error::other("disk");
        assert!(task_refusal(&ScheduleError::Io(io), "ab").is_none());
    }

    #[test]
    fn test_task_line_mentions_member_and_role() {
        let fire_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let task = ScheduledTask::role_revoke(1, 42, 7, 3, fire_at);
        let line = task_line(&task);
        assert!(line.starts_with(&format!("`{}`", task.short_id())));
        assert!(line.contains("<@42> <@&7>"));
        assert!(line.ends_with("<t:1700000000:R>"));
    }

    #[test]
    fn test_subcommands_are_registered() {
        let temprole = temprole();
        let names: Vec<_> = temprole.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["list", "cancel", "extend"]);

        let jail = jail();
        assert_eq!(jail.subcommands.len(), 1);
        assert_eq!(jail.subcommands[0].name, "setup");
        assert_eq!(
            jail.subcommands[0].required_permissions,
            serenity::Permissions::ADMINISTRATOR
        );
    }
}
