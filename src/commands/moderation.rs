//! Member moderation and the case ledger

use std::fmt::Write as _;

use poise::serenity_prelude::{
    self as serenity, CreateEmbedFooter, EditMember, Mentionable, Timestamp,
};

use super::{
    DATABASE_UNAVAILABLE, audit_reason, guild_id, guild_name, notify_target, reason_or_default,
    record_case,
};
use crate::duration::{TIMEOUT_BOUNDS, parse_bounded};
use crate::hierarchy::{GuildHierarchy, MemberAction, authorize, check_target, ensure_unprotected};
use crate::ledger::{CaseAction, HardbanEntry, ModerationStore, ProtectionToggle, StoreResult};
use crate::reply;
use crate::schedule::is_unknown_member;
use crate::{Context, Error};

/// Number of cases shown by `modhistory`
const HISTORY_LIMIT: u32 = 10;
/// Number of warnings listed by `warnings`
const WARNINGS_SHOWN: usize = 10;
/// Days of messages removed by a softban
const SOFTBAN_DELETE_DAYS: u8 = 7;

/// Why `user_id` may not be unbanned, if anything stops it
///
/// Without a ledger the hardban list cannot be consulted, so every unban is
/// refused.
async fn unban_refusal(
    ledger: Option<&dyn ModerationStore>,
    guild_id: u64,
    user_id: u64,
) -> StoreResult<Option<&'static str>> {
    let Some(ledger) = ledger else {
        return Ok(Some(DATABASE_UNAVAILABLE));
    };
    if ledger.hardban_contains(guild_id, user_id).await? {
        return Ok(Some("This user is hardbanned and cannot be unbanned"));
    }
    Ok(None)
}

/// DM the member first, then record the warning and return their total
async fn warn_member<F, Fut>(
    ledger: &dyn ModerationStore,
    guild_id: u64,
    user_id: u64,
    moderator_id: u64,
    reason: &str,
    notify: F,
) -> StoreResult<u64>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    notify().await;
    ledger
        .record_warning(guild_id, user_id, moderator_id, reason)
        .await
}

/// Kick a member from the server
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "KICK_MEMBERS"
)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] member: serenity::Member,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if let Err(refusal) = authorize(ctx, guild_id, &member, MemberAction::Kick).await? {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let reason = reason_or_default(reason);
    notify_target(
        ctx,
        &member.user,
        format!(
            "You were kicked from **{}** by {} for: {reason}",
            guild_name(ctx),
            ctx.author().name
        ),
    )
    .await;

    member
        .kick_with_reason(ctx, &audit_reason(ctx, &reason))
        .await?;
    record_case(ctx, guild_id, member.user.id.get(), CaseAction::Kick, &reason).await;
    reply::success(ctx, format!("Kicked {} for: {reason}", member.mention())).await
}

/// Ban a member or any user by ID
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member or user ID to ban"] user: serenity::User,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let reason = reason_or_default(reason);

    // Users outside the guild have no roles to compare
    let member = match guild_id.member(ctx, user.id).await {
        Ok(member) => Some(member),
        Err(e) if is_unknown_member(&e) => None,
        Err(e) => return Err(e.into()),
    };
    if let Some(member) = member {
        if let Err(refusal) = authorize(ctx, guild_id, &member, MemberAction::Ban).await? {
            return reply::warning(ctx, refusal.to_string()).await;
        }
        notify_target(
            ctx,
            &user,
            format!(
                "You were banned from **{}** by {} for: {reason}",
                guild_name(ctx),
                ctx.author().name
            ),
        )
        .await;
    } else if let Err(refusal) = ensure_unprotected(ctx, guild_id, user.id.get()).await {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    guild_id
        .ban_with_reason(ctx, user.id, 0, audit_reason(ctx, &reason))
        .await?;
    record_case(ctx, guild_id, user.id.get(), CaseAction::Ban, &reason).await;
    reply::success(ctx, format!("Banned {} for: {reason}", user.mention())).await
}

/// Ban and immediately unban a member to clear a week of their messages
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn softban(
    ctx: Context<'_>,
    #[description = "Member to softban"] member: serenity::Member,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if let Err(refusal) = authorize(ctx, guild_id, &member, MemberAction::Softban).await? {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let reason = reason_or_default(reason);
    let user_id = member.user.id;
    guild_id
        .ban_with_reason(ctx, user_id, SOFTBAN_DELETE_DAYS, audit_reason(ctx, &reason))
        .await?;
    ctx.http()
        .remove_ban(guild_id, user_id, Some("Softban"))
        .await?;
    record_case(ctx, guild_id, user_id.get(), CaseAction::Softban, &reason).await;
    reply::success(ctx, format!("Softbanned {} for: {reason}", member.mention())).await
}

/// Ban a user and prevent them from being unbanned
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn hardban(
    ctx: Context<'_>,
    #[description = "User to hardban"] user: serenity::User,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };
    if let Err(refusal) = ensure_unprotected(ctx, guild_id, user.id.get()).await {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let reason = reason_or_default(reason);
    guild_id
        .ban_with_reason(ctx, user.id, 0, audit_reason(ctx, &reason))
        .await?;
    ledger
        .add_hardban(HardbanEntry {
            guild_id: guild_id.get(),
            user_id: user.id.get(),
            moderator_id: ctx.author().id.get(),
            reason: reason.clone(),
        })
        .await?;
    record_case(ctx, guild_id, user.id.get(), CaseAction::Hardban, &reason).await;
    reply::success(ctx, format!("Hardbanned user {} for: {reason}", user.mention())).await
}

/// View hardbanned users
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn hardbanlist(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };

    let hardbans = ledger.list_hardbans(guild_id.get()).await?;
    if hardbans.is_empty() {
        return reply::warning(ctx, "No hardbanned users").await;
    }

    let description = hardbans
        .iter()
        .take(10)
        .map(|entry| format!("<@{}> - {}", entry.user_id, entry.reason))
        .collect::<Vec<_>>()
        .join("\n");
    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title("Hardbanned Users")
            .description(description)
            .footer(CreateEmbedFooter::new(format!("Total: {}", hardbans.len()))),
    )
    .await
}

/// Unban a user from the server
///
/// Hardbanned users are refused, and so is everyone while the ledger is
/// unavailable.
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if let Some(refusal) = unban_refusal(ctx.data().ledger(), guild_id.get(), user.id.get()).await?
    {
        return reply::warning(ctx, refusal).await;
    }

    let reason = reason_or_default(reason);
    ctx.http()
        .remove_ban(guild_id, user.id, Some(audit_reason(ctx, &reason).as_str()))
        .await?;
    record_case(ctx, guild_id, user.id.get(), CaseAction::Unban, &reason).await;
    reply::success(ctx, format!("Unbanned {} for: {reason}", user.mention())).await
}

/// Timeout a member
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn timeout(
    ctx: Context<'_>,
    #[description = "Member to timeout"] member: serenity::Member,
    #[description = "Duration, e.g. 10m or 1h30m"] duration: String,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if let Err(refusal) = authorize(ctx, guild_id, &member, MemberAction::Timeout).await? {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let length = match parse_bounded(&duration, TIMEOUT_BOUNDS) {
        Ok(length) => length,
        Err(e) => return reply::warning(ctx, e.to_string()).await,
    };
    let until = Timestamp::from_unix_timestamp(
        Timestamp::now().unix_timestamp() + i64::try_from(length.as_secs())?,
    )?;

    let reason = reason_or_default(reason);
    guild_id
        .edit_member(
            ctx,
            member.user.id,
            EditMember::new()
                .disable_communication_until_datetime(until)
                .audit_log_reason(&audit_reason(ctx, &reason)),
        )
        .await?;
    record_case(
        ctx,
        guild_id,
        member.user.id.get(),
        CaseAction::Timeout,
        &format!("{duration} - {reason}"),
    )
    .await;
    reply::success(
        ctx,
        format!("Timed out {} for **{duration}** - {reason}", member.mention()),
    )
    .await
}

/// Remove a member's timeout
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn untimeout(
    ctx: Context<'_>,
    #[description = "Member to release"] member: serenity::Member,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let now = Timestamp::now().unix_timestamp();
    let timed_out = member
        .communication_disabled_until
        .is_some_and(|until| until.unix_timestamp() > now);
    if !timed_out {
        return reply::warning(ctx, format!("{} is not timed out", member.mention())).await;
    }

    guild_id
        .edit_member(ctx, member.user.id, EditMember::new().enable_communication())
        .await?;
    reply::success(ctx, format!("Removed timeout from {}", member.mention())).await
}

/// Warn a member
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] member: serenity::Member,
    #[rest]
    #[description = "Reason"]
    reason: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };
    if let Err(refusal) = ensure_unprotected(ctx, guild_id, member.user.id.get()).await {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let reason = reason_or_default(Some(reason));
    let total = warn_member(
        ledger,
        guild_id.get(),
        member.user.id.get(),
        ctx.author().id.get(),
        &reason,
        || {
            notify_target(
                ctx,
                &member.user,
                format!(
                    "You were warned in **{}** by {} for: {reason}",
                    guild_name(ctx),
                    ctx.author().name
                ),
            )
        },
    )
    .await?;
    crate::logging::log_moderation_action(
        CaseAction::Warn,
        guild_id.get(),
        member.user.id.get(),
        ctx.author().id.get(),
    );
    reply::success(
        ctx,
        format!(
            "Warned {} for: {reason} (Total warnings: {total})",
            member.mention()
        ),
    )
    .await
}

/// View warnings for a member
#[poise::command(prefix_command, guild_only, category = "Moderation")]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "Member to look up"] member: Option<serenity::Member>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };
    let user = member.map_or_else(|| ctx.author().clone(), |m| m.user);

    let warnings = ledger.list_warnings(guild_id.get(), user.id.get()).await?;
    if warnings.is_empty() {
        return reply::warning(ctx, format!("{} has no warnings", user.mention())).await;
    }

    let mut description = String::new();
    for (i, warning) in warnings.iter().take(WARNINGS_SHOWN).enumerate() {
        let _ = writeln!(
            description,
            "**{}.** {} - by <@{}>",
            i + 1,
            warning.reason,
            warning.moderator_id
        );
    }
    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title(format!("Warnings for {}", user.name))
            .description(description)
            .footer(CreateEmbedFooter::new(format!(
                "Total warnings: {}",
                warnings.len()
            ))),
    )
    .await
}

/// View the most recent moderation cases for a user
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    aliases("history")
)]
pub async fn modhistory(
    ctx: Context<'_>,
    #[description = "User to look up"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };
    let user = user.unwrap_or_else(|| ctx.author().clone());

    let cases = ledger
        .list_cases(guild_id.get(), user.id.get(), HISTORY_LIMIT)
        .await?;
    if cases.is_empty() {
        return reply::warning(ctx, format!("{} has no moderation history", user.mention()))
            .await;
    }

    let description = cases
        .iter()
        .map(|case| {
            format!(
                "**Case #{}** - {} by <@{}> <t:{}:R>\n{}",
                case.case_id,
                case.action,
                case.moderator_id,
                case.timestamp.timestamp(),
                case.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title(format!("Moderation History for {}", user.name))
            .description(description),
    )
    .await
}

/// Change or clear a member's nickname
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    aliases("nick"),
    required_permissions = "MANAGE_NICKNAMES"
)]
pub async fn nickname(
    ctx: Context<'_>,
    #[description = "Member to rename"] member: serenity::Member,
    #[rest]
    #[description = "New nickname; omit to clear"]
    nickname: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if let Err(refusal) = check_target(ctx, &member, MemberAction::Nickname).await? {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let nickname = nickname.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    guild_id
        .edit_member(
            ctx,
            member.user.id,
            EditMember::new().nickname(nickname.clone().unwrap_or_default()),
        )
        .await?;

    match nickname {
        Some(nickname) => {
            reply::success(
                ctx,
                format!("Changed {}'s nickname to **{nickname}**", member.mention()),
            )
            .await
        }
        None => reply::success(ctx, format!("Removed {}'s nickname", member.mention())).await,
    }
}

/// Remove every role the bot can manage from a member
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn strip(
    ctx: Context<'_>,
    #[description = "Member to strip"] member: serenity::Member,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let hierarchy = GuildHierarchy::load(ctx).await?;
    if let Err(refusal) = hierarchy.check_member(&member.roles, MemberAction::Strip) {
        return reply::warning(ctx, refusal.to_string()).await;
    }
    if let Err(refusal) = ensure_unprotected(ctx, guild_id, member.user.id.get()).await {
        return reply::warning(ctx, refusal.to_string()).await;
    }

    let roles = hierarchy.manageable(&member.roles);
    member.remove_roles(ctx, &roles).await?;
    reply::success(
        ctx,
        format!("Stripped **{}** roles from {}", roles.len(), member.mention()),
    )
    .await
}

/// Toggle a member's protection from moderation
#[poise::command(
    prefix_command,
    guild_only,
    category = "Moderation",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn protect(
    ctx: Context<'_>,
    #[description = "Member to protect or release"] member: serenity::Member,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };

    match ledger
        .toggle_protection(guild_id.get(), member.user.id.get())
        .await?
    {
        ProtectionToggle::Added => {
            reply::success(ctx, format!("Protected {} from moderation", member.mention())).await
        }
        ProtectionToggle::Removed => {
            reply::success(ctx, format!("Removed protection from {}", member.mention())).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use poise::serenity_prelude::Permissions;

    const GUILD: u64 = 67890;
    const USER: u64 = 12345;

    #[tokio::test]
    async fn test_warned_member_is_notified_before_the_warning_is_stored() {
        let memory = MemoryStore::new();
        let ledger: &dyn ModerationStore = &memory;

        let total = warn_member(ledger, GUILD, USER, 555, "spam", || async {
            let stored = ledger.list_warnings(GUILD, USER).await.unwrap();
            assert!(stored.is_empty());
        })
        .await
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(ledger.list_warnings(GUILD, USER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unban_refused_without_ledger() {
        assert_eq!(
            unban_refusal(None, GUILD, USER).await.unwrap(),
            Some(DATABASE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_hardbanned_user_cannot_be_unbanned() {
        let memory = MemoryStore::new();
        let ledger: &dyn ModerationStore = &memory;
        assert_eq!(unban_refusal(Some(ledger), GUILD, USER).await.unwrap(), None);

        ledger
            .add_hardban(HardbanEntry {
                guild_id: GUILD,
                user_id: USER,
                moderator_id: 555,
                reason: "raid".to_string(),
            })
            .await
            .unwrap();
        assert!(
            unban_refusal(Some(ledger), GUILD, USER)
                .await
                .unwrap()
                .is_some_and(|refusal| refusal.contains("hardbanned"))
        );
        // the hardban is per guild
        assert_eq!(unban_refusal(Some(ledger), 1, USER).await.unwrap(), None);
    }

    #[test]
    fn test_permissions_are_declared() {
        assert_eq!(kick().required_permissions, Permissions::KICK_MEMBERS);
        assert_eq!(ban().required_permissions, Permissions::BAN_MEMBERS);
        assert_eq!(unban().required_permissions, Permissions::BAN_MEMBERS);
        assert_eq!(hardban().required_permissions, Permissions::ADMINISTRATOR);
        assert_eq!(timeout().required_permissions, Permissions::MODERATE_MEMBERS);
        assert_eq!(warn().required_permissions, Permissions::MANAGE_MESSAGES);
        assert!(warnings().required_permissions.is_empty());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(modhistory().aliases, vec!["history".to_string()]);
        assert_eq!(nickname().aliases, vec!["nick".to_string()]);
    }
}
