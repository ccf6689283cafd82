//! Channel maintenance: purging, permission overwrites and settings

use poise::serenity_prelude::{
    self as serenity, ChannelId, ChannelType, CreateChannel, CreateMessage, EditChannel,
    GetMessages, GuildChannel, Mentionable, Message, MessageId, PermissionOverwrite,
    PermissionOverwriteType, Permissions, Timestamp,
};

use super::{guild_id, reason_or_default};
use crate::reply;
use crate::{Context, Error};

/// Discord refuses to bulk delete messages older than this
const BULK_DELETE_WINDOW_SECS: i64 = 14 * 86_400;
const MAX_SLOWMODE_SECS: u16 = 21_600;

/// Whether a message created at `created` can still be bulk deleted
fn bulk_deletable(created: i64, now: i64) -> bool {
    now - created < BULK_DELETE_WINDOW_SECS
}

/// Permissions `denyperm` accepts by name
pub(crate) fn deny_for(name: &str) -> Option<Permissions> {
    match name.to_ascii_lowercase().as_str() {
        "send_messages" => Some(Permissions::SEND_MESSAGES),
        "view_channel" | "read_messages" => Some(Permissions::VIEW_CHANNEL),
        "connect" => Some(Permissions::CONNECT),
        "speak" => Some(Permissions::SPEAK),
        _ => None,
    }
}

const DENYABLE: &str = "send_messages, view_channel, connect, speak, read_messages";

/// How a permission is changed within an overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Setting {
    Deny,
    /// Neither allowed nor denied; falls back to role permissions
    Inherit,
}

/// Apply `setting` for `perms` on top of an existing overwrite
pub(crate) fn edit_overwrite(
    existing: Option<&PermissionOverwrite>,
    kind: PermissionOverwriteType,
    perms: Permissions,
    setting: Setting,
) -> PermissionOverwrite {
    let (mut allow, mut deny) =
        existing.map_or((Permissions::empty(), Permissions::empty()), |o| (o.allow, o.deny));
    allow.remove(perms);
    match setting {
        Setting::Deny => deny.insert(perms),
        Setting::Inherit => deny.remove(perms),
    }
    PermissionOverwrite { allow, deny, kind }
}

async fn current_channel(ctx: Context<'_>) -> Result<GuildChannel, Error> {
    Ok(ctx
        .guild_channel()
        .await
        .ok_or("This command only works in server channels")?)
}

/// Change one set of permissions for `kind` in the current channel
async fn update_overwrite(
    ctx: Context<'_>,
    kind: PermissionOverwriteType,
    perms: Permissions,
    setting: Setting,
) -> Result<(), Error> {
    let channel = current_channel(ctx).await?;
    let existing = channel
        .permission_overwrites
        .iter()
        .find(|overwrite| overwrite.kind == kind);
    let overwrite = edit_overwrite(existing, kind, perms, setting);

    if overwrite.allow.is_empty() && overwrite.deny.is_empty() {
        if existing.is_some() {
            channel.id.delete_permission(ctx, kind).await?;
        }
    } else {
        channel.id.create_permission(ctx, overwrite).await?;
    }
    Ok(())
}

fn everyone(ctx: Context<'_>) -> Result<PermissionOverwriteType, Error> {
    Ok(PermissionOverwriteType::Role(guild_id(ctx)?.everyone_role()))
}

/// Scan up to `scan` recent messages and return the deletable ones `keep` selects
async fn collect_messages(
    ctx: Context<'_>,
    channel_id: ChannelId,
    scan: usize,
    keep: impl Fn(&Message) -> bool,
) -> Result<Vec<MessageId>, Error> {
    let now = Timestamp::now().unix_timestamp();
    let mut ids = Vec::new();
    let mut before: Option<MessageId> = None;
    let mut remaining = scan;

    while remaining > 0 {
        let page = remaining.min(100);
        let mut request = GetMessages::new().limit(u8::try_from(page)?);
        if let Some(id) = before {
            request = request.before(id);
        }

        let messages = channel_id.messages(ctx, request).await?;
        let Some(last) = messages.last() else {
            break;
        };
        before = Some(last.id);
        remaining = remaining.saturating_sub(messages.len());
        ids.extend(
            messages
                .iter()
                .filter(|m| bulk_deletable(m.timestamp.unix_timestamp(), now) && keep(m))
                .map(|m| m.id),
        );

        if messages.len() < page {
            break;
        }
    }
    Ok(ids)
}

/// Delete `ids` and return how many were removed, not counting the invocation
async fn delete_collected(
    ctx: Context<'_>,
    channel_id: ChannelId,
    ids: &[MessageId],
) -> Result<usize, Error> {
    for chunk in ids.chunks(100) {
        channel_id.delete_messages(ctx, chunk).await?;
    }
    Ok(ids.iter().filter(|id| id.get() != ctx.id()).count())
}

/// Clean up recent bot messages
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn cleanup(
    ctx: Context<'_>,
    #[description = "Messages to scan (1-100)"] amount: Option<usize>,
) -> Result<(), Error> {
    let amount = amount.unwrap_or(10);
    if !(1..=100).contains(&amount) {
        return reply::warning(ctx, "Amount must be between 1 and 100").await;
    }

    let channel_id = ctx.channel_id();
    let ids = collect_messages(ctx, channel_id, amount + 1, |m| m.author.bot).await?;
    let deleted = delete_collected(ctx, channel_id, &ids).await?;
    reply::success(ctx, format!("Cleaned up **{deleted}** bot messages")).await
}

/// Purge messages, optionally only those of one member
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    aliases("clear", "clean"),
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn purge(
    ctx: Context<'_>,
    #[description = "Messages to scan (1-1000)"] amount: usize,
    #[description = "Only delete this member's messages"] member: Option<serenity::Member>,
) -> Result<(), Error> {
    if !(1..=1000).contains(&amount) {
        return reply::warning(ctx, "Amount must be between 1 and 1000").await;
    }

    let channel_id = ctx.channel_id();
    let author = member.as_ref().map(|m| m.user.id);
    let ids = collect_messages(ctx, channel_id, amount + 1, |m| {
        author.is_none_or(|id| m.author.id == id)
    })
    .await?;
    let deleted = delete_collected(ctx, channel_id, &ids).await?;

    let from = member.map(|m| format!(" from {}", m.mention())).unwrap_or_default();
    reply::success(ctx, format!("Purged **{deleted}** messages{from}")).await
}

/// Purge your own messages
#[poise::command(prefix_command, guild_only, category = "Channel")]
pub async fn selfpurge(
    ctx: Context<'_>,
    #[description = "Messages to scan (1-100)"] amount: Option<usize>,
) -> Result<(), Error> {
    let amount = amount.unwrap_or(10);
    if !(1..=100).contains(&amount) {
        return reply::warning(ctx, "Amount must be between 1 and 100").await;
    }

    let channel_id = ctx.channel_id();
    let author = ctx.author().id;
    let ids = collect_messages(ctx, channel_id, amount + 1, |m| m.author.id == author).await?;
    let deleted = delete_collected(ctx, channel_id, &ids).await?;
    reply::success(ctx, format!("Purged **{deleted}** of your messages")).await
}

/// Deny a permission for a member in this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn denyperm(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
    #[description = "Permission name"] permission: String,
) -> Result<(), Error> {
    let Some(perms) = deny_for(&permission) else {
        return reply::warning(ctx, format!("Invalid permission. Available: {DENYABLE}")).await;
    };

    ctx.channel_id()
        .create_permission(
            ctx,
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: perms,
                kind: PermissionOverwriteType::Member(member.user.id),
            },
        )
        .await?;
    reply::success(
        ctx,
        format!(
            "Denied **{permission}** for {} in this channel",
            member.mention()
        ),
    )
    .await
}

/// Stop everyone from sending messages here
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    aliases("lock"),
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn lockdown(
    ctx: Context<'_>,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    update_overwrite(ctx, everyone(ctx)?, Permissions::SEND_MESSAGES, Setting::Deny).await?;
    let reason = reason_or_default(reason);
    reply::send_embed(
        ctx,
        reply::embed(ctx).description(format!(
            "🔒 This channel has been locked by {}\n**Reason:** {reason}",
            ctx.author().mention()
        )),
    )
    .await
}

/// Lift a lockdown
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    aliases("unlock"),
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn unlockdown(
    ctx: Context<'_>,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    update_overwrite(ctx, everyone(ctx)?, Permissions::SEND_MESSAGES, Setting::Inherit).await?;
    let reason = reason_or_default(reason);
    reply::send_embed(
        ctx,
        reply::embed(ctx).description(format!(
            "🔓 This channel has been unlocked by {}\n**Reason:** {reason}",
            ctx.author().mention()
        )),
    )
    .await
}

/// Hide this channel from everyone
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn hide(ctx: Context<'_>) -> Result<(), Error> {
    update_overwrite(ctx, everyone(ctx)?, Permissions::VIEW_CHANNEL, Setting::Deny).await?;
    reply::success(ctx, "Channel hidden").await
}

/// Make a hidden channel visible again
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn reveal(ctx: Context<'_>) -> Result<(), Error> {
    update_overwrite(ctx, everyone(ctx)?, Permissions::VIEW_CHANNEL, Setting::Inherit).await?;
    reply::success(ctx, "Channel revealed").await
}

/// Set slowmode for this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn slowmode(
    ctx: Context<'_>,
    #[description = "Seconds between messages (0-21600)"] seconds: i64,
) -> Result<(), Error> {
    let Some(seconds) = u16::try_from(seconds)
        .ok()
        .filter(|s| *s <= MAX_SLOWMODE_SECS)
    else {
        return reply::warning(
            ctx,
            "Slowmode must be between 0 and 21600 seconds (6 hours)",
        )
        .await;
    };

    ctx.channel_id()
        .edit(ctx, EditChannel::new().rate_limit_per_user(seconds))
        .await?;
    if seconds == 0 {
        reply::success(ctx, "Slowmode disabled").await
    } else {
        reply::success(ctx, format!("Slowmode set to **{seconds}** seconds")).await
    }
}

/// Toggle NSFW for this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn nsfw(ctx: Context<'_>) -> Result<(), Error> {
    let channel = current_channel(ctx).await?;
    if channel.kind != ChannelType::Text {
        return reply::warning(ctx, "This command only works in text channels").await;
    }

    let enabled = !channel.nsfw;
    channel
        .id
        .edit(ctx, EditChannel::new().nsfw(enabled))
        .await?;
    let status = if enabled { "enabled" } else { "disabled" };
    reply::success(ctx, format!("NSFW {status} for this channel")).await
}

/// Set the topic of this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn topic(
    ctx: Context<'_>,
    #[rest]
    #[description = "New topic"]
    topic: String,
) -> Result<(), Error> {
    let channel = current_channel(ctx).await?;
    if channel.kind != ChannelType::Text {
        return reply::warning(ctx, "This command only works in text channels").await;
    }

    channel
        .id
        .edit(ctx, EditChannel::new().topic(&topic))
        .await?;
    reply::success(ctx, format!("Channel topic set to: {topic}")).await
}

/// Recreate this channel empty and delete the original
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn nuke(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let channel = current_channel(ctx).await?;
    let audit = format!("Nuked by {}", ctx.author().name);

    let mut builder = CreateChannel::new(channel.name.clone())
        .kind(channel.kind)
        .position(channel.position)
        .nsfw(channel.nsfw)
        .permissions(channel.permission_overwrites.clone())
        .audit_log_reason(&audit);
    if let Some(topic) = &channel.topic {
        builder = builder.topic(topic);
    }
    if let Some(rate_limit) = channel.rate_limit_per_user {
        builder = builder.rate_limit_per_user(rate_limit);
    }
    if let Some(parent) = channel.parent_id {
        builder = builder.category(parent);
    }

    let replacement = guild_id.create_channel(ctx, builder).await?;
    channel.id.delete(ctx).await?;

    replacement
        .id
        .send_message(
            ctx,
            CreateMessage::new().embed(
                reply::embed(ctx)
                    .description(format!("💥 Channel nuked by {}", ctx.author().mention())),
            ),
        )
        .await?;
    Ok(())
}

/// Pin a message in this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn pin(
    ctx: Context<'_>,
    #[description = "Message ID"] message_id: u64,
) -> Result<(), Error> {
    let pinned = match message_id {
        0 => false,
        id => ctx.channel_id().pin(ctx, MessageId::new(id)).await.is_ok(),
    };
    if pinned {
        reply::success(ctx, "Message pinned").await
    } else {
        reply::warning(ctx, "Could not find or pin that message").await
    }
}

/// Unpin a message in this channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn unpin(
    ctx: Context<'_>,
    #[description = "Message ID"] message_id: u64,
) -> Result<(), Error> {
    let unpinned = match message_id {
        0 => false,
        id => ctx.channel_id().unpin(ctx, MessageId::new(id)).await.is_ok(),
    };
    if unpinned {
        reply::success(ctx, "Message unpinned").await
    } else {
        reply::warning(ctx, "Could not find or unpin that message").await
    }
}

const IMAGE_PERMISSIONS: Permissions =
    Permissions::ATTACH_FILES.union(Permissions::EMBED_LINKS);

/// Toggle a member's permission to post images here
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn picperms(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
) -> Result<(), Error> {
    let kind = PermissionOverwriteType::Member(member.user.id);
    let channel = current_channel(ctx).await?;
    let denied = channel
        .permission_overwrites
        .iter()
        .any(|o| o.kind == kind && o.deny.contains(Permissions::ATTACH_FILES));

    if denied {
        update_overwrite(ctx, kind, IMAGE_PERMISSIONS, Setting::Inherit).await?;
        reply::success(
            ctx,
            format!("Restored image permissions for {}", member.mention()),
        )
        .await
    } else {
        update_overwrite(ctx, kind, IMAGE_PERMISSIONS, Setting::Deny).await?;
        reply::success(
            ctx,
            format!("Removed image permissions from {}", member.mention()),
        )
        .await
    }
}

/// Stop a member from posting images here
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn imute(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
) -> Result<(), Error> {
    let kind = PermissionOverwriteType::Member(member.user.id);
    update_overwrite(ctx, kind, IMAGE_PERMISSIONS, Setting::Deny).await?;
    reply::success(ctx, format!("Image muted {}", member.mention())).await
}

/// Stop a member from adding reactions here
#[poise::command(
    prefix_command,
    guild_only,
    category = "Channel",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn rmute(
    ctx: Context<'_>,
    #[description = "Member"] member: serenity::Member,
) -> Result<(), Error> {
    let kind = PermissionOverwriteType::Member(member.user.id);
    update_overwrite(ctx, kind, Permissions::ADD_REACTIONS, Setting::Deny).await?;
    reply::success(ctx, format!("Reaction muted {}", member.mention())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude::{RoleId, UserId};

    #[test]
    fn test_deny_for_known_names() {
        assert_eq!(deny_for("send_messages"), Some(Permissions::SEND_MESSAGES));
        assert_eq!(deny_for("READ_MESSAGES"), Some(Permissions::VIEW_CHANNEL));
        assert_eq!(deny_for("speak"), Some(Permissions::SPEAK));
        assert_eq!(deny_for("administrator"), None);
    }

    #[test]
    fn test_deny_keeps_unrelated_permissions() {
        let kind = PermissionOverwriteType::Role(RoleId::new(1));
        let existing = PermissionOverwrite {
            allow: Permissions::SEND_MESSAGES | Permissions::ADD_REACTIONS,
            deny: Permissions::MENTION_EVERYONE,
            kind,
        };

        let locked = edit_overwrite(
            Some(&existing),
            kind,
            Permissions::SEND_MESSAGES,
            Setting::Deny,
        );
        assert_eq!(locked.allow, Permissions::ADD_REACTIONS);
        assert_eq!(
            locked.deny,
            Permissions::MENTION_EVERYONE | Permissions::SEND_MESSAGES
        );
    }

    #[test]
    fn test_inherit_clears_both_sides() {
        let kind = PermissionOverwriteType::Member(UserId::new(7));
        let existing = PermissionOverwrite {
            allow: Permissions::EMBED_LINKS,
            deny: Permissions::ATTACH_FILES,
            kind,
        };

        let restored = edit_overwrite(Some(&existing), kind, IMAGE_PERMISSIONS, Setting::Inherit);
        assert!(restored.allow.is_empty());
        assert!(restored.deny.is_empty());

        let fresh = edit_overwrite(None, kind, Permissions::ADD_REACTIONS, Setting::Deny);
        assert_eq!(fresh.deny, Permissions::ADD_REACTIONS);
        assert_eq!(fresh.kind, kind);
    }

    #[test]
    fn test_bulk_delete_window() {
        let now = 1_700_000_000;
        assert!(bulk_deletable(now - 60, now));
        assert!(!bulk_deletable(now - BULK_DELETE_WINDOW_SECS, now));
    }

    #[test]
    fn test_purge_aliases() {
        let cmd = purge();
        assert_eq!(cmd.aliases, vec!["clear".to_string(), "clean".to_string()]);
        assert_eq!(lockdown().aliases, vec!["lock".to_string()]);
    }
}
