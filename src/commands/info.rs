use poise::serenity_prelude::UserId;

use super::guild_id;
use crate::reply;
use crate::{Context, Error};

/// The `amount` most recent joins, newest first, as numbered lines
fn recent_join_lines(mut joins: Vec<(UserId, i64)>, amount: usize) -> Vec<String> {
    joins.sort_by(|a, b| b.1.cmp(&a.1));
    joins
        .into_iter()
        .take(amount)
        .enumerate()
        .map(|(i, (user_id, joined))| format!("{}. <@{user_id}> - <t:{joined}:R>", i + 1))
        .collect()
}

/// Readable name of an audit log event type
fn action_name(code: u8) -> &'static str {
    match code {
        1 => "Server updated",
        10 => "Channel created",
        11 => "Channel updated",
        12 => "Channel deleted",
        13 => "Permission overwrite created",
        14 => "Permission overwrite updated",
        15 => "Permission overwrite deleted",
        20 => "Member kicked",
        21 => "Members pruned",
        22 => "Member banned",
        23 => "Member unbanned",
        24 => "Member updated",
        25 => "Member roles updated",
        26 => "Member moved",
        27 => "Member disconnected",
        28 => "Bot added",
        30 => "Role created",
        31 => "Role updated",
        32 => "Role deleted",
        40 => "Invite created",
        41 => "Invite updated",
        42 => "Invite deleted",
        50 => "Webhook created",
        51 => "Webhook updated",
        52 => "Webhook deleted",
        60 => "Emoji created",
        61 => "Emoji updated",
        62 => "Emoji deleted",
        72 => "Message deleted",
        73 => "Messages bulk deleted",
        74 => "Message pinned",
        75 => "Message unpinned",
        80 => "Integration created",
        81 => "Integration updated",
        82 => "Integration deleted",
        83 => "Stage started",
        84 => "Stage updated",
        85 => "Stage ended",
        90 => "Sticker created",
        91 => "Sticker updated",
        92 => "Sticker deleted",
        100 => "Event created",
        101 => "Event updated",
        102 => "Event deleted",
        110 => "Thread created",
        111 => "Thread updated",
        112 => "Thread deleted",
        121 => "Command permissions updated",
        140 => "AutoMod rule created",
        141 => "AutoMod rule updated",
        142 => "AutoMod rule deleted",
        143 => "AutoMod blocked a message",
        144 => "AutoMod flagged a message",
        145 => "AutoMod timed out a member",
        192 => "Voice status updated",
        193 => "Voice status cleared",
        _ => "Other action",
    }
}

/// Show recently joined users
#[poise::command(prefix_command, guild_only, category = "Info")]
pub async fn newusers(
    ctx: Context<'_>,
    #[description = "How many users (1-50)"] amount: Option<usize>,
) -> Result<(), Error> {
    let amount = amount.unwrap_or(10);
    if !(1..=50).contains(&amount) {
        return reply::warning(ctx, "Amount must be between 1 and 50").await;
    }

    let joins: Vec<(UserId, i64)> = ctx
        .guild()
        .map(|guild| {
            guild
                .members
                .values()
                .filter_map(|m| Some((m.user.id, m.joined_at?.unix_timestamp())))
                .collect()
        })
        .unwrap_or_default();

    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title("Recently Joined Users")
            .description(recent_join_lines(joins, amount).join("\n")),
    )
    .await
}

/// View recent audit log entries
#[poise::command(
    prefix_command,
    guild_only,
    category = "Info",
    required_permissions = "VIEW_AUDIT_LOG"
)]
pub async fn audit(
    ctx: Context<'_>,
    #[description = "How many entries (1-25)"] limit: Option<u8>,
) -> Result<(), Error> {
    let limit = limit.unwrap_or(10);
    if !(1..=25).contains(&limit) {
        return reply::warning(ctx, "Limit must be between 1 and 25").await;
    }

    let logs = guild_id(ctx)?
        .audit_logs(ctx, None, None, None, Some(limit))
        .await?;
    let lines: Vec<String> = logs
        .entries
        .iter()
        .map(|entry| {
            format!(
                "**{}** by <@{}> - <t:{}:R>",
                action_name(entry.action.num()),
                entry.user_id,
                entry.id.created_at().unix_timestamp()
            )
        })
        .collect();

    reply::send_embed(
        ctx,
        reply::embed(ctx)
            .title("Recent Audit Log")
            .description(lines.join("\n")),
    )
    .await
}
