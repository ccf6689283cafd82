//! Bans applied to many users at once

use poise::serenity_prelude::{Reaction, ReactionType, Timestamp, UserId};
use tracing::info;

use super::{audit_reason, guild_id, reason_or_default, record_case};
use crate::batch::{Confirmation, confirmation_gate, run_best_effort};
use crate::hierarchy::ensure_unprotected;
use crate::ledger::CaseAction;
use crate::reply;
use crate::{COMMAND_TARGET, Context, Error};

/// Most ids accepted by one `massban`
const MASSBAN_LIMIT: usize = 50;
const CONFIRM_EMOJI: &str = "✅";

/// Whether a join at `joined` falls between `start_minutes` and `end_minutes` ago
fn joined_within(joined: i64, now: i64, start_minutes: u32, end_minutes: u32) -> bool {
    let earliest = now - i64::from(start_minutes) * 60;
    let latest = now - i64::from(end_minutes) * 60;
    (earliest..=latest).contains(&joined)
}

/// Ban up to 50 users by ID
#[poise::command(
    prefix_command,
    guild_only,
    category = "Bulk",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn massban(
    ctx: Context<'_>,
    #[description = "User IDs to ban"] user_ids: Vec<u64>,
    #[rest]
    #[description = "Reason"]
    reason: Option<String>,
) -> Result<(), Error> {
    if user_ids.is_empty() {
        return reply::warning(ctx, "Please provide user IDs to ban").await;
    }
    if user_ids.len() > MASSBAN_LIMIT {
        return reply::warning(ctx, "You can only ban up to 50 users at once").await;
    }

    let guild_id = guild_id(ctx)?;
    let reason = reason_or_default(reason);
    let audit = audit_reason(ctx, &reason);
    let (reason, audit) = (&reason, &audit);

    let outcome = run_best_effort(user_ids, |id| async move {
        if id == 0 {
            return Err(Error::from("User ID 0 is not valid"));
        }
        ensure_unprotected(ctx, guild_id, id).await?;
        guild_id
            .ban_with_reason(ctx, UserId::new(id), 0, audit)
            .await?;
        record_case(ctx, guild_id, id, CaseAction::Ban, reason).await;
        Ok(())
    })
    .await;

    info!(
        target: COMMAND_TARGET,
        guild_id = %guild_id,
        banned = outcome.succeeded,
        skipped = outcome.failed,
        "Massban finished"
    );
    reply::success(
        ctx,
        format!("Banned **{}** users for: {reason}", outcome.succeeded),
    )
    .await
}

/// Ban every member who joined within a time window
///
/// The window runs from `start_minutes` ago up to `end_minutes` ago. Nothing
/// is banned until the invoker confirms with a reaction.
#[poise::command(
    prefix_command,
    guild_only,
    category = "Bulk",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn chunkban(
    ctx: Context<'_>,
    #[description = "Minutes ago the window starts"] start_minutes: u32,
    #[description = "Minutes ago the window ends"] end_minutes: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let end_minutes = end_minutes.unwrap_or(0);
    let now = Timestamp::now().unix_timestamp();
    let spared = [ctx.author().id, ctx.framework().bot_id];

    let targets: Vec<UserId> = ctx
        .guild()
        .map(|guild| {
            guild
                .members
                .values()
                .filter(|member| !spared.contains(&member.user.id))
                .filter(|member| {
                    member.joined_at.is_some_and(|joined| {
                        joined_within(joined.unix_timestamp(), now, start_minutes, end_minutes)
                    })
                })
                .map(|member| member.user.id)
                .collect()
        })
        .unwrap_or_default();

    if targets.is_empty() {
        return reply::warning(ctx, "No members found in that time range").await;
    }

    let prompt = ctx
        .say(format!(
            "Found **{}** members. React with {CONFIRM_EMOJI} to confirm ban.",
            targets.len()
        ))
        .await?
        .into_message()
        .await?;
    prompt
        .react(ctx, ReactionType::Unicode(CONFIRM_EMOJI.to_string()))
        .await?;

    let invoker = ctx.author().id;
    let acknowledged = async {
        prompt
            .await_reaction(ctx.serenity_context())
            .author_id(invoker)
            .filter(|reaction: &Reaction| reaction.emoji.unicode_eq(CONFIRM_EMOJI))
            .await
            .is_some()
    };
    let window = ctx.data().config.confirmation_timeout();
    if confirmation_gate(acknowledged, window).await != Confirmation::Confirmed {
        return reply::warning(ctx, "Chunkban cancelled").await;
    }

    let reason = format!("Chunkban by {}", ctx.author().name);
    let reason = &reason;
    let outcome = run_best_effort(targets, |user_id| async move {
        ensure_unprotected(ctx, guild_id, user_id.get()).await?;
        guild_id
            .ban_with_reason(ctx, user_id, 0, reason)
            .await?;
        record_case(ctx, guild_id, user_id.get(), CaseAction::Ban, reason).await;
        Ok::<(), Error>(())
    })
    .await;

    info!(
        target: COMMAND_TARGET,
        guild_id = %guild_id,
        banned = outcome.succeeded,
        skipped = outcome.failed,
        "Chunkban finished"
    );
    reply::success(ctx, format!("Banned **{}** members", outcome.succeeded)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_window_is_inclusive() {
        assert!(joined_within(NOW - 600, NOW, 10, 0));
        assert!(joined_within(NOW, NOW, 10, 0));
        assert!(!joined_within(NOW - 601, NOW, 10, 0));
    }

    #[test]
    fn test_window_can_end_in_the_past() {
        // joined between 60 and 30 minutes ago
        assert!(joined_within(NOW - 45 * 60, NOW, 60, 30));
        assert!(!joined_within(NOW - 10 * 60, NOW, 60, 30));
    }

    #[test]
    fn test_reversed_window_matches_nothing() {
        assert!(!joined_within(NOW - 45 * 60, NOW, 30, 60));
    }
}
