use poise::serenity_prelude::{self as serenity, ChannelId, Mentionable, UserId};

use super::guild_id;
use crate::batch::run_best_effort;
use crate::reply;
use crate::{Context, Error};

/// Members currently connected to `channel`, from the cached voice states
fn members_in(ctx: Context<'_>, channel: ChannelId) -> Vec<UserId> {
    ctx.guild()
        .map(|guild| {
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel))
                .map(|state| state.user_id)
                .collect()
        })
        .unwrap_or_default()
}

fn voice_channel_of(ctx: Context<'_>, user: UserId) -> Option<ChannelId> {
    ctx.guild()?
        .voice_states
        .get(&user)
        .and_then(|state| state.channel_id)
}

/// Move a member into a voice channel
#[poise::command(
    prefix_command,
    guild_only,
    category = "Voice",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn drag(
    ctx: Context<'_>,
    #[description = "Member to move"] member: serenity::Member,
    #[description = "Target voice channel"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    if voice_channel_of(ctx, member.user.id).is_none() {
        return reply::warning(
            ctx,
            format!("{} is not in a voice channel", member.mention()),
        )
        .await;
    }

    guild_id(ctx)?
        .move_member(ctx, member.user.id, channel.id)
        .await?;
    reply::success(
        ctx,
        format!("Moved {} to {}", member.mention(), channel.mention()),
    )
    .await
}

/// Move every member of one voice channel into another
#[poise::command(
    prefix_command,
    guild_only,
    category = "Voice",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn moveall(
    ctx: Context<'_>,
    #[description = "Source voice channel"] from: serenity::GuildChannel,
    #[description = "Target voice channel"] to: serenity::GuildChannel,
) -> Result<(), Error> {
    let members = members_in(ctx, from.id);
    if members.is_empty() {
        return reply::warning(ctx, format!("{} has no members", from.mention())).await;
    }

    let guild_id = guild_id(ctx)?;
    let target = to.id;
    let outcome = run_best_effort(members, |user_id| async move {
        guild_id.move_member(ctx, user_id, target).await.map(|_| ())
    })
    .await;

    reply::success(
        ctx,
        format!(
            "Moved **{}** members from {} to {}",
            outcome.succeeded,
            from.mention(),
            to.mention()
        ),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_commands_need_move_members() {
        for cmd in [drag(), moveall()] {
            assert_eq!(
                cmd.required_permissions,
                serenity::Permissions::MOVE_MEMBERS
            );
            assert_eq!(cmd.category.as_deref(), Some("Voice"));
        }
    }
}
