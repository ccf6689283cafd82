use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Ready, UnavailableGuild,
};
use tracing::{info, warn};

use crate::EVENT_TARGET;

/// Gateway lifecycle logging; commands are dispatched by poise
pub struct Handler;

/// Describe a difference between the guilds the gateway reported and those cached
fn cache_gap(cached: usize, reported: usize) -> Option<String> {
    (cached != reported).then(|| format!("{cached} cached vs {reported} reported"))
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            target: EVENT_TARGET,
            user = %ready.user.name,
            shard = ctx.shard_id.0,
            guilds = ready.guilds.len(),
            "Connected"
        );
    }

    /// Called when every guild from `ready` has been cached.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        if let Some(gap) = cache_gap(ctx.cache.guild_count(), guilds.len()) {
            warn!(target: EVENT_TARGET, "Cache guild count mismatch: {gap}");
        }
        info!(
            target: EVENT_TARGET,
            guilds = guilds.len(),
            "Cache ready, member lists available"
        );
    }

    async fn guild_delete(
        &self,
        _ctx: Context,
        incomplete: UnavailableGuild,
        _full: Option<serenity::Guild>,
    ) {
        if incomplete.unavailable {
            warn!(target: EVENT_TARGET, guild_id = %incomplete.id, "Guild became unavailable");
        } else {
            info!(target: EVENT_TARGET, guild_id = %incomplete.id, "Removed from guild");
        }
    }
}
