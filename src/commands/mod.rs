//! Command surface
//!
//! Every command is a guild-only prefix command. Refusals and validation
//! failures are answered with a warning embed and return `Ok(())`; platform
//! failures propagate to the framework error hook.

pub mod bulk;
pub mod channel;
pub mod config;
pub mod help;
pub mod info;
pub mod moderation;
pub mod roles;
pub mod voice;

use poise::serenity_prelude::{CreateMessage, GuildId, User};
use tracing::{debug, warn};

use crate::ledger::{CaseAction, NO_REASON, NewCase};
use crate::logging::log_moderation_action;
use crate::{Context, Data, Error};

pub const DATABASE_UNAVAILABLE: &str = "Database not available";

/// Every command the bot registers
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        // moderation
        moderation::kick(),
        moderation::ban(),
        moderation::softban(),
        moderation::hardban(),
        moderation::hardbanlist(),
        moderation::unban(),
        moderation::timeout(),
        moderation::untimeout(),
        moderation::warn(),
        moderation::warnings(),
        moderation::modhistory(),
        moderation::nickname(),
        moderation::strip(),
        moderation::protect(),
        // channel
        channel::cleanup(),
        channel::purge(),
        channel::selfpurge(),
        channel::denyperm(),
        channel::lockdown(),
        channel::unlockdown(),
        channel::hide(),
        channel::reveal(),
        channel::slowmode(),
        channel::nsfw(),
        channel::topic(),
        channel::nuke(),
        channel::pin(),
        channel::unpin(),
        channel::picperms(),
        channel::imute(),
        channel::rmute(),
        // voice
        voice::drag(),
        voice::moveall(),
        // roles
        roles::role(),
        roles::temprole(),
        roles::jail(),
        roles::jailed(),
        roles::unjail(),
        // bulk
        bulk::massban(),
        bulk::chunkban(),
        // info
        info::newusers(),
        info::audit(),
        // config
        config::set(),
        // help
        help::help(),
    ]
}

/// Guild of the invocation; every command is guild only
pub(crate) fn guild_id(ctx: Context<'_>) -> Result<GuildId, Error> {
    Ok(ctx.guild_id().ok_or("This command only works in servers")?)
}

/// Name of the invocation's guild, for messages sent outside it
pub(crate) fn guild_name(ctx: Context<'_>) -> String {
    ctx.guild()
        .map(|guild| guild.name.clone())
        .unwrap_or_else(|| "this server".to_string())
}

/// The reason argument, or the placeholder when none was given
pub(crate) fn reason_or_default(reason: Option<String>) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| NO_REASON.to_string())
}

/// Audit log reason attributing an action to the invoker
pub(crate) fn audit_reason(ctx: Context<'_>, reason: &str) -> String {
    format!("{}: {reason}", ctx.author().name)
}

/// Append a case for a completed action
///
/// The action has already happened, so a missing or failing ledger is only
/// logged.
pub(crate) async fn record_case(
    ctx: Context<'_>,
    guild_id: GuildId,
    user_id: u64,
    action: CaseAction,
    reason: &str,
) -> Option<i64> {
    log_moderation_action(action, guild_id.get(), user_id, ctx.author().id.get());

    let ledger = ctx.data().ledger()?;
    let case = NewCase::new(
        guild_id.get(),
        user_id,
        ctx.author().id.get(),
        action,
        Some(reason),
    );
    match ledger.record_case(case).await {
        Ok(case_id) => Some(case_id),
        Err(e) => {
            warn!("Failed to record {action} case for {user_id} in {guild_id}: {e}");
            None
        }
    }
}

/// Direct-message a member before acting on them; delivery failures are ignored
pub(crate) async fn notify_target(ctx: Context<'_>, user: &User, content: String) {
    if let Err(e) = user
        .direct_message(ctx, CreateMessage::new().content(content))
        .await
    {
        debug!("Could not DM {}: {e}", user.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_reason_defaults() {
        assert_eq!(reason_or_default(None), NO_REASON);
        assert_eq!(reason_or_default(Some("   ".to_string())), NO_REASON);
        assert_eq!(reason_or_default(Some(" spam ".to_string())), "spam");
    }

    #[test]
    fn test_command_names_are_unique() {
        let commands = all();
        let mut seen = HashSet::new();
        for cmd in &commands {
            assert!(seen.insert(cmd.name.clone()), "duplicate name {}", cmd.name);
            for alias in &cmd.aliases {
                assert!(seen.insert(alias.clone()), "duplicate alias {alias}");
            }
        }
    }

    #[test]
    fn test_every_command_is_guild_only_prefix_with_category() {
        for cmd in all() {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
            assert!(cmd.prefix_action.is_some() || !cmd.subcommands.is_empty());
            assert!(cmd.category.is_some(), "{} has no category", cmd.name);
        }
    }
}
