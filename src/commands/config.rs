use super::{DATABASE_UNAVAILABLE, guild_id};
use crate::reply;
use crate::{Context, Error};

/// Longest prefix a server may configure
const MAX_PREFIX_LEN: usize = 10;

fn validate_prefix(prefix: &str) -> Result<&str, String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err("Prefix cannot be empty".to_string());
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(format!("Prefix cannot be longer than {MAX_PREFIX_LEN} characters"));
    }
    Ok(prefix)
}

/// Server configuration commands
#[poise::command(
    prefix_command,
    guild_only,
    category = "Config",
    subcommands("prefix"),
    subcommand_required
)]
pub async fn set(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the server prefix
#[poise::command(prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn prefix(
    ctx: Context<'_>,
    #[description = "New prefix"] prefix: String,
) -> Result<(), Error> {
    let Some(ledger) = ctx.data().ledger() else {
        return reply::warning(ctx, DATABASE_UNAVAILABLE).await;
    };
    let prefix = match validate_prefix(&prefix) {
        Ok(prefix) => prefix,
        Err(message) => return reply::warning(ctx, message).await,
    };

    ledger.prefix_set(guild_id(ctx)?.get(), prefix).await?;
    reply::success(ctx, format!("Server prefix set to `{prefix}`")).await
}
