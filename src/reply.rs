//! Embed replies shared by every command

use poise::CreateReply;
use poise::serenity_prelude::CreateEmbed;

use crate::{Context, Error};

pub const SUCCESS_EMOJI: &str = "✅";
pub const WARNING_EMOJI: &str = "⚠️";

/// Plain embed in the configured colour
pub fn embed(ctx: Context<'_>) -> CreateEmbed {
    CreateEmbed::new().color(ctx.data().config.embed_color)
}

/// Reply with a confirmation of a completed action
///
/// # Errors
/// Returns an error if the message cannot be sent.
pub async fn success(ctx: Context<'_>, message: impl Into<String>) -> Result<(), Error> {
    let description = format!("{SUCCESS_EMOJI} {}", message.into());
    ctx.send(CreateReply::default().embed(embed(ctx).description(description)))
        .await?;
    Ok(())
}

/// Reply explaining why nothing was done
///
/// # Errors
/// Returns an error if the message cannot be sent.
pub async fn warning(ctx: Context<'_>, message: impl Into<String>) -> Result<(), Error> {
    let description = format!("{WARNING_EMOJI} {}", message.into());
    ctx.send(CreateReply::default().embed(embed(ctx).description(description)))
        .await?;
    Ok(())
}

/// Send a prepared embed
///
/// # Errors
/// Returns an error if the message cannot be sent.
pub async fn send_embed(ctx: Context<'_>, embed: CreateEmbed) -> Result<(), Error> {
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}
