//! Tracing setup and the framework hooks that feed it
//!
//! Everything under [`COMMAND_TARGET`] also lands in a daily JSON file so
//! moderation actions can be audited after the fact.

use std::time::Instant;

use poise::FrameworkError;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::ledger::CaseAction;
use crate::{COMMAND_TARGET, CONSOLE_TARGET, Context, Data, ERROR_TARGET, Error};

pub const LOG_DIR: &str = "logs";
/// Prefix of the rolling JSON files inside [`LOG_DIR`]
pub const COMMAND_LOG_FILE: &str = "commands";
/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,serenity=error";

fn console_layer() -> impl Layer<Registry> + Send + Sync {
    fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
}

fn json_file_layer<S>() -> Result<impl Layer<S> + Send + Sync, Error>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    std::fs::create_dir_all(LOG_DIR)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    Ok(fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(appender))
}

/// Install the global subscriber
///
/// # Errors
/// Fails if the log directory cannot be created or a subscriber is
/// already installed.
pub fn init() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    tracing_subscriber::registry()
        .with(console_layer())
        .with(json_file_layer()?)
        .with(filter)
        .try_init()?;

    info!(log_dir = LOG_DIR, "Logging initialized");
    Ok(())
}

/// When the current invocation started, stored with the invocation
struct Started(Instant);

fn guild_label(ctx: Context<'_>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.to_string())
}

/// `pre_command` hook
pub async fn log_command_start(ctx: Context<'_>) {
    ctx.set_invocation_data(Started(Instant::now())).await;

    info!(
        target: COMMAND_TARGET,
        event = "start",
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id,
        invocation = %ctx.invocation_string(),
        "Command started"
    );
}

/// `post_command` hook; only runs for commands that returned `Ok`
pub async fn log_command_end(ctx: Context<'_>) {
    let elapsed_ms = match ctx.invocation_data::<Started>().await {
        Some(started) => u64::try_from(started.0.elapsed().as_millis()).unwrap_or(u64::MAX),
        None => 0,
    };

    info!(
        target: COMMAND_TARGET,
        event = "end",
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id,
        elapsed_ms,
        "Command finished"
    );
}

/// One structured event per moderation action taken
pub fn log_moderation_action(action: CaseAction, guild_id: u64, target_id: u64, moderator_id: u64) {
    info!(
        target: COMMAND_TARGET,
        event = "moderation_action",
        action = %action,
        guild_id,
        target_id,
        moderator_id,
        "Moderation action taken"
    );
}

/// Record a framework error; user-facing replies are left to poise
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    let Some(ctx) = error.ctx() else {
        error!(target: ERROR_TARGET, error = %error, "Framework error outside a command");
        return;
    };
    let command = &ctx.command().qualified_name;
    let guild_id = guild_label(ctx);
    let user_id = ctx.author().id;

    match error {
        FrameworkError::Command { error, .. } => {
            error!(target: ERROR_TARGET, %command, %guild_id, %user_id, error = %error, "Command failed");
        }
        FrameworkError::ArgumentParse { error, input, .. } => {
            warn!(target: ERROR_TARGET, %command, %guild_id, %user_id, ?input, error = %error, "Bad arguments");
        }
        FrameworkError::MissingUserPermissions { missing_permissions, .. } => {
            warn!(target: ERROR_TARGET, %command, %guild_id, %user_id, missing = ?missing_permissions, "Invoker lacks permissions");
        }
        FrameworkError::MissingBotPermissions { missing_permissions, .. } => {
            warn!(target: ERROR_TARGET, %command, %guild_id, %user_id, missing = %missing_permissions, "Bot lacks permissions");
        }
        other => {
            warn!(target: ERROR_TARGET, %command, %guild_id, %user_id, error = %other, "Command rejected");
        }
    }
}

/// Framework error hook: log, then let poise answer the invoker
pub async fn on_error(error: FrameworkError<'_, Data, Error>) {
    log_command_error(&error);
    if let Err(e) = poise::builtins::on_error(error).await {
        error!(target: ERROR_TARGET, "Error while handling error: {e}");
    }
}

/// Lifecycle messages meant for whoever runs the bot
pub fn log_console(message: &str) {
    info!(target: CONSOLE_TARGET, event = "console", "{message}");
}
