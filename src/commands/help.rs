//! Help overview and per-command detail, built from the registered commands

use std::collections::BTreeMap;

use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};

use crate::reply;
use crate::{BOT_NAME, Context, Data, Error};

type Command = poise::Command<Data, Error>;

const LEGEND: &str = "[ ] = optional, < > = required";

/// Resolve `query`, which may name a subcommand, e.g. `temprole list`
fn find_command<'a>(commands: &'a [Command], query: &str) -> Option<&'a Command> {
    let mut words = query.split_whitespace();
    let matches = |cmd: &&Command, word: &str| {
        cmd.name.eq_ignore_ascii_case(word) || cmd.aliases.iter().any(|a| a.eq_ignore_ascii_case(word))
    };

    let first = words.next()?;
    let mut found = commands.iter().find(|cmd| matches(cmd, first))?;
    for word in words {
        found = found.subcommands.iter().find(|cmd| matches(cmd, word))?;
    }
    Some(found)
}

/// Commands grouped by category; those needing a permission are starred
fn category_overview(commands: &[Command]) -> BTreeMap<String, Vec<String>> {
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for cmd in commands.iter().filter(|cmd| !cmd.hide_in_help) {
        let category = cmd.category.clone().unwrap_or_else(|| "Other".to_string());
        let star = if cmd.required_permissions.is_empty() { "" } else { "*" };
        categories
            .entry(category)
            .or_default()
            .push(format!("{}{star}", cmd.name));
    }
    categories
}

fn usage(cmd: &Command) -> String {
    let mut usage = cmd.qualified_name.clone();
    for param in &cmd.parameters {
        if param.required {
            usage.push_str(&format!(" <{}>", param.name));
        } else {
            usage.push_str(&format!(" [{}]", param.name));
        }
    }
    usage
}

fn permissions_label(cmd: &Command) -> String {
    if cmd.required_permissions.is_empty() {
        return "any".to_string();
    }
    cmd.required_permissions
        .get_permission_names()
        .join(", ")
        .to_lowercase()
}

fn aliases_label(cmd: &Command) -> String {
    if cmd.aliases.is_empty() {
        "none".to_string()
    } else {
        cmd.aliases.join(", ")
    }
}

fn overview_embed(embed: CreateEmbed, commands: &[Command], prefix: &str) -> CreateEmbed {
    let mut embed = embed
        .title(BOT_NAME)
        .description(format!("Use `{prefix}help <command>` for details on a command"))
        .field("information", LEGEND, false);
    for (category, names) in category_overview(commands) {
        embed = embed.field(
            format!("{category} ({})", names.len()),
            format!("```{}```", names.join(", ")),
            false,
        );
    }
    embed
}

fn detail_embed(embed: CreateEmbed, cmd: &Command) -> CreateEmbed {
    let module = cmd.category.as_deref().unwrap_or("Other");
    embed
        .title(&cmd.qualified_name)
        .description(cmd.description.as_deref().unwrap_or("No description"))
        .field("aliases", aliases_label(cmd), true)
        .field("permissions", permissions_label(cmd), true)
        .field("usage", format!("```{}```", usage(cmd)), false)
        .footer(CreateEmbedFooter::new(format!("module: {module}")))
}

/// Show the help menu with all bot commands
#[poise::command(
    prefix_command,
    guild_only,
    category = "Help",
    aliases("h", "commands")
)]
pub async fn help(
    ctx: Context<'_>,
    #[rest]
    #[description = "Command to explain"]
    command: Option<String>,
) -> Result<(), Error> {
    let commands = &ctx.framework().options.commands;

    let Some(query) = command.filter(|q| !q.trim().is_empty()) else {
        let prefix = ctx.data().prefix_for(ctx.guild_id()).await;
        return reply::send_embed(ctx, overview_embed(reply::embed(ctx), commands, &prefix)).await;
    };

    match find_command(commands, &query) {
        Some(cmd) => reply::send_embed(ctx, detail_embed(reply::embed(ctx), cmd)).await,
        None => reply::warning(ctx, format!("Command `{}` not found", query.trim())).await,
    }
}
