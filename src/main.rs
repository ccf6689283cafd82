use std::sync::Arc;

use evict::schedule::{HttpRoleGateway, TaskCheckRequest, TaskService, TaskStore};
use evict::{BotConfig, Data, Error, commands, ledger, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info, warn};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = BotConfig::load().await?;
    let token = BotConfig::discord_token()?;

    let ledger = ledger::open(config.database_url.as_deref(), config.max_db_connections).await;
    if ledger.is_none() {
        warn!("No moderation ledger; cases, warnings and server settings are disabled");
    }

    // Restore pending temporary roles before connecting
    let http = Arc::new(serenity::Http::new(&token));
    let store = TaskStore::load(&config.task_file).await?;
    let pruned = store.prune_finished();
    if pruned > 0 {
        info!("Dropped {pruned} finished temporary role record(s)");
    }
    let mut tasks = TaskService::new(store, Arc::new(HttpRoleGateway::new(http)));
    // The first sweep runs immediately and catches tasks that fell due while offline
    let scheduler = tasks.start(config.task_check_interval());
    let armed = tasks.arm_all_active();
    info!("Restored {armed} pending temporary role(s)");

    let data = Data::new(config, ledger, tasks.clone());

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                dynamic_prefix: Some(|ctx| {
                    Box::pin(async move { Ok(Some(ctx.data.prefix_for(ctx.guild_id).await)) })
                }),
                mention_as_prefix: true,
                ..Default::default()
            },
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| Box::pin(logging::on_error(error)),
            ..Default::default()
        })
        .setup(|_ctx, ready, _framework| {
            Box::pin(async move {
                logging::log_console(&format!("Logged in as {}", ready.user.name));
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(evict::handlers::Handler)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!("Client stopped with an error: {err}");
    }

    if let Err(e) = tasks.notify(TaskCheckRequest::Shutdown).await {
        warn!("Scheduler was already stopped: {e}");
    }
    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {e}");
    }
    tasks.store.save().await?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start the async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
