pub mod batch;
pub mod commands;
pub mod config;
pub mod data;
pub mod duration;
pub mod handlers;
pub mod hierarchy;
pub mod ledger;
pub mod logging;
pub mod reply;
pub mod schedule;

pub const BOT_NAME: &str = "evict";
pub const COMMAND_TARGET: &str = "evict::command";
pub const ERROR_TARGET: &str = "evict::error";
pub const EVENT_TARGET: &str = "evict::handlers";
pub const CONSOLE_TARGET: &str = "evict";

pub use config::BotConfig;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
