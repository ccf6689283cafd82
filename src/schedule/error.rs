//! Error types for the task scheduler

use thiserror::Error;

/// Errors that can occur while scheduling or running a task
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid state transition attempted
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// Task record not found
    #[error("Scheduled task not found: {0}")]
    NotFound(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// The task file could not be read or written
    #[error("Task file error: {0}")]
    Io(#[from] std::io::Error),

    /// The task file could not be encoded or decoded
    #[error("Task file format error: {0}")]
    Format(#[from] serde_yaml::Error),

    /// The requested schedule is not representable
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<poise::serenity_prelude::Error> for ScheduleError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

/// Result type for scheduler operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;
