//! Scheduled task record and state machine
//!
//! A task is created only after its effect has been applied, so every record
//! starts out `Active` and ends in exactly one terminal state.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{ScheduleError, ScheduleResult};

/// Scheduled task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
pub enum TaskState {
    /// Effect applied, revocation pending
    #[default]
    Active,
    /// Timer fired while the effect was still in place and it was revoked
    Expired,
    /// Timer fired but the effect had already been removed elsewhere
    #[display("Revoked early")]
    RevokedEarly,
    /// Cancelled by a moderator; the effect is left in place
    Cancelled,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// What the task undoes when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Remove a temporarily granted role
    RoleRevoke { role_id: u64 },
}

/// Record of a deferred revocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique ID of this task
    pub id: String,
    pub kind: TaskKind,
    pub guild_id: u64,
    /// Member the effect applies to
    pub user_id: u64,
    /// Moderator who created the task
    pub owner_id: u64,
    pub created_at: DateTime<Utc>,
    /// When the revocation is due
    pub fire_at: DateTime<Utc>,
    pub state: TaskState,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// Create an active role revocation due at `fire_at`
    pub fn role_revoke(
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        owner_id: u64,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: TaskKind::RoleRevoke { role_id },
            guild_id,
            user_id,
            owner_id,
            created_at: Utc::now(),
            fire_at,
            state: TaskState::Active,
            finished_at: None,
        }
    }

    /// Short form of the ID shown to moderators
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    #[must_use]
    pub fn is_due(&self) -> bool {
        self.state == TaskState::Active && self.fire_at <= Utc::now()
    }

    fn finish(&mut self, state: TaskState) -> ScheduleResult<()> {
        if self.state != TaskState::Active {
            return Err(ScheduleError::InvalidStateTransition);
        }

        self.state = state;
        self.finished_at = Some(Utc::now());

        info!(
            task_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            state = %self.state,
            "Scheduled task finished"
        );

        Ok(())
    }

    /// The effect was revoked by this task
    ///
    /// # Errors
    /// Returns an error if the task is not active
    pub fn expire(&mut self) -> ScheduleResult<()> {
        self.finish(TaskState::Expired)
    }

    /// The effect was already gone when the task fired
    ///
    /// # Errors
    /// Returns an error if the task is not active
    pub fn revoked_early(&mut self) -> ScheduleResult<()> {
        self.finish(TaskState::RevokedEarly)
    }

    /// # Errors
    /// Returns an error if the task is not active
    pub fn cancel(&mut self) -> ScheduleResult<()> {
        self.finish(TaskState::Cancelled)
    }

    /// Move the fire time of an active task
    ///
    /// # Errors
    /// Returns an error if the task is not active
    pub fn reschedule(&mut self, fire_at: DateTime<Utc>) -> ScheduleResult<()> {
        if self.state != TaskState::Active {
            return Err(ScheduleError::InvalidStateTransition);
        }
        self.fire_at = fire_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task() -> ScheduledTask {
        ScheduledTask::role_revoke(67890, 12345, 42, 555, Utc::now() + Duration::seconds(60))
    }

    #[test]
    fn test_new_task_is_active() {
        let task = task();
        assert_eq!(task.state, TaskState::Active);
        assert!(task.finished_at.is_none());
        assert!(!task.is_due());
        assert_eq!(task.kind, TaskKind::RoleRevoke { role_id: 42 });
        assert_eq!(task.short_id().len(), 8);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut expired = task();
        expired.expire().unwrap();
        assert_eq!(expired.state, TaskState::Expired);
        assert!(expired.finished_at.is_some());
        assert!(expired.expire().is_err());
        assert!(expired.cancel().is_err());
        assert!(expired.revoked_early().is_err());

        let mut early = task();
        early.revoked_early().unwrap();
        assert_eq!(early.state, TaskState::RevokedEarly);
        assert!(early.expire().is_err());

        let mut cancelled = task();
        cancelled.cancel().unwrap();
        assert!(cancelled.state.is_terminal());
        assert!(cancelled.reschedule(Utc::now()).is_err());
    }

    #[test]
    fn test_due_only_while_active() {
        let mut task = task();
        task.reschedule(Utc::now() - Duration::seconds(1)).unwrap();
        assert!(task.is_due());

        task.expire().unwrap();
        assert!(!task.is_due());
    }

    #[test]
    fn test_task_serialization() {
        let task = task();
        let serialized = serde_yaml::to_string(&task).expect("Failed to serialize");
        assert!(serialized.contains("RoleRevoke"));
        assert!(serialized.contains("state: Active"));

        let deserialized: ScheduledTask =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized.id, task.id);
        assert_eq!(deserialized.fire_at, task.fire_at);
        assert_eq!(deserialized.kind, task.kind);
    }
}
