//! Durable scheduler for temporary roles
//!
//! A task is recorded only after its role has been granted. Each task gets its
//! own timer, and a background loop periodically sweeps for overdue tasks so
//! that revocations lost to a restart still happen.

mod error;
mod gateway;
mod service;
mod store;
mod task;

pub use error::{ScheduleError, ScheduleResult};
#[cfg(test)]
pub use gateway::MockRoleGateway;
pub use gateway::{HttpRoleGateway, RoleGateway, is_unknown_member};
pub use service::TaskService;
pub use store::TaskStore;
pub use task::{ScheduledTask, TaskKind, TaskState};

/// Request type for the scheduler background task
#[derive(Debug, Clone)]
pub enum TaskCheckRequest {
    /// Expire every overdue task now
    CheckAll,
    /// Check a specific task by ID
    CheckTask { id: String },
    /// Shutdown the scheduler task
    Shutdown,
}
