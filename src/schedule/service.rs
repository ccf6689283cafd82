//! Scheduler service
//!
//! Grants temporary roles, arms a timer per task and runs the background loop
//! that sweeps for overdue tasks.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{
    RoleGateway, ScheduleError, ScheduleResult, ScheduledTask, TaskCheckRequest, TaskKind,
    TaskState, TaskStore,
};
use crate::duration::humanize;

/// Seconds finished records stay visible before the sweep drops them
const FINISHED_RETENTION_SECS: i64 = 3600;

/// Service for temporary role tasks
#[derive(Clone)]
pub struct TaskService {
    pub store: TaskStore,
    gateway: Arc<dyn RoleGateway>,
    /// IDs of tasks currently being expired
    expiring: Arc<DashSet<String>>,
    tx: Arc<Option<Sender<TaskCheckRequest>>>,
}

/// Claim on a task being expired, released on drop
struct ExpiryClaim<'a> {
    expiring: &'a DashSet<String>,
    id: String,
}

impl<'a> ExpiryClaim<'a> {
    fn take(expiring: &'a DashSet<String>, id: &str) -> Option<Self> {
        expiring.insert(id.to_string()).then(|| Self {
            expiring,
            id: id.to_string(),
        })
    }
}

impl Drop for ExpiryClaim<'_> {
    fn drop(&mut self) {
        self.expiring.remove(&self.id);
    }
}

impl TaskService {
    pub fn new(store: TaskStore, gateway: Arc<dyn RoleGateway>) -> Self {
        Self {
            store,
            gateway,
            expiring: Arc::new(DashSet::new()),
            tx: Arc::new(None),
        }
    }

    fn fire_time(duration: Duration, from: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| from.checked_add_signed(delta))
            .ok_or_else(|| ScheduleError::InvalidSchedule(format!("{duration:?} is too long")))
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save().await {
            error!("Failed to save scheduled tasks: {e}");
        }
    }

    /// Grant `role_id` to a member and schedule its removal after `duration`
    ///
    /// Nothing is scheduled when the grant itself fails.
    ///
    /// # Errors
    /// Returns the gateway error of a failed grant.
    pub async fn grant(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        owner_id: u64,
        duration: Duration,
    ) -> ScheduleResult<ScheduledTask> {
        let fire_at = Self::fire_time(duration, Utc::now())?;

        self.gateway
            .add_member_role(
                guild_id,
                user_id,
                role_id,
                Some(format!("Temporary role for {}", humanize(duration))),
            )
            .await?;

        let task = ScheduledTask::role_revoke(guild_id, user_id, role_id, owner_id, fire_at);
        self.store.add(task.clone());
        self.persist().await;

        info!(
            task_id = %task.id,
            user_id,
            guild_id,
            role_id,
            fire_at = %task.fire_at,
            "Temporary role granted"
        );

        self.arm(&task);
        Ok(task)
    }

    /// Revoke the effect of a due task
    ///
    /// Tasks that are no longer active are left untouched. While one caller
    /// is expiring a task, concurrent callers return `Active` without
    /// touching Discord.
    ///
    /// # Errors
    /// Returns an error if the task is unknown or Discord rejects the
    /// removal; the task then stays active and is retried by the sweep.
    pub async fn expire(&self, id: &str) -> ScheduleResult<TaskState> {
        let Some(_claim) = ExpiryClaim::take(&self.expiring, id) else {
            debug!(task_id = %id, "Task is already being expired");
            return Ok(TaskState::Active);
        };

        let task = self
            .store
            .get(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        if task.state.is_terminal() {
            return Ok(task.state);
        }

        let TaskKind::RoleRevoke { role_id } = task.kind;
        let held = self
            .gateway
            .member_has_role(task.guild_id, task.user_id, role_id)
            .await?;

        let result = if held {
            self.gateway
                .remove_member_role(
                    task.guild_id,
                    task.user_id,
                    role_id,
                    Some("Temporary role expired".to_string()),
                )
                .await?;
            self.store.update(id, ScheduledTask::expire)
        } else {
            self.store.update(id, ScheduledTask::revoked_early)
        };

        let state = match result {
            Ok(task) => task.state,
            // Cancelled while the gateway call was in flight
            Err(ScheduleError::InvalidStateTransition) => {
                return Ok(self.store.get(id).map_or(TaskState::Cancelled, |t| t.state));
            }
            Err(e) => return Err(e),
        };

        self.persist().await;
        Ok(state)
    }

    /// Cancel a task in `guild_id`, leaving the role in place
    ///
    /// # Errors
    /// Returns `NotFound` for tasks of other guilds and
    /// `InvalidStateTransition` if the task already finished.
    pub async fn cancel(&self, id_or_prefix: &str, guild_id: u64) -> ScheduleResult<ScheduledTask> {
        let task = self.resolve_in_guild(id_or_prefix, guild_id)?;
        let task = self.store.update(&task.id, ScheduledTask::cancel)?;
        self.persist().await;
        Ok(task)
    }

    /// Push the fire time of an active task back by `duration`
    ///
    /// The previously armed timer notices the changed fire time and does
    /// nothing.
    ///
    /// # Errors
    /// Returns `NotFound` for tasks of other guilds and
    /// `InvalidStateTransition` if the task already finished.
    pub async fn reschedule(
        &self,
        id_or_prefix: &str,
        guild_id: u64,
        duration: Duration,
    ) -> ScheduleResult<ScheduledTask> {
        let task = self.resolve_in_guild(id_or_prefix, guild_id)?;
        let fire_at = Self::fire_time(duration, task.fire_at)?;
        let task = self
            .store
            .update(&task.id, |record| record.reschedule(fire_at))?;
        self.persist().await;
        self.arm(&task);
        Ok(task)
    }

    fn resolve_in_guild(&self, id_or_prefix: &str, guild_id: u64) -> ScheduleResult<ScheduledTask> {
        let task = self.store.resolve(id_or_prefix)?;
        if task.guild_id != guild_id {
            return Err(ScheduleError::NotFound(id_or_prefix.to_string()));
        }
        Ok(task)
    }

    pub fn list_active(&self, guild_id: u64) -> Vec<ScheduledTask> {
        self.store.get_active_for_guild(guild_id)
    }

    /// Spawn a timer that expires `task` at its fire time
    pub fn arm(&self, task: &ScheduledTask) {
        let service = self.clone();
        let id = task.id.clone();
        let fire_at = task.fire_at;
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            service.fire(&id, fire_at).await;
        });
    }

    /// Timer callback; a no-op unless the task is still active and still
    /// due at the time this timer was armed for
    async fn fire(&self, id: &str, armed_for: DateTime<Utc>) {
        let current = self
            .store
            .get(id)
            .filter(|task| task.state == TaskState::Active && task.fire_at == armed_for);
        if current.is_none() {
            return;
        }

        if let Err(e) = self.expire(id).await {
            error!("Failed to expire scheduled task {id}: {e}");
        }
    }

    /// Arm timers for every active task, e.g. after loading the task file
    pub fn arm_all_active(&self) -> usize {
        let active = self.store.get_by_state(TaskState::Active);
        for task in &active {
            self.arm(task);
        }
        active.len()
    }

    /// Expire every overdue active task and drop long-finished records
    pub async fn check_all_due(&self) {
        for id in self.store.get_due() {
            if let Err(e) = self.expire(&id).await {
                error!("Failed to expire overdue task {id}: {e}");
            }
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(FINISHED_RETENTION_SECS);
        let pruned = self.store.prune_finished_before(cutoff);
        if pruned > 0 {
            debug!("Dropped {pruned} finished task record(s)");
            self.persist().await;
        }
    }

    /// Ask the background task to do something
    ///
    /// # Errors
    /// Returns an error if the background task is not running.
    pub async fn notify(&self, request: TaskCheckRequest) -> ScheduleResult<()> {
        let Some(tx) = &*self.tx else {
            return Err(ScheduleError::InvalidSchedule(
                "No scheduler task channel available".to_string(),
            ));
        };
        tx.send(request).await.map_err(|e| {
            ScheduleError::InvalidSchedule(format!("Failed to send scheduler request: {e}"))
        })
    }

    /// Start the background loop, sweeping every `check_interval`
    pub fn start(&mut self, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::channel::<TaskCheckRequest>(100);
        self.tx = Arc::new(Some(tx));

        let service = self.clone();
        tokio::spawn(async move {
            service.run(rx, check_interval).await;
        })
    }

    async fn run(&self, mut rx: Receiver<TaskCheckRequest>, check_interval: Duration) {
        info!(
            "Starting scheduler task with {}s interval",
            check_interval.as_secs()
        );

        let mut interval = tokio::time::interval(check_interval);

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(TaskCheckRequest::CheckAll) => {
                            info!("Received request to check all scheduled tasks");
                            self.check_all_due().await;
                        }
                        Some(TaskCheckRequest::CheckTask { id }) => {
                            if let Err(e) = self.expire(&id).await {
                                warn!("Error checking scheduled task {id}: {e}");
                            }
                        }
                        Some(TaskCheckRequest::Shutdown) | None => {
                            info!("Received shutdown request for scheduler task");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.check_all_due().await;
                }
            }
        }

        info!("Scheduler task shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::MockRoleGateway;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GUILD: u64 = 67890;
    const USER: u64 = 12345;
    const ROLE: u64 = 42;
    const MOD: u64 = 555;

    /// Gateway that tracks role membership in memory
    #[derive(Default)]
    struct FakeGateway {
        held: DashSet<(u64, u64, u64)>,
        refuse_grants: bool,
    }

    #[async_trait]
    impl RoleGateway for FakeGateway {
        async fn member_has_role(
            &self,
            guild_id: u64,
            user_id: u64,
            role_id: u64,
        ) -> ScheduleResult<bool> {
            Ok(self.held.contains(&(guild_id, user_id, role_id)))
        }

        async fn add_member_role(
            &self,
            guild_id: u64,
            user_id: u64,
            role_id: u64,
            _reason: Option<String>,
        ) -> ScheduleResult<()> {
            if self.refuse_grants {
                return Err(ScheduleError::InvalidSchedule("Missing Permissions".into()));
            }
            self.held.insert((guild_id, user_id, role_id));
            Ok(())
        }

        async fn remove_member_role(
            &self,
            guild_id: u64,
            user_id: u64,
            role_id: u64,
            _reason: Option<String>,
        ) -> ScheduleResult<()> {
            self.held.remove(&(guild_id, user_id, role_id));
            Ok(())
        }
    }

    /// Gateway whose every call takes a while, counting removals
    #[derive(Default)]
    struct SlowGateway {
        removals: AtomicUsize,
    }

    #[async_trait]
    impl RoleGateway for SlowGateway {
        async fn member_has_role(&self, _: u64, _: u64, _: u64) -> ScheduleResult<bool> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(self.removals.load(Ordering::SeqCst) == 0)
        }

        async fn add_member_role(
            &self,
            _: u64,
            _: u64,
            _: u64,
            _: Option<String>,
        ) -> ScheduleResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        async fn remove_member_role(
            &self,
            _: u64,
            _: u64,
            _: u64,
            _: Option<String>,
        ) -> ScheduleResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.removals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service_with(gateway: Arc<FakeGateway>) -> TaskService {
        TaskService::new(TaskStore::new(), gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_is_revoked_after_duration() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway.clone());

        let task = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(gateway.held.contains(&(GUILD, USER, ROLE)));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(gateway.held.contains(&(GUILD, USER, ROLE)));
        assert_eq!(service.list_active(GUILD).len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!gateway.held.contains(&(GUILD, USER, ROLE)));
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Expired);
        assert!(service.list_active(GUILD).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_removal_leads_to_revoked_early() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway.clone());

        let task = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(10))
            .await
            .unwrap();
        gateway.held.remove(&(GUILD, USER, ROLE));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            service.store.get(&task.id).unwrap().state,
            TaskState::RevokedEarly
        );
    }

    #[tokio::test]
    async fn test_failed_grant_schedules_nothing() {
        let gateway = Arc::new(FakeGateway {
            refuse_grants: true,
            ..FakeGateway::default()
        });
        let service = service_with(gateway);

        let result = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(10))
            .await;
        assert!(result.is_err());
        assert!(service.store.get_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_role_in_place() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway.clone());

        let task = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(10))
            .await
            .unwrap();
        let cancelled = service.cancel(task.short_id(), GUILD).await.unwrap();
        assert_eq!(cancelled.state, TaskState::Cancelled);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(gateway.held.contains(&(GUILD, USER, ROLE)));
        assert_eq!(
            service.store.get(&task.id).unwrap().state,
            TaskState::Cancelled
        );

        assert!(matches!(
            service.cancel(&task.id, GUILD).await,
            Err(ScheduleError::InvalidStateTransition)
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_scoped_to_guild() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway);

        let task = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            service.cancel(&task.id, 1).await,
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_defers_revocation() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway.clone());

        let task = service
            .grant(GUILD, USER, ROLE, MOD, Duration::from_secs(10))
            .await
            .unwrap();
        service
            .reschedule(&task.id, GUILD, Duration::from_secs(30))
            .await
            .unwrap();

        // the original timer fires and finds a different fire time
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(gateway.held.contains(&(GUILD, USER, ROLE)));
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Active);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!gateway.held.contains(&(GUILD, USER, ROLE)));
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Expired);
    }

    #[tokio::test]
    async fn test_expire_skips_removal_when_role_is_gone() {
        let mut gateway = MockRoleGateway::new();
        gateway
            .expect_member_has_role()
            .times(1)
            .returning(|_, _, _| Ok(false));
        gateway.expect_remove_member_role().never();

        let service = TaskService::new(TaskStore::new(), Arc::new(gateway));
        let task = ScheduledTask::role_revoke(GUILD, USER, ROLE, MOD, Utc::now());
        service.store.add(task.clone());

        assert_eq!(
            service.expire(&task.id).await.unwrap(),
            TaskState::RevokedEarly
        );
        // a second expiry is a no-op and asks Discord nothing
        assert_eq!(
            service.expire(&task.id).await.unwrap(),
            TaskState::RevokedEarly
        );
    }

    #[tokio::test]
    async fn test_failed_removal_keeps_task_active() {
        let mut gateway = MockRoleGateway::new();
        gateway
            .expect_member_has_role()
            .returning(|_, _, _| Ok(true));
        gateway
            .expect_remove_member_role()
            .times(1)
            .returning(|_, _, _, _| Err(ScheduleError::InvalidSchedule("Unknown Role".into())));

        let service = TaskService::new(TaskStore::new(), Arc::new(gateway));
        let task = ScheduledTask::role_revoke(GUILD, USER, ROLE, MOD, Utc::now());
        service.store.add(task.clone());

        assert!(service.expire(&task.id).await.is_err());
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Active);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_tasks() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.held.insert((GUILD, USER, ROLE));
        let service = service_with(gateway.clone());

        // a task left over from before a restart
        let task = ScheduledTask::role_revoke(
            GUILD,
            USER,
            ROLE,
            MOD,
            Utc::now() - chrono::Duration::seconds(5),
        );
        service.store.add(task.clone());

        service.check_all_due().await;
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Expired);
        assert!(!gateway.held.contains(&(GUILD, USER, ROLE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_expiry_removes_role_once() {
        let gateway = Arc::new(SlowGateway::default());
        let service = TaskService::new(TaskStore::new(), gateway.clone());
        let task = ScheduledTask::role_revoke(GUILD, USER, ROLE, MOD, Utc::now());
        service.store.add(task.clone());

        let (a, b, ()) = tokio::join!(
            service.expire(&task.id),
            service.expire(&task.id),
            service.check_all_due()
        );
        assert_eq!(a.unwrap(), TaskState::Expired);
        assert_eq!(b.unwrap(), TaskState::Active);

        assert_eq!(gateway.removals.load(Ordering::SeqCst), 1);
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_sweep_and_timers_remove_overdue_role_once() {
        let gateway = Arc::new(SlowGateway::default());
        let mut service = TaskService::new(TaskStore::new(), gateway.clone());
        let task = ScheduledTask::role_revoke(
            GUILD,
            USER,
            ROLE,
            MOD,
            Utc::now() - chrono::Duration::seconds(5),
        );
        service.store.add(task.clone());

        let handle = service.start(Duration::from_secs(30));
        assert_eq!(service.arm_all_active(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(gateway.removals.load(Ordering::SeqCst), 1);
        assert_eq!(service.store.get(&task.id).unwrap().state, TaskState::Expired);

        service.notify(TaskCheckRequest::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_drops_long_finished_records() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(gateway);

        let stale = ScheduledTask::role_revoke(GUILD, USER, ROLE, MOD, Utc::now());
        let stale_id = stale.id.clone();
        service.store.add(stale);
        service
            .store
            .update(&stale_id, |task| {
                task.cancel()?;
                task.finished_at = Some(Utc::now() - chrono::Duration::hours(2));
                Ok(())
            })
            .unwrap();

        service.check_all_due().await;
        assert!(service.store.get(&stale_id).is_none());
    }

    #[tokio::test]
    async fn test_background_task_shuts_down() {
        let gateway = Arc::new(FakeGateway::default());
        let mut service = service_with(gateway);

        assert!(service.notify(TaskCheckRequest::CheckAll).await.is_err());

        let handle = service.start(Duration::from_secs(30));
        service.notify(TaskCheckRequest::CheckAll).await.unwrap();
        service.notify(TaskCheckRequest::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
