//! Scheduled task store
//!
//! Holds every task record in memory and, when given a file, mirrors them to
//! YAML after each change so pending revocations survive a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ScheduleError, ScheduleResult, ScheduledTask, TaskState};

/// Store for scheduled task records
#[derive(Clone, Default)]
pub struct TaskStore {
    records: Arc<DashMap<String, ScheduledTask>>,
    file: Option<Arc<PathBuf>>,
    /// Serializes writers of the temporary file
    save_lock: Arc<Mutex<()>>,
}

impl TaskStore {
    /// Create a store that is never written to disk
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn load(path: impl Into<PathBuf>) -> ScheduleResult<Self> {
        let path = path.into();
        let store = Self {
            records: Arc::new(DashMap::new()),
            file: Some(Arc::new(path.clone())),
            save_lock: Arc::default(),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let tasks: Vec<ScheduledTask> = serde_yaml::from_str(&content)?;
                for task in tasks {
                    store.records.insert(task.id.clone(), task);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(store)
    }

    /// Write all records to the backing file, if there is one
    ///
    /// The records go to a sibling temporary file first, which then replaces
    /// the task file, so a crash mid-write leaves the previous file intact.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn save(&self) -> ScheduleResult<()> {
        let Some(path) = self.file.as_deref() else {
            return Ok(());
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !Path::new(dir).exists() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let _guard = self.save_lock.lock().await;
        let yaml = serde_yaml::to_string(&self.get_all())?;
        let staging = staging_path(path);
        tokio::fs::write(&staging, yaml).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub fn add(&self, task: ScheduledTask) {
        self.records.insert(task.id.clone(), task);
    }

    /// Get a clone of a record by ID
    pub fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Find a record by full ID or by a unique ID prefix
    ///
    /// # Errors
    /// Returns `NotFound` when nothing matches and `InvalidSchedule` when
    /// the prefix is ambiguous.
    pub fn resolve(&self, id_or_prefix: &str) -> ScheduleResult<ScheduledTask> {
        if let Some(task) = self.get(id_or_prefix) {
            return Ok(task);
        }

        let mut matches = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(id_or_prefix))
            .map(|entry| entry.value().clone());

        match (matches.next(), matches.next()) {
            (Some(task), None) if !id_or_prefix.is_empty() => Ok(task),
            (Some(_), Some(_)) => Err(ScheduleError::InvalidSchedule(format!(
                "`{id_or_prefix}` matches more than one task"
            ))),
            _ => Err(ScheduleError::NotFound(id_or_prefix.to_string())),
        }
    }

    pub fn get_all(&self) -> Vec<ScheduledTask> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    /// IDs of active tasks whose fire time has passed
    pub fn get_due(&self) -> Vec<String> {
        let now = Utc::now();
        self.records
            .iter()
            .filter_map(|entry| {
                let task = entry.value();
                if task.state == TaskState::Active && task.fire_at <= now {
                    Some(task.id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Active tasks in a guild, soonest first
    pub fn get_active_for_guild(&self, guild_id: u64) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .records
            .iter()
            .filter_map(|entry| {
                let task = entry.value();
                if task.guild_id == guild_id && task.state == TaskState::Active {
                    Some(task.clone())
                } else {
                    None
                }
            })
            .collect();
        tasks.sort_by_key(|task| task.fire_at);
        tasks
    }

    pub fn get_by_state(&self, state: TaskState) -> Vec<ScheduledTask> {
        self.records
            .iter()
            .filter_map(|entry| {
                let task = entry.value();
                if task.state == state {
                    Some(task.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Apply a state change to a record under its entry lock
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown ID, or whatever `change` returns.
    pub fn update<F>(&self, id: &str, change: F) -> ScheduleResult<ScheduledTask>
    where
        F: FnOnce(&mut ScheduledTask) -> ScheduleResult<()>,
    {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        change(record.value_mut())?;
        Ok(record.value().clone())
    }

    /// Drop terminal records, keeping the active ones
    pub fn prune_finished(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, task| !task.state.is_terminal());
        before - self.records.len()
    }

    /// Drop terminal records that finished before `cutoff`
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, task| {
            !task.state.is_terminal() || task.finished_at.is_some_and(|at| at >= cutoff)
        });
        before - self.records.len()
    }
}

/// `tasks.yaml` is staged as `tasks.yaml.tmp` in the same directory
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(OsString::new, OsString::from);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task_in(seconds: i64) -> ScheduledTask {
        ScheduledTask::role_revoke(67890, 12345, 42, 555, Utc::now() + Duration::seconds(seconds))
    }

    #[test]
    fn test_add_and_get() {
        let store = TaskStore::new();
        let task = task_in(60);
        let id = task.id.clone();
        store.add(task);

        let retrieved = store.get(&id).unwrap();
        assert_eq!(retrieved.state, TaskState::Active);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_resolve_by_prefix() {
        let store = TaskStore::new();
        let task = task_in(60);
        let id = task.id.clone();
        store.add(task);

        assert_eq!(store.resolve(&id[..8]).unwrap().id, id);
        assert!(matches!(
            store.resolve("zzzz"),
            Err(ScheduleError::NotFound(_))
        ));
        assert!(matches!(store.resolve(""), Err(_)));
    }

    #[test]
    fn test_get_due() {
        let store = TaskStore::new();
        let overdue = task_in(-5);
        let overdue_id = overdue.id.clone();
        store.add(overdue);
        store.add(task_in(600));

        assert_eq!(store.get_due(), vec![overdue_id.clone()]);

        store.update(&overdue_id, ScheduledTask::expire).unwrap();
        assert!(store.get_due().is_empty());
    }

    #[test]
    fn test_update_rejects_illegal_transitions() {
        let store = TaskStore::new();
        let task = task_in(60);
        let id = task.id.clone();
        store.add(task);

        store.update(&id, ScheduledTask::cancel).unwrap();
        assert!(matches!(
            store.update(&id, ScheduledTask::expire),
            Err(ScheduleError::InvalidStateTransition)
        ));
        assert_eq!(store.get(&id).unwrap().state, TaskState::Cancelled);
        assert!(matches!(
            store.update("missing", ScheduledTask::expire),
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[test]
    fn test_active_for_guild_sorted_soonest_first() {
        let store = TaskStore::new();
        let later = task_in(600);
        let sooner = task_in(60);
        let sooner_id = sooner.id.clone();
        store.add(later);
        store.add(sooner);
        store.add(ScheduledTask::role_revoke(
            1,
            12345,
            42,
            555,
            Utc::now() + Duration::seconds(1),
        ));

        let active = store.get_active_for_guild(67890);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, sooner_id);
    }

    #[test]
    fn test_prune_finished() {
        let store = TaskStore::new();
        let done = task_in(60);
        let done_id = done.id.clone();
        store.add(done);
        store.add(task_in(60));
        store.update(&done_id, ScheduledTask::expire).unwrap();

        assert_eq!(store.get_by_state(TaskState::Expired).len(), 1);
        assert_eq!(store.prune_finished(), 1);
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_prune_finished_before_keeps_recent_records() {
        let store = TaskStore::new();
        let old = task_in(-600);
        let old_id = old.id.clone();
        let recent = task_in(-600);
        let recent_id = recent.id.clone();
        store.add(old);
        store.add(recent);
        store.add(task_in(60));

        store
            .update(&old_id, |task| {
                task.expire()?;
                task.finished_at = Some(Utc::now() - Duration::hours(2));
                Ok(())
            })
            .unwrap();
        store.update(&recent_id, ScheduledTask::cancel).unwrap();

        assert_eq!(store.prune_finished_before(Utc::now() - Duration::hours(1)), 1);
        assert!(store.get(&old_id).is_none());
        assert!(store.get(&recent_id).is_some());
        assert_eq!(store.get_all().len(), 2);
    }

    #[test]
    fn test_staging_path_is_a_sibling() {
        assert_eq!(
            staging_path(Path::new("data/scheduled_tasks.yaml")),
            PathBuf::from("data/scheduled_tasks.yaml.tmp")
        );
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_a_readable_file() {
        let dir = std::env::temp_dir().join(format!("evict-tasks-{}", uuid::Uuid::new_v4()));
        let path = dir.join("tasks.yaml");

        let store = TaskStore::load(&path).await.unwrap();
        for _ in 0..20 {
            store.add(task_in(120));
        }
        let saves: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.save().await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let reloaded = TaskStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get_all().len(), 20);
        assert!(!staging_path(&path).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("evict-tasks-{}", uuid::Uuid::new_v4()));
        let path = dir.join("tasks.yaml");

        let store = TaskStore::load(&path).await.unwrap();
        assert!(store.get_all().is_empty());

        let task = task_in(120);
        let id = task.id.clone();
        store.add(task);
        store.save().await.unwrap();

        let reloaded = TaskStore::load(&path).await.unwrap();
        let task = reloaded.get(&id).unwrap();
        assert_eq!(task.state, TaskState::Active);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
