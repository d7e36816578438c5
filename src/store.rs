//! Task records and the symmetric link graph.
//!
//! Multi-statement operations (`delete`, `link_tasks`) run inside
//! `BEGIN IMMEDIATE` and roll back on any error, so readers never observe a
//! half-applied edge set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::db::task_repo::{InsertOutcome, TaskRow};
use crate::db::{connection, link_repo, task_repo};
use crate::error::TrackerError;
use crate::ids::{IdGenerator, IdProbe};
use crate::models::{normalize_due_date, validate_title, NewTask, Priority, Task, TaskStatus, TaskUpdate};
use crate::timer::TimeStore;

#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
    ids: IdGenerator,
}

impl TaskStore {
    pub fn new(conn: Connection) -> Self {
        Self::with_id_generator(conn, IdGenerator::default())
    }

    pub fn with_id_generator(conn: Connection, ids: IdGenerator) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            ids,
        }
    }

    /// Open the project database (see [`connection::db_path`]).
    pub fn open() -> Result<Self, TrackerError> {
        Ok(Self::new(connection::open_db()?))
    }

    pub fn in_memory() -> Result<Self, TrackerError> {
        Ok(Self::new(connection::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TrackerError> {
        self.conn
            .lock()
            .map_err(|_| TrackerError::fatal("task store connection poisoned"))
    }

    pub fn create(&self, data: NewTask) -> Result<Task, TrackerError> {
        let conn = self.lock()?;
        let probe = |candidate: &str| task_repo::task_exists(&conn, candidate);
        let task = insert_new(&conn, &self.ids, &data, &probe)?;
        tracing::info!(id = %task.id, "task created");
        Ok(task)
    }

    pub fn find_all(&self) -> Result<Vec<Task>, TrackerError> {
        let conn = self.lock()?;
        task_repo::list_tasks(&conn)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Task, TrackerError> {
        let conn = self.lock()?;
        task_repo::get_task_by_id(&conn, id)
    }

    /// Apply the supplied fields. Links and `time_spent` are never touched.
    pub fn update(&self, id: &str, data: TaskUpdate) -> Result<Task, TrackerError> {
        let conn = self.lock()?;
        let current = task_repo::get_task_by_id(&conn, id)?;

        let title = match data.title.as_deref() {
            Some(title) => validate_title(title)?,
            None => current.title.clone(),
        };
        let due_date = match &data.due_date {
            Some(raw) => normalize_due_date(raw.as_deref())?,
            None => current.due_date,
        };
        let description = data.description.unwrap_or(current.description);
        let assignee = data.assignee.unwrap_or(current.assignee);
        let files = data.files.unwrap_or(current.files);
        let allowed_apps = data.allowed_apps.unwrap_or(current.allowed_apps);

        let row = TaskRow {
            title: &title,
            description: &description,
            assignee: assignee.as_deref(),
            priority: data.priority.unwrap_or(current.priority),
            due_date,
            status: data.status.unwrap_or(current.status),
            files: &files,
            allowed_apps: &allowed_apps,
        };
        if task_repo::update_task(&conn, id, &row, &now())? == 0 {
            return Err(TrackerError::task_not_found(id));
        }
        task_repo::get_task_by_id(&conn, id)
    }

    /// Remove the task and every edge that mentions it, atomically.
    /// Returns the task as it was before deletion.
    pub fn delete(&self, id: &str) -> Result<Task, TrackerError> {
        let conn = self.lock()?;
        let task = in_transaction(&conn, |conn| {
            let task = task_repo::get_task_by_id(conn, id)?;
            let edges = link_repo::remove_all_for(conn, id)?;
            if task_repo::delete_task_row(conn, id)? == 0 {
                return Err(TrackerError::task_not_found(id));
            }
            tracing::debug!(%id, edges, "removed task edges");
            Ok(task)
        })?;
        tracing::info!(%id, "task deleted");
        Ok(task)
    }

    pub fn link_tasks(&self, a: &str, b: &str) -> Result<(), TrackerError> {
        if a == b {
            return Err(TrackerError::self_link(a));
        }
        let conn = self.lock()?;
        in_transaction(&conn, |conn| {
            for id in [a, b] {
                if !task_repo::task_exists(conn, id)? {
                    return Err(TrackerError::task_not_found(id));
                }
            }
            if link_repo::link_exists(conn, a, b)? {
                return Err(TrackerError::link_conflict(a, b));
            }
            link_repo::insert_pair(conn, a, b)
        })?;
        tracing::info!(%a, %b, "tasks linked");
        Ok(())
    }

    /// Idempotent: unlinking tasks that are not linked is not an error.
    pub fn unlink_tasks(&self, a: &str, b: &str) -> Result<(), TrackerError> {
        let conn = self.lock()?;
        let removed = link_repo::remove_pair(&conn, a, b)?;
        tracing::info!(%a, %b, removed, "tasks unlinked");
        Ok(())
    }

    /// Set the absolute time spent on a task, in seconds.
    pub fn update_time_spent(&self, id: &str, seconds: u64) -> Result<Task, TrackerError> {
        let conn = self.lock()?;
        if task_repo::set_time_spent(&conn, id, seconds, &now())? == 0 {
            return Err(TrackerError::task_not_found(id));
        }
        task_repo::get_task_by_id(&conn, id)
    }

    pub fn time_spent(&self, id: &str) -> Result<u64, TrackerError> {
        let conn = self.lock()?;
        task_repo::get_time_spent(&conn, id)
    }

    /// Best guess at "what is being worked on": the most recently updated
    /// in-progress task.
    pub fn active_task(&self) -> Result<Option<Task>, TrackerError> {
        let conn = self.lock()?;
        task_repo::most_recent_in_progress(&conn)
    }

    pub fn link_graph(&self) -> Result<BTreeMap<String, BTreeSet<String>>, TrackerError> {
        let conn = self.lock()?;
        link_repo::adjacency(&conn)
    }

    pub fn status_counts(&self) -> Result<BTreeMap<&'static str, i64>, TrackerError> {
        let conn = self.lock()?;
        task_repo::status_counts(&conn)
    }

    #[cfg(test)]
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.lock().unwrap();
        f(&*conn)
    }
}

#[async_trait]
impl TimeStore for TaskStore {
    async fn load_time_spent(&self, task_id: &str) -> Result<u64, TrackerError> {
        let store = self.clone();
        let id = task_id.to_string();
        tokio::task::spawn_blocking(move || store.time_spent(&id))
            .await
            .map_err(|e| TrackerError::transient(format!("load task time failed: {e}")))?
    }

    async fn save_time_spent(&self, task_id: &str, seconds: u64) -> Result<(), TrackerError> {
        let store = self.clone();
        let id = task_id.to_string();
        tokio::task::spawn_blocking(move || store.update_time_spent(&id, seconds).map(|_| ()))
            .await
            .map_err(|e| TrackerError::transient(format!("save task time failed: {e}")))?
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Run `f` inside an immediate transaction; roll back on any error.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, TrackerError>,
) -> Result<T, TrackerError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT")?;
        Ok(value)
    });
    if let Err(e) = &result {
        if let Err(rollback) = conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %rollback, "rollback failed");
        }
        tracing::debug!(code = e.code.as_str(), "transaction rolled back");
    }
    result
}

/// Validate, pick an id and insert. A primary-key clash (another writer took
/// the id after the probe said it was free) draws a fresh id.
fn insert_new(
    conn: &Connection,
    ids: &IdGenerator,
    data: &NewTask,
    probe: &impl IdProbe,
) -> Result<Task, TrackerError> {
    let title = validate_title(&data.title)?;
    let due_date = normalize_due_date(data.due_date.as_deref())?;
    let row = TaskRow {
        title: &title,
        description: data.description.as_deref().unwrap_or(""),
        assignee: data.assignee.as_deref(),
        priority: data.priority.unwrap_or(Priority::Medium),
        due_date,
        status: data.status.unwrap_or(TaskStatus::Backlog),
        files: &data.files,
        allowed_apps: &data.allowed_apps,
    };

    for _ in 0..ids.max_attempts() {
        let id = ids.generate(probe)?;
        match task_repo::insert_task(conn, &id, &row, &now())? {
            InsertOutcome::Inserted => return task_repo::get_task_by_id(conn, &id),
            InsertOutcome::DuplicateId => {
                tracing::warn!(%id, "task id taken at insert, retrying");
            }
        }
    }
    // Every short candidate lost a race; the fallback space does not collide.
    let id = IdGenerator::fallback_id();
    task_repo::insert_task(conn, &id, &row, &now())?;
    task_repo::get_task_by_id(conn, &id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn store() -> TaskStore {
        TaskStore::in_memory().unwrap()
    }

    fn add(store: &TaskStore, title: &str) -> Task {
        store.create(NewTask::titled(title)).unwrap()
    }

    #[test]
    fn create_applies_defaults() {
        let store = store();
        let task = store
            .create(NewTask {
                title: "  Write report ".into(),
                due_date: Some("2024-05-01T10:00:00+02:00".into()),
                ..NewTask::default()
            })
            .unwrap();

        assert!(IdGenerator::is_short(&task.id));
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.due_date.unwrap().to_string(), "2024-05-01");
        assert!(task.files.is_empty());
        assert!(task.allowed_apps.is_empty());
        assert_eq!(task.time_spent, 0);
        assert!(task.linked_tasks.is_empty());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn create_rejects_bad_input() {
        let store = store();
        let err = store.create(NewTask::titled("   ")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);

        let err = store
            .create(NewTask {
                title: "x".into(),
                due_date: Some("31/12/2024".into()),
                ..NewTask::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(store.find_all().unwrap().is_empty());
    }

    #[test]
    fn lists_persist_in_order() {
        let store = store();
        let task = store
            .create(NewTask {
                title: "Attachments".into(),
                files: vec!["b.png".into(), "a.pdf".into()],
                allowed_apps: vec!["code".into(), "figma".into()],
                ..NewTask::default()
            })
            .unwrap();
        let found = store.find_by_id(&task.id).unwrap();
        assert_eq!(found.files, vec!["b.png", "a.pdf"]);
        assert_eq!(found.allowed_apps, vec!["code", "figma"]);
    }

    #[test]
    fn create_falls_back_after_ten_collisions() {
        let conn = connection::open_in_memory().unwrap();
        let ids = IdGenerator::default();
        let always_taken = |_: &str| -> Result<bool, TrackerError> { Ok(true) };
        let task = insert_new(&conn, &ids, &NewTask::titled("Crowded"), &always_taken).unwrap();
        assert!(IdGenerator::is_fallback(&task.id), "unexpected id {}", task.id);
        assert!(!IdGenerator::is_short(&task.id));
    }

    #[test]
    fn insert_race_draws_a_new_id() {
        let conn = connection::open_in_memory().unwrap();
        let ids = IdGenerator::scripted([1111, 1111, 2222]);
        // A probe that never sees the row, as if a concurrent writer won.
        let blind = |_: &str| -> Result<bool, TrackerError> { Ok(false) };

        let first = insert_new(&conn, &ids, &NewTask::titled("first"), &blind).unwrap();
        let second = insert_new(&conn, &ids, &NewTask::titled("second"), &blind).unwrap();

        assert_eq!(first.id, "TASK-1111");
        assert_eq!(second.id, "TASK-2222");
        assert_eq!(task_repo::get_task_by_id(&conn, "TASK-1111").unwrap().title, "first");
    }

    #[test]
    fn find_all_is_newest_first() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        let c = add(&store, "c");
        let ids: Vec<_> = store.find_all().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn update_changes_fields_but_not_links_or_time() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        store.link_tasks(&a.id, &b.id).unwrap();
        store.update_time_spent(&a.id, 42).unwrap();

        let updated = store
            .update(
                &a.id,
                TaskUpdate {
                    title: Some("renamed".into()),
                    status: Some(TaskStatus::InProgress),
                    assignee: Some(Some("kim".into())),
                    due_date: Some(Some("2025-01-02".into())),
                    ..TaskUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.assignee.as_deref(), Some("kim"));
        assert_eq!(updated.due_date.unwrap().to_string(), "2025-01-02");
        assert_eq!(updated.time_spent, 42);
        assert_eq!(updated.linked_tasks, BTreeSet::from([b.id.clone()]));

        let cleared = store
            .update(
                &a.id,
                TaskUpdate {
                    due_date: Some(None),
                    ..TaskUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.due_date, None);
        assert_eq!(cleared.title, "renamed");
    }

    #[test]
    fn update_missing_task_is_not_found() {
        let err = store().update("TASK-0000", TaskUpdate::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn link_is_symmetric() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        store.link_tasks(&a.id, &b.id).unwrap();

        assert_eq!(store.find_by_id(&a.id).unwrap().linked_tasks, BTreeSet::from([b.id.clone()]));
        assert_eq!(store.find_by_id(&b.id).unwrap().linked_tasks, BTreeSet::from([a.id.clone()]));
    }

    #[test]
    fn self_link_is_a_validation_error() {
        let store = store();
        let a = add(&store, "a");
        let err = store.link_tasks(&a.id, &a.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(store.link_graph().unwrap().is_empty());
    }

    #[test]
    fn link_requires_both_tasks() {
        let store = store();
        let a = add(&store, "a");
        let err = store.link_tasks(&a.id, "TASK-0000").unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        let err = store.link_tasks("TASK-0000", &a.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        assert!(store.link_graph().unwrap().is_empty());
    }

    #[test]
    fn duplicate_link_conflicts_and_leaves_state_alone() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        store.link_tasks(&a.id, &b.id).unwrap();
        let before = store.link_graph().unwrap();

        let err = store.link_tasks(&a.id, &b.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::LinkConflict);
        let err = store.link_tasks(&b.id, &a.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::LinkConflict);
        assert_eq!(store.link_graph().unwrap(), before);
    }

    #[test]
    fn unlink_is_idempotent() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        store.link_tasks(&a.id, &b.id).unwrap();

        store.unlink_tasks(&b.id, &a.id).unwrap();
        store.unlink_tasks(&a.id, &b.id).unwrap();
        assert!(store.find_by_id(&a.id).unwrap().linked_tasks.is_empty());
        assert!(store.find_by_id(&b.id).unwrap().linked_tasks.is_empty());
    }

    #[test]
    fn delete_removes_every_edge() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        let c = add(&store, "c");
        let d = add(&store, "d");
        store.link_tasks(&a.id, &b.id).unwrap();
        store.link_tasks(&c.id, &a.id).unwrap();
        store.link_tasks(&b.id, &d.id).unwrap();

        let mut expected = store.link_graph().unwrap();
        expected.remove(&a.id);
        for targets in expected.values_mut() {
            targets.remove(&a.id);
        }
        expected.retain(|_, targets| !targets.is_empty());

        let deleted = store.delete(&a.id).unwrap();
        assert_eq!(deleted.linked_tasks, BTreeSet::from([b.id.clone(), c.id.clone()]));
        assert_eq!(store.link_graph().unwrap(), expected);
        assert_eq!(store.find_by_id(&a.id).unwrap_err().code, ErrorCode::TaskNotFound);
        for task in store.find_all().unwrap() {
            assert!(!task.linked_tasks.contains(&a.id));
        }
    }

    #[test]
    fn delete_missing_task_is_not_found() {
        let err = store().delete("TASK-0000").unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn failed_delete_rolls_back_edge_removal() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        store.link_tasks(&a.id, &b.id).unwrap();
        store.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER refuse_delete BEFORE DELETE ON tasks
                 BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
            )
            .unwrap();
        });
        let before = store.link_graph().unwrap();

        let err = store.delete(&a.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::FatalStorage);
        assert_eq!(store.link_graph().unwrap(), before);
        assert!(store.find_by_id(&a.id).is_ok());
    }

    #[test]
    fn failed_link_leaves_no_half_edge() {
        let store = store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        let reverse = format!(
            "CREATE TRIGGER refuse_reverse BEFORE INSERT ON task_links
             WHEN NEW.task_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
            b.id
        );
        store.with_conn(|conn| conn.execute_batch(&reverse).unwrap());

        let err = store.link_tasks(&a.id, &b.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::FatalStorage);
        assert!(store.link_graph().unwrap().is_empty());
    }

    #[test]
    fn update_time_spent_is_absolute() {
        let store = store();
        let a = add(&store, "a");
        assert_eq!(store.update_time_spent(&a.id, 90).unwrap().time_spent, 90);
        assert_eq!(store.update_time_spent(&a.id, 15).unwrap().time_spent, 15);
        assert_eq!(store.time_spent(&a.id).unwrap(), 15);
        let err = store.update_time_spent("TASK-0000", 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn active_task_is_latest_updated_in_progress() {
        let store = store();
        assert!(store.active_task().unwrap().is_none());
        let a = add(&store, "a");
        let b = add(&store, "b");
        let in_progress = || TaskUpdate {
            status: Some(TaskStatus::InProgress),
            ..TaskUpdate::default()
        };
        store.update(&a.id, in_progress()).unwrap();
        store.update(&b.id, in_progress()).unwrap();
        assert_eq!(store.active_task().unwrap().unwrap().id, b.id);

        store.update_time_spent(&a.id, 5).unwrap();
        assert_eq!(store.active_task().unwrap().unwrap().id, a.id);
    }

    #[test]
    fn scenario_link_then_delete() {
        let store = store();
        let a = add(&store, "A");
        let b = store
            .create(NewTask {
                title: "B".into(),
                status: Some(TaskStatus::Planned),
                ..NewTask::default()
            })
            .unwrap();
        assert_eq!(a.status, TaskStatus::Backlog);

        store.link_tasks(&a.id, &b.id).unwrap();
        assert_eq!(store.find_by_id(&a.id).unwrap().linked_tasks, BTreeSet::from([b.id.clone()]));
        assert_eq!(store.find_by_id(&b.id).unwrap().linked_tasks, BTreeSet::from([a.id.clone()]));

        store.delete(&a.id).unwrap();
        assert!(store.find_by_id(&b.id).unwrap().linked_tasks.is_empty());
    }

    #[tokio::test]
    async fn time_store_round_trip() {
        let store = store();
        let a = add(&store, "a");
        store.save_time_spent(&a.id, 12).await.unwrap();
        assert_eq!(store.load_time_spent(&a.id).await.unwrap(), 12);
        let err = store.load_time_spent("TASK-0000").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }
}
