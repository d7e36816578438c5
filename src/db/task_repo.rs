use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::TrackerError;
use crate::models::{Priority, Task, TaskStatus};

use super::link_repo;

const TASK_COLUMNS: &str = "id, title, description, assignee, priority, due_date, status,
                            files, allowed_apps, time_spent, created_at, updated_at";

/// Column values for a new row, already validated and normalized.
#[derive(Debug, Clone)]
pub struct TaskRow<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub assignee: Option<&'a str>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub files: &'a [String],
    pub allowed_apps: &'a [String],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateId,
}

pub fn insert_task(
    conn: &Connection,
    id: &str,
    row: &TaskRow<'_>,
    now: &str,
) -> Result<InsertOutcome, TrackerError> {
    let result = conn.execute(
        "INSERT INTO tasks (id, title, description, assignee, priority, due_date, status,
                            files, allowed_apps, time_spent, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10)",
        params![
            id,
            row.title,
            row.description,
            row.assignee,
            row.priority.as_str(),
            row.due_date.map(format_date),
            row.status.as_str(),
            to_json_list(row.files)?,
            to_json_list(row.allowed_apps)?,
            now,
        ],
    );
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Ok(InsertOutcome::DuplicateId)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn task_exists(conn: &Connection, id: &str) -> Result<bool, TrackerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Fetch a task with its linked ids resolved.
pub fn get_task_by_id(conn: &Connection, id: &str) -> Result<Task, TrackerError> {
    let mut task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            row_to_task,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TrackerError::task_not_found(id),
            _ => TrackerError::from(e),
        })?;
    task.linked_tasks = link_repo::linked_ids(conn, id)?;
    Ok(task)
}

/// All tasks, newest first.
pub fn list_tasks(conn: &Connection) -> Result<Vec<Task>, TrackerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC"
    ))?;
    let mut tasks = stmt
        .query_map([], row_to_task)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut graph = link_repo::adjacency(conn)?;
    for task in &mut tasks {
        task.linked_tasks = graph.remove(&task.id).unwrap_or_default();
    }
    Ok(tasks)
}

/// Overwrite the mutable, user-editable columns. Returns rows changed.
pub fn update_task(
    conn: &Connection,
    id: &str,
    row: &TaskRow<'_>,
    now: &str,
) -> Result<usize, TrackerError> {
    let changed = conn.execute(
        "UPDATE tasks SET title = ?1, description = ?2, assignee = ?3, priority = ?4,
                          due_date = ?5, status = ?6, files = ?7, allowed_apps = ?8,
                          updated_at = ?9
         WHERE id = ?10",
        params![
            row.title,
            row.description,
            row.assignee,
            row.priority.as_str(),
            row.due_date.map(format_date),
            row.status.as_str(),
            to_json_list(row.files)?,
            to_json_list(row.allowed_apps)?,
            now,
            id,
        ],
    )?;
    Ok(changed)
}

pub fn delete_task_row(conn: &Connection, id: &str) -> Result<usize, TrackerError> {
    let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    Ok(changed)
}

pub fn set_time_spent(conn: &Connection, id: &str, seconds: u64, now: &str) -> Result<usize, TrackerError> {
    let seconds = i64::try_from(seconds)
        .map_err(|_| TrackerError::validation(format!("Time spent out of range: {seconds}")))?;
    let changed = conn.execute(
        "UPDATE tasks SET time_spent = ?1, updated_at = ?2 WHERE id = ?3",
        params![seconds, now, id],
    )?;
    Ok(changed)
}

pub fn get_time_spent(conn: &Connection, id: &str) -> Result<u64, TrackerError> {
    let seconds: i64 = conn
        .query_row("SELECT time_spent FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TrackerError::task_not_found(id),
            _ => TrackerError::from(e),
        })?;
    Ok(seconds.max(0) as u64)
}

/// The most recently updated task whose status is in-progress.
pub fn most_recent_in_progress(conn: &Connection) -> Result<Option<Task>, TrackerError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM tasks
             WHERE status = ?1
             ORDER BY updated_at DESC, rowid DESC
             LIMIT 1",
            params![TaskStatus::InProgress.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| get_task_by_id(conn, &id)).transpose()
}

/// Task counts per status, every status present (zero when empty).
pub fn status_counts(conn: &Connection) -> Result<BTreeMap<&'static str, i64>, TrackerError> {
    let mut counts: BTreeMap<&'static str, i64> =
        TaskStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        if let Some(status) = TaskStatus::from_str(&status) {
            counts.insert(status.as_str(), count);
        }
    }
    Ok(counts)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn to_json_list(items: &[String]) -> Result<String, TrackerError> {
    serde_json::to_string(items).map_err(|e| TrackerError::fatal(e.to_string()))
}

fn conversion_error(idx: usize, ty: Type, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn json_list(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let due_date = row
        .get::<_, Option<String>>(5)?
        .map(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| conversion_error(5, Type::Text, e))?;
    let time_spent: i64 = row.get(9)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        assignee: row.get(3)?,
        priority: Priority::from_str(&row.get::<_, String>(4)?).unwrap_or(Priority::Medium),
        due_date,
        status: TaskStatus::from_str(&row.get::<_, String>(6)?).unwrap_or(TaskStatus::Backlog),
        files: json_list(row, 7)?,
        allowed_apps: json_list(row, 8)?,
        time_spent: time_spent.max(0) as u64,
        linked_tasks: BTreeSet::new(),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
