use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::TrackerError;
use crate::models::TaskLink;

/// Insert both directions of a link. Callers own the transaction.
pub fn insert_pair(conn: &Connection, a: &str, b: &str) -> Result<(), TrackerError> {
    let mut stmt = conn.prepare(
        "INSERT INTO task_links (task_id, linked_task_id) VALUES (?1, ?2)",
    )?;
    stmt.execute(params![a, b])?;
    stmt.execute(params![b, a])?;
    Ok(())
}

/// Remove both directions of a link. Returns rows removed (0 or 2).
pub fn remove_pair(conn: &Connection, a: &str, b: &str) -> Result<usize, TrackerError> {
    let changed = conn.execute(
        "DELETE FROM task_links
         WHERE (task_id = ?1 AND linked_task_id = ?2)
            OR (task_id = ?2 AND linked_task_id = ?1)",
        params![a, b],
    )?;
    Ok(changed)
}

/// Remove every edge touching `id`, in either direction.
pub fn remove_all_for(conn: &Connection, id: &str) -> Result<usize, TrackerError> {
    let changed = conn.execute(
        "DELETE FROM task_links WHERE task_id = ?1 OR linked_task_id = ?1",
        params![id],
    )?;
    Ok(changed)
}

pub fn link_exists(conn: &Connection, a: &str, b: &str) -> Result<bool, TrackerError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM task_links WHERE task_id = ?1 AND linked_task_id = ?2",
            params![a, b],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn linked_ids(conn: &Connection, id: &str) -> Result<BTreeSet<String>, TrackerError> {
    let mut stmt = conn.prepare(
        "SELECT linked_task_id FROM task_links WHERE task_id = ?1",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;
    Ok(ids)
}

pub fn all_links(conn: &Connection) -> Result<Vec<TaskLink>, TrackerError> {
    let mut stmt = conn.prepare(
        "SELECT task_id, linked_task_id FROM task_links ORDER BY task_id, linked_task_id",
    )?;
    let links = stmt
        .query_map([], |row| {
            Ok(TaskLink {
                task_id: row.get(0)?,
                linked_task_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// The whole link table as an adjacency map.
pub fn adjacency(conn: &Connection) -> Result<BTreeMap<String, BTreeSet<String>>, TrackerError> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in all_links(conn)? {
        graph.entry(link.task_id).or_default().insert(link.linked_task_id);
    }
    Ok(graph)
}
