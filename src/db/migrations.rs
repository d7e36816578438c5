use rusqlite::Connection;

use crate::error::TrackerError;

pub fn run_migrations(conn: &Connection) -> Result<(), TrackerError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            assignee TEXT,
            priority TEXT NOT NULL DEFAULT 'medium'
                CHECK (priority IN ('low', 'medium', 'high')),
            due_date TEXT,
            status TEXT NOT NULL DEFAULT 'backlog'
                CHECK (status IN ('backlog', 'planned', 'in-progress', 'under-review', 'completed', 'cancelled')),
            files TEXT NOT NULL DEFAULT '[]',
            allowed_apps TEXT NOT NULL DEFAULT '[]',
            time_spent INTEGER NOT NULL DEFAULT 0 CHECK (time_spent >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- No ON DELETE CASCADE: task deletion removes edges itself, in the
        -- same transaction as the row.
        CREATE TABLE IF NOT EXISTS task_links (
            task_id TEXT NOT NULL,
            linked_task_id TEXT NOT NULL,
            PRIMARY KEY (task_id, linked_task_id),
            CHECK (task_id != linked_task_id)
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_status_updated ON tasks(status, updated_at);
        CREATE INDEX IF NOT EXISTS idx_links_linked ON task_links(linked_task_id);
        ",
    )?;
    Ok(())
}
