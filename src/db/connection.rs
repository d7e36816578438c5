use std::env;
use std::fs;
use std::path::PathBuf;

use rusqlite::Connection;

use crate::error::{ErrorCode, TrackerError};

use super::migrations;

/// Overrides the database location (the config file lives next to it).
pub const DB_PATH_ENV: &str = "TASKCLOCK_DB";

/// Find the .git root by walking up from current directory.
pub fn find_git_root() -> Result<PathBuf, TrackerError> {
    let mut dir = env::current_dir().map_err(|e| TrackerError::fatal(e.to_string()))?;
    loop {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(TrackerError::new(
                ErrorCode::NotInitialized,
                format!("Not inside a git repository. Set {DB_PATH_ENV} or run inside a repository."),
            ));
        }
    }
}

/// Get the path to the taskclock database.
pub fn db_path() -> Result<PathBuf, TrackerError> {
    if let Some(path) = env::var_os(DB_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let root = find_git_root()?;
    Ok(root.join(".taskclock").join("taskclock.db"))
}

/// Get the config file path.
pub fn config_path() -> Result<PathBuf, TrackerError> {
    let db = db_path()?;
    Ok(db.with_file_name("config.json"))
}

/// Open a connection to the database. Returns error if not initialized.
pub fn open_db() -> Result<Connection, TrackerError> {
    let path = db_path()?;
    if !path.exists() {
        return Err(TrackerError::not_initialized());
    }
    let conn = Connection::open(&path)?;
    configure_connection(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Initialize the database: create directories, database, and run migrations.
pub fn init_db() -> Result<PathBuf, TrackerError> {
    let path = db_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TrackerError::fatal(e.to_string()))?;
    }
    let conn = Connection::open(&path)?;
    configure_connection(&conn)?;
    migrations::run_migrations(&conn)?;
    tracing::info!(path = %path.display(), "database initialized");
    Ok(path)
}

/// A fresh, migrated in-memory database.
pub fn open_in_memory() -> Result<Connection, TrackerError> {
    let conn = Connection::open_in_memory()?;
    configure_connection(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> Result<(), TrackerError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}
