use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotInitialized,
    ValidationError,
    TaskNotFound,
    LinkConflict,
    TransientStorage,
    FatalStorage,
    TimerStopped,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::LinkConflict => "LINK_CONFLICT",
            Self::TransientStorage => "TRANSIENT_STORAGE",
            Self::FatalStorage => "FATAL_STORAGE",
            Self::TimerStopped => "TIMER_STOPPED",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TrackerError {
    pub code: ErrorCode,
    pub message: String,
}

impl TrackerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::NotInitialized,
            "taskclock is not initialized. Run `taskclock init` first.",
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn task_not_found(id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {id}"))
    }

    pub fn self_link(id: &str) -> Self {
        Self::validation(format!("Task {id} cannot be linked to itself"))
    }

    pub fn link_conflict(a: &str, b: &str) -> Self {
        Self::new(
            ErrorCode::LinkConflict,
            format!("Tasks {a} and {b} are already linked"),
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransientStorage, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FatalStorage, message)
    }

    pub fn timer_stopped() -> Self {
        Self::new(ErrorCode::TimerStopped, "Timer service is not running")
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::fatal(e.to_string())
    }
}
