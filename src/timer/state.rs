use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    #[default]
    Countup,
    Countdown,
}

impl TimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Countup => "countup",
            Self::Countdown => "countdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub task_id: String,
    pub mode: TimerMode,
    /// Countdown length in seconds. Ignored in countup mode.
    pub duration: Option<u64>,
}

impl StartRequest {
    pub fn countup(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            mode: TimerMode::Countup,
            duration: None,
        }
    }

    pub fn countdown(task_id: impl Into<String>, seconds: u64) -> Self {
        Self {
            task_id: task_id.into(),
            mode: TimerMode::Countdown,
            duration: Some(seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Another task is being timed. Nothing changed; call `confirm_switch`
    /// to stop it and start `requested`, or `cancel_switch` to drop the
    /// request.
    SwitchPending { current: String, requested: String },
}

/// Point-in-time copy of the timer state, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub active_task_id: Option<String>,
    pub running: bool,
    pub elapsed_by_task: BTreeMap<String, u64>,
    pub mode: TimerMode,
    pub countdown_remaining: Option<u64>,
}

impl TimerSnapshot {
    /// The single task whose timer is running, if any.
    pub fn running_task(&self) -> Option<&str> {
        self.active_task_id.as_deref().filter(|_| self.running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimerEvent {
    SessionComplete { task_id: String },
}
