use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Backlog,
    Planned,
    InProgress,
    UnderReview,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Backlog,
        Self::Planned,
        Self::InProgress,
        Self::UnderReview,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Planned => "planned",
            Self::InProgress => "in-progress",
            Self::UnderReview => "under-review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        Self::from_str(s).ok_or_else(|| {
            TrackerError::validation(format!(
                "Invalid status '{s}'. Expected one of: backlog, planned, in-progress, under-review, completed, cancelled"
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        Self::from_str(s).ok_or_else(|| {
            TrackerError::validation(format!(
                "Invalid priority '{s}'. Expected one of: low, medium, high"
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub files: Vec<String>,
    pub allowed_apps: Vec<String>,
    pub time_spent: u64,
    pub linked_tasks: BTreeSet<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for `TaskStore::create`. Unset fields take the documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<String>,
    pub status: Option<TaskStatus>,
    pub files: Vec<String>,
    pub allowed_apps: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field untouched; `Some(None)` clears an
/// optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "present")]
    pub assignee: Option<Option<String>>,
    pub priority: Option<Priority>,
    #[serde(deserialize_with = "present")]
    pub due_date: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub files: Option<Vec<String>>,
    pub allowed_apps: Option<Vec<String>>,
}

/// A key that is present, even as `null`, becomes `Some`. Absent keys fall
/// back to the field default.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Canonicalize a due date to a calendar date.
///
/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (the date part is kept).
/// Blank input means "no due date".
pub fn normalize_due_date(raw: Option<&str>) -> Result<Option<NaiveDate>, TrackerError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.date_naive()));
    }
    Err(TrackerError::validation(format!(
        "Invalid due date '{raw}'. Expected YYYY-MM-DD"
    )))
}

pub fn validate_title(title: &str) -> Result<String, TrackerError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation("Task title must not be empty"));
    }
    Ok(trimmed.to_string())
}
