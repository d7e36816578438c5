//! Write-behind cache for per-task elapsed time.
//!
//! The cache never talks to storage. It decides *when* a value should be
//! persisted and hands out [`FlushRequest`]s; whoever runs them reports back
//! through [`WriteBehind::complete`]. At most one request per task is in flight;
//! triggers that arrive meanwhile collapse into a single follow-up.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::TrackerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequest {
    pub task_id: String,
    pub seconds: u64,
}

#[derive(Debug, Default)]
struct Entry {
    latest: u64,
    persisted: Option<u64>,
    dirty_since: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    in_flight: Option<u64>,
    follow_up: bool,
}

impl Entry {
    fn is_dirty(&self) -> bool {
        self.persisted != Some(self.latest)
    }
}

#[derive(Debug)]
pub struct WriteBehind {
    interval: Duration,
    entries: HashMap<String, Entry>,
}

impl WriteBehind {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: HashMap::new(),
        }
    }

    /// Note a value already known to be in storage.
    pub fn mark_persisted(&mut self, task_id: &str, seconds: u64) {
        let entry = self.entries.entry(task_id.to_string()).or_default();
        entry.latest = seconds;
        entry.persisted = Some(seconds);
        entry.dirty_since = None;
    }

    pub fn record(&mut self, task_id: &str, seconds: u64, now: DateTime<Utc>) {
        let entry = self.entries.entry(task_id.to_string()).or_default();
        entry.latest = seconds;
        if !entry.is_dirty() {
            entry.dirty_since = None;
        } else if entry.dirty_since.is_none() {
            entry.dirty_since = Some(now);
        }
    }

    /// Throttled trigger: flush only if a full window has passed since the
    /// last attempt (or since the value first went dirty).
    pub fn offer(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<FlushRequest> {
        let interval = self.interval;
        let entry = self.entries.get_mut(task_id)?;
        if !entry.is_dirty() || entry.in_flight.is_some() {
            return None;
        }
        let anchor = entry.last_attempt.or(entry.dirty_since)?;
        if now - anchor < interval {
            return None;
        }
        Some(Self::issue(task_id, entry, now))
    }

    /// Unthrottled trigger. If a flush is already in flight the newest value
    /// goes out as soon as it completes.
    pub fn force(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<FlushRequest> {
        let entry = self.entries.get_mut(task_id)?;
        if entry.in_flight.is_some() {
            entry.follow_up = true;
            return None;
        }
        if !entry.is_dirty() {
            return None;
        }
        Some(Self::issue(task_id, entry, now))
    }

    /// Force every dirty entry.
    pub fn force_all(&mut self, now: DateTime<Utc>) -> Vec<FlushRequest> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.iter().filter_map(|id| self.force(id, now)).collect()
    }

    /// Record the result of a request handed out earlier. May return the
    /// follow-up flush that was waiting on it.
    pub fn complete(
        &mut self,
        request: &FlushRequest,
        result: &Result<(), TrackerError>,
        now: DateTime<Utc>,
    ) -> Option<FlushRequest> {
        let entry = self.entries.get_mut(&request.task_id)?;
        entry.in_flight = None;
        if result.is_ok() {
            entry.persisted = Some(request.seconds);
            entry.last_success = Some(now);
            entry.dirty_since = if entry.is_dirty() { Some(now) } else { None };
        }
        if std::mem::take(&mut entry.follow_up) && entry.is_dirty() {
            return Some(Self::issue(&request.task_id, entry, now));
        }
        None
    }

    /// Stop tracking a task (it no longer exists in storage).
    pub fn forget(&mut self, task_id: &str) {
        self.entries.remove(task_id);
    }

    pub fn last_success(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(task_id)?.last_success
    }

    pub fn is_dirty(&self, task_id: &str) -> bool {
        self.entries.get(task_id).is_some_and(Entry::is_dirty)
    }

    pub fn in_flight(&self) -> usize {
        self.entries.values().filter(|e| e.in_flight.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn issue(task_id: &str, entry: &mut Entry, now: DateTime<Utc>) -> FlushRequest {
        entry.in_flight = Some(entry.latest);
        entry.last_attempt = Some(now);
        FlushRequest {
            task_id: task_id.to_string(),
            seconds: entry.latest,
        }
    }
}
