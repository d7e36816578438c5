//! Short, human-readable task ids.
//!
//! Ids look like `TASK-4821`. The numeric space is small, so each candidate
//! is checked against the store first; after [`MAX_ATTEMPTS`] collisions the
//! generator falls back to `TASK-<ULID>`, which is unique without a lookup.
//!
//! The probe is only a fast path. The `tasks` primary key is what actually
//! rejects a duplicate when two creates race for the same candidate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rand::Rng;
use ulid::Ulid;

use crate::error::TrackerError;

pub const ID_PREFIX: &str = "TASK-";
pub const MAX_ATTEMPTS: usize = 10;

const SHORT_MIN: u32 = 1000;
const SHORT_MAX: u32 = 9999;

/// Answers "is this id already taken?".
pub trait IdProbe {
    fn id_exists(&self, id: &str) -> Result<bool, TrackerError>;
}

impl<F> IdProbe for F
where
    F: Fn(&str) -> Result<bool, TrackerError>,
{
    fn id_exists(&self, id: &str) -> Result<bool, TrackerError> {
        self(id)
    }
}

#[derive(Debug, Clone)]
pub struct IdGenerator {
    max_attempts: usize,
    scripted: Option<Arc<Mutex<VecDeque<u32>>>>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            scripted: None,
        }
    }
}

impl IdGenerator {
    /// Draw suffixes from `suffixes` in order before going random.
    /// Gives reproducible ids for fixtures.
    pub fn scripted(suffixes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            scripted: Some(Arc::new(Mutex::new(suffixes.into_iter().collect()))),
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn generate(&self, probe: &impl IdProbe) -> Result<String, TrackerError> {
        for attempt in 1..=self.max_attempts {
            let candidate = format!("{ID_PREFIX}{}", self.next_suffix());
            if !probe.id_exists(&candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(%candidate, attempt, "task id collision");
        }
        let fallback = Self::fallback_id();
        tracing::info!(id = %fallback, attempts = self.max_attempts, "short id space exhausted, using fallback id");
        Ok(fallback)
    }

    fn next_suffix(&self) -> u32 {
        self.scripted
            .as_ref()
            .and_then(|queue| queue.lock().ok()?.pop_front())
            .unwrap_or_else(|| rand::thread_rng().gen_range(SHORT_MIN..=SHORT_MAX))
    }

    pub fn fallback_id() -> String {
        format!("{ID_PREFIX}{}", Ulid::new())
    }

    /// Whether `id` has the short `TASK-NNNN` shape.
    pub fn is_short(id: &str) -> bool {
        id.strip_prefix(ID_PREFIX).is_some_and(|suffix| {
            suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_digit())
        })
    }

    pub fn is_fallback(id: &str) -> bool {
        id.strip_prefix(ID_PREFIX)
            .is_some_and(|suffix| Ulid::from_string(suffix).is_ok())
    }
}
