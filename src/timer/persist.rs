use async_trait::async_trait;

use crate::error::TrackerError;

/// Where the timer reads and writes a task's total time.
#[async_trait]
pub trait TimeStore: Send + Sync {
    async fn load_time_spent(&self, task_id: &str) -> Result<u64, TrackerError>;

    async fn save_time_spent(&self, task_id: &str, seconds: u64) -> Result<(), TrackerError>;
}
