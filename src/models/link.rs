use serde::{Deserialize, Serialize};

/// One directed row of the link table. Links are always stored as a pair of
/// rows, one per direction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskLink {
    pub task_id: String,
    pub linked_task_id: String,
}
