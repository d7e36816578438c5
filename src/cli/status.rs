use serde_json::json;

use crate::error::TrackerError;
use crate::output;
use crate::store::TaskStore;

pub fn run(json_output: bool) -> i32 {
    match run_inner(json_output) {
        Ok(code) => code,
        Err(e) => output::report_error(&e, json_output),
    }
}

fn run_inner(json_output: bool) -> Result<i32, TrackerError> {
    let store = TaskStore::open()?;
    let counts = store.status_counts()?;
    let active = store.active_task()?;

    if json_output {
        let total: i64 = counts.values().sum();
        output::json::print(&output::json::success(json!({
            "total": total,
            "counts": counts,
            "active": active.as_ref().map(output::json::task_summary),
        })));
    } else {
        output::text::print_status_counts(&counts);
        if let Some(task) = active {
            println!(
                "\nActive: {} - {} ({})",
                task.id,
                task.title,
                output::text::format_seconds(task.time_spent)
            );
        }
    }
    Ok(0)
}
