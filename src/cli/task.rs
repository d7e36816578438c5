use serde_json::json;

use crate::cli::commands::TaskCommands;
use crate::error::TrackerError;
use crate::models::{NewTask, Priority, TaskStatus, TaskUpdate};
use crate::output;
use crate::store::TaskStore;

pub fn run(cmd: TaskCommands, json_output: bool) -> i32 {
    let result = TaskStore::open().and_then(|store| dispatch(&store, cmd, json_output));
    match result {
        Ok(code) => code,
        Err(e) => output::report_error(&e, json_output),
    }
}

fn dispatch(store: &TaskStore, cmd: TaskCommands, json_output: bool) -> Result<i32, TrackerError> {
    match cmd {
        TaskCommands::Add {
            title,
            description,
            assignee,
            priority,
            due,
            status,
            files,
            allowed_apps,
        } => {
            let data = NewTask {
                title,
                description,
                assignee,
                priority: priority.as_deref().map(Priority::parse).transpose()?,
                due_date: due,
                status: status.as_deref().map(TaskStatus::parse).transpose()?,
                files,
                allowed_apps,
            };
            run_add(store, data, json_output)
        }
        TaskCommands::List => run_list(store, json_output),
        TaskCommands::Show { id } => run_show(store, &id, json_output),
        TaskCommands::Update {
            id,
            title,
            description,
            assignee,
            clear_assignee,
            priority,
            due,
            clear_due,
            status,
            files,
            clear_files,
            allowed_apps,
            clear_apps,
        } => {
            let data = TaskUpdate {
                title,
                description,
                assignee: clearable(assignee, clear_assignee),
                priority: priority.as_deref().map(Priority::parse).transpose()?,
                due_date: clearable(due, clear_due),
                status: status.as_deref().map(TaskStatus::parse).transpose()?,
                files: replacement(files, clear_files),
                allowed_apps: replacement(allowed_apps, clear_apps),
            };
            run_update(store, &id, data, json_output)
        }
        TaskCommands::Delete { id } => run_delete(store, &id, json_output),
        TaskCommands::Link { id, other } => run_link(store, &id, &other, true, json_output),
        TaskCommands::Unlink { id, other } => run_link(store, &id, &other, false, json_output),
        TaskCommands::SetTime { id, seconds } => run_set_time(store, &id, seconds, json_output),
        TaskCommands::Active => run_active(store, json_output),
    }
}

fn clearable(value: Option<String>, clear: bool) -> Option<Option<String>> {
    if clear {
        Some(None)
    } else {
        value.map(Some)
    }
}

fn replacement(values: Vec<String>, clear: bool) -> Option<Vec<String>> {
    if clear || !values.is_empty() {
        Some(values)
    } else {
        None
    }
}

fn run_add(store: &TaskStore, data: NewTask, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.create(data)?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "task": output::json::task_detail(&task)
        })));
    } else {
        println!("Added task: {} ({})", task.title, task.id);
    }
    Ok(0)
}

fn run_list(store: &TaskStore, json_output: bool) -> Result<i32, TrackerError> {
    let tasks = store.find_all()?;
    if json_output {
        let tasks_json: Vec<_> = tasks.iter().map(output::json::task_detail).collect();
        output::json::print(&output::json::success(json!({ "tasks": tasks_json })));
    } else {
        output::text::print_task_list(&tasks);
    }
    Ok(0)
}

fn run_show(store: &TaskStore, id: &str, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.find_by_id(id)?;
    if json_output {
        let linked: Vec<_> = task
            .linked_tasks
            .iter()
            .filter_map(|other| store.find_by_id(other).ok())
            .map(|t| output::json::task_summary(&t))
            .collect();
        output::json::print(&output::json::success(json!({
            "task": output::json::task_detail(&task),
            "linked": linked,
        })));
    } else {
        output::text::print_task(&task);
    }
    Ok(0)
}

fn run_update(store: &TaskStore, id: &str, data: TaskUpdate, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.update(id, data)?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "task": output::json::task_detail(&task)
        })));
    } else {
        println!("Updated task: {} ({})", task.title, task.id);
    }
    Ok(0)
}

fn run_delete(store: &TaskStore, id: &str, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.delete(id)?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "deleted": output::json::task_summary(&task),
            "unlinked": task.linked_tasks,
        })));
    } else {
        println!("Deleted task: {} ({})", task.title, task.id);
    }
    Ok(0)
}

fn run_link(store: &TaskStore, a: &str, b: &str, link: bool, json_output: bool) -> Result<i32, TrackerError> {
    if link {
        store.link_tasks(a, b)?;
    } else {
        store.unlink_tasks(a, b)?;
    }
    if json_output {
        output::json::print(&output::json::success(json!({
            "taskId": a,
            "linkedTaskId": b,
            "linked": link,
        })));
    } else if link {
        println!("Linked {a} <-> {b}");
    } else {
        println!("Unlinked {a} <-> {b}");
    }
    Ok(0)
}

fn run_set_time(store: &TaskStore, id: &str, seconds: u64, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.update_time_spent(id, seconds)?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "task": output::json::task_summary(&task)
        })));
    } else {
        println!(
            "Time spent on {}: {}",
            task.id,
            output::text::format_seconds(task.time_spent)
        );
    }
    Ok(0)
}

fn run_active(store: &TaskStore, json_output: bool) -> Result<i32, TrackerError> {
    let task = store.active_task()?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "task": task.as_ref().map(output::json::task_detail)
        })));
    } else {
        match task {
            Some(task) => output::text::print_task(&task),
            None => println!("No task in progress."),
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_flags_win_over_absent_values() {
        assert_eq!(clearable(None, true), Some(None));
        assert_eq!(clearable(Some("ana".into()), false), Some(Some("ana".into())));
        assert_eq!(clearable(None, false), None);

        assert_eq!(replacement(vec![], false), None);
        assert_eq!(replacement(vec![], true), Some(vec![]));
        assert_eq!(replacement(vec!["a.txt".into()], false), Some(vec!["a.txt".into()]));
    }
}
