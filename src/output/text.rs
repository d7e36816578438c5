use std::collections::BTreeMap;

use crate::models::Task;
use crate::timer::{TimerMode, TimerSnapshot};

/// `3725` → `1h 02m 05s`.
pub fn format_seconds(total: u64) -> String {
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

pub fn print_task(t: &Task) {
    println!("Task: {} ({})", t.title, t.id);
    if !t.description.is_empty() {
        println!("  Description: {}", t.description);
    }
    println!("  Status: {}", t.status.as_str());
    println!("  Priority: {}", t.priority.as_str());
    if let Some(ref assignee) = t.assignee {
        println!("  Assignee: {assignee}");
    }
    if let Some(due) = t.due_date {
        println!("  Due: {due}");
    }
    println!("  Time spent: {}", format_seconds(t.time_spent));
    if !t.files.is_empty() {
        println!("  Files: {}", t.files.join(", "));
    }
    if !t.allowed_apps.is_empty() {
        println!("  Allowed apps: {}", t.allowed_apps.join(", "));
    }
    if !t.linked_tasks.is_empty() {
        let linked: Vec<&str> = t.linked_tasks.iter().map(String::as_str).collect();
        println!("  Linked: {}", linked.join(", "));
    }
    println!("  Created: {}", t.created_at);
    println!("  Updated: {}", t.updated_at);
}

pub fn print_task_list(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }
    for t in tasks {
        let assignee = t.assignee.as_deref().map(|a| format!(" @{a}")).unwrap_or_default();
        println!(
            "  [{}] {} ({}) {} {}{}",
            t.status.as_str(),
            t.title,
            t.id,
            t.priority.as_str(),
            format_seconds(t.time_spent),
            assignee
        );
    }
}

pub fn print_status_counts(counts: &BTreeMap<&'static str, i64>) {
    let total: i64 = counts.values().sum();
    println!("Tasks: {total}");
    let parts: Vec<String> = counts.iter().map(|(status, n)| format!("{status}={n}")).collect();
    println!("  {}", parts.join(" "));
}

pub fn snapshot_line(task_id: &str, s: &TimerSnapshot) -> String {
    let elapsed = s.elapsed_by_task.get(task_id).copied().unwrap_or(0);
    let state = if s.running { "running" } else { "stopped" };
    match (s.mode, s.countdown_remaining) {
        (TimerMode::Countdown, Some(left)) => format!(
            "{task_id} [{state}] {} spent, {} left",
            format_seconds(elapsed),
            format_seconds(left)
        ),
        _ => format!("{task_id} [{state}] {} spent", format_seconds(elapsed)),
    }
}
