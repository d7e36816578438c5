use serde_json::{json, Value};

use crate::error::TrackerError;
use crate::models::Task;
use crate::timer::StartOutcome;

pub fn success(data: Value) -> Value {
    json!({
        "success": true,
        "data": data
    })
}

pub fn error(err: &TrackerError) -> Value {
    json!({
        "success": false,
        "error": {
            "code": err.code.as_str(),
            "message": err.message
        }
    })
}

pub fn print(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn task_summary(t: &Task) -> Value {
    json!({
        "id": t.id,
        "title": t.title,
        "status": t.status.as_str(),
        "priority": t.priority.as_str(),
        "timeSpent": t.time_spent
    })
}

pub fn task_detail(t: &Task) -> Value {
    serde_json::to_value(t).unwrap_or_else(|_| task_summary(t))
}

pub fn start_outcome(o: &StartOutcome) -> Value {
    serde_json::to_value(o).unwrap_or(Value::Null)
}
