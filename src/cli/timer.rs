use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::cli::commands::TimerCommands;
use crate::config::TimerConfig;
use crate::error::TrackerError;
use crate::output;
use crate::store::TaskStore;
use crate::timer::{StartOutcome, StartRequest, TimerEvent, TimerService};

pub fn run(cmd: TimerCommands, json_output: bool) -> i32 {
    let result = match cmd {
        TimerCommands::Run { id, countdown } => run_timer(&id, countdown, json_output),
    };
    match result {
        Ok(code) => code,
        Err(e) => output::report_error(&e, json_output),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, TrackerError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| TrackerError::fatal(format!("failed to start runtime: {e}")))
}

fn run_timer(id: &str, countdown: Option<Option<u64>>, json_output: bool) -> Result<i32, TrackerError> {
    let store = TaskStore::open()?;
    let config = TimerConfig::load()?;
    let task = store.find_by_id(id)?;

    let request = match countdown {
        None => StartRequest::countup(&task.id),
        Some(seconds) => StartRequest::countdown(&task.id, seconds.unwrap_or(config.default_countdown_secs)),
    };

    let ticker_label = (!json_output).then(|| task.id.clone());
    let (outcome, completed) =
        runtime()?.block_on(drive(Arc::new(store.clone()), config, request, ticker_label))?;

    let task = store.find_by_id(&task.id)?;
    if json_output {
        output::json::print(&output::json::success(json!({
            "task": output::json::task_summary(&task),
            "outcome": output::json::start_outcome(&outcome),
            "completed": completed,
        })));
    } else {
        let verb = if completed { "Completed" } else { "Stopped" };
        println!(
            "{verb}: {} ({}) total {}",
            task.title,
            task.id,
            output::text::format_seconds(task.time_spent)
        );
    }
    Ok(0)
}

/// Run the timer until a countdown completes or Ctrl-C, then shut it down.
/// With a label, every snapshot is echoed as a text line.
async fn drive(
    store: Arc<TaskStore>,
    config: TimerConfig,
    request: StartRequest,
    ticker_label: Option<String>,
) -> Result<(StartOutcome, bool), TrackerError> {
    let timer = TimerService::spawn(store, config);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let events = timer.subscribe_events(move |event: &TimerEvent| {
        let _ = done_tx.send(event.clone());
    });
    let snapshots = ticker_label.map(|task_id| {
        timer.subscribe(move |snapshot| {
            println!("{}", output::text::snapshot_line(&task_id, snapshot));
        })
    });

    let outcome = match timer.start(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            timer.shutdown().await?;
            return Err(e);
        }
    };

    let completed = tokio::select! {
        event = done_rx.recv() => event.is_some(),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "could not listen for Ctrl-C");
            }
            false
        }
    };

    events.detach();
    if let Some(subscription) = snapshots {
        subscription.detach();
    }
    timer.shutdown().await?;
    Ok((outcome, completed))
}
