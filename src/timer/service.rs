//! Runs a [`TimerCoordinator`] on its own tokio task.
//!
//! The actor owns the coordinator outright. Commands arrive on a channel,
//! ticks come from an interval, and flush results come back on a second
//! channel, so every mutation happens on one task and in one order. Loads
//! and flushes are spawned and never awaited by the loop; a slow or failing
//! store only delays persistence, never ticking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::TimerConfig;
use crate::error::TrackerError;

use super::clock::{Clock, RuntimeClock};
use super::coordinator::TimerCoordinator;
use super::notify::{Subscribers, Subscription};
use super::persist::TimeStore;
use super::state::{StartOutcome, StartRequest, TimerEvent, TimerSnapshot};
use super::write_behind::FlushRequest;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        request: StartRequest,
        reply: Reply<Result<StartOutcome, TrackerError>>,
    },
    ConfirmSwitch {
        reply: Reply<Result<Option<StartOutcome>, TrackerError>>,
    },
    CancelSwitch {
        reply: Reply<bool>,
    },
    Pause {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    ResetTotalTime {
        task_id: String,
        reply: Reply<Result<(), TrackerError>>,
    },
    Snapshot {
        reply: Reply<TimerSnapshot>,
    },
    LastFlushed {
        task_id: String,
        reply: Reply<Option<DateTime<Utc>>>,
    },
    ResetForTests {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

type FlushOutcome = (FlushRequest, Result<(), TrackerError>);
type LoadOutcome = (String, Result<u64, TrackerError>);

/// A command parked until its task's stored total has been loaded.
enum Waiting {
    Start {
        request: StartRequest,
        reply: Reply<Result<StartOutcome, TrackerError>>,
    },
    ResetTotalTime {
        reply: Reply<Result<(), TrackerError>>,
    },
}

impl Waiting {
    fn fail(self, error: TrackerError) {
        match self {
            Waiting::Start { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Waiting::ResetTotalTime { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

pub struct TimerService;

impl TimerService {
    /// Start the timer actor. The returned handle is the only way to reach it.
    pub fn spawn(store: Arc<dyn TimeStore>, config: TimerConfig) -> TimerHandle {
        Self::spawn_with_clock(store, config, Arc::new(RuntimeClock::new()))
    }

    pub fn spawn_with_clock(
        store: Arc<dyn TimeStore>,
        config: TimerConfig,
        clock: Arc<dyn Clock>,
    ) -> TimerHandle {
        let coordinator = TimerCoordinator::new(clock, config.flush_interval());
        let subscribers = coordinator.subscribers();
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            coordinator,
            store,
            config,
            commands: commands_rx,
            outcomes_tx,
            outcomes_rx,
            loads_tx,
            loads_rx,
            waiting: HashMap::new(),
        };
        let task = tokio::spawn(actor.run());

        TimerHandle {
            commands: commands_tx,
            subscribers,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }
}

/// Cloneable front door to the timer actor.
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::Sender<Command>,
    subscribers: Subscribers,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl TimerHandle {
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, TrackerError> {
        self.call(|reply| Command::Start { request, reply }).await?
    }

    pub async fn confirm_switch(&self) -> Result<Option<StartOutcome>, TrackerError> {
        self.call(|reply| Command::ConfirmSwitch { reply }).await?
    }

    pub async fn cancel_switch(&self) -> Result<bool, TrackerError> {
        self.call(|reply| Command::CancelSwitch { reply }).await
    }

    pub async fn pause(&self) -> Result<(), TrackerError> {
        self.call(|reply| Command::Pause { reply }).await
    }

    pub async fn reset(&self) -> Result<(), TrackerError> {
        self.call(|reply| Command::Reset { reply }).await
    }

    pub async fn reset_total_time(&self, task_id: &str) -> Result<(), TrackerError> {
        let task_id = task_id.to_string();
        self.call(|reply| Command::ResetTotalTime { task_id, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<TimerSnapshot, TrackerError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    pub async fn last_flushed(&self, task_id: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let task_id = task_id.to_string();
        self.call(|reply| Command::LastFlushed { task_id, reply }).await
    }

    /// Drop all session state, keeping subscribers. For test isolation.
    pub async fn reset_for_tests(&self) -> Result<(), TrackerError> {
        self.call(|reply| Command::ResetForTests { reply }).await
    }

    pub fn subscribe(&self, callback: impl Fn(&TimerSnapshot) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    pub fn subscribe_events(&self, callback: impl Fn(&TimerEvent) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe_events(callback)
    }

    /// Stop ticking, attempt a final flush of every unsaved counter within
    /// the shutdown budget, and wait for the actor to exit.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        self.call(|reply| Command::Shutdown { reply }).await?;
        let task = self
            .task
            .lock()
            .map_err(|_| TrackerError::timer_stopped())?
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "timer task ended abnormally");
            }
        }
        Ok(())
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, TrackerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TrackerError::timer_stopped())?;
        response.await.map_err(|_| TrackerError::timer_stopped())
    }
}

struct Actor {
    coordinator: TimerCoordinator,
    store: Arc<dyn TimeStore>,
    config: TimerConfig,
    commands: mpsc::Receiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<FlushOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<FlushOutcome>,
    loads_tx: mpsc::UnboundedSender<LoadOutcome>,
    loads_rx: mpsc::UnboundedReceiver<LoadOutcome>,
    waiting: HashMap<String, Vec<Waiting>>,
}

impl Actor {
    async fn run(mut self) {
        let period = self.config.tick();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let was_running = self.coordinator.is_running();
            tokio::select! {
                Some((request, result)) = self.outcomes_rx.recv() => {
                    self.coordinator.flush_completed(&request, result);
                }
                Some((task_id, result)) = self.loads_rx.recv() => {
                    self.loaded(&task_id, result);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = ticker.tick(), if was_running => self.coordinator.tick(),
            }
            if !was_running && self.coordinator.is_running() {
                ticker.reset();
            }
            self.dispatch_flushes();
            self.coordinator.publish();
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => {
                let task_id = request.task_id.clone();
                self.when_seeded(&task_id, Waiting::Start { request, reply });
            }
            Command::ConfirmSwitch { reply } => {
                let _ = reply.send(self.coordinator.confirm_switch());
            }
            Command::CancelSwitch { reply } => {
                let _ = reply.send(self.coordinator.cancel_switch());
            }
            Command::Pause { reply } => {
                self.coordinator.pause();
                let _ = reply.send(());
            }
            Command::Reset { reply } => {
                self.coordinator.reset();
                let _ = reply.send(());
            }
            Command::ResetTotalTime { task_id, reply } => {
                self.when_seeded(&task_id, Waiting::ResetTotalTime { reply });
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.snapshot());
            }
            Command::LastFlushed { task_id, reply } => {
                let _ = reply.send(self.coordinator.last_flushed(&task_id));
            }
            Command::ResetForTests { reply } => {
                self.coordinator.reset_for_tests();
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                // Handled in the run loop.
                let _ = reply.send(());
            }
        }
    }

    /// Run `op` once the task's stored total is known, so counting continues
    /// from what is already persisted. The first touch spawns a load; later
    /// commands for the same task queue behind it.
    fn when_seeded(&mut self, task_id: &str, op: Waiting) {
        if self.coordinator.knows(task_id) {
            self.apply(task_id, op);
            return;
        }
        if let Some(queue) = self.waiting.get_mut(task_id) {
            queue.push(op);
            return;
        }
        self.waiting.insert(task_id.to_string(), vec![op]);

        let store = Arc::clone(&self.store);
        let loads = self.loads_tx.clone();
        let timeout = self.config.persist_timeout();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let result = match time::timeout(timeout, store.load_time_spent(&task_id)).await {
                Ok(result) => result,
                Err(_) => Err(TrackerError::transient(format!(
                    "loading time for {task_id} timed out after {timeout:?}"
                ))),
            };
            let _ = loads.send((task_id, result));
        });
    }

    fn loaded(&mut self, task_id: &str, result: Result<u64, TrackerError>) {
        let queue = self.waiting.remove(task_id).unwrap_or_default();
        match result {
            Ok(persisted) => {
                self.coordinator.seed(task_id, persisted);
                for op in queue {
                    self.apply(task_id, op);
                }
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "could not load stored time");
                for op in queue {
                    op.fail(e.clone());
                }
            }
        }
    }

    fn apply(&mut self, task_id: &str, op: Waiting) {
        match op {
            Waiting::Start { request, reply } => {
                let _ = reply.send(self.coordinator.start(request));
            }
            Waiting::ResetTotalTime { reply } => {
                self.coordinator.reset_total_time(task_id);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn dispatch_flushes(&mut self) {
        for request in self.coordinator.take_flushes() {
            let store = Arc::clone(&self.store);
            let outcomes = self.outcomes_tx.clone();
            let timeout = self.config.persist_timeout();
            tokio::spawn(async move {
                let result = match time::timeout(timeout, store.save_time_spent(&request.task_id, request.seconds)).await {
                    Ok(result) => result,
                    Err(_) => Err(TrackerError::transient(format!(
                        "saving time for {} timed out after {timeout:?}",
                        request.task_id
                    ))),
                };
                let _ = outcomes.send((request, result));
            });
        }
    }

    async fn shutdown(&mut self) {
        for (_, queue) in self.waiting.drain() {
            for op in queue {
                op.fail(TrackerError::timer_stopped());
            }
        }
        self.coordinator.pause();
        self.coordinator.flush_all();
        let deadline = Instant::now() + self.config.shutdown_budget();

        loop {
            self.dispatch_flushes();
            if self.coordinator.in_flight() == 0 {
                break;
            }
            match time::timeout_at(deadline, self.outcomes_rx.recv()).await {
                Ok(Some((request, result))) => self.coordinator.flush_completed(&request, result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = self.coordinator.in_flight(),
                        "shutdown flush budget exhausted"
                    );
                    break;
                }
            }
        }
        self.coordinator.publish();
        tracing::info!("timer stopped");
    }
}
