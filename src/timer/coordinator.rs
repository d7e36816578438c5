//! The timer state machine.
//!
//! `TimerCoordinator` is a plain value with no interior locking. Exactly one
//! owner mutates it (the service actor in production, the test body in unit
//! tests), which is what serializes "which task is being timed". It never
//! performs I/O: persistence requests pile up in an outbox drained by the
//! owner, and results come back through [`TimerCoordinator::flush_completed`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{ErrorCode, TrackerError};

use super::clock::Clock;
use super::notify::{NotificationBus, Subscribers};
use super::state::{StartOutcome, StartRequest, TimerEvent, TimerMode, TimerSnapshot};
use super::write_behind::{FlushRequest, WriteBehind};

pub struct TimerCoordinator {
    clock: Arc<dyn Clock>,
    active_task: Option<String>,
    running: bool,
    mode: TimerMode,
    elapsed: BTreeMap<String, u64>,
    countdown_remaining: Option<u64>,
    countdown_duration: Option<u64>,
    pending_switch: Option<StartRequest>,
    cache: WriteBehind,
    outbox: Vec<FlushRequest>,
    bus: NotificationBus,
}

impl TimerCoordinator {
    pub fn new(clock: Arc<dyn Clock>, flush_interval: Duration) -> Self {
        Self {
            clock,
            active_task: None,
            running: false,
            mode: TimerMode::Countup,
            elapsed: BTreeMap::new(),
            countdown_remaining: None,
            countdown_duration: None,
            pending_switch: None,
            cache: WriteBehind::new(flush_interval),
            outbox: Vec::new(),
            bus: NotificationBus::default(),
        }
    }

    pub fn subscribers(&self) -> Subscribers {
        self.bus.subscribers()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the coordinator already has a counter for `task_id`.
    pub fn knows(&self, task_id: &str) -> bool {
        self.elapsed.contains_key(task_id)
    }

    /// Seed a task's counter from storage. Ignored if a counter exists.
    pub fn seed(&mut self, task_id: &str, persisted: u64) {
        if self.knows(task_id) {
            return;
        }
        self.elapsed.insert(task_id.to_string(), persisted);
        self.cache.mark_persisted(task_id, persisted);
    }

    pub fn start(&mut self, request: StartRequest) -> Result<StartOutcome, TrackerError> {
        if request.mode == TimerMode::Countdown {
            self.countdown_length(&request)?;
        }

        if let Some(current) = self.running_task() {
            if current != request.task_id {
                let outcome = StartOutcome::SwitchPending {
                    current: current.to_string(),
                    requested: request.task_id.clone(),
                };
                tracing::info!(%current, requested = %request.task_id, "timer switch awaiting confirmation");
                self.pending_switch = Some(request);
                return Ok(outcome);
            }
            if self.mode == request.mode {
                return Ok(StartOutcome::AlreadyRunning);
            }
            self.stop_active();
        }

        self.begin(request)?;
        Ok(StartOutcome::Started)
    }

    /// Apply the pending switch request, if any.
    pub fn confirm_switch(&mut self) -> Result<Option<StartOutcome>, TrackerError> {
        let Some(request) = self.pending_switch.take() else {
            return Ok(None);
        };
        self.stop_active();
        self.begin(request)?;
        Ok(Some(StartOutcome::Started))
    }

    pub fn cancel_switch(&mut self) -> bool {
        self.pending_switch.take().is_some()
    }

    pub fn pending_switch(&self) -> Option<&StartRequest> {
        self.pending_switch.as_ref()
    }

    /// One scheduling interval has passed.
    pub fn tick(&mut self) {
        let Some(task_id) = self.running_task().map(str::to_string) else {
            return;
        };
        let now = self.clock.now();
        let elapsed = self.elapsed.entry(task_id.clone()).or_insert(0);
        *elapsed += 1;
        let seconds = *elapsed;
        self.cache.record(&task_id, seconds, now);
        self.bus.mark_dirty();

        if self.mode == TimerMode::Countdown {
            let remaining = self.countdown_remaining.unwrap_or(0).saturating_sub(1);
            self.countdown_remaining = Some(remaining);
            if remaining == 0 {
                tracing::info!(%task_id, "countdown finished");
                self.stop_active();
                self.bus.emit(&TimerEvent::SessionComplete { task_id });
                return;
            }
        }

        let request = self.cache.offer(&task_id, now);
        self.outbox.extend(request);
        tracing::trace!(%task_id, seconds, "tick");
    }

    /// Flush and stop. No-op when nothing is running.
    pub fn pause(&mut self) {
        if self.running {
            self.stop_active();
        }
    }

    /// Flush and stop; in countdown mode also re-prime the countdown. Never
    /// clears accumulated time.
    pub fn reset(&mut self) {
        self.pause();
        if self.mode == TimerMode::Countdown {
            self.countdown_remaining = self.countdown_duration;
        }
        self.bus.mark_dirty();
    }

    /// Zero a task's accumulated time, here and in storage.
    pub fn reset_total_time(&mut self, task_id: &str) {
        let now = self.clock.now();
        self.elapsed.insert(task_id.to_string(), 0);
        self.cache.record(task_id, 0, now);
        self.force_flush(task_id);
        self.bus.mark_dirty();
        tracing::info!(%task_id, "total time reset");
    }

    pub fn elapsed(&self, task_id: &str) -> u64 {
        self.elapsed.get(task_id).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            active_task_id: self.active_task.clone(),
            running: self.running,
            elapsed_by_task: self.elapsed.clone(),
            mode: self.mode,
            countdown_remaining: match self.mode {
                TimerMode::Countdown => self.countdown_remaining,
                TimerMode::Countup => None,
            },
        }
    }

    /// When `task_id` was last written to storage successfully.
    pub fn last_flushed(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.cache.last_success(task_id)
    }

    pub fn take_flushes(&mut self) -> Vec<FlushRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn flush_completed(&mut self, request: &FlushRequest, result: Result<(), TrackerError>) {
        let now = self.clock.now();
        match &result {
            Ok(()) => {
                tracing::debug!(task_id = %request.task_id, seconds = request.seconds, "time flushed");
            }
            Err(e) if e.code == ErrorCode::TaskNotFound => {
                tracing::warn!(task_id = %request.task_id, "task vanished, dropping its counter");
                self.forget_task(&request.task_id);
                return;
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %request.task_id,
                    seconds = request.seconds,
                    error = %e,
                    "time flush failed, will retry"
                );
            }
        }
        let follow_up = self.cache.complete(request, &result, now);
        self.outbox.extend(follow_up);
    }

    /// Queue a flush for every counter not yet in storage.
    pub fn flush_all(&mut self) {
        let now = self.clock.now();
        let requests = self.cache.force_all(now);
        self.outbox.extend(requests);
    }

    pub fn in_flight(&self) -> usize {
        self.cache.in_flight()
    }

    /// End of a scheduling frame: notify subscribers if anything changed.
    pub fn publish(&mut self) -> bool {
        if !self.bus.is_dirty() {
            return false;
        }
        let snapshot = self.snapshot();
        self.bus.publish(move || snapshot)
    }

    /// Drop every counter and session field. Subscriptions survive.
    pub fn reset_for_tests(&mut self) {
        self.active_task = None;
        self.running = false;
        self.mode = TimerMode::Countup;
        self.elapsed.clear();
        self.countdown_remaining = None;
        self.countdown_duration = None;
        self.pending_switch = None;
        self.cache.clear();
        self.outbox.clear();
    }

    fn running_task(&self) -> Option<&str> {
        self.active_task.as_deref().filter(|_| self.running)
    }

    fn countdown_length(&self, request: &StartRequest) -> Result<u64, TrackerError> {
        match request.duration.or(self.countdown_duration) {
            Some(seconds) if seconds > 0 => Ok(seconds),
            _ => Err(TrackerError::validation(
                "Countdown needs a duration greater than zero",
            )),
        }
    }

    fn begin(&mut self, request: StartRequest) -> Result<(), TrackerError> {
        if request.mode == TimerMode::Countdown {
            let length = self.countdown_length(&request)?;
            self.countdown_duration = Some(length);
            if self.countdown_remaining.map_or(true, |left| left == 0) {
                self.countdown_remaining = Some(length);
            }
        }
        self.pending_switch = None;
        self.elapsed.entry(request.task_id.clone()).or_insert(0);
        tracing::info!(task_id = %request.task_id, mode = request.mode.as_str(), "timer started");
        self.active_task = Some(request.task_id);
        self.mode = request.mode;
        self.running = true;
        self.bus.mark_dirty();
        Ok(())
    }

    fn stop_active(&mut self) {
        self.running = false;
        if let Some(task_id) = self.active_task.clone() {
            self.force_flush(&task_id);
            tracing::info!(%task_id, seconds = self.elapsed(&task_id), "timer stopped");
        }
        self.bus.mark_dirty();
    }

    fn forget_task(&mut self, task_id: &str) {
        self.cache.forget(task_id);
        self.elapsed.remove(task_id);
        if self.active_task.as_deref() == Some(task_id) {
            self.active_task = None;
            self.running = false;
        }
        self.bus.mark_dirty();
    }

    fn force_flush(&mut self, task_id: &str) {
        let now = self.clock.now();
        let request = self.cache.force(task_id, now);
        self.outbox.extend(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Harness {
        clock: ManualClock,
        timer: TimerCoordinator,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
            let timer = TimerCoordinator::new(Arc::new(clock.clone()), Duration::seconds(10));
            Self { clock, timer }
        }

        fn ticks(&mut self, n: u64) {
            for _ in 0..n {
                self.clock.advance(Duration::seconds(1));
                self.timer.tick();
            }
        }

        /// Complete every queued flush with `result`, returning what was sent.
        fn settle(&mut self, result: impl Fn() -> Result<(), TrackerError>) -> Vec<FlushRequest> {
            let mut sent = Vec::new();
            loop {
                let batch = self.timer.take_flushes();
                if batch.is_empty() {
                    return sent;
                }
                for request in batch {
                    self.timer.flush_completed(&request, result());
                    sent.push(request);
                }
            }
        }
    }

    fn ok() -> Result<(), TrackerError> {
        Ok(())
    }

    fn flush(task: &str, seconds: u64) -> FlushRequest {
        FlushRequest {
            task_id: task.to_string(),
            seconds,
        }
    }

    #[test]
    fn countup_counts_each_tick() {
        let mut h = Harness::new();
        assert_eq!(h.timer.start(StartRequest::countup("A")).unwrap(), StartOutcome::Started);
        h.ticks(25);
        assert_eq!(h.timer.elapsed("A"), 25);
        let snap = h.timer.snapshot();
        assert_eq!(snap.running_task(), Some("A"));
        assert_eq!(snap.countdown_remaining, None);
    }

    #[test]
    fn ticks_while_idle_do_nothing() {
        let mut h = Harness::new();
        h.ticks(3);
        assert!(h.timer.snapshot().elapsed_by_task.is_empty());
        assert!(h.timer.take_flushes().is_empty());
    }

    #[test]
    fn pause_flushes_exact_elapsed() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("C")).unwrap();
        h.ticks(3);
        h.timer.pause();

        assert_eq!(h.timer.elapsed("C"), 3);
        assert_eq!(h.settle(ok), vec![flush("C", 3)]);
        assert!(!h.timer.is_running());
        assert!(h.timer.last_flushed("C").is_some());

        h.timer.pause();
        assert!(h.timer.take_flushes().is_empty());
    }

    #[test]
    fn ticking_flushes_once_per_window() {
        let mut h = Harness::new();
        h.timer.seed("A", 100);
        h.timer.start(StartRequest::countup("A")).unwrap();
        // The window opens at the first unsaved tick.
        h.ticks(10);
        assert!(h.timer.take_flushes().is_empty());
        h.ticks(1);
        assert_eq!(h.settle(ok), vec![flush("A", 111)]);
        h.ticks(9);
        assert!(h.timer.take_flushes().is_empty());
        h.ticks(1);
        assert_eq!(h.settle(ok), vec![flush("A", 121)]);
    }

    #[test]
    fn failed_flush_does_not_stop_ticking_and_retries() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(11);
        let failed = h.settle(|| Err(TrackerError::transient("storage unreachable")));
        assert_eq!(failed, vec![flush("A", 11)]);
        assert!(h.timer.last_flushed("A").is_none());
        assert!(h.timer.is_running());

        h.ticks(5);
        assert!(h.timer.take_flushes().is_empty());
        assert_eq!(h.timer.elapsed("A"), 16);
        h.ticks(5);
        assert_eq!(h.settle(ok), vec![flush("A", 21)]);
        assert!(h.timer.last_flushed("A").is_some());
    }

    #[test]
    fn vanished_task_stops_being_timed() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(11);
        h.settle(|| Err(TrackerError::task_not_found("A")));
        assert!(!h.timer.is_running());
        assert!(!h.timer.knows("A"));
        h.ticks(20);
        assert!(h.timer.take_flushes().is_empty());
    }

    #[test]
    fn switching_tasks_needs_confirmation() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(4);

        let outcome = h.timer.start(StartRequest::countup("B")).unwrap();
        assert_eq!(
            outcome,
            StartOutcome::SwitchPending {
                current: "A".into(),
                requested: "B".into()
            }
        );
        assert_eq!(h.timer.snapshot().running_task(), Some("A"));
        assert_eq!(h.timer.pending_switch().map(|r| r.task_id.as_str()), Some("B"));
        h.ticks(1);
        assert_eq!(h.timer.elapsed("A"), 5);

        assert_eq!(h.timer.confirm_switch().unwrap(), Some(StartOutcome::Started));
        assert_eq!(h.settle(ok), vec![flush("A", 5)]);
        h.ticks(2);
        assert_eq!(h.timer.elapsed("A"), 5);
        assert_eq!(h.timer.elapsed("B"), 2);
        assert_eq!(h.timer.snapshot().running_task(), Some("B"));
        assert_eq!(h.timer.confirm_switch().unwrap(), None);
    }

    #[test]
    fn cancelled_switch_leaves_current_session() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.timer.start(StartRequest::countup("B")).unwrap();
        assert!(h.timer.cancel_switch());
        assert_eq!(h.timer.confirm_switch().unwrap(), None);
        assert_eq!(h.timer.snapshot().running_task(), Some("A"));
    }

    #[test]
    fn restarting_same_task_is_a_no_op() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(2);
        assert_eq!(h.timer.start(StartRequest::countup("A")).unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(h.timer.elapsed("A"), 2);
    }

    #[test]
    fn resume_after_pause_keeps_accumulating() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(3);
        h.timer.pause();
        h.ticks(3);
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(2);
        assert_eq!(h.timer.elapsed("A"), 5);
    }

    #[test]
    fn countdown_completes_once() {
        let mut h = Harness::new();
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let _events = h.timer.subscribers().subscribe_events(move |event| {
            assert_eq!(event, &TimerEvent::SessionComplete { task_id: "A".into() });
            seen.fetch_add(1, Ordering::SeqCst);
        });

        h.timer.start(StartRequest::countdown("A", 5)).unwrap();
        h.ticks(4);
        assert_eq!(h.timer.snapshot().countdown_remaining, Some(1));
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        h.ticks(1);

        let snap = h.timer.snapshot();
        assert_eq!(snap.countdown_remaining, Some(0));
        assert!(!snap.running);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(h.settle(ok), vec![flush("A", 5)]);

        h.ticks(3);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(h.timer.elapsed("A"), 5);
    }

    #[test]
    fn countdown_requires_a_duration() {
        let mut h = Harness::new();
        let err = h.timer.start(StartRequest::countdown("A", 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(!h.timer.is_running());
    }

    #[test]
    fn countdown_resumes_primed_value() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countdown("A", 10)).unwrap();
        h.ticks(4);
        h.timer.pause();
        h.timer.start(StartRequest::countdown("A", 30)).unwrap();
        assert_eq!(h.timer.snapshot().countdown_remaining, Some(6));
    }

    #[test]
    fn reset_keeps_elapsed_and_reprimes_countdown() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countdown("A", 10)).unwrap();
        h.ticks(4);
        h.timer.reset();

        assert_eq!(h.timer.elapsed("A"), 4);
        assert!(!h.timer.is_running());
        let snap = h.timer.snapshot();
        assert_eq!(snap.countdown_remaining, Some(10));
        assert_eq!(h.settle(ok), vec![flush("A", 4)]);
    }

    #[test]
    fn reset_in_countup_only_stops() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(7);
        h.timer.reset();
        assert_eq!(h.timer.elapsed("A"), 7);
        assert_eq!(h.timer.snapshot().countdown_remaining, None);
        assert_eq!(h.settle(ok), vec![flush("A", 7)]);
    }

    #[test]
    fn failed_reset_flush_waits_for_the_window() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(4);
        h.timer.reset();

        let sent = h.timer.take_flushes();
        assert_eq!(sent, vec![flush("A", 4)]);
        h.timer
            .flush_completed(&sent[0], Err(TrackerError::transient("storage unreachable")));
        assert!(h.timer.take_flushes().is_empty());
        assert_eq!(h.timer.in_flight(), 0);
    }

    #[test]
    fn reset_total_time_zeroes_and_persists() {
        let mut h = Harness::new();
        h.timer.seed("A", 50);
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(3);
        h.timer.reset_total_time("A");
        assert_eq!(h.timer.elapsed("A"), 0);
        assert_eq!(h.settle(ok), vec![flush("A", 0)]);
        assert!(h.timer.is_running());
        h.ticks(2);
        assert_eq!(h.timer.elapsed("A"), 2);
    }

    #[test]
    fn seed_does_not_override_live_counter() {
        let mut h = Harness::new();
        h.timer.seed("A", 40);
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(2);
        h.timer.seed("A", 0);
        assert_eq!(h.timer.elapsed("A"), 42);
    }

    #[test]
    fn mutations_in_one_frame_publish_once() {
        let mut h = Harness::new();
        let snapshots: Arc<Mutex<Vec<TimerSnapshot>>> = Arc::default();
        let sink = Arc::clone(&snapshots);
        let _sub = h.timer.subscribers().subscribe(move |snap| {
            sink.lock().unwrap().push(snap.clone());
        });

        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(3);
        h.timer.pause();
        assert!(h.timer.publish());
        assert!(!h.timer.publish());

        let seen = snapshots.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].elapsed_by_task.get("A"), Some(&3));
        assert!(!seen[0].running);
    }

    #[test]
    fn every_snapshot_has_at_most_one_running_task() {
        let mut h = Harness::new();
        let snapshots: Arc<Mutex<Vec<TimerSnapshot>>> = Arc::default();
        let sink = Arc::clone(&snapshots);
        let _sub = h.timer.subscribers().subscribe(move |snap| {
            sink.lock().unwrap().push(snap.clone());
        });

        for task in ["A", "B", "C", "A"] {
            h.timer.start(StartRequest::countup(task)).unwrap();
            h.timer.publish();
            h.timer.confirm_switch().unwrap();
            h.timer.publish();
            h.ticks(1);
            h.timer.publish();
        }

        let seen = snapshots.lock().unwrap();
        assert!(!seen.is_empty());
        for snap in seen.iter() {
            assert!(!snap.running || snap.active_task_id.is_some());
        }
        assert_eq!(seen.last().unwrap().running_task(), Some("A"));
    }

    #[test]
    fn flush_all_covers_dirty_counters() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countup("A")).unwrap();
        h.ticks(2);
        h.timer.start(StartRequest::countup("B")).unwrap();
        h.timer.confirm_switch().unwrap();
        h.settle(|| Err(TrackerError::transient("down")));
        h.ticks(3);

        h.timer.flush_all();
        let mut sent = h.settle(ok);
        sent.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        assert_eq!(sent, vec![flush("A", 2), flush("B", 3)]);
    }

    #[test]
    fn reset_for_tests_clears_session() {
        let mut h = Harness::new();
        h.timer.start(StartRequest::countdown("A", 5)).unwrap();
        h.ticks(2);
        h.timer.reset_for_tests();
        let snap = h.timer.snapshot();
        assert_eq!(snap.active_task_id, None);
        assert!(snap.elapsed_by_task.is_empty());
        assert!(h.timer.take_flushes().is_empty());
    }
}
