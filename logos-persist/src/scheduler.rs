//! Debounced, sequential write scheduler.
//!
//! ```text
//!              begin() with dirty keys
//!   ┌──────┐ ─────────────────────────► ┌──────────┐  tick(): in flight  → Busy
//!   │ Idle │                            │ Draining │  tick(): dirty key  → Write(key)
//!   └──────┘ ◄───────────────────────── └──────────┘
//!              tick(): queue empty, nothing in flight → Stop
//! ```
//!
//! [`WriteQueue`] is the pure state machine. [`Scheduler`] wraps it in a lock
//! and runs the timer: one tokio task per Draining period, ticking at the
//! debounce interval. Each `Write(key)` is spawned as its own task; the
//! in-flight flag is cleared by a drop guard when that task ends, whatever
//! the outcome, so at most one key is ever between transform and storage.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::detect::DirtyQueue;
use crate::error::PersistResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer running.
    Idle,
    /// Timer running; drains one key per tick.
    Draining,
}

/// Outcome of one timer tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A write is outstanding; nothing to do this tick.
    Busy,
    /// Queue drained; the timer must stop.
    Stop,
    /// Write this key. The in-flight flag is now set.
    Write(String),
}

/// Dirty keys plus the Idle/Draining machine and in-flight flag.
#[derive(Debug)]
pub struct WriteQueue {
    dirty: DirtyQueue,
    in_flight: bool,
    state: SchedulerState,
    state_tx: watch::Sender<SchedulerState>,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteQueue {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            dirty: DirtyQueue::new(),
            in_flight: false,
            state: SchedulerState::Idle,
            state_tx,
        }
    }

    pub fn dirty(&self) -> &DirtyQueue {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut DirtyQueue {
        &mut self.dirty
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Queue `key` for writing. False when it is already queued.
    pub fn mark_dirty(&mut self, key: &str) -> bool {
        self.dirty.enqueue(key)
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Enter Draining if Idle with work queued. Returns true when the caller
    /// must start the timer.
    pub fn begin(&mut self) -> bool {
        if self.state == SchedulerState::Draining || self.dirty.is_empty() {
            return false;
        }
        self.transition(SchedulerState::Draining);
        true
    }

    pub fn tick(&mut self) -> Tick {
        if self.in_flight {
            return Tick::Busy;
        }
        match self.dirty.pop() {
            Some(key) => {
                self.in_flight = true;
                Tick::Write(key)
            }
            None => {
                self.transition(SchedulerState::Idle);
                Tick::Stop
            }
        }
    }

    pub fn finish_write(&mut self) {
        self.in_flight = false;
    }

    fn transition(&mut self, next: SchedulerState) {
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

/// Writes one key's current value to storage.
pub(crate) trait KeyWriter: Send + Sync + 'static {
    fn write<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PersistResult<()>>;
}

/// Lock-wrapped [`WriteQueue`] plus the drain timer.
pub(crate) struct Scheduler {
    queue: Mutex<WriteQueue>,
    interval: Duration,
    runtime: Handle,
}

impl Scheduler {
    pub fn new(interval: Duration, runtime: Handle) -> Self {
        Self {
            queue: Mutex::new(WriteQueue::new()),
            interval,
            runtime,
        }
    }

    pub fn queue(&self) -> &Mutex<WriteQueue> {
        &self.queue
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.queue.lock().subscribe()
    }

    /// Start a drain task for a period that `WriteQueue::begin` just opened.
    pub fn spawn_drain(self: &Arc<Self>, writer: Arc<dyn KeyWriter>) {
        let scheduler = Arc::clone(self);
        self.runtime.spawn(async move { scheduler.drain(writer).await });
    }

    async fn drain(self: Arc<Self>, writer: Arc<dyn KeyWriter>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; the first drain waits one period.
        ticker.tick().await;

        log::debug!("Write scheduler draining every {:?}", self.interval);
        loop {
            ticker.tick().await;
            let next = self.queue.lock().tick();
            match next {
                Tick::Busy => continue,
                Tick::Stop => break,
                Tick::Write(key) => {
                    let guard = InFlightGuard {
                        scheduler: Arc::clone(&self),
                    };
                    let writer = Arc::clone(&writer);
                    self.runtime.spawn(async move {
                        let _guard = guard;
                        if let Err(e) = writer.write(&key).await {
                            log::warn!("Failed to persist key `{key}`: {e}");
                        }
                    });
                }
            }
        }
        log::debug!("Write scheduler idle");
    }
}

/// Clears the in-flight flag when the write task ends, even by panic.
struct InFlightGuard {
    scheduler: Arc<Scheduler>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.scheduler.queue.lock().finish_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PersistError, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_idle_without_work_stays_idle() {
        let mut queue = WriteQueue::new();
        assert!(!queue.begin());
        assert_eq!(queue.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_state_machine_cycle() {
        let mut queue = WriteQueue::new();
        queue.mark_dirty("a");
        queue.mark_dirty("b");

        assert!(queue.begin());
        assert!(!queue.begin()); // already draining
        assert_eq!(queue.state(), SchedulerState::Draining);

        assert_eq!(queue.tick(), Tick::Write("a".into()));
        assert!(queue.in_flight());
        assert_eq!(queue.tick(), Tick::Busy);
        queue.finish_write();

        assert_eq!(queue.tick(), Tick::Write("b".into()));
        queue.finish_write();

        assert_eq!(queue.tick(), Tick::Stop);
        assert_eq!(queue.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_stop_waits_for_in_flight_write() {
        let mut queue = WriteQueue::new();
        queue.mark_dirty("only");
        queue.begin();

        assert_eq!(queue.tick(), Tick::Write("only".into()));
        // Queue is empty but a write is outstanding: stay Draining.
        assert_eq!(queue.tick(), Tick::Busy);
        assert_eq!(queue.state(), SchedulerState::Draining);

        queue.finish_write();
        assert_eq!(queue.tick(), Tick::Stop);
    }

    #[test]
    fn test_watch_sees_transitions() {
        let mut queue = WriteQueue::new();
        let rx = queue.subscribe();
        queue.mark_dirty("a");
        queue.begin();
        assert_eq!(*rx.borrow(), SchedulerState::Draining);

        queue.tick();
        queue.finish_write();
        queue.tick();
        assert_eq!(*rx.borrow(), SchedulerState::Idle);
    }

    struct CountingWriter {
        written: parking_lot::Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl KeyWriter for CountingWriter {
        fn write<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PersistResult<()>> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                if self.fail_on == Some(key) {
                    return Err(PersistError::Storage(StorageError::Backend("boom".into())));
                }
                self.written.lock().push(key.to_string());
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_fifo_single_flight() {
        let scheduler = Arc::new(Scheduler::new(Duration::from_millis(1), Handle::current()));
        let writer = Arc::new(CountingWriter {
            written: parking_lot::Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_on: Some("b"),
        });

        let start = {
            let mut queue = scheduler.queue().lock();
            for key in ["c", "b", "a"] {
                queue.mark_dirty(key);
            }
            queue.begin()
        };
        assert!(start);

        let mut rx = scheduler.subscribe();
        scheduler.spawn_drain(writer.clone());
        rx.wait_for(|s| *s == SchedulerState::Idle).await.unwrap();

        // "b" failed but did not block "a".
        assert_eq!(*writer.written.lock(), vec!["c", "a"]);
        assert_eq!(writer.peak.load(Ordering::SeqCst), 1);
        assert!(!scheduler.queue().lock().in_flight());
    }
}
