//! Single-threaded cooperative event loop.
//!
//! Primitives never call listeners from inside `post_message`; they enqueue a
//! delivery here instead. Whoever owns the [`Dispatcher`] drives it, and all
//! listener callbacks, deferred tasks and timers run on that thread, one at a
//! time, in the order they were queued.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::event::{ListenerRegistry, MessageEvent};
use crate::sync::lock;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Handle for a scheduled timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

enum Job {
    Deliver {
        registry: Arc<ListenerRegistry>,
        event: MessageEvent,
    },
    Run(Task),
    Wake,
}

#[derive(Default)]
struct TimerQueue {
    next_id: u64,
    due: BTreeMap<(Instant, u64), Task>,
    by_id: HashMap<u64, Instant>,
}

impl TimerQueue {
    fn insert(&mut self, deadline: Instant, task: Task) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.due.insert((deadline, id), task);
        self.by_id.insert(id, deadline);
        TimerId(id)
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        match self.by_id.remove(&id.0) {
            Some(deadline) => self.due.remove(&(deadline, id.0)).is_some(),
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.due.keys().next().map(|(deadline, _)| *deadline)
    }

    fn pop_due(&mut self, now: Instant) -> Option<Task> {
        let key = *self.due.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.by_id.remove(&key.1);
        self.due.remove(&key)
    }
}

/// Cloneable, thread-safe handle used to queue work on a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Job>,
    timers: Arc<Mutex<TimerQueue>>,
}

impl DispatchHandle {
    /// Queue an event for delivery to a listener set.
    pub fn deliver(&self, registry: Arc<ListenerRegistry>, event: MessageEvent) {
        if self.tx.send(Job::Deliver { registry, event }).is_err() {
            trace!("dispatcher dropped; event discarded");
        }
    }

    /// Run a task on the next dispatcher turn.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        if self.tx.send(Job::Run(Box::new(task))).is_err() {
            trace!("dispatcher dropped; task discarded");
        }
    }

    /// Run a task once `delay` has elapsed.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        let id = lock(&self.timers).insert(Instant::now() + delay, Box::new(task));
        // Wake a dispatcher that may be blocked until a later deadline.
        let _ = self.tx.send(Job::Wake);
        id
    }

    /// Cancel a pending timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        lock(&self.timers).cancel(id)
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle").finish_non_exhaustive()
    }
}

/// The event loop that owns the delivery queue.
pub struct Dispatcher {
    rx: Receiver<Job>,
    handle: DispatchHandle,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            handle: DispatchHandle {
                tx,
                timers: Arc::new(Mutex::new(TimerQueue::default())),
            },
        }
    }

    /// A handle for primitives and channels to queue work on this loop.
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Process queued deliveries, tasks and due timers until nothing is ready.
    ///
    /// Returns the number of deliveries, tasks and timers run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0usize;
        loop {
            let mut ran = 0usize;
            loop {
                match self.rx.try_recv() {
                    Ok(job) => ran += self.run_job(job),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            ran += self.run_due_timers();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Wait up to `timeout` for work, then run everything that is ready.
    pub fn poll(&self, timeout: Duration) -> usize {
        let ran = self.run_until_idle();
        if ran > 0 {
            return ran;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let ran = self.wait_until(deadline) + self.run_until_idle();
            if ran > 0 || Instant::now() >= deadline {
                return ran;
            }
        }
    }

    /// Drive the loop until `done` returns true or `deadline` passes.
    ///
    /// Returns whether `done` was satisfied.
    pub fn run_until<F: FnMut() -> bool>(&self, deadline: Instant, mut done: F) -> bool {
        loop {
            self.run_until_idle();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.wait_until(deadline);
        }
    }

    /// Drive the loop for a fixed duration.
    pub fn run_for(&self, duration: Duration) {
        self.run_until(Instant::now() + duration, || false);
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        lock(&self.handle.timers).by_id.len()
    }

    // Blocks until a job arrives, the next timer is due, or `deadline` passes.
    // A received job is run immediately; returns how many jobs ran.
    fn wait_until(&self, deadline: Instant) -> usize {
        let now = Instant::now();
        if now >= deadline {
            return 0;
        }
        let mut wake_at = deadline;
        if let Some(timer) = lock(&self.handle.timers).next_deadline() {
            wake_at = wake_at.min(timer);
        }
        let wait = wake_at.saturating_duration_since(now);
        match self.rx.recv_timeout(wait) {
            Ok(job) => self.run_job(job),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn run_job(&self, job: Job) -> usize {
        match job {
            Job::Deliver { registry, event } => {
                registry.dispatch(&event);
                1
            }
            Job::Run(task) => {
                task();
                1
            }
            Job::Wake => 0,
        }
    }

    fn run_due_timers(&self) -> usize {
        let mut ran = 0usize;
        loop {
            let task = lock(&self.handle.timers).pop_due(Instant::now());
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::event::SourceId;

    #[test]
    fn deferred_tasks_run_in_order() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = Arc::clone(&order);
            handle.defer(move || lock(&order).push(i));
        }

        assert_eq!(dispatcher.run_until_idle(), 4);
        assert_eq!(*lock(&order), vec![0, 1, 2, 3]);
        assert_eq!(dispatcher.run_until_idle(), 0);
    }

    #[test]
    fn deliveries_reach_registry() {
        let dispatcher = Dispatcher::new();
        let registry = Arc::new(ListenerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            registry.add(Arc::new(move |event: &MessageEvent| {
                assert_eq!(event.data, json!(7));
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        dispatcher.handle().deliver(
            Arc::clone(&registry),
            MessageEvent::new(json!(7), SourceId::next(), "test"),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        dispatcher.run_until_idle();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tasks_queued_by_tasks_run_in_same_idle_pass() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let inner_handle = handle.clone();
            let hits = Arc::clone(&hits);
            handle.defer(move || {
                let hits = Arc::clone(&hits);
                inner_handle.defer(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        assert_eq!(dispatcher.run_until_idle(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_fires_after_delay() {
        let dispatcher = Dispatcher::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            dispatcher
                .handle()
                .schedule(Duration::from_millis(20), move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                });
        }

        dispatcher.run_until_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_timers(), 1);

        let done = dispatcher.run_until(Instant::now() + Duration::from_secs(2), || {
            fired.load(Ordering::SeqCst) == 1
        });
        assert!(done);
        assert_eq!(dispatcher.pending_timers(), 0);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = {
            let fired = Arc::clone(&fired);
            handle.schedule(Duration::from_millis(10), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(handle.cancel(id));
        assert!(!handle.cancel(id));
        dispatcher.run_for(Duration::from_millis(40));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn poll_returns_after_timeout_without_work() {
        let dispatcher = Dispatcher::new();
        let start = Instant::now();
        assert_eq!(dispatcher.poll(Duration::from_millis(30)), 0);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn poll_picks_up_work_from_other_thread() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.defer(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            });
        });

        let done = dispatcher.run_until(Instant::now() + Duration::from_secs(2), || {
            hits.load(Ordering::SeqCst) == 1
        });
        producer.join().unwrap();
        assert!(done);
    }
}
