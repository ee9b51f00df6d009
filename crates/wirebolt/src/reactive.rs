//! Periodic message scheduling and condition-triggered auto-replies.
//!
//! Each scheduled message owns one OS thread that encodes and sends its
//! template every interval until cancelled; ticks sleep `interval` between
//! firings, so drift is acceptable by design. Auto-replies are checked
//! synchronously against incoming messages. Callback errors are logged and
//! never tear down the timer or the dispatch loop.

use crate::protocol::Protocol;
use crate::value::Record;
use log::warn;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Transmit hook: receives every encoded frame to put on the wire.
pub type SendFn = Box<dyn FnMut(&[u8]) + Send>;

/// Pre-send mutation hook for scheduled messages.
pub type UpdateFn = Box<dyn FnMut(&mut Record) + Send>;

/// Auto-reply trigger predicate over the incoming message.
pub type ConditionFn = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// Auto-reply mutation hook: `(incoming, reply_template)`.
pub type ReplyUpdateFn = Box<dyn Fn(&Record, &mut Record) + Send + Sync>;

/// Bounded wait applied when joining a cancelled timer thread.
const CANCEL_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct TimerState {
    stop: bool,
    done: bool,
}

/// Stop event shared between a timer thread and its cancel side.
#[derive(Default)]
struct StopCell {
    state: Mutex<TimerState>,
    cond: Condvar,
}

impl StopCell {
    fn request_stop(&self) {
        self.state.lock().stop = true;
        self.cond.notify_all();
    }

    fn stopped(&self) -> bool {
        self.state.lock().stop
    }

    /// Sleeps for `interval` or until a stop request; true means stop.
    fn wait_interval(&self, interval: Duration) -> bool {
        let mut state = self.state.lock();
        if state.stop {
            return true;
        }
        self.cond.wait_for(&mut state, interval);
        state.stop
    }

    fn mark_done(&self) {
        self.state.lock().done = true;
        self.cond.notify_all();
    }

    /// Waits for the worker to acknowledge shutdown; false on timeout.
    fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.cond.wait_for(&mut state, deadline - now);
        }
        true
    }
}

struct TimerHandle {
    stop: Arc<StopCell>,
    thread: Option<JoinHandle<()>>,
}

/// Table of interval timers, one thread per handle.
pub(crate) struct Scheduler {
    timers: Mutex<FxHashMap<u64, TimerHandle>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            timers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn spawn(
        &self,
        protocol: Protocol,
        mut record: Record,
        interval: Duration,
        mut send: SendFn,
        mut update: Option<UpdateFn>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(StopCell::default());
        let cell = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            loop {
                if cell.stopped() {
                    break;
                }
                if let Some(update) = update.as_mut() {
                    update(&mut record);
                }
                match protocol.encode(&mut record) {
                    Ok(bytes) => send(&bytes),
                    Err(e) => warn!("scheduled message failed to encode: {e}"),
                }
                if cell.wait_interval(interval) {
                    break;
                }
            }
            cell.mark_done();
        });

        self.timers.lock().insert(
            id,
            TimerHandle {
                stop,
                thread: Some(handle),
            },
        );
        id
    }

    /// Stops one timer; joins the worker with a bounded wait and detaches
    /// it if a hung send callback keeps it alive past the timeout.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let Some(mut handle) = self.timers.lock().remove(&id) else {
            return false;
        };
        handle.stop.request_stop();
        if handle.stop.wait_done(CANCEL_JOIN_TIMEOUT) {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
        true
    }

    /// Stops every timer: all stop requests first, then the bounded joins.
    pub(crate) fn cancel_all(&self) {
        let handles: Vec<(u64, TimerHandle)> = self.timers.lock().drain().collect();
        for (_, handle) in &handles {
            handle.stop.request_stop();
        }
        for (_, mut handle) in handles {
            if handle.stop.wait_done(CANCEL_JOIN_TIMEOUT) {
                if let Some(thread) = handle.thread.take() {
                    let _ = thread.join();
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.lock().len()
    }
}

struct ReplyEntry {
    condition: ConditionFn,
    template: Mutex<Record>,
    send: Mutex<SendFn>,
    update: Option<ReplyUpdateFn>,
}

/// Table of auto-reply registrations.
pub(crate) struct ReplyTable {
    entries: Mutex<FxHashMap<u64, Arc<ReplyEntry>>>,
    next_id: AtomicU64,
}

impl ReplyTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn register(
        &self,
        condition: ConditionFn,
        template: Record,
        send: SendFn,
        update: Option<ReplyUpdateFn>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            Arc::new(ReplyEntry {
                condition,
                template: Mutex::new(template),
                send: Mutex::new(send),
                update,
            }),
        );
        id
    }

    pub(crate) fn unregister(&self, id: u64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Fires matching registrations in insertion order, calling callbacks
    /// on a snapshot so the table lock is not held across user code.
    pub(crate) fn check(&self, protocol: &Protocol, incoming: &Record) -> usize {
        let mut snapshot: Vec<(u64, Arc<ReplyEntry>)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);

        let mut fired = 0;
        for (id, entry) in snapshot {
            if !(entry.condition)(incoming) {
                continue;
            }
            let mut template = entry.template.lock();
            if let Some(update) = &entry.update {
                update(incoming, &mut *template);
            }
            match protocol.encode(&mut template) {
                Ok(bytes) => {
                    let mut send = entry.send.lock();
                    (*send)(&bytes);
                    fired += 1;
                }
                Err(e) => warn!("auto-reply {id} failed to encode: {e}"),
            }
        }
        fired
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cell_wakes_waiters() {
        let cell = Arc::new(StopCell::default());
        let waiter = Arc::clone(&cell);
        let started = Instant::now();
        let handle = thread::spawn(move || {
            // A one-minute sleep that must be cut short by the stop event.
            waiter.wait_interval(Duration::from_secs(60))
        });
        thread::sleep(Duration::from_millis(30));
        cell.request_stop();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_done_times_out_without_worker() {
        let cell = StopCell::default();
        assert!(!cell.wait_done(Duration::from_millis(20)));
        cell.mark_done();
        assert!(cell.wait_done(Duration::from_millis(20)));
    }

    #[test]
    fn test_cancel_unknown_timer() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.cancel(99));
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn test_reply_table_bookkeeping() {
        let table = ReplyTable::new();
        let schema = crate::Schema::builder("Stub")
            .build()
            .expect("schema should build");
        let id = table.register(
            Box::new(|_| false),
            Record::new(&schema),
            Box::new(|_| {}),
            None,
        );
        assert_eq!(table.len(), 1);
        assert!(table.unregister(id));
        assert!(!table.unregister(id));
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
