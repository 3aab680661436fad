//! Hashed timing wheel for delayed tasks.
//!
//! Backs delivery timeouts: O(1) insert and cancel, one dispatcher task per
//! wheel, wake-up skew bounded by one tick. Deadlines beyond one rotation
//! carry a round counter and fire on a later pass.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct WheelEntry {
    handle: u64,
    rounds: u64,
    task: Task,
}

/// A cancellable delayed-task wheel.
pub struct TimingWheel {
    tick: Duration,
    slots: Vec<Mutex<Vec<WheelEntry>>>,
    current: AtomicUsize,
    next_handle: AtomicU64,
    /// handle → slot index, for cancellation.
    index: DashMap<u64, usize>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TimingWheel {
    /// `tick` is the scheduling granularity; `size` the slots per rotation.
    pub fn new(tick: Duration, size: usize) -> Arc<Self> {
        assert!(size > 0, "wheel size must be > 0");
        let slots = (0..size).map(|_| Mutex::new(Vec::new())).collect();
        Arc::new(Self {
            tick,
            slots,
            current: AtomicUsize::new(0),
            next_handle: AtomicU64::new(0),
            index: DashMap::new(),
            dispatcher: Mutex::new(None),
        })
    }

    /// Starts the dispatcher task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.dispatcher.lock();
        if guard.is_some() {
            return;
        }
        let wheel = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(wheel.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                wheel.advance();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }

    /// Schedules `task` to run after `delay` (rounded up to a whole tick).
    /// Returns a handle usable with [`TimingWheel::cancel`].
    pub fn insert(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> u64 {
        let ticks = delay.as_nanos().div_ceil(self.tick.as_nanos()).max(1) as u64;
        let size = self.slots.len() as u64;
        let rounds = (ticks - 1) / size;
        let slot =
            (self.current.load(Ordering::SeqCst) as u64 + ticks) % size;

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.index.insert(handle, slot as usize);
        self.slots[slot as usize].lock().push(WheelEntry {
            handle,
            rounds,
            task: Box::new(task),
        });
        handle
    }

    /// Cancels a scheduled task. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&self, handle: u64) -> bool {
        let Some((_, slot)) = self.index.remove(&handle) else {
            return false;
        };
        let mut entries = self.slots[slot].lock();
        let before = entries.len();
        entries.retain(|e| e.handle != handle);
        before != entries.len()
    }

    fn advance(&self) {
        let slot = (self.current.load(Ordering::SeqCst) + 1) % self.slots.len();
        self.current.store(slot, Ordering::SeqCst);

        let due: Vec<WheelEntry> = {
            let mut entries = self.slots[slot].lock();
            let mut due = Vec::new();
            let mut keep = Vec::with_capacity(entries.len());
            for mut entry in entries.drain(..) {
                if entry.rounds == 0 {
                    due.push(entry);
                } else {
                    entry.rounds -= 1;
                    keep.push(entry);
                }
            }
            *entries = keep;
            due
        };

        for entry in due {
            self.index.remove(&entry.handle);
            (entry.task)();
        }
    }
}

impl Drop for TimingWheel {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn fires_after_delay() {
        let wheel = TimingWheel::new(Duration::from_millis(10), 16);
        wheel.start();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        wheel.insert(Duration::from_millis(30), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let wheel = TimingWheel::new(Duration::from_millis(10), 16);
        wheel.start();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = wheel.insert(Duration::from_millis(40), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(wheel.cancel(handle));
        assert!(!wheel.cancel(handle));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deadline_beyond_one_rotation() {
        let wheel = TimingWheel::new(Duration::from_millis(5), 4);
        wheel.start();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        // 12 ticks with a 4-slot wheel = 3 rotations.
        wheel.insert(Duration::from_millis(60), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
