use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::item::QueueEntry;

/// Queue state and the engine's run-state latches, all under one mutex.
pub(crate) struct QueueState {
    pub entries: VecDeque<QueueEntry>,
    /// Flow-control weight of the enqueued transfer items.
    pub weight: usize,
    /// Latched on unrecoverable transport failure; remaining transfers drain
    /// as failures or salvage.
    pub offline: bool,
    /// Latched by a `Skip` control item; behaves like `offline` for the rest
    /// of the run.
    pub skipping: bool,
    /// Latched false the first time any file fails or is partial.
    pub all_ok: bool,
}

/// The download queue: a bounded FIFO consumed by the engine thread, fed by
/// producer threads, and scanned by the transport's look-ahead.
///
/// Producers sending weighted entries block while the total weight exceeds
/// the ceiling, rechecking once a second with the lock released. Head
/// insertions (`Skip`, immediate `Quit`, the engine's own re-enqueues) skip
/// backpressure so control and recycling can never deadlock against it.
pub(crate) struct DownloadQueue {
    state: Mutex<QueueState>,
    nonempty: Condvar,
    max_weight: usize,
}

impl DownloadQueue {
    pub fn new(max_weight: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                weight: 0,
                offline: false,
                skipping: false,
                all_ok: true,
            }),
            nonempty: Condvar::new(),
            max_weight,
        }
    }

    /// Append an entry and apply backpressure.
    pub fn push_back(&self, entry: QueueEntry) {
        let weight = entry.weight();
        {
            let mut st = self.lock();
            st.entries.push_back(entry);
            st.weight += weight;
            self.nonempty.notify_one();
        }
        self.wait_below_ceiling();
    }

    /// Append an entry without backpressure. Only for control entries that
    /// must never block behind a full queue (`Quit`).
    pub fn push_back_unthrottled(&self, entry: QueueEntry) {
        let weight = entry.weight();
        let mut st = self.lock();
        st.entries.push_back(entry);
        st.weight += weight;
        self.nonempty.notify_one();
    }

    /// Insert an entry at the head, without backpressure.
    pub fn push_front(&self, entry: QueueEntry) {
        let weight = entry.weight();
        let mut st = self.lock();
        st.entries.push_front(entry);
        st.weight += weight;
        self.nonempty.notify_one();
    }

    /// Block until an entry is available, pop it, and settle its weight
    /// under the same lock.
    pub fn pop_blocking(&self) -> QueueEntry {
        let mut st = self.lock();
        loop {
            if let Some(entry) = st.entries.pop_front() {
                st.weight = st.weight.saturating_sub(entry.weight());
                return entry;
            }
            st = self.nonempty.wait(st).unwrap();
        }
    }

    fn wait_below_ceiling(&self) {
        loop {
            {
                let st = self.lock();
                if st.weight <= self.max_weight {
                    return;
                }
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap()
    }

    pub fn weight(&self) -> usize {
        self.lock().weight
    }

    pub fn set_offline(&self) {
        self.lock().offline = true;
    }

    pub fn is_offline(&self) -> bool {
        self.lock().offline
    }

    pub fn set_skipping(&self) {
        self.lock().skipping = true;
    }

    pub fn is_skipping(&self) -> bool {
        self.lock().skipping
    }

    pub fn clear_all_ok(&self) {
        self.lock().all_ok = false;
    }

    pub fn all_ok(&self) -> bool {
        self.lock().all_ok
    }
}
