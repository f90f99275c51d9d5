use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::Result;
use crate::types::Timestamp;
use crate::wal::Wal;

/// Issues monotonically increasing commit epochs, tracks in-flight
/// commits, and publishes the visibility barrier.
///
/// `read_epoch` is the largest epoch whose commit (and every earlier one)
/// has finished; a reader snapshotting it observes a consistent prefix of
/// the commit order. Epoch assignment and the WAL append happen under one
/// lock so log order always equals epoch order.
pub struct CommitManager {
    read_epoch: AtomicI64,
    next_txn_id: AtomicI64,
    state: Mutex<Window>,
    visible: Condvar,
}

struct Window {
    // Epoch that the next `register_commit` will claim.
    next_epoch: Timestamp,
    // Epoch of `finished[0]`; epochs below it are all finished.
    base: Timestamp,
    finished: VecDeque<bool>,
}

/// Handle for one registered commit, consumed by [`CommitManager::finish_commit`].
#[derive(Debug)]
pub struct CommitTicket {
    epoch: Timestamp,
    unfinished: usize,
}

impl CommitTicket {
    pub fn epoch(&self) -> Timestamp {
        self.epoch
    }

    /// Number of earlier commits still in flight at registration time.
    pub fn unfinished(&self) -> usize {
        self.unfinished
    }
}

impl CommitManager {
    /// Starts the epoch sequence after `last_durable_epoch` (0 for a fresh
    /// graph).
    pub fn new(last_durable_epoch: Timestamp) -> Self {
        Self {
            read_epoch: AtomicI64::new(last_durable_epoch),
            next_txn_id: AtomicI64::new(1),
            state: Mutex::new(Window {
                next_epoch: last_durable_epoch + 1,
                base: last_durable_epoch + 1,
                finished: VecDeque::new(),
            }),
            visible: Condvar::new(),
        }
    }

    /// Largest epoch fully visible to new readers.
    pub fn begin_read(&self) -> Timestamp {
        self.read_epoch.load(Ordering::Acquire)
    }

    /// Returns `(tentative_write_epoch, local_txn_id)`. The write epoch is
    /// the pending sentinel `-txn_id` until the commit epoch is assigned.
    pub fn begin_write(&self) -> (Timestamp, i64) {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        (-txn_id, txn_id)
    }

    /// Assigns the commit epoch, persists the WAL payload, and records the
    /// commit among those in flight. On a WAL failure nothing is assigned
    /// and the error is returned; the caller aborts.
    pub fn register_commit(&self, wal: &Wal, op_count: u32, payload: &[u8]) -> Result<CommitTicket> {
        let mut state = self.state.lock();
        let epoch = state.next_epoch;
        wal.append_commit(epoch, op_count, payload)?;
        state.next_epoch += 1;
        state.finished.push_back(false);
        let unfinished = state.finished.len() - 1;
        trace!(epoch, unfinished, "commit registered");
        Ok(CommitTicket { epoch, unfinished })
    }

    /// Marks the commit finished and advances `read_epoch` across the
    /// finished prefix. With `wait_visible`, blocks until every commit at
    /// or below this epoch has finished, so a read begun afterwards
    /// observes it.
    pub fn finish_commit(&self, ticket: CommitTicket, wait_visible: bool) {
        let mut state = self.state.lock();
        let index = (ticket.epoch - state.base) as usize;
        state.finished[index] = true;
        while state.finished.front() == Some(&true) {
            state.finished.pop_front();
            state.base += 1;
        }
        let visible = state.base - 1;
        self.read_epoch.store(visible, Ordering::Release);
        self.visible.notify_all();
        if wait_visible {
            while self.read_epoch.load(Ordering::Acquire) < ticket.epoch {
                self.visible.wait(&mut state);
            }
        }
    }
}
