use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub const TX_FIFO_DEPTH: usize = 4;

/// Software-to-lane TX FIFO.
///
/// Producers are software threads; the single consumer is the lane's `pull`. A full FIFO
/// back-pressures [`TxFifo::push_blocking`] until the lane drains an entry.
#[derive(Debug, Default)]
pub(crate) struct TxFifo {
    entries: Mutex<VecDeque<u32>>,
    space: Condvar,
}

impl TxFifo {
    fn entries(&self) -> MutexGuard<'_, VecDeque<u32>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_push(&self, value: u32) -> bool {
        let mut entries = self.entries();
        if entries.len() >= TX_FIFO_DEPTH {
            return false;
        }
        entries.push_back(value);
        true
    }

    pub fn push_blocking(&self, value: u32) {
        let mut entries = self.entries();
        while entries.len() >= TX_FIFO_DEPTH {
            entries = self
                .space
                .wait(entries)
                .unwrap_or_else(PoisonError::into_inner);
        }
        entries.push_back(value);
    }

    pub fn pop(&self) -> Option<u32> {
        let value = self.entries().pop_front();
        if value.is_some() {
            self.space.notify_all();
        }
        value
    }

    pub fn level(&self) -> usize {
        self.entries().len()
    }

    pub fn clear(&self) {
        self.entries().clear();
        self.space.notify_all();
    }
}
