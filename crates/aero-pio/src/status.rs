//! Event status word shared between the interrupt handler and the supervisor.
//!
//! A single-slot mailbox: the handler publishes the IRQ flags it just acknowledged (Release),
//! the supervisor observes them (Acquire) and consumes them once handled. Nothing here takes a
//! lock, so publishing is safe from interrupt context.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::{AtomicU32, AtomicU64};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::{AtomicU32, AtomicU64};

use std::sync::atomic::Ordering;
use std::sync::OnceLock;
use std::thread::Thread;

use crate::config::StatusPolicy;

#[derive(Debug)]
pub struct EventStatusWord {
    word: AtomicU32,
    policy: StatusPolicy,
    waiter: OnceLock<Thread>,
    stats: IsrStats,
}

/// Interrupt-side counters. Updated with relaxed atomics only.
#[derive(Debug)]
struct IsrStats {
    invocations: AtomicU64,
    spurious: AtomicU64,
    masked: AtomicU64,
}

impl IsrStats {
    fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
            masked: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsrStatsSnapshot {
    /// Times the handler ran.
    pub invocations: u64,
    /// Runs that found no flag set.
    pub spurious: u64,
    /// Lane bits dropped from the word without being consumed: replaced by a later overwrite
    /// publish, or still set when a consume that did not include them zeroed the word. A bit
    /// the supervisor had already loaded still counts if it was overwritten before its consume.
    pub masked: u64,
}

impl EventStatusWord {
    pub fn new(policy: StatusPolicy) -> Self {
        Self {
            word: AtomicU32::new(0),
            policy,
            waiter: OnceLock::new(),
            stats: IsrStats::new(),
        }
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    /// Current value. Every call re-reads the shared word.
    pub fn load(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    /// Folds `flags` into the word according to the policy, then wakes the registered waiter.
    ///
    /// Interrupt-context safe: no locks, no allocation.
    pub fn publish(&self, flags: u32) {
        match self.policy {
            StatusPolicy::Overwrite => {
                let previous = self.word.swap(flags, Ordering::AcqRel);
                self.count_masked(previous & !flags);
            }
            StatusPolicy::Accumulate => {
                self.word.fetch_or(flags, Ordering::AcqRel);
            }
        }
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
    }

    /// Consumes `observed` after the supervisor has handled it and returns what was removed.
    ///
    /// Under [`StatusPolicy::Overwrite`] the whole word is zeroed; any bit that arrived after
    /// `observed` was read is lost and counted as masked. Under [`StatusPolicy::Accumulate`]
    /// only the observed bits are cleared and later arrivals stay pending.
    pub fn consume(&self, observed: u32) -> u32 {
        match self.policy {
            StatusPolicy::Overwrite => {
                let previous = self.word.swap(0, Ordering::AcqRel);
                self.count_masked(previous & !observed);
                previous
            }
            StatusPolicy::Accumulate => {
                let previous = self.word.fetch_and(!observed, Ordering::AcqRel);
                previous & observed
            }
        }
    }

    /// Clears `bits` without touching any other flag, under either policy, and returns which
    /// of them were set. Nothing is counted as masked.
    pub fn discard(&self, bits: u32) -> u32 {
        self.word.fetch_and(!bits, Ordering::AcqRel) & bits
    }

    /// Zeroes the word unconditionally.
    pub fn clear(&self) {
        self.word.store(0, Ordering::Release);
    }

    /// Registers the calling thread to be unparked on every publish. Only the first
    /// registration sticks; returns whether the caller is the registered waiter.
    pub fn register_waiter(&self) -> bool {
        let current = std::thread::current();
        let registered = self.waiter.get_or_init(|| current.clone());
        registered.id() == current.id()
    }

    pub(crate) fn record_invocation(&self, spurious: bool) {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        if spurious {
            self.stats.spurious.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_masked(&self, lost: u32) {
        if lost != 0 {
            self.stats
                .masked
                .fetch_add(u64::from(lost.count_ones()), Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> IsrStatsSnapshot {
        IsrStatsSnapshot {
            invocations: self.stats.invocations.load(Ordering::Relaxed),
            spurious: self.stats.spurious.load(Ordering::Relaxed),
            masked: self.stats.masked.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventStatusWord {
    fn default() -> Self {
        Self::new(StatusPolicy::default())
    }
}
