//! NVIC-style interrupt controller for the emulated platform.
//!
//! Lines are level-sensitive: a line whose level is high and whose enable bit is set is
//! dispatched to its handler on every [`InterruptController::service`] pass until the device
//! drops the level. Each line has one exclusive handler slot.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::InterruptError;

pub const NUM_IRQS: u8 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqLine(pub u8);

/// IRQ line 0 of PIO block 0.
pub const PIO0_IRQ_0: IrqLine = IrqLine(7);
/// IRQ line 1 of PIO block 0.
pub const PIO0_IRQ_1: IrqLine = IrqLine(8);

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IRQ{}", self.0)
    }
}

pub type IrqHandler = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct LineState {
    handler: Mutex<Option<IrqHandler>>,
    enabled: AtomicBool,
    level: AtomicBool,
    dispatched: AtomicU64,
}

impl fmt::Debug for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineState")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("level", &self.level.load(Ordering::Relaxed))
            .field("dispatched", &self.dispatched.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct InterruptController {
    lines: Vec<LineState>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            lines: (0..NUM_IRQS).map(|_| LineState::default()).collect(),
        }
    }

    fn line(&self, line: IrqLine) -> Result<&LineState, InterruptError> {
        self.lines
            .get(line.0 as usize)
            .ok_or(InterruptError::UnknownLine { line })
    }

    /// Installs `handler` as the only handler for `line`.
    ///
    /// Install the handler before enabling the line.
    pub fn set_exclusive_handler(
        &self,
        line: IrqLine,
        handler: impl FnMut() + Send + 'static,
    ) -> Result<(), InterruptError> {
        let state = self.line(line)?;
        let mut slot = state.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(InterruptError::HandlerAlreadyInstalled { line });
        }
        *slot = Some(Box::new(handler));
        Ok(())
    }

    pub fn has_handler(&self, line: IrqLine) -> bool {
        self.line(line)
            .map(|state| {
                state
                    .handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .unwrap_or(false)
    }

    pub fn set_enabled(&self, line: IrqLine, enabled: bool) -> Result<(), InterruptError> {
        self.line(line)?.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn is_enabled(&self, line: IrqLine) -> bool {
        self.line(line)
            .map(|state| state.enabled.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Drives the level of `line` as seen by the controller.
    pub fn set_level(&self, line: IrqLine, asserted: bool) -> Result<(), InterruptError> {
        self.line(line)?.level.store(asserted, Ordering::Release);
        Ok(())
    }

    /// `true` when `line` is high and enabled.
    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.line(line)
            .map(|state| {
                state.level.load(Ordering::Acquire) && state.enabled.load(Ordering::Acquire)
            })
            .unwrap_or(false)
    }

    pub fn dispatch_count(&self, line: IrqLine) -> u64 {
        self.line(line)
            .map(|state| state.dispatched.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Runs the handler of every pending line, lowest line first. Returns how many handlers
    /// ran.
    ///
    /// A pending line with no handler is a platform fault: servicing stops and the fault is
    /// returned.
    pub fn service(&self) -> Result<usize, InterruptError> {
        let mut serviced = 0;
        for (idx, state) in self.lines.iter().enumerate() {
            if !(state.level.load(Ordering::Acquire) && state.enabled.load(Ordering::Acquire)) {
                continue;
            }

            let line = IrqLine(idx as u8);
            let mut slot = state.handler.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(handler) = slot.as_mut() else {
                return Err(InterruptError::NoHandler { line });
            };
            // Counted before the handler runs so anything it publishes is already accounted for.
            state.dispatched.fetch_add(1, Ordering::Relaxed);
            handler();
            serviced += 1;
        }
        Ok(serviced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn disabled_or_low_lines_are_not_dispatched() {
        let nvic = InterruptController::new();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        nvic.set_exclusive_handler(PIO0_IRQ_0, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        nvic.set_level(PIO0_IRQ_0, true).unwrap();
        assert_eq!(nvic.service(), Ok(0));

        nvic.set_enabled(PIO0_IRQ_0, true).unwrap();
        nvic.set_level(PIO0_IRQ_0, false).unwrap();
        assert_eq!(nvic.service(), Ok(0));

        nvic.set_level(PIO0_IRQ_0, true).unwrap();
        assert_eq!(nvic.service(), Ok(1));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(nvic.dispatch_count(PIO0_IRQ_0), 1);
    }

    #[test]
    fn dispatch_is_counted_before_the_handler_runs() {
        let nvic = Arc::new(InterruptController::new());
        let seen = Arc::new(AtomicU64::new(0));
        {
            let nvic_in_handler = Arc::clone(&nvic);
            let seen = Arc::clone(&seen);
            nvic.set_exclusive_handler(PIO0_IRQ_0, move || {
                seen.store(nvic_in_handler.dispatch_count(PIO0_IRQ_0), Ordering::Relaxed);
            })
            .unwrap();
        }
        nvic.set_enabled(PIO0_IRQ_0, true).unwrap();
        nvic.set_level(PIO0_IRQ_0, true).unwrap();

        assert_eq!(nvic.service(), Ok(1));
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(nvic.service(), Ok(1));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn level_sensitive_lines_fire_until_lowered() {
        let nvic = InterruptController::new();
        nvic.set_exclusive_handler(PIO0_IRQ_1, || {}).unwrap();
        nvic.set_enabled(PIO0_IRQ_1, true).unwrap();
        nvic.set_level(PIO0_IRQ_1, true).unwrap();

        for _ in 0..3 {
            assert_eq!(nvic.service(), Ok(1));
        }
        nvic.set_level(PIO0_IRQ_1, false).unwrap();
        assert_eq!(nvic.service(), Ok(0));
        assert_eq!(nvic.dispatch_count(PIO0_IRQ_1), 3);
    }

    #[test]
    fn handler_slot_is_exclusive() {
        let nvic = InterruptController::new();
        nvic.set_exclusive_handler(PIO0_IRQ_0, || {}).unwrap();
        assert_eq!(
            nvic.set_exclusive_handler(PIO0_IRQ_0, || {}),
            Err(InterruptError::HandlerAlreadyInstalled { line: PIO0_IRQ_0 })
        );
        assert!(nvic.has_handler(PIO0_IRQ_0));
        assert!(!nvic.has_handler(PIO0_IRQ_1));
    }

    #[test]
    fn enabled_line_without_handler_faults() {
        let nvic = InterruptController::new();
        nvic.set_enabled(PIO0_IRQ_0, true).unwrap();
        nvic.set_level(PIO0_IRQ_0, true).unwrap();
        assert_eq!(
            nvic.service(),
            Err(InterruptError::NoHandler { line: PIO0_IRQ_0 })
        );
    }

    #[test]
    fn unknown_lines_are_rejected() {
        let nvic = InterruptController::new();
        let line = IrqLine(NUM_IRQS);
        assert_eq!(
            nvic.set_enabled(line, true),
            Err(InterruptError::UnknownLine { line })
        );
        assert!(!nvic.is_pending(line));
    }
}
