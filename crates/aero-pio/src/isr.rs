//! Interrupt handler multiplexing every lane's event onto one line.

use std::sync::Arc;

use tracing::debug;

use crate::error::InterruptError;
use crate::interrupts::{InterruptController, IrqLine};
use crate::pio::regs::IRQ;
use crate::pio::PioBlock;
use crate::status::EventStatusWord;

/// Acknowledges lane events raised on the block's IRQ line 0 and publishes them to the
/// [`EventStatusWord`].
#[derive(Debug, Clone)]
pub struct EventMultiplexer {
    pio: Arc<PioBlock>,
    status: Arc<EventStatusWord>,
}

impl EventMultiplexer {
    pub fn new(pio: Arc<PioBlock>, status: Arc<EventStatusWord>) -> Self {
        Self { pio, status }
    }

    /// Handler body. Reads the flag register once, publishes the snapshot, then writes the
    /// same snapshot back to acknowledge exactly what was published.
    ///
    /// Never blocks, allocates or logs. Returns the flags it acknowledged.
    pub fn service(&self) -> u32 {
        let flags = self.pio.mmio_read(IRQ);
        let spurious = flags == 0;
        self.status.record_invocation(spurious);
        if !spurious {
            self.status.publish(flags);
        }
        self.pio.mmio_write(IRQ, flags);
        flags
    }

    /// Binds the handler to `line` and enables the line.
    pub fn install(self, nvic: &InterruptController, line: IrqLine) -> Result<(), InterruptError> {
        nvic.set_exclusive_handler(line, move || {
            self.service();
        })?;
        nvic.set_enabled(line, true)?;
        debug!(%line, "event multiplexer installed");
        Ok(())
    }
}
