//! Register map of the lane block.
//!
//! Offsets follow the RP2040 PIO layout. `INTR`/`IRQ0_*` are simplified so that bit `i` is
//! IRQ flag `i` (the lane event bits), which lets the map scale to any status word width.

use std::sync::atomic::{AtomicU32, Ordering};

pub const PIO0_BASE: u32 = 0x5020_0000;

/// Lane enable bits.
pub const CTRL: u32 = 0x000;
/// FIFO status (read-only). Served by the block, which owns the FIFOs.
pub const FSTAT: u32 = 0x004;
/// IRQ flags. Write 1 to clear.
pub const IRQ: u32 = 0x030;
/// Write 1 to set IRQ flags.
pub const IRQ_FORCE: u32 = 0x034;
/// Raw interrupt status (read-only).
pub const INTR: u32 = 0x128;
/// Which flags drive IRQ line 0 of the block.
pub const IRQ0_INTE: u32 = 0x12C;
/// Force bits for IRQ line 0.
pub const IRQ0_INTF: u32 = 0x130;
/// Masked status of IRQ line 0 (read-only).
pub const IRQ0_INTS: u32 = 0x134;

/// Interrupt-facing registers. Every access is a single atomic so the handler never blocks.
#[derive(Debug)]
pub(crate) struct IrqRegs {
    mask: u32,
    ctrl: AtomicU32,
    flags: AtomicU32,
    inte: AtomicU32,
    intf: AtomicU32,
}

impl IrqRegs {
    pub fn new(mask: u32) -> Self {
        Self {
            mask,
            ctrl: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            inte: AtomicU32::new(0),
            intf: AtomicU32::new(0),
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn flag_is_set(&self, flag: u8) -> bool {
        self.flags() & bit(flag) != 0
    }

    pub fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(bit(flag) & self.mask, Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: u8) {
        self.flags.fetch_and(!bit(flag), Ordering::AcqRel);
    }

    pub fn lane_enabled(&self, lane: u8) -> bool {
        self.ctrl.load(Ordering::Acquire) & bit(lane) != 0
    }

    pub fn set_lane_enabled(&self, lane: u8, enabled: bool) {
        if enabled {
            self.ctrl.fetch_or(bit(lane), Ordering::AcqRel);
        } else {
            self.ctrl.fetch_and(!bit(lane), Ordering::AcqRel);
        }
    }

    pub fn set_source_enabled(&self, flag: u8, enabled: bool) {
        if enabled {
            self.inte.fetch_or(bit(flag) & self.mask, Ordering::AcqRel);
        } else {
            self.inte.fetch_and(!bit(flag), Ordering::AcqRel);
        }
    }

    /// Masked status of IRQ line 0.
    pub fn irq0_status(&self) -> u32 {
        let raw = self.flags() & self.inte.load(Ordering::Acquire);
        (raw | self.intf.load(Ordering::Acquire)) & self.mask
    }

    pub fn read(&self, offset: u32) -> u32 {
        match offset {
            CTRL => self.ctrl.load(Ordering::Acquire),
            IRQ | INTR => self.flags(),
            IRQ0_INTE => self.inte.load(Ordering::Acquire),
            IRQ0_INTF => self.intf.load(Ordering::Acquire),
            IRQ0_INTS => self.irq0_status(),
            // IRQ_FORCE is write-only; unmapped offsets read as zero.
            _ => 0,
        }
    }

    pub fn write(&self, offset: u32, value: u32) {
        let value = value & self.mask;
        match offset {
            CTRL => self.ctrl.store(value, Ordering::Release),
            IRQ => {
                self.flags.fetch_and(!value, Ordering::AcqRel);
            }
            IRQ_FORCE => {
                self.flags.fetch_or(value, Ordering::AcqRel);
            }
            IRQ0_INTE => self.inte.store(value, Ordering::Release),
            IRQ0_INTF => self.intf.store(value, Ordering::Release),
            _ => {}
        }
    }
}

fn bit(index: u8) -> u32 {
    1u32.checked_shl(index as u32).unwrap_or(0)
}
