use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::config::LaneConfig;
use crate::error::PioError;
use crate::lane::LaneId;

use super::fifo::{TxFifo, TX_FIFO_DEPTH};
use super::program::{InstructionMemory, Program};
use super::regs::{IrqRegs, FSTAT};
use super::sm::{LaneMachine, LaneSnapshot, SmConfig, Stall};

/// An emulated PIO-style block: shared instruction memory, one execution context and TX FIFO
/// per lane, and the IRQ flag register all lanes raise events into.
///
/// Register accesses ([`PioBlock::mmio_read`]/[`PioBlock::mmio_write`]) are lock-free so they
/// are safe to perform from interrupt context. Lane state is only touched by
/// [`PioBlock::tick`] and the configuration calls made during bring-up.
#[derive(Debug)]
pub struct PioBlock {
    lanes: LaneConfig,
    regs: IrqRegs,
    imem: Mutex<InstructionMemory>,
    machines: Mutex<Vec<LaneMachine>>,
    fifos: Vec<TxFifo>,
    ticks: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PioBlock {
    pub fn new(lanes: LaneConfig) -> Self {
        Self {
            lanes,
            regs: IrqRegs::new(lanes.status_mask()),
            imem: Mutex::new(InstructionMemory::new()),
            machines: Mutex::new(lanes.lanes().map(LaneMachine::new).collect()),
            fifos: lanes.lanes().map(|_| TxFifo::default()).collect(),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn lane_config(&self) -> LaneConfig {
        self.lanes
    }

    pub fn lane(&self, index: u8) -> Result<LaneId, PioError> {
        self.lanes.lane(index).ok_or(PioError::LaneOutOfRange {
            lane: index,
            lane_count: self.lanes.lane_count(),
        })
    }

    fn check(&self, lane: LaneId) -> Result<usize, PioError> {
        self.lane(lane.index()).map(|lane| lane.index() as usize)
    }

    pub fn can_add_program(&self, program: &Program) -> bool {
        lock(&self.imem).find_offset(program).is_ok()
    }

    /// Loads `program` into instruction memory and returns its offset.
    pub fn add_program(&self, program: &Program) -> Result<u8, PioError> {
        lock(&self.imem).add_program(program)
    }

    /// Resets `lane`'s execution context to `initial_pc` with `config` and drains its FIFO.
    ///
    /// A running lane must be stopped first.
    pub fn sm_init(&self, lane: LaneId, initial_pc: u8, config: SmConfig) -> Result<(), PioError> {
        let idx = self.check(lane)?;
        if self.regs.lane_enabled(lane.index()) {
            return Err(PioError::LaneAlreadyRunning { lane: lane.index() });
        }
        lock(&self.machines)[idx].init(initial_pc, config);
        self.fifos[idx].clear();
        Ok(())
    }

    pub fn sm_set_enabled(&self, lane: LaneId, enabled: bool) -> Result<(), PioError> {
        self.check(lane)?;
        self.regs.set_lane_enabled(lane.index(), enabled);
        Ok(())
    }

    pub fn sm_is_enabled(&self, lane: LaneId) -> bool {
        self.lanes.contains(lane) && self.regs.lane_enabled(lane.index())
    }

    /// Routes `lane`'s event flag onto IRQ line 0 of the block.
    pub fn set_irq0_source_enabled(&self, lane: LaneId, enabled: bool) -> Result<(), PioError> {
        self.check(lane)?;
        self.regs.set_source_enabled(lane.index(), enabled);
        Ok(())
    }

    /// Pushes `value` into `lane`'s TX FIFO, failing if it is full.
    pub fn put(&self, lane: LaneId, value: u32) -> Result<(), PioError> {
        let idx = self.check(lane)?;
        if self.fifos[idx].try_push(value) {
            Ok(())
        } else {
            Err(PioError::TxFifoFull { lane: lane.index() })
        }
    }

    /// Pushes `value` into `lane`'s TX FIFO, waiting for space if it is full.
    pub fn put_blocking(&self, lane: LaneId, value: u32) -> Result<(), PioError> {
        let idx = self.check(lane)?;
        self.fifos[idx].push_blocking(value);
        Ok(())
    }

    pub fn tx_level(&self, lane: LaneId) -> Result<usize, PioError> {
        let idx = self.check(lane)?;
        Ok(self.fifos[idx].level())
    }

    pub fn mmio_read(&self, offset: u32) -> u32 {
        match offset {
            FSTAT => self.fstat(),
            _ => self.regs.read(offset),
        }
    }

    /// RP2040 `FSTAT` layout for the first eight lanes: RXEMPTY at bit 8, TXFULL at 16 and
    /// TXEMPTY at 24. Lanes have no RX FIFO so RXEMPTY always reads set.
    fn fstat(&self) -> u32 {
        self.fifos
            .iter()
            .take(8)
            .enumerate()
            .fold(0, |acc, (idx, fifo)| {
                let level = fifo.level();
                let mut bits = 1 << (8 + idx);
                if level >= TX_FIFO_DEPTH {
                    bits |= 1 << (16 + idx);
                }
                if level == 0 {
                    bits |= 1 << (24 + idx);
                }
                acc | bits
            })
    }

    pub fn mmio_write(&self, offset: u32, value: u32) {
        self.regs.write(offset, value);
    }

    /// Level of the block's IRQ line 0.
    pub fn irq0_asserted(&self) -> bool {
        self.regs.irq0_status() != 0
    }

    /// Advances every enabled lane by one clock, in lane order.
    ///
    /// A lane that fetches an undecodable word is parked; the error is logged and the remaining
    /// lanes keep running.
    pub fn tick(&self) {
        let imem = lock(&self.imem);
        let mut machines = lock(&self.machines);
        let width = self.lanes.status_bit_width();

        for (idx, machine) in machines.iter_mut().enumerate() {
            if !self.regs.lane_enabled(idx as u8) {
                continue;
            }
            if let Err(err) = machine.step(|pc| imem.word(pc), &self.fifos[idx], &self.regs, width)
            {
                error!(lane = idx, %err, "lane faulted");
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// `true` once `lane` has drained its TX FIFO and is back waiting on `pull`, so every
    /// event it was signalled for has been raised and acknowledged.
    pub fn lane_is_idle(&self, lane: LaneId) -> Result<bool, PioError> {
        let idx = self.check(lane)?;
        let waiting = lock(&self.machines)[idx].snapshot().stall == Some(Stall::Pull);
        Ok(waiting && self.fifos[idx].level() == 0)
    }

    pub fn lane_snapshot(&self, lane: LaneId) -> Result<LaneSnapshot, PioError> {
        let idx = self.check(lane)?;
        Ok(lock(&self.machines)[idx].snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pio::program::lane_event_program;
    use crate::pio::regs::{CTRL, IRQ, IRQ0_INTS};

    fn started_block() -> (PioBlock, u8) {
        let pio = PioBlock::new(LaneConfig::default());
        let program = lane_event_program();
        let offset = pio.add_program(&program).unwrap();
        for lane in pio.lane_config().lanes() {
            pio.set_irq0_source_enabled(lane, true).unwrap();
            pio.sm_init(lane, offset, SmConfig::for_program(&program, offset, 1))
                .unwrap();
            pio.sm_set_enabled(lane, true).unwrap();
        }
        (pio, offset)
    }

    #[test]
    fn disabled_lanes_do_not_run() {
        let pio = PioBlock::new(LaneConfig::default());
        let lane = pio.lane(1).unwrap();
        pio.put(lane, 1).unwrap();
        for _ in 0..8 {
            pio.tick();
        }
        assert_eq!(pio.tx_level(lane), Ok(1));
        assert_eq!(pio.lane_snapshot(lane).unwrap().retired, 0);
        assert_eq!(pio.ticks(), 8);
    }

    #[test]
    fn signalled_lane_asserts_irq0() {
        let (pio, _) = started_block();
        let lane = pio.lane(3).unwrap();
        assert_eq!(pio.mmio_read(CTRL), 0xF);

        pio.put(lane, 1).unwrap();
        for _ in 0..4 {
            pio.tick();
        }
        assert!(pio.irq0_asserted());
        assert_eq!(pio.mmio_read(IRQ), 0b1000);
        assert_eq!(pio.mmio_read(IRQ0_INTS), 0b1000);

        pio.mmio_write(IRQ, 0b1000);
        assert!(!pio.irq0_asserted());
        pio.tick();
        assert_eq!(pio.lane_snapshot(lane).unwrap().stall, None);
    }

    #[test]
    fn unrouted_lane_raises_flag_without_asserting_the_line() {
        let (pio, _) = started_block();
        let lane = pio.lane(0).unwrap();
        pio.set_irq0_source_enabled(lane, false).unwrap();

        pio.put(lane, 1).unwrap();
        for _ in 0..4 {
            pio.tick();
        }
        assert_eq!(pio.mmio_read(IRQ), 0b0001);
        assert!(!pio.irq0_asserted());
    }

    #[test]
    fn put_reports_full_fifo_and_bad_lane() {
        let pio = PioBlock::new(LaneConfig::default());
        let lane = pio.lane(0).unwrap();
        for _ in 0..4 {
            pio.put(lane, 1).unwrap();
        }
        assert_eq!(pio.put(lane, 1), Err(PioError::TxFifoFull { lane: 0 }));
        assert_eq!(
            pio.lane(4),
            Err(PioError::LaneOutOfRange {
                lane: 4,
                lane_count: 4
            })
        );
    }

    #[test]
    fn fstat_tracks_fifo_levels() {
        let pio = PioBlock::new(LaneConfig::default());
        assert_eq!(pio.mmio_read(FSTAT), 0x0F00_0F00);

        let lane = pio.lane(1).unwrap();
        pio.put(lane, 1).unwrap();
        assert_eq!(pio.mmio_read(FSTAT), 0x0D00_0F00);
        for _ in 1..TX_FIFO_DEPTH {
            pio.put(lane, 1).unwrap();
        }
        assert_eq!(pio.mmio_read(FSTAT), 0x0D02_0F00);
    }

    #[test]
    fn lane_is_idle_only_after_its_event_is_acknowledged() {
        let (pio, _) = started_block();
        let lane = pio.lane(0).unwrap();
        pio.tick();
        assert_eq!(pio.lane_is_idle(lane), Ok(true));

        pio.put(lane, 1).unwrap();
        assert_eq!(pio.lane_is_idle(lane), Ok(false));
        for _ in 0..6 {
            pio.tick();
        }
        assert_eq!(pio.lane_is_idle(lane), Ok(false), "held in irq wait");

        pio.mmio_write(IRQ, 0b0001);
        pio.tick();
        pio.tick();
        assert_eq!(pio.lane_is_idle(lane), Ok(true));
    }

    #[test]
    fn sm_init_refuses_a_running_lane() {
        let (pio, offset) = started_block();
        let lane = pio.lane(2).unwrap();
        assert_eq!(
            pio.sm_init(lane, offset, SmConfig::default()),
            Err(PioError::LaneAlreadyRunning { lane: 2 })
        );

        pio.sm_set_enabled(lane, false).unwrap();
        pio.sm_init(lane, offset, SmConfig::default()).unwrap();
        assert_eq!(pio.lane_snapshot(lane).unwrap().pc, offset);
    }

    #[test]
    fn all_lanes_share_one_program_image() {
        let (pio, offset) = started_block();
        for _ in 0..3 {
            pio.tick();
        }
        for lane in pio.lane_config().lanes() {
            let snap = pio.lane_snapshot(lane).unwrap();
            assert_eq!(snap.pc, offset);
            assert_eq!(snap.stall, Some(Stall::Pull));
        }
    }
}
