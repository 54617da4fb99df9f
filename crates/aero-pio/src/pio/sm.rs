use crate::error::PioError;
use crate::lane::LaneId;

use super::fifo::TxFifo;
use super::instr::{Instruction, JmpCondition, MovDest, MovSrc, Op, OutDest, SetDest};
use super::program::{Program, INSTRUCTION_MEMORY_WORDS};
use super::regs::IrqRegs;

/// Execution-context configuration applied by `sm_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmConfig {
    /// Absolute address execution wraps back to.
    pub wrap_target: u8,
    /// Absolute address after which execution wraps.
    pub wrap: u8,
    /// Shift the OSR right (LSB first) on `out`.
    pub out_shift_right: bool,
    /// Number of OSR bits that make up one transfer. `pull ifempty` and `!osre` compare the
    /// shift counter against this.
    pub pull_threshold: u8,
}

impl Default for SmConfig {
    fn default() -> Self {
        Self {
            wrap_target: 0,
            wrap: (INSTRUCTION_MEMORY_WORDS - 1) as u8,
            out_shift_right: true,
            pull_threshold: 32,
        }
    }
}

impl SmConfig {
    /// Configuration for `program` loaded at `offset`, transferring `signal_bits` per `out`.
    pub fn for_program(program: &Program, offset: u8, signal_bits: u8) -> Self {
        Self {
            wrap_target: offset + program.wrap_target(),
            wrap: offset + program.wrap(),
            out_shift_right: true,
            pull_threshold: signal_bits.clamp(1, 32),
        }
    }
}

/// Why a lane is not retiring instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// `pull block` on an empty TX FIFO.
    Pull,
    /// `irq wait` holding until `flag` is cleared.
    IrqWait { flag: u8 },
    /// An instruction word failed to decode; the lane is stopped until re-initialised.
    Fault,
}

/// Point-in-time view of a lane's execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSnapshot {
    pub lane: LaneId,
    pub pc: u8,
    pub x: u32,
    pub y: u32,
    pub osr: u32,
    pub stall: Option<Stall>,
    pub retired: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct LaneMachine {
    lane: LaneId,
    config: SmConfig,
    pc: u8,
    x: u32,
    y: u32,
    osr: u32,
    osr_shift_count: u8,
    delay: u8,
    /// Delay owed by a stalled `irq wait`, applied once it retires.
    pending_delay: u8,
    stall: Option<Stall>,
    retired: u64,
}

impl LaneMachine {
    pub fn new(lane: LaneId) -> Self {
        Self {
            lane,
            config: SmConfig::default(),
            pc: 0,
            x: 0,
            y: 0,
            osr: 0,
            // An empty OSR counts as fully shifted out.
            osr_shift_count: 32,
            delay: 0,
            pending_delay: 0,
            stall: None,
            retired: 0,
        }
    }

    pub fn init(&mut self, initial_pc: u8, config: SmConfig) {
        *self = Self::new(self.lane);
        self.config = config;
        self.pc = initial_pc % INSTRUCTION_MEMORY_WORDS as u8;
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            lane: self.lane,
            pc: self.pc,
            x: self.x,
            y: self.y,
            osr: self.osr,
            stall: self.stall,
            retired: self.retired,
        }
    }

    /// Advances the lane by one clock.
    pub fn step(
        &mut self,
        fetch: impl FnOnce(u8) -> u16,
        fifo: &TxFifo,
        irq: &IrqRegs,
        status_bit_width: u8,
    ) -> Result<(), PioError> {
        if self.delay > 0 {
            self.delay -= 1;
            return Ok(());
        }

        match self.stall {
            Some(Stall::Fault) => return Ok(()),
            Some(Stall::IrqWait { flag }) => {
                if irq.flag_is_set(flag) {
                    return Ok(());
                }
                self.stall = None;
                self.delay = self.pending_delay;
                self.retire();
                return Ok(());
            }
            Some(Stall::Pull) | None => {}
        }

        let instr = match Instruction::decode(fetch(self.pc)) {
            Ok(instr) => instr,
            Err(err) => {
                self.stall = Some(Stall::Fault);
                return Err(err);
            }
        };
        self.execute(instr, fifo, irq, status_bit_width);
        Ok(())
    }

    fn execute(&mut self, instr: Instruction, fifo: &TxFifo, irq: &IrqRegs, status_bit_width: u8) {
        match instr.op {
            Op::Jmp { cond, addr } => {
                if self.condition_holds(cond) {
                    self.jump(addr);
                } else {
                    self.retire();
                }
            }
            Op::Out { dest, bit_count } => {
                let data = self.shift_out(bit_count);
                match dest {
                    OutDest::X => self.x = data,
                    OutDest::Y => self.y = data,
                    OutDest::Null => {}
                    OutDest::Pc => {
                        self.jump(data as u8);
                        self.delay = instr.delay;
                        return;
                    }
                }
                self.retire();
            }
            Op::Pull { if_empty, block } => {
                if if_empty && self.osr_shift_count < self.config.pull_threshold {
                    self.retire();
                } else if let Some(value) = fifo.pop() {
                    self.load_osr(value);
                    self.stall = None;
                    self.retire();
                } else if block {
                    // Re-executes next clock; delay only applies once the pull completes.
                    self.stall = Some(Stall::Pull);
                    return;
                } else {
                    // Non-blocking pull from an empty FIFO copies X.
                    self.load_osr(self.x);
                    self.retire();
                }
            }
            Op::Mov { dest, op, src } => {
                let value = op.apply(match src {
                    MovSrc::X => self.x,
                    MovSrc::Y => self.y,
                    MovSrc::Null => 0,
                    MovSrc::Osr => self.osr,
                });
                match dest {
                    MovDest::X => self.x = value,
                    MovDest::Y => self.y = value,
                    MovDest::Osr => self.load_osr(value),
                    MovDest::Pc => {
                        self.jump(value as u8);
                        self.delay = instr.delay;
                        return;
                    }
                }
                self.retire();
            }
            Op::Irq {
                clear,
                wait,
                index,
                rel,
            } => {
                let flag = self.resolve_flag(index, rel, status_bit_width);
                if clear {
                    irq.clear_flag(flag);
                } else {
                    irq.set_flag(flag);
                    if wait {
                        self.stall = Some(Stall::IrqWait { flag });
                        self.pending_delay = instr.delay;
                        return;
                    }
                }
                self.retire();
            }
            Op::Set { dest, data } => {
                match dest {
                    SetDest::X => self.x = data as u32,
                    SetDest::Y => self.y = data as u32,
                }
                self.retire();
            }
        }
        self.delay = instr.delay;
    }

    /// `rel` adds the lane index to the flag number, wrapping at the status word width, so lane
    /// `i` running `irq 0 rel` raises flag `i`.
    fn resolve_flag(&self, index: u8, rel: bool, status_bit_width: u8) -> u8 {
        if rel {
            let width = status_bit_width.max(1) as u16;
            ((index as u16 + self.lane.index() as u16) % width) as u8
        } else {
            index
        }
    }

    fn condition_holds(&mut self, cond: JmpCondition) -> bool {
        match cond {
            JmpCondition::Always => true,
            JmpCondition::XZero => self.x == 0,
            JmpCondition::XPostDecrement => {
                let taken = self.x != 0;
                self.x = self.x.wrapping_sub(1);
                taken
            }
            JmpCondition::YZero => self.y == 0,
            JmpCondition::YPostDecrement => {
                let taken = self.y != 0;
                self.y = self.y.wrapping_sub(1);
                taken
            }
            JmpCondition::XNotEqualY => self.x != self.y,
            JmpCondition::OsrNotEmpty => self.osr_shift_count < self.config.pull_threshold,
        }
    }

    fn shift_out(&mut self, bit_count: u8) -> u32 {
        let bits = bit_count.clamp(1, 32) as u32;
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        let data = if self.config.out_shift_right {
            let data = self.osr & mask;
            self.osr = self.osr.checked_shr(bits).unwrap_or(0);
            data
        } else {
            let data = self.osr.checked_shr(32 - bits).unwrap_or(0) & mask;
            self.osr = self.osr.checked_shl(bits).unwrap_or(0);
            data
        };
        self.osr_shift_count = (self.osr_shift_count as u32 + bits).min(32) as u8;
        data
    }

    fn load_osr(&mut self, value: u32) {
        self.osr = value;
        self.osr_shift_count = 0;
    }

    fn jump(&mut self, addr: u8) {
        self.pc = addr % INSTRUCTION_MEMORY_WORDS as u8;
        self.retired += 1;
    }

    fn retire(&mut self) {
        self.pc = if self.pc == self.config.wrap {
            self.config.wrap_target
        } else {
            (self.pc + 1) % INSTRUCTION_MEMORY_WORDS as u8
        };
        self.retired += 1;
    }
}
