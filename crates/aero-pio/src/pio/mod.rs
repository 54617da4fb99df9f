//! Emulated PIO-style lane block.

mod block;
mod fifo;
pub mod instr;
mod program;
pub mod regs;
mod sm;

pub use block::PioBlock;
pub use fifo::TX_FIFO_DEPTH;
pub use instr::Instruction;
pub use program::{lane_event_program, InstructionMemory, Program, INSTRUCTION_MEMORY_WORDS};
pub use sm::{LaneSnapshot, SmConfig, Stall};
