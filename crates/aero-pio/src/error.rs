use std::time::Duration;

use thiserror::Error;

use crate::interrupts::IrqLine;

/// Errors raised while validating lane or run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("lane count must be at least 1")]
    NoLanes,

    #[error("status word width {width} is outside 1..=32")]
    InvalidStatusWidth { width: u8 },

    #[error("{lane_count} lanes do not fit in a {width}-bit status word")]
    LanesExceedStatusWidth { lane_count: u8, width: u8 },

    #[error("unknown status policy {0:?} (expected `overwrite` or `accumulate`)")]
    UnknownPolicy(String),

    #[error("unknown wait mode {0:?} (expected `spin` or `park`)")]
    UnknownWaitMode(String),

    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Errors raised by the emulated lane block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PioError {
    #[error("lane {lane} is out of range (block has {lane_count} lanes)")]
    LaneOutOfRange { lane: u8, lane_count: u8 },

    #[error("program of {len} instructions does not fit in {capacity}-word instruction memory")]
    ProgramTooLong { len: usize, capacity: usize },

    #[error("no free space for a {len}-instruction program")]
    NoProgramSpace { len: usize },

    #[error("program wrap bounds {wrap_target}..={wrap} are outside a {len}-instruction program")]
    InvalidWrap { wrap_target: u8, wrap: u8, len: usize },

    #[error("unsupported instruction encoding {word:#06x}")]
    UnsupportedInstruction { word: u16 },

    #[error("invalid instruction: {0}")]
    InvalidInstruction(&'static str),

    #[error("tx fifo of lane {lane} is full")]
    TxFifoFull { lane: u8 },

    #[error("lane {lane} is already running")]
    LaneAlreadyRunning { lane: u8 },
}

/// Errors raised by the emulated interrupt controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterruptError {
    #[error("{line} is not a valid interrupt line")]
    UnknownLine { line: IrqLine },

    #[error("{line} already has an exclusive handler")]
    HandlerAlreadyInstalled { line: IrqLine },

    /// The line fired while enabled with nothing installed. On silicon this traps like a
    /// breakpoint; the emulated clock halts.
    #[error("{line} fired with no handler installed")]
    NoHandler { line: IrqLine },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Pio(#[from] PioError),

    #[error("lane {lane} raised no event within {waited:?}")]
    EventTimeout { lane: u8, waited: Duration },
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Pio(#[from] PioError),

    #[error(transparent)]
    Interrupt(#[from] InterruptError),

    #[error("failed to spawn emulated clock thread")]
    ClockSpawn(#[source] std::io::Error),

    #[error("emulated clock thread panicked")]
    ClockPanicked,
}
