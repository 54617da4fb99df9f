//! Lane event notification over a single shared interrupt line.
//!
//! A block of lanes (PIO-style state machines) each run a tiny program that waits for a signal
//! word, does a unit of work and raises a lane-relative IRQ flag. All flags share one interrupt
//! line; the [`EventMultiplexer`] snapshots and acknowledges them into an [`EventStatusWord`],
//! and the [`Supervisor`] drives the lanes round-robin, waiting on that word.
//!
//! The hardware is emulated: [`Board`] bundles a [`PioBlock`] and an [`InterruptController`],
//! clocked either by the caller (lockstep) or by its own thread ([`FreeRunningBoard`]).

#![forbid(unsafe_code)]

pub mod board;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod interrupts;
pub mod isr;
pub mod lane;
pub mod pio;
pub mod status;
pub mod supervisor;

pub use board::{Board, FreeRunningBoard, LockstepWait};
pub use bootstrap::bootstrap_lanes;
pub use config::{LaneConfig, RunConfig, StatusPolicy, WaitMode};
pub use error::{BoardError, ConfigError, InterruptError, PioError, SupervisorError};
pub use interrupts::{InterruptController, IrqLine, PIO0_IRQ_0, PIO0_IRQ_1};
pub use isr::EventMultiplexer;
pub use lane::LaneId;
pub use pio::PioBlock;
pub use status::{EventStatusWord, IsrStatsSnapshot};
pub use supervisor::{
    ConsoleSink, Delay, DiagnosticSink, EventWait, NoDelay, ParkWait, SpinWait, Supervisor,
    ThreadSleep, TracingSink, TriggerReport, WaitStrategy,
};
