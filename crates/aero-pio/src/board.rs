//! Wires the lane block, interrupt controller and event status word into one platform.
//!
//! A [`Board`] is clocked by its caller (lockstep); [`Board::start`] hands it to a clock thread
//! that keeps ticking until the returned [`FreeRunningBoard`] is halted or dropped. Either way
//! the interrupt handler runs on whichever thread drives [`Board::tick`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::bootstrap::bootstrap_lanes;
use crate::config::{LaneConfig, RunConfig, StatusPolicy};
use crate::error::{BoardError, InterruptError};
use crate::interrupts::{InterruptController, PIO0_IRQ_0};
use crate::isr::EventMultiplexer;
use crate::pio::PioBlock;
use crate::status::EventStatusWord;
use crate::supervisor::{
    DiagnosticSink, EventWait, NoDelay, Supervisor, ThreadSleep, WaitStrategy,
};

#[derive(Debug, Clone)]
pub struct Board {
    pio: Arc<PioBlock>,
    nvic: Arc<InterruptController>,
    status: Arc<EventStatusWord>,
}

impl Board {
    pub fn new(lanes: LaneConfig, policy: StatusPolicy) -> Self {
        Self {
            pio: Arc::new(PioBlock::new(lanes)),
            nvic: Arc::new(InterruptController::new()),
            status: Arc::new(EventStatusWord::new(policy)),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.lanes, config.policy)
    }

    pub fn pio(&self) -> &Arc<PioBlock> {
        &self.pio
    }

    pub fn nvic(&self) -> &Arc<InterruptController> {
        &self.nvic
    }

    pub fn status(&self) -> &Arc<EventStatusWord> {
        &self.status
    }

    /// Starts every lane and binds the event multiplexer to `PIO0_IRQ_0`. Returns the program
    /// offset.
    pub fn bring_up(&self) -> Result<u8, BoardError> {
        let offset = bootstrap_lanes(&self.pio)?;
        EventMultiplexer::new(Arc::clone(&self.pio), Arc::clone(&self.status))
            .install(&self.nvic, PIO0_IRQ_0)?;
        debug!(
            offset,
            lanes = self.pio.lane_config().lane_count(),
            policy = %self.status.policy(),
            "board up"
        );
        Ok(offset)
    }

    fn sync_irq_level(&self) -> Result<(), InterruptError> {
        self.nvic.set_level(PIO0_IRQ_0, self.pio.irq0_asserted())
    }

    /// One clock: advance the lanes, then service the interrupt line if it went high.
    pub fn tick(&self) -> Result<(), InterruptError> {
        self.pio.tick();
        self.sync_irq_level()?;
        if self.nvic.is_pending(PIO0_IRQ_0) {
            self.nvic.service()?;
            self.sync_irq_level()?;
        }
        Ok(())
    }

    pub fn run_ticks(&self, ticks: u64) -> Result<(), InterruptError> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Wait strategy that clocks this board until the awaited bit is published.
    pub fn lockstep_wait(&self, max_ticks: u64) -> LockstepWait {
        LockstepWait {
            board: self.clone(),
            max_ticks,
            fault: None,
        }
    }

    /// Supervisor clocking this board itself, with no inter-cycle delay.
    pub fn lockstep_supervisor<S: DiagnosticSink>(
        &self,
        max_ticks: u64,
        sink: S,
    ) -> Supervisor<LockstepWait, S, NoDelay> {
        Supervisor::new(
            Arc::clone(&self.pio),
            Arc::clone(&self.status),
            self.lockstep_wait(max_ticks),
            sink,
            NoDelay,
        )
        .with_period(Duration::ZERO)
    }

    /// Hands the board to a clock thread that ticks as fast as it can.
    pub fn start(self) -> Result<FreeRunningBoard, BoardError> {
        self.start_with_interval(Duration::ZERO)
    }

    /// Hands the board to a clock thread that sleeps `interval` between ticks.
    pub fn start_with_interval(self, interval: Duration) -> Result<FreeRunningBoard, BoardError> {
        let stop = Arc::new(AtomicBool::new(false));
        let board = self.clone();
        let stop_flag = Arc::clone(&stop);

        let clock = thread::Builder::new()
            .name("aero-pio-clock".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    if let Err(err) = board.tick() {
                        error!(%err, "platform fault, clock halted");
                        return Err(err);
                    }
                    if interval.is_zero() {
                        thread::yield_now();
                    } else {
                        thread::sleep(interval);
                    }
                }
                Ok(())
            })
            .map_err(BoardError::ClockSpawn)?;

        Ok(FreeRunningBoard {
            board: self,
            stop,
            clock: Some(clock),
        })
    }
}

/// [`EventWait`] for a lockstep [`Board`]: ticks until the bit shows up or `max_ticks` pass.
#[derive(Debug)]
pub struct LockstepWait {
    board: Board,
    max_ticks: u64,
    fault: Option<InterruptError>,
}

impl LockstepWait {
    pub fn set_max_ticks(&mut self, max_ticks: u64) {
        self.max_ticks = max_ticks;
    }

    /// Platform fault that ended the last wait, if any.
    pub fn fault(&self) -> Option<&InterruptError> {
        self.fault.as_ref()
    }
}

impl EventWait for LockstepWait {
    fn wait_for(&mut self, status: &EventStatusWord, mask: u32) -> Option<u32> {
        for _ in 0..=self.max_ticks {
            let word = status.load();
            if word & mask != 0 {
                return Some(word);
            }
            if let Err(err) = self.board.tick() {
                error!(%err, "platform fault during lockstep wait");
                self.fault = Some(err);
                return None;
            }
        }
        None
    }
}

/// A [`Board`] ticking on its own thread. Dropping it stops the clock.
#[derive(Debug)]
pub struct FreeRunningBoard {
    board: Board,
    stop: Arc<AtomicBool>,
    clock: Option<JoinHandle<Result<(), InterruptError>>>,
}

impl FreeRunningBoard {
    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn is_running(&self) -> bool {
        self.clock
            .as_ref()
            .is_some_and(|clock| !clock.is_finished())
    }

    /// Supervisor for this board using the wait strategy, timeout and period of `config`.
    pub fn supervisor<S: DiagnosticSink>(
        &self,
        config: &RunConfig,
        sink: S,
    ) -> Supervisor<WaitStrategy, S, ThreadSleep> {
        Supervisor::from_config(
            Arc::clone(&self.board.pio),
            Arc::clone(&self.board.status),
            config,
            sink,
        )
    }

    /// Stops the clock thread and reports how it ended.
    pub fn halt(mut self) -> Result<(), BoardError> {
        self.stop_clock()
    }

    fn stop_clock(&mut self) -> Result<(), BoardError> {
        self.stop.store(true, Ordering::Release);
        let Some(clock) = self.clock.take() else {
            return Ok(());
        };
        match clock.join() {
            Ok(result) => result.map_err(BoardError::from),
            Err(_) => Err(BoardError::ClockPanicked),
        }
    }
}

impl Drop for FreeRunningBoard {
    fn drop(&mut self) {
        if let Err(err) = self.stop_clock() {
            error!(%err, "clock thread ended abnormally");
        }
    }
}
