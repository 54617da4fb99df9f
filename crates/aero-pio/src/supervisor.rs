//! The trigger/acknowledge loop that drives every lane in turn.
//!
//! One pass of [`Supervisor::trigger`]:
//!
//! 1. push the signal value into the lane's TX FIFO,
//! 2. wait for the lane's bit to show up in the [`EventStatusWord`],
//! 3. report expected versus observed and run the per-lane handlers,
//! 4. consume the observed flags.
//!
//! [`Supervisor::step`] adds the inter-cycle delay and advances to the next lane.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{RunConfig, WaitMode};
use crate::error::SupervisorError;
use crate::lane::{lanes_in, LaneId};
use crate::pio::PioBlock;
use crate::status::EventStatusWord;

/// Value pushed into a lane's FIFO to release it.
pub const SIGNAL_VALUE: u32 = 1;

/// Outcome of triggering one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReport {
    pub lane: LaneId,
    /// `1 << lane`.
    pub expected: u32,
    /// Event status word as seen once the lane's bit arrived.
    pub observed: u32,
}

impl TriggerReport {
    pub fn matches(&self) -> bool {
        self.observed == self.expected
    }

    /// Bits observed for lanes other than the one triggered.
    pub fn cross_talk(&self) -> u32 {
        self.observed & !self.expected
    }
}

/// Receives the supervisor's per-trigger diagnostics.
pub trait DiagnosticSink {
    fn triggering(&mut self, lane: LaneId);
    fn report(&mut self, report: &TriggerReport);
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for Box<T> {
    fn triggering(&mut self, lane: LaneId) {
        (**self).triggering(lane);
    }

    fn report(&mut self, report: &TriggerReport) {
        (**self).report(report);
    }
}

/// Emits diagnostics as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn triggering(&mut self, lane: LaneId) {
        info!(%lane, "triggering lane event");
    }

    fn report(&mut self, report: &TriggerReport) {
        info!(
            lane = %report.lane,
            expected = format_args!("{:#010x}", report.expected),
            observed = format_args!("{:#010x}", report.observed),
            "lane event observed"
        );
    }
}

/// Prints diagnostics as plain lines.
#[derive(Debug)]
pub struct ConsoleSink<W> {
    out: W,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_lines(&mut self, lines: std::fmt::Arguments<'_>) {
        if let Err(err) = self.out.write_fmt(lines).and_then(|()| self.out.flush()) {
            warn!(%err, "failed to write diagnostics");
        }
    }
}

impl<W: Write> DiagnosticSink for ConsoleSink<W> {
    fn triggering(&mut self, lane: LaneId) {
        self.write_lines(format_args!(
            "Triggering ISR from lane {}\n",
            lane.index()
        ));
    }

    fn report(&mut self, report: &TriggerReport) {
        self.write_lines(format_args!(
            "Expected IRQ flags: 0x{:08X}\nActual IRQ Flags: 0x{:08X}\n",
            report.expected, report.observed
        ));
    }
}

/// Inter-cycle timing service.
pub trait Delay {
    fn delay(&mut self, period: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Delay for ThreadSleep {
    fn delay(&mut self, period: Duration) {
        if !period.is_zero() {
            thread::sleep(period);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn delay(&mut self, _period: Duration) {}
}

/// Blocks the supervisor until the status word has a bit of `mask` set.
pub trait EventWait {
    /// Returns the word once `word & mask != 0`, or `None` if the wait gave up.
    fn wait_for(&mut self, status: &EventStatusWord, mask: u32) -> Option<u32>;
}

fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Busy-observes the word.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait {
    pub timeout: Option<Duration>,
}

impl EventWait for SpinWait {
    fn wait_for(&mut self, status: &EventStatusWord, mask: u32) -> Option<u32> {
        const SPINS_PER_YIELD: u32 = 64;

        let deadline = deadline(self.timeout);
        let mut spins = 0u32;
        loop {
            let word = status.load();
            if word & mask != 0 {
                return Some(word);
            }
            if expired(deadline) {
                return None;
            }
            spins = spins.wrapping_add(1);
            if spins % SPINS_PER_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Parks the calling thread; the interrupt handler unparks it after every publish.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParkWait {
    pub timeout: Option<Duration>,
}

impl ParkWait {
    /// Upper bound on one park when another thread holds the waiter registration.
    const UNREGISTERED_SLICE: Duration = Duration::from_millis(1);
}

impl EventWait for ParkWait {
    fn wait_for(&mut self, status: &EventStatusWord, mask: u32) -> Option<u32> {
        // Registration precedes the first load, so a publish in between leaves an unpark token.
        let registered = status.register_waiter();
        let deadline = deadline(self.timeout);
        loop {
            let word = status.load();
            if word & mask != 0 {
                return Some(word);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let slice = deadline - now;
                    if registered {
                        thread::park_timeout(slice);
                    } else {
                        thread::park_timeout(slice.min(Self::UNREGISTERED_SLICE));
                    }
                }
                None if registered => thread::park(),
                None => thread::park_timeout(Self::UNREGISTERED_SLICE),
            }
        }
    }
}

/// Runtime-selected wait strategy.
#[derive(Debug, Clone, Copy)]
pub enum WaitStrategy {
    Spin(SpinWait),
    Park(ParkWait),
}

impl WaitStrategy {
    pub fn new(mode: WaitMode, timeout: Option<Duration>) -> Self {
        match mode {
            WaitMode::Spin => Self::Spin(SpinWait { timeout }),
            WaitMode::Park => Self::Park(ParkWait { timeout }),
        }
    }
}

impl EventWait for WaitStrategy {
    fn wait_for(&mut self, status: &EventStatusWord, mask: u32) -> Option<u32> {
        match self {
            Self::Spin(wait) => wait.wait_for(status, mask),
            Self::Park(wait) => wait.wait_for(status, mask),
        }
    }
}

pub type LaneEventHandler = Box<dyn FnMut(LaneId) + Send>;

pub struct Supervisor<W, S, D> {
    pio: Arc<PioBlock>,
    status: Arc<EventStatusWord>,
    wait: W,
    sink: S,
    delay: D,
    period: Duration,
    next: u8,
    handlers: Vec<Vec<LaneEventHandler>>,
    masked_reported: u64,
    /// Lanes whose last trigger timed out with the signal still in flight.
    stale: u32,
}

impl<W, S, D> std::fmt::Debug for Supervisor<W, S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("lanes", &self.pio.lane_config())
            .field("policy", &self.status.policy())
            .field("period", &self.period)
            .field("next", &self.next)
            .field("stale", &format_args!("{:#010x}", self.stale))
            .finish_non_exhaustive()
    }
}

impl<W: EventWait, S: DiagnosticSink, D: Delay> Supervisor<W, S, D> {
    pub fn new(
        pio: Arc<PioBlock>,
        status: Arc<EventStatusWord>,
        wait: W,
        sink: S,
        delay: D,
    ) -> Self {
        let lane_count = pio.lane_config().lane_count() as usize;
        Self {
            pio,
            status,
            wait,
            sink,
            delay,
            period: crate::config::DEFAULT_CYCLE_DELAY,
            next: 0,
            handlers: (0..lane_count).map(|_| Vec::new()).collect(),
            masked_reported: 0,
            stale: 0,
        }
    }

    /// Sets the delay inserted after each trigger.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Registers work to run whenever `lane`'s bit is observed.
    pub fn on_lane_event(&mut self, lane: LaneId, handler: impl FnMut(LaneId) + Send + 'static) {
        if let Some(slot) = self.handlers.get_mut(lane.index() as usize) {
            slot.push(Box::new(handler));
        }
    }

    /// The lane the next [`Supervisor::step`] triggers.
    pub fn next_lane(&self) -> LaneId {
        self.pio
            .lane_config()
            .lane(self.next)
            .unwrap_or_else(|| LaneId::new(0))
    }

    pub fn wait_mut(&mut self) -> &mut W {
        &mut self.wait
    }

    /// Lanes whose late events are still expected from a timed-out trigger.
    pub fn stale_lanes(&self) -> u32 {
        self.stale
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drops the late events of timed-out lanes that have since gone idle.
    fn settle_stale(&mut self) -> Result<(), SupervisorError> {
        for lane in lanes_in(self.stale) {
            if !self.pio.lane_is_idle(lane)? {
                continue;
            }
            if self.status.discard(lane.status_bit()) != 0 {
                debug!(%lane, "discarded late event of timed-out trigger");
            }
            self.stale &= !lane.status_bit();
        }
        Ok(())
    }

    /// Releases `lane`, waits for its event and consumes it.
    ///
    /// On [`SupervisorError::EventTimeout`] the signal stays in flight and the lane is marked
    /// stale. Triggering a stale lane again waits for the outstanding event instead of pushing
    /// a second signal. A stale lane's event seen while another lane is triggered is discarded
    /// and left out of the report.
    pub fn trigger(&mut self, lane: LaneId) -> Result<TriggerReport, SupervisorError> {
        self.settle_stale()?;
        self.sink.triggering(lane);

        let expected = lane.status_bit();
        if self.stale & expected != 0 {
            self.stale &= !expected;
            debug!(%lane, "awaiting event of earlier timed-out trigger");
        } else {
            self.pio.put_blocking(lane, SIGNAL_VALUE)?;
        }

        let started = Instant::now();
        let observed = loop {
            let Some(word) = self.wait.wait_for(&self.status, expected | self.stale) else {
                self.stale |= expected;
                return Err(SupervisorError::EventTimeout {
                    lane: lane.index(),
                    waited: started.elapsed(),
                });
            };
            let late = word & self.stale;
            if late != 0 {
                self.status.discard(late);
                self.stale &= !late;
                debug!(
                    %lane,
                    late = format_args!("{:#010x}", late),
                    "discarded late events of timed-out triggers"
                );
            }
            if word & expected != 0 {
                break word & !late;
            }
        };

        let report = TriggerReport {
            lane,
            expected,
            observed,
        };
        self.sink.report(&report);
        if report.cross_talk() != 0 {
            warn!(
                %lane,
                cross_talk = format_args!("{:#010x}", report.cross_talk()),
                "event status word carries bits of other lanes"
            );
        }

        for event_lane in lanes_in(observed) {
            if let Some(handlers) = self.handlers.get_mut(event_lane.index() as usize) {
                for handler in handlers.iter_mut() {
                    handler(event_lane);
                }
            }
        }

        self.status.consume(observed);

        let masked = self.status.stats().masked;
        if masked > self.masked_reported {
            warn!(
                lost = masked - self.masked_reported,
                total = masked,
                "lane events overwritten before they were consumed"
            );
            self.masked_reported = masked;
        }

        Ok(report)
    }

    /// Triggers the next lane in round-robin order, then delays.
    pub fn step(&mut self) -> Result<TriggerReport, SupervisorError> {
        let lane = self.next_lane();
        let report = self.trigger(lane)?;
        self.delay.delay(self.period);
        self.next = (lane.index() + 1) % self.pio.lane_config().lane_count();
        Ok(report)
    }

    /// Runs `cycles` full round-robin passes, handing each report to `on_report`.
    pub fn run_cycles_with(
        &mut self,
        cycles: u64,
        mut on_report: impl FnMut(&TriggerReport),
    ) -> Result<(), SupervisorError> {
        let per_cycle = u64::from(self.pio.lane_config().lane_count());
        for _ in 0..cycles {
            for _ in 0..per_cycle {
                on_report(&self.step()?);
            }
        }
        Ok(())
    }

    /// Runs `cycles` full round-robin passes and collects every report.
    pub fn run_cycles(&mut self, cycles: u64) -> Result<Vec<TriggerReport>, SupervisorError> {
        let mut reports = Vec::new();
        self.run_cycles_with(cycles, |report| reports.push(*report))?;
        Ok(reports)
    }

    /// Runs until a trigger fails.
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        loop {
            self.step()?;
        }
    }
}

impl<S: DiagnosticSink> Supervisor<WaitStrategy, S, ThreadSleep> {
    /// Builds a supervisor with the wait strategy, timeout and period of `config`.
    pub fn from_config(
        pio: Arc<PioBlock>,
        status: Arc<EventStatusWord>,
        config: &RunConfig,
        sink: S,
    ) -> Self {
        Supervisor::new(
            pio,
            status,
            WaitStrategy::new(config.wait_mode, config.wait_timeout),
            sink,
            ThreadSleep,
        )
        .with_period(config.cycle_delay)
    }
}
