//! Lane and run configuration.
//!
//! [`LaneConfig`] replaces the four hard-wired lane constants of a classic PIO setup with
//! `{lane_count, status_bit_width}`; [`RunConfig`] collects the supervisor knobs and can be
//! read from `AERO_PIO_*` environment variables.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::lane::LaneId;

pub const DEFAULT_LANE_COUNT: u8 = 4;
/// Width of the hardware IRQ flag register on a PIO block.
pub const DEFAULT_STATUS_BIT_WIDTH: u8 = 8;
pub const MAX_STATUS_BIT_WIDTH: u8 = 32;

pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    lane_count: u8,
    status_bit_width: u8,
}

impl LaneConfig {
    pub fn new(lane_count: u8, status_bit_width: u8) -> Result<Self, ConfigError> {
        if lane_count == 0 {
            return Err(ConfigError::NoLanes);
        }
        if status_bit_width == 0 || status_bit_width > MAX_STATUS_BIT_WIDTH {
            return Err(ConfigError::InvalidStatusWidth {
                width: status_bit_width,
            });
        }
        if lane_count > status_bit_width {
            return Err(ConfigError::LanesExceedStatusWidth {
                lane_count,
                width: status_bit_width,
            });
        }
        Ok(Self {
            lane_count,
            status_bit_width,
        })
    }

    pub fn lane_count(&self) -> u8 {
        self.lane_count
    }

    pub fn status_bit_width(&self) -> u8 {
        self.status_bit_width
    }

    /// Mask of every bit the status register can hold.
    pub fn status_mask(&self) -> u32 {
        width_mask(self.status_bit_width)
    }

    /// Mask of the bits owned by lanes (`lane_count` low bits).
    pub fn lane_mask(&self) -> u32 {
        width_mask(self.lane_count)
    }

    pub fn lane(&self, index: u8) -> Option<LaneId> {
        (index < self.lane_count).then(|| LaneId::new(index))
    }

    pub fn lanes(&self) -> impl Iterator<Item = LaneId> {
        (0..self.lane_count).map(LaneId::new)
    }

    pub fn contains(&self, lane: LaneId) -> bool {
        lane.index() < self.lane_count
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            lane_count: DEFAULT_LANE_COUNT,
            status_bit_width: DEFAULT_STATUS_BIT_WIDTH,
        }
    }
}

fn width_mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// How the interrupt handler folds a fresh flag snapshot into the event status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Replace the word with the latest snapshot. Events still unconsumed from an earlier
    /// interrupt are lost (and counted as masked).
    #[default]
    Overwrite,
    /// OR the snapshot into the word; the supervisor clears only the bits it consumed.
    Accumulate,
}

impl FromStr for StatusPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "accumulate" | "or" => Ok(Self::Accumulate),
            _ => Err(ConfigError::UnknownPolicy(s.to_owned())),
        }
    }
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::Accumulate => "accumulate",
        })
    }
}

/// How the supervisor waits for its lane's bit to show up in the status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitMode {
    /// Busy-observe the word.
    #[default]
    Spin,
    /// Park the supervisor thread; the interrupt handler unparks it after publishing.
    Park,
}

impl FromStr for WaitMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spin" => Ok(Self::Spin),
            "park" => Ok(Self::Park),
            _ => Err(ConfigError::UnknownWaitMode(s.to_owned())),
        }
    }
}

impl fmt::Display for WaitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spin => "spin",
            Self::Park => "park",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub lanes: LaneConfig,
    pub policy: StatusPolicy,
    pub wait_mode: WaitMode,
    /// Delay inserted after every trigger/acknowledge cycle.
    pub cycle_delay: Duration,
    /// Give up waiting for a lane's event after this long. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Number of full round-robin passes to run. `None` runs forever.
    pub cycles: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lanes: LaneConfig::default(),
            policy: StatusPolicy::default(),
            wait_mode: WaitMode::default(),
            cycle_delay: DEFAULT_CYCLE_DELAY,
            wait_timeout: None,
            cycles: None,
        }
    }
}

impl RunConfig {
    /// Reads `AERO_PIO_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`RunConfig::from_env`] but with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lane_count = parse_var(&lookup, "AERO_PIO_LANES")?
            .unwrap_or(defaults.lanes.lane_count());
        let status_bit_width = parse_var(&lookup, "AERO_PIO_STATUS_BITS")?
            .unwrap_or(defaults.lanes.status_bit_width());
        let lanes = LaneConfig::new(lane_count, status_bit_width)?;

        let policy = match lookup("AERO_PIO_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.policy,
        };
        let wait_mode = match lookup("AERO_PIO_WAIT") {
            Some(raw) => raw.parse()?,
            None => defaults.wait_mode,
        };

        let cycle_delay = parse_var::<u64>(&lookup, "AERO_PIO_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.cycle_delay);
        let wait_timeout = parse_var::<u64>(&lookup, "AERO_PIO_TIMEOUT_MS")?
            .map(Duration::from_millis);
        let cycles = parse_var(&lookup, "AERO_PIO_CYCLES")?;

        Ok(Self {
            lanes,
            policy,
            wait_mode,
            cycle_delay,
            wait_timeout,
            cycles,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
