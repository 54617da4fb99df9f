use tracing::debug;

use crate::error::PioError;
use crate::pio::regs::IRQ;
use crate::pio::{lane_event_program, PioBlock, SmConfig};

/// Bits of the signal word each lane consumes per event.
pub const SIGNAL_BITS: u8 = 1;

/// Loads the lane event program once and starts every lane of `pio` on it.
///
/// For each lane the event flag is routed onto IRQ line 0, its pending flag is cleared, and the
/// lane is initialised at the shared program offset and enabled. Returns the offset.
///
/// Fails with [`PioError::LaneAlreadyRunning`] before touching anything if any lane is
/// already running.
pub fn bootstrap_lanes(pio: &PioBlock) -> Result<u8, PioError> {
    let lanes = pio.lane_config();
    if let Some(lane) = lanes.lanes().find(|&lane| pio.sm_is_enabled(lane)) {
        return Err(PioError::LaneAlreadyRunning { lane: lane.index() });
    }

    let program = lane_event_program();
    let offset = pio.add_program(&program)?;
    debug!(offset, len = program.len(), "lane event program loaded");

    let config = SmConfig::for_program(&program, offset, SIGNAL_BITS);
    for lane in lanes.lanes() {
        pio.set_irq0_source_enabled(lane, true)?;
        pio.mmio_write(IRQ, lane.status_bit());
        pio.sm_init(lane, offset, config)?;
        pio.sm_set_enabled(lane, true)?;
        debug!(%lane, "lane started");
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneConfig;
    use crate::pio::regs::{CTRL, IRQ0_INTE, IRQ_FORCE};
    use crate::pio::Stall;

    #[test]
    fn starts_every_lane_on_one_image() {
        let pio = PioBlock::new(LaneConfig::new(3, 8).unwrap());
        pio.mmio_write(IRQ_FORCE, 0b0111);

        let offset = bootstrap_lanes(&pio).unwrap();
        assert_eq!(offset, 28);
        assert_eq!(pio.mmio_read(CTRL), 0b0111);
        assert_eq!(pio.mmio_read(IRQ0_INTE), 0b0111);
        assert_eq!(pio.mmio_read(IRQ), 0);

        pio.tick();
        for lane in pio.lane_config().lanes() {
            let snap = pio.lane_snapshot(lane).unwrap();
            assert_eq!(snap.pc, offset);
            assert_eq!(snap.stall, Some(Stall::Pull));
        }
    }

    #[test]
    fn rerun_on_running_lanes_is_rejected_without_side_effects() {
        let pio = PioBlock::new(LaneConfig::default());
        bootstrap_lanes(&pio).unwrap();
        let program = lane_event_program();

        assert_eq!(
            bootstrap_lanes(&pio),
            Err(PioError::LaneAlreadyRunning { lane: 0 })
        );
        // No second copy of the program was loaded.
        assert!(pio.can_add_program(&program));
        assert_eq!(pio.add_program(&program), Ok(24));
    }
}
