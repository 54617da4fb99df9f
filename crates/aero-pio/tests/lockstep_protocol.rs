use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aero_pio::pio::regs::IRQ;
use aero_pio::pio::Stall;
use aero_pio::{
    Board, DiagnosticSink, LaneConfig, LaneId, StatusPolicy, SupervisorError, TriggerReport,
    PIO0_IRQ_0,
};
use pretty_assertions::assert_eq;

/// Generous bound on ticks per event; a lane needs four.
const MAX_TICKS: u64 = 64;

#[derive(Default)]
struct Recorder {
    triggered: Vec<u8>,
    reports: Vec<TriggerReport>,
}

impl DiagnosticSink for Recorder {
    fn triggering(&mut self, lane: LaneId) {
        self.triggered.push(lane.index());
    }

    fn report(&mut self, report: &TriggerReport) {
        self.reports.push(*report);
    }
}

fn board(policy: StatusPolicy) -> Board {
    let board = Board::new(LaneConfig::default(), policy);
    board.bring_up().unwrap();
    board
}

#[test]
fn one_cycle_observes_each_lane_bit_in_order() {
    let board = board(StatusPolicy::Overwrite);
    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());

    let reports = sup.run_cycles(1).unwrap();
    let observed: Vec<u32> = reports.iter().map(|r| r.observed).collect();
    assert_eq!(observed, vec![0x1, 0x2, 0x4, 0x8]);
    assert!(reports.iter().all(|r| r.cross_talk() == 0));

    let sink = sup.into_sink();
    assert_eq!(sink.triggered, vec![0, 1, 2, 3]);
    assert_eq!(board.status().load(), 0);
    assert_eq!(board.nvic().dispatch_count(PIO0_IRQ_0), 4);
}

#[test]
fn lane_two_then_lane_zero_does_not_leak() {
    let board = board(StatusPolicy::Overwrite);
    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());

    let lane2 = board.pio().lane(2).unwrap();
    let lane0 = board.pio().lane(0).unwrap();

    let first = sup.trigger(lane2).unwrap();
    assert_eq!(first.observed, 0x0000_0004);
    let second = sup.trigger(lane0).unwrap();
    assert_eq!(second.observed, 0x0000_0001);
    assert_eq!(second.cross_talk(), 0);
}

#[test]
fn word_holds_exactly_the_signalled_bit_before_consumption() {
    for policy in [StatusPolicy::Overwrite, StatusPolicy::Accumulate] {
        let board = board(policy);
        for lane in board.pio().lane_config().lanes() {
            board.pio().put(lane, 1).unwrap();
            let mut wait = board.lockstep_wait(MAX_TICKS);
            let word = aero_pio::EventWait::wait_for(&mut wait, board.status(), lane.status_bit());
            assert_eq!(word, Some(lane.status_bit()), "{policy} {lane}");
            assert_eq!(board.status().consume(lane.status_bit()), lane.status_bit());
            assert_eq!(board.status().load(), 0);
        }
    }
}

#[test]
fn acknowledged_lane_returns_to_pull() {
    let board = board(StatusPolicy::Overwrite);
    let lane = board.pio().lane(1).unwrap();
    board.pio().put(lane, 1).unwrap();

    board.run_ticks(4).unwrap();
    assert_eq!(board.pio().mmio_read(IRQ), 0);
    board.run_ticks(2).unwrap();
    let snap = board.pio().lane_snapshot(lane).unwrap();
    assert_eq!(snap.stall, Some(Stall::Pull));
    // `mov y, ~x` ran on the one-bit signal.
    assert_eq!(snap.x, 1);
    assert_eq!(snap.y, !1);
}

#[test]
fn clearing_an_idle_word_keeps_it_zero() {
    let board = board(StatusPolicy::Overwrite);
    board.status().clear();
    board.status().clear();
    assert_eq!(board.status().load(), 0);
}

#[test]
fn back_to_back_events_under_overwrite_keep_only_the_last() {
    let board = board(StatusPolicy::Overwrite);
    let lane0 = board.pio().lane(0).unwrap();
    let lane1 = board.pio().lane(1).unwrap();

    board.pio().put(lane0, 1).unwrap();
    board.run_ticks(2).unwrap();
    board.pio().put(lane1, 1).unwrap();
    board.run_ticks(4).unwrap();

    assert_eq!(board.status().load(), 0b10);
    let stats = board.status().stats();
    assert_eq!(stats.invocations, 2);
    assert_eq!(stats.masked, 1);
}

#[test]
fn back_to_back_events_under_accumulate_keep_both() {
    let board = board(StatusPolicy::Accumulate);
    let lane0 = board.pio().lane(0).unwrap();
    let lane1 = board.pio().lane(1).unwrap();

    board.pio().put(lane0, 1).unwrap();
    board.run_ticks(2).unwrap();
    board.pio().put(lane1, 1).unwrap();
    board.run_ticks(4).unwrap();

    assert_eq!(board.status().load(), 0b11);
    assert_eq!(board.status().stats().masked, 0);

    assert_eq!(board.status().consume(0b01), 0b01);
    assert_eq!(board.status().load(), 0b10);
}

#[test]
fn per_lane_handlers_run_for_observed_bits() {
    let board = board(StatusPolicy::Overwrite);
    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());
    let seen = Arc::new(AtomicU32::new(0));
    for lane in board.pio().lane_config().lanes() {
        let seen = Arc::clone(&seen);
        sup.on_lane_event(lane, move |lane| {
            seen.fetch_add(lane.status_bit(), Ordering::Relaxed);
        });
    }

    sup.run_cycles(2).unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 2 * 0b1111);
}

#[test]
fn wider_configurations_run_every_lane() {
    let board = Board::new(LaneConfig::new(6, 8).unwrap(), StatusPolicy::Overwrite);
    board.bring_up().unwrap();
    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());

    let observed: Vec<u32> = sup
        .run_cycles(1)
        .unwrap()
        .iter()
        .map(|r| r.observed)
        .collect();
    assert_eq!(observed, vec![0x01, 0x02, 0x04, 0x08, 0x10, 0x20]);
}

#[test]
fn missing_handler_surfaces_as_timeout_with_fault() {
    let board = Board::new(LaneConfig::default(), StatusPolicy::Overwrite);
    aero_pio::bootstrap_lanes(board.pio()).unwrap();
    board.nvic().set_enabled(PIO0_IRQ_0, true).unwrap();

    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());
    let lane = board.pio().lane(0).unwrap();
    assert!(matches!(
        sup.trigger(lane),
        Err(SupervisorError::EventTimeout { lane: 0, .. })
    ));
}

/// Triggers `lane` with too few ticks for its event to arrive, then restores the normal bound.
fn time_out<S: DiagnosticSink>(
    sup: &mut aero_pio::Supervisor<aero_pio::LockstepWait, S, aero_pio::NoDelay>,
    lane: LaneId,
) {
    sup.wait_mut().set_max_ticks(2);
    assert!(matches!(
        sup.trigger(lane),
        Err(SupervisorError::EventTimeout { .. })
    ));
    sup.wait_mut().set_max_ticks(MAX_TICKS);
}

#[test]
fn late_event_of_timed_out_lane_stays_out_of_the_next_report() {
    for policy in [StatusPolicy::Overwrite, StatusPolicy::Accumulate] {
        let board = board(policy);
        let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());
        let lane2 = board.pio().lane(2).unwrap();
        let lane0 = board.pio().lane(0).unwrap();

        time_out(&mut sup, lane2);
        assert_eq!(sup.stale_lanes(), 0x4, "{policy}");

        let report = sup.trigger(lane0).unwrap();
        assert_eq!(report.observed, 0x1, "{policy}");
        assert_eq!(report.cross_talk(), 0, "{policy}");
        assert_eq!(sup.stale_lanes(), 0, "{policy}");
        assert_eq!(board.status().load(), 0, "{policy}");
        assert_eq!(board.status().stats().masked, 0, "{policy}");

        assert_eq!(sup.trigger(lane2).unwrap().observed, 0x4, "{policy}");
        assert_eq!(board.status().load(), 0, "{policy}");
    }
}

#[test]
fn late_event_raised_while_idle_is_discarded_before_the_next_trigger() {
    for policy in [StatusPolicy::Overwrite, StatusPolicy::Accumulate] {
        let board = board(policy);
        let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());
        let lane2 = board.pio().lane(2).unwrap();
        let lane0 = board.pio().lane(0).unwrap();

        time_out(&mut sup, lane2);
        board.run_ticks(8).unwrap();
        assert_eq!(board.pio().lane_is_idle(lane2), Ok(true));
        assert_eq!(board.status().load(), 0x4, "{policy}");

        let report = sup.trigger(lane0).unwrap();
        assert_eq!(report.observed, 0x1, "{policy}");
        assert_eq!(sup.stale_lanes(), 0, "{policy}");
        assert_eq!(board.status().load(), 0, "{policy}");
        assert_eq!(board.status().stats().masked, 0, "{policy}");
    }
}

#[test]
fn retriggering_a_timed_out_lane_waits_for_the_signal_already_sent() {
    let board = board(StatusPolicy::Accumulate);
    let mut sup = board.lockstep_supervisor(MAX_TICKS, Recorder::default());
    let lane = board.pio().lane(1).unwrap();

    time_out(&mut sup, lane);
    assert_eq!(board.pio().tx_level(lane), Ok(0));

    assert_eq!(sup.trigger(lane).unwrap().observed, 0x2);
    assert_eq!(board.pio().tx_level(lane), Ok(0));
    assert_eq!(sup.stale_lanes(), 0);

    // One signal, one event: the lane is ready for a fresh trigger.
    assert_eq!(sup.trigger(lane).unwrap().observed, 0x2);
    assert_eq!(board.nvic().dispatch_count(PIO0_IRQ_0), 2);
}
