//! Full controller runs against the simulated board.

use gbs_common::regs;
use gbs_common::video::VideoStandard;
use gbs_hal::{SignalSource, SimulationDriver};
use gbs_sync::config::SyncConfig;
use gbs_sync::{SyncContext, SyncRunner, TickEvents, TickOutcome};
use gbs_sync::watcher::WatchState;

// ── Helpers ──

const SIXTY_HZ_CLOCK: f64 = 54_054_000.0;
const MAX_STEPS: usize = 1500;

fn started(source: SignalSource) -> (SyncRunner, SimulationDriver) {
    let sim = SimulationDriver::new()
        .with_source(source)
        .with_synth_fitted(false);
    sim.set_display_clock_hz(Some(SIXTY_HZ_CLOCK));
    let cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
    let mut runner = SyncRunner::new(cx);
    runner.init().unwrap();
    (runner, sim)
}

/// Step until `done` holds; returns the number of steps taken.
fn run_until(runner: &mut SyncRunner, done: impl Fn(&SyncRunner) -> bool) -> usize {
    for n in 0..MAX_STEPS {
        if done(runner) {
            return n;
        }
        runner.step().unwrap();
    }
    panic!("condition not reached: {:?}", runner.status());
}

// ── Tests ──

#[test]
fn test_ntsc_source_locks_output_timing() {
    let (mut runner, sim) = started(SignalSource::ntsc_480i());

    run_until(&mut runner, |r| {
        let rt = &r.context().rt;
        rt.video_standard == VideoStandard::Ntsc && rt.frame_sync.ready()
    });
    assert_eq!(sim.peek(regs::VDS_HSYNC_RST), 1717);

    run_until(&mut runner, |r| r.context().rt.continuous_stable_counter >= 12);
    let rt = &runner.context().rt;
    assert_eq!(rt.no_sync_counter, 0);
    assert!(!rt.output_frozen);
    assert!(rt.coast_position_set);
    assert_eq!(runner.watcher().state(), WatchState::Stable);
    assert_eq!(sim.peek(regs::DAC_RGBS_PWDNZ), 1);
    assert_eq!(sim.peek(regs::VDS_HSYNC_RST), 1717);
}

#[test]
fn test_hot_plug_leaves_low_power() {
    let (mut runner, sim) = started(SignalSource::none());
    for _ in 0..5 {
        let report = runner.step().unwrap();
        assert_eq!(report.outcome, TickOutcome::LowPower);
        assert!(!report.events.contains(TickEvents::SOURCE_FOUND));
    }

    sim.set_source(SignalSource::ntsc_480i());
    run_until(&mut runner, |r| {
        r.context().rt.video_standard == VideoStandard::Ntsc
    });
    let status = runner.status();
    assert!(!status.low_power);
    assert_ne!(status.watcher, WatchState::LowPower);
    assert!(status.steps > 5);
}

#[test]
fn test_status_tracks_progress() {
    let (mut runner, _sim) = started(SignalSource::ntsc_480i());
    let before = runner.status();
    run_until(&mut runner, |r| r.status().steps >= 20);
    let after = runner.status();
    assert!(after.uptime_ms > before.uptime_ms);
    assert_eq!(after.steps, 20);
    assert!(after.board_powered);
}
