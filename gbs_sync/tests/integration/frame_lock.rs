//! Output timing lock against a 59.94 Hz source.

use gbs_common::regs;
use gbs_common::video::VideoStandard;
use gbs_hal::{SignalSource, SimulationDriver};
use gbs_sync::config::SyncConfig;
use gbs_sync::frame_lock::{HtotalResult, clock_gen, htotal};
use gbs_sync::SyncContext;

// ── Helpers ──

/// 1716x525 at this clock is exactly 60.00 Hz.
const SIXTY_HZ_CLOCK: f64 = 54_054_000.0;

/// NTSC output timing on a board without a clock synthesizer.
fn ntsc_output(source: SignalSource) -> (SyncContext, SimulationDriver) {
    let sim = SimulationDriver::new()
        .with_source(source)
        .with_synth_fitted(false);
    let mut cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
    cx.rt.source_disconnected = false;
    cx.rt.video_standard = VideoStandard::Ntsc;
    sim.poke(regs::VDS_HSYNC_RST, 1716);
    sim.poke(regs::VDS_VSYNC_RST, 525);
    sim.poke(regs::VDS_DIS_HB_ST, 1600);
    sim.poke(regs::VDS_HB_ST, 1600);
    sim.poke(regs::VDS_DIS_HB_SP, 140);
    sim.poke(regs::VDS_HB_SP, 140);
    sim.poke(regs::VDS_HS_ST, 16);
    sim.poke(regs::VDS_HS_SP, 100);
    sim.set_display_clock_hz(Some(SIXTY_HZ_CLOCK));
    (cx, sim)
}

// ── Tests ──

#[test]
fn test_repeated_correction_converges() {
    let (mut cx, sim) = ntsc_output(SignalSource::ntsc_480i());
    let threshold = 1716.0 * f64::from(cx.tuning().large_diff_fraction);

    let mut converged = false;
    for _ in 0..5 {
        let before = sim.peek(regs::VDS_HSYNC_RST);
        let target = htotal::compute_target_htotal(&mut cx).unwrap();
        assert!((f64::from(target) - f64::from(before)).abs() <= threshold);
        match htotal::apply_best_htotal(&mut cx, target).unwrap() {
            HtotalResult::Unchanged => {
                converged = true;
                break;
            }
            HtotalResult::Applied { from, to } => {
                assert_eq!(from, before);
                assert_eq!(u32::from(to), target);
            }
            HtotalResult::Rejected(reason) => panic!("rejected: {reason}"),
        }
    }
    assert!(converged);
    assert_eq!(sim.peek(regs::VDS_HSYNC_RST), 1717);
}

#[test]
fn test_converged_timing_is_left_alone() {
    let (mut cx, sim) = ntsc_output(SignalSource::ntsc_480i());
    sim.poke(regs::VDS_HSYNC_RST, 1717);
    let target = htotal::compute_target_htotal(&mut cx).unwrap();
    assert_eq!(target, 1717);

    let writes = sim.write_count();
    assert_eq!(
        htotal::apply_best_htotal(&mut cx, target).unwrap(),
        HtotalResult::Unchanged
    );
    assert_eq!(sim.write_count(), writes);
}

#[test]
fn test_sixty_hz_output_locks_to_59_94_source() {
    let (mut cx, sim) = ntsc_output(SignalSource::ntsc_480i());
    cx.rt.sync_lock_fail_ignore = 3;

    assert!(htotal::run_auto_best_htotal(&mut cx).unwrap());
    assert_eq!(sim.peek(regs::VDS_HSYNC_RST), 1717);
    assert!(cx.rt.frame_sync.ready());
    assert_eq!(cx.rt.no_sync_counter, 0);
    assert_eq!(cx.rt.fail_retry_attempts, 0);
    assert_eq!(cx.rt.sync_lock_fail_ignore, cx.tuning().sync_lock_fail_ignore);

    // ready frame sync short-circuits further attempts
    let writes = sim.write_count();
    assert!(htotal::run_auto_best_htotal(&mut cx).unwrap());
    assert_eq!(sim.write_count(), writes);
}

#[test]
fn test_missing_source_spends_retry_credit() {
    let (mut cx, sim) = ntsc_output(SignalSource::none());
    cx.rt.sync_lock_fail_ignore = 2;

    assert!(!htotal::run_auto_best_htotal(&mut cx).unwrap());
    assert_eq!(cx.rt.sync_lock_fail_ignore, 1);
    assert!(cx.rt.auto_best_htotal_enabled);

    assert!(!htotal::run_auto_best_htotal(&mut cx).unwrap());
    assert!(!cx.rt.auto_best_htotal_enabled);
    assert_eq!(sim.peek(regs::DAC_RGBS_PWDNZ), 1);
    assert_eq!(sim.peek(regs::VDS_HSYNC_RST), 1716);
}

#[test]
fn test_failed_clock_lock_rolls_back() {
    let sim = SimulationDriver::new().with_source(SignalSource::ntsc_480i().with_field_rate(60.5));
    let mut cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
    cx.rt.source_disconnected = false;
    assert!(clock_gen::detect(&mut cx).unwrap());
    sim.poke(regs::VDS_HSYNC_RST, 1716);
    sim.poke(regs::VDS_VSYNC_RST, 525);
    sim.poke(regs::PRESET_DISPLAY_CLOCK, 0x45);
    sim.poke(regs::PLL648_CONTROL_01, 0x75);
    assert!(clock_gen::reset_clock(&mut cx).unwrap());
    let before = cx.rt.ext_clock_freq_hz;

    sim.set_synth_lock_fails(true);
    sim.set_display_clock_hz(Some(f64::from(before)));
    assert!(!clock_gen::sync_in_out_rate(&mut cx).unwrap());

    assert_eq!(cx.rt.ext_clock_freq_hz, before);
    assert_eq!(sim.synth_frequency_hz(), before);
    assert!(sim.synth_output_enabled());
}
