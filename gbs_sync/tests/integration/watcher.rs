//! Watcher hysteresis and format handling.
//!
//! Counter thresholds are calibrated against real sources; the tests pin
//! them by name where the crate exports them.

use gbs_common::regs;
use gbs_common::video::VideoStandard;
use gbs_hal::{SignalSource, SimulationDriver};
use gbs_sync::config::SyncConfig;
use gbs_sync::preset::apply_presets;
use gbs_sync::sync_processor::COAST_START_DEFAULT;
use gbs_sync::watcher::escalation::{COAST_RELAX_AT, LOW_POWER_AT, SOG_RAISE_AT};
use gbs_sync::watcher::{FORMAT_CONFIRM_AT, SyncWatcher, TickOutcome, WatchState};
use gbs_sync::SyncContext;

// ── Helpers ──

/// Watcher that has applied the preset for `standard` and seen it once.
fn settled(
    source: SignalSource,
    standard: VideoStandard,
    config: SyncConfig,
) -> (SyncContext, SimulationDriver, SyncWatcher) {
    let sim = SimulationDriver::new()
        .with_source(source)
        .with_synth_fitted(false);
    let mut cx = SyncContext::new(Box::new(sim.clone()), config);
    cx.rt.source_disconnected = false;
    apply_presets(&mut cx, standard).unwrap();
    let mut watcher = SyncWatcher::new();
    watcher.source_found();
    watcher.tick(&mut cx).unwrap();
    (cx, sim, watcher)
}

fn ntsc() -> (SyncContext, SimulationDriver, SyncWatcher) {
    settled(SignalSource::ntsc_480i(), VideoStandard::Ntsc, SyncConfig::default())
}

// ── Tests ──

#[test]
fn test_single_drop_only_freezes() {
    let (mut cx, sim, mut watcher) = ntsc();
    assert_eq!(watcher.state(), WatchState::Stable);

    sim.set_source(SignalSource::none());
    assert_eq!(
        watcher.tick(&mut cx).unwrap(),
        TickOutcome::NoSync { counter: 1 }
    );
    assert!(cx.rt.output_frozen);
    assert_eq!(sim.peek(regs::CAPTURE_ENABLE), 0);

    sim.set_source(SignalSource::ntsc_480i());
    assert_eq!(
        watcher.tick(&mut cx).unwrap(),
        TickOutcome::Stable { counter: 1 }
    );
    assert!(!cx.rt.output_frozen);
    assert_eq!(cx.rt.no_sync_counter, 0);
    assert_eq!(cx.rt.video_standard, VideoStandard::Ntsc);
    assert_eq!(sim.peek(regs::CAPTURE_ENABLE), 1);
}

#[test]
fn test_escalation_fires_at_its_counters() {
    let (mut cx, sim, mut watcher) = ntsc();
    sim.set_source(SignalSource::none());
    cx.rt.sog_level = 1;

    for _ in 1..SOG_RAISE_AT {
        watcher.tick(&mut cx).unwrap();
    }
    assert_eq!(cx.rt.sog_level, 1);
    watcher.tick(&mut cx).unwrap();
    assert_eq!(cx.rt.no_sync_counter, SOG_RAISE_AT);
    assert_eq!(cx.rt.sog_level, 2);
    assert_eq!(sim.peek(regs::ADC_SOGCTRL), 2);

    cx.rt.coast_position_set = true;
    sim.poke(regs::SP_POST_COAST, 18);
    while cx.rt.no_sync_counter < COAST_RELAX_AT - 1 {
        watcher.tick(&mut cx).unwrap();
    }
    assert!(cx.rt.coast_position_set);
    assert_eq!(sim.peek(regs::SP_POST_COAST), 18);

    watcher.tick(&mut cx).unwrap();
    assert_eq!(cx.rt.no_sync_counter, COAST_RELAX_AT);
    assert!(!cx.rt.coast_position_set);
    assert_eq!(sim.peek(regs::SP_POST_COAST), 9);
    assert_eq!(sim.peek(regs::SP_H_CST_ST), COAST_START_DEFAULT);
    assert!(cx.rt.output_frozen);
}

#[test]
fn test_gives_up_into_low_power() {
    let (mut cx, sim, mut watcher) = ntsc();
    sim.set_source(SignalSource::none());
    cx.rt.no_sync_counter = LOW_POWER_AT - 1;

    assert_eq!(watcher.tick(&mut cx).unwrap(), TickOutcome::LowPower);
    assert_eq!(watcher.state(), WatchState::LowPower);
    assert!(cx.rt.is_in_low_power_mode);
    assert_eq!(cx.rt.no_sync_counter, 0);
    assert_eq!(sim.peek(regs::DAC_RGBS_PWDNZ), 0);

    // stays put until the input scan finds something
    assert_eq!(watcher.tick(&mut cx).unwrap(), TickOutcome::LowPower);
}

#[test]
fn test_format_change_applies_new_preset() {
    let (mut cx, sim, mut watcher) = ntsc();
    sim.set_source(SignalSource::pal_576i());

    for n in 1..FORMAT_CONFIRM_AT {
        assert_eq!(
            watcher.tick(&mut cx).unwrap(),
            TickOutcome::FormatPending { counter: n }
        );
        assert_eq!(watcher.state(), WatchState::FormatPending);
    }
    assert_eq!(
        watcher.tick(&mut cx).unwrap(),
        TickOutcome::FormatApplied {
            standard: VideoStandard::Pal
        }
    );
    assert_eq!(cx.rt.video_standard, VideoStandard::Pal);
    assert_eq!(cx.rt.new_mode_counter, 0);
    assert_eq!(sim.peek(regs::VDS_VSYNC_RST), 625);
}

#[test]
fn test_low_line_count_rgbhv_is_upscaled() {
    let (mut cx, sim, mut watcher) = settled(
        SignalSource::vga_hv(),
        VideoStandard::RgbHvBypass,
        SyncConfig::default(),
    );
    for _ in 0..4 {
        watcher.tick(&mut cx).unwrap();
    }
    assert_eq!(cx.rt.video_standard, VideoStandard::RgbHvUpscale);
    assert_eq!(watcher.rgbhv_preset_lines(), 525);
    assert_eq!(sim.peek(regs::OPTION_SCALING_RGBHV), 1);
    assert!(cx.rt.rgbhv_scaling_valid);
}

#[test]
fn test_rgbhv_bypass_when_scaling_not_preferred() {
    let mut config = SyncConfig::default();
    config.options.prefer_scaling_rgbhv = false;
    let (mut cx, _sim, mut watcher) =
        settled(SignalSource::vga_hv(), VideoStandard::RgbHvBypass, config);
    for _ in 0..4 {
        watcher.tick(&mut cx).unwrap();
    }
    assert_eq!(cx.rt.video_standard, VideoStandard::RgbHvBypass);
    assert_eq!(cx.rt.no_sync_counter, 0);
    assert_eq!(watcher.state(), WatchState::Stable);
}
