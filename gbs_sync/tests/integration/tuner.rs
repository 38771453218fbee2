//! SOG level search and sampling phase calibration bounds.

use gbs_common::regs;
use gbs_common::video::VideoStandard;
use gbs_hal::{SignalSource, SimulationDriver};
use gbs_sync::SyncContext;
use gbs_sync::config::SyncConfig;
use gbs_sync::tuner::{optimize_phase_sp, optimize_sog_level};

// ── Helpers ──

fn composite(source: SignalSource) -> (SyncContext, SimulationDriver) {
    let sim = SimulationDriver::new()
        .with_source(source)
        .with_synth_fitted(false);
    let mut cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
    cx.rt.source_disconnected = false;
    cx.rt.sync_type_csync = true;
    (cx, sim)
}

fn sog_writes_during(sim: &SimulationDriver, from: usize) -> Vec<u16> {
    sim.field_history(regs::ADC_SOGCTRL)[from..].to_vec()
}

// ── Tests ──

#[test]
fn test_sog_search_only_walks_down() {
    let (mut cx, sim) = composite(SignalSource::ntsc_480i().with_sog_window(4, 8));
    let from = sim.field_history(regs::ADC_SOGCTRL).len();

    let level = optimize_sog_level(&mut cx).unwrap();
    assert_eq!(level, 8);

    let levels = sog_writes_during(&sim, from);
    assert!(levels.len() <= 16, "{levels:?}");
    assert!(levels.windows(2).all(|w| w[1] <= w[0]), "{levels:?}");
    assert_eq!(levels.last().copied(), Some(8));
}

#[test]
fn test_sog_search_on_component_starts_higher() {
    let (mut cx, sim) = composite(SignalSource::edtv_480p().with_sog_window(10, 12));
    cx.rt.input_is_component = true;
    sim.poke(regs::ADC_INPUT_SEL, 0);
    let from = sim.field_history(regs::ADC_SOGCTRL).len();

    assert_eq!(optimize_sog_level(&mut cx).unwrap(), 12);
    let levels = sog_writes_during(&sim, from);
    assert_eq!(levels.first().copied(), Some(14));
    assert!(levels.windows(2).all(|w| w[1] <= w[0]), "{levels:?}");
    assert_eq!(cx.rt.source_max_sog, 12);
}

#[test]
fn test_mostly_jittering_phase_never_commits() {
    // 21 of 32 phases jitter, so fewer than 17 steps come out clean
    let (mut cx, sim) = composite(SignalSource::ntsc_480i().with_bad_phase(Some((0, 20))));
    cx.rt.video_standard = VideoStandard::Ntsc;
    cx.rt.sog_level = 8;
    cx.rt.set_phases(24, 16);
    sim.poke(regs::ADC_SOGCTRL, 8);
    sim.poke(regs::PLLAD_MD, 2345);

    assert!(!optimize_phase_sp(&mut cx).unwrap());
    assert_eq!((cx.rt.phase_sp, cx.rt.phase_adc), (24, 16));
    assert_eq!(sim.peek(regs::PA_SP_S), 24);
}

#[test]
fn test_low_sog_level_skips_sweep() {
    let (mut cx, sim) = composite(SignalSource::ntsc_480i());
    cx.rt.sog_level = 2;
    cx.rt.set_phases(3, 3);
    sim.poke(regs::ADC_SOGCTRL, 2);
    sim.poke(regs::PLLAD_MD, 2345);

    assert!(optimize_phase_sp(&mut cx).unwrap());
    assert_eq!(cx.rt.phase_sp, 16);
    assert_eq!(sim.peek(regs::PA_SP_S), 16);
}
