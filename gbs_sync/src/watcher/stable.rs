//! Maintenance while the applied standard is being read back.
//!
//! Runs the counter-scheduled work of the stable branch, the deinterlacer
//! parity switch for interlaced SD sources, and the preemptive SOG monitor
//! that lowers the slice level before an unstable composite sync drops out.

use crate::config::DeinterlaceMode;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::{clock_gen, frame_sync};
use crate::sync_processor::{freeze, reset_interrupt, unfreeze, update_sp_dynamic};
use crate::tuner::{optimize_phase_sp, optimize_sog_level, set_sog_level};
use crate::watcher::escalation::LONG_OUTAGE;
use gbs_common::regs::{self, int_reset};
use gbs_common::status::SyncInterrupts;
use gbs_common::video::VideoStandard;
use tracing::{debug, info};

// ─── Stable Schedule ────────────────────────────────────────────────

const PHASE_TUNE_FIRST: u8 = 10;
const PHASE_TUNE_LAST: u8 = 60;
const PHASE_TUNE_EVERY: u8 = 10;
const CLAMP_RECHECK_AT: u8 = 45;
const SOG_BAD_CLEAR_AT: u8 = 160;
const SP_REFRESH_EVERY: u8 = 31;
const DEINTERLACE_FROM: u8 = 3;

/// One tick of the stable branch.
pub fn run(cx: &mut SyncContext) -> Result<(), SyncError> {
    let n = cx.rt.bump_stable();

    if cx.rt.no_sync_counter >= LONG_OUTAGE {
        cx.rt.coast_position_set = false;
        cx.rt.phase_calibrated = false;
        frame_sync::reset(cx)?;
        cx.rt.full_restore_pending = true;
        info!(outage = cx.rt.no_sync_counter, "Source back after a long outage");
    }
    cx.rt.no_sync_counter = 0;
    cx.rt.new_mode_counter = 0;

    if n == 1 && !cx.rt.full_restore_pending {
        unfreeze(cx)?;
    }
    if n == 2 {
        update_sp_dynamic(cx, false)?;
        if cx.rt.full_restore_pending {
            cx.board.delay_ms(20);
            optimize_sog_level(cx)?;
            cx.rt.full_restore_pending = false;
        }
        unfreeze(cx)?;
    }

    if !cx.rt.phase_calibrated
        && (PHASE_TUNE_FIRST..=PHASE_TUNE_LAST).contains(&n)
        && n % PHASE_TUNE_EVERY == 0
    {
        cx.rt.phase_calibrated = optimize_phase_sp(cx)?;
    }

    if n == SOG_BAD_CLEAR_AT {
        reset_interrupt(cx, int_reset::SOG_BAD)?;
    }
    if n == CLAMP_RECHECK_AT {
        cx.board.write(regs::ADC_UNUSED_67, 0)?;
        cx.rt.clamp_position_set = false;
    }
    if n % SP_REFRESH_EVERY == 0 {
        update_sp_dynamic(cx, false)?;
    }

    let interlaced_sd = matches!(cx.rt.video_standard, VideoStandard::Ntsc | VideoStandard::Pal);
    if n >= DEINTERLACE_FROM && interlaced_sd && cx.rt.no_sync_counter == 0 {
        track_deinterlace(cx)?;
    }
    Ok(())
}

// ─── Deinterlacer ───────────────────────────────────────────────────

/// Fields of matching parity to wait before re-locking output timing.
pub const TIMING_ADJUST_FIELDS: u8 = 11;

/// Consecutive same-parity readouts needed to switch.
const PARITY_CONFIRM: u8 = 2;

/// Interlaced line counts (motion adaptive on).
const EVEN_VPERIODS: [u16; 6] = [522, 524, 526, 622, 624, 626];
/// Progressive line counts (motion adaptive off).
const ODD_VPERIODS: [u16; 6] = [521, 523, 525, 623, 625, 627];

fn set_motion_adaptive(cx: &mut SyncContext, on: bool) -> Result<(), SyncError> {
    if on {
        freeze(cx)?;
        cx.board.write(regs::DEINT_00, 0x19)?;
        cx.board.write(regs::WFF_ENABLE, 1)?;
        cx.board.write(regs::RFF_ENABLE, 1)?;
        unfreeze(cx)?;
        cx.board.delay_ms(60);
        cx.board.write(regs::MAPDT_VT_SEL_PRGV, 0)?;
    } else {
        cx.board.write(regs::MAPDT_VT_SEL_PRGV, 1)?;
        cx.board.write(regs::DEINT_00, 0xff)?;
        cx.board.delay_ms(2);
        cx.board.write(regs::WFF_ENABLE, 0)?;
        cx.board.write(regs::RFF_ENABLE, 0)?;
    }
    cx.rt.motion_adaptive_active = on;
    debug!(on, "Motion adaptive deinterlace");
    Ok(())
}

/// Arm the timing re-adjust, or cancel it if it is already running.
fn arm_or_cancel(cx: &mut SyncContext, vperiod: u16) {
    let d = &mut cx.rt.deinterlace;
    if d.timing_adjust_delay == 0 {
        d.timing_adjust_delay = TIMING_ADJUST_FIELDS;
        d.timing_adjust_parity = vperiod % 2 == 1;
    } else {
        d.timing_adjust_delay = 0;
    }
}

fn track_deinterlace(cx: &mut SyncContext) -> Result<(), SyncError> {
    let mode = cx.options().deinterlace;
    let ftl = cx.options().frame_time_lock;
    let v = cx.board.read(regs::VPERIOD_IF)?;

    if cx.rt.deinterlace.last_vperiod != v {
        cx.rt.deinterlace.reset_filters();
        if (ftl || cx.rt.ext_clock_gen_present) && mode == DeinterlaceMode::Bob {
            cx.rt.deinterlace.timing_adjust_delay = TIMING_ADJUST_FIELDS;
            cx.rt.deinterlace.timing_adjust_parity = v % 2 == 1;
        }
    }

    if EVEN_VPERIODS.contains(&v) {
        let d = &mut cx.rt.deinterlace;
        d.even_count += 1;
        d.odd_count = 0;
        if d.even_count >= PARITY_CONFIRM {
            d.even_count = 0;
            if mode == DeinterlaceMode::MotionAdaptive && !cx.rt.motion_adaptive_active {
                set_motion_adaptive(cx, true)?;
                arm_or_cancel(cx, v);
            }
        }
    } else if ODD_VPERIODS.contains(&v) {
        let d = &mut cx.rt.deinterlace;
        d.odd_count += 1;
        d.even_count = 0;
        if d.odd_count >= PARITY_CONFIRM {
            d.odd_count = 0;
            if mode == DeinterlaceMode::MotionAdaptive && cx.rt.motion_adaptive_active {
                set_motion_adaptive(cx, false)?;
                arm_or_cancel(cx, v);
            }
        }
    } else {
        cx.rt.deinterlace.reset_filters();
    }
    cx.rt.deinterlace.last_vperiod = v;

    if mode == DeinterlaceMode::Bob && cx.rt.motion_adaptive_active {
        set_motion_adaptive(cx, false)?;
        frame_sync::reset(cx)?;
        cx.board.write(regs::RUNTIME_FTL_ADJUSTED, 1)?;
        cx.rt.last_vsync_lock_ms = cx.board.millis();
    }

    let d = &mut cx.rt.deinterlace;
    if d.timing_adjust_delay != 0 && (v % 2 == 1) == d.timing_adjust_parity {
        d.timing_adjust_delay -= 1;
        if d.timing_adjust_delay == 0 {
            if ftl {
                frame_sync::reset(cx)?;
                cx.board.write(regs::RUNTIME_FTL_ADJUSTED, 1)?;
                cx.board.delay_ms(10);
                cx.rt.last_vsync_lock_ms = cx.board.millis();
            }
            clock_gen::sync_in_out_rate(cx)?;
        }
    }
    Ok(())
}

// ─── Preemptive SOG Monitor ─────────────────────────────────────────

/// Observation window opened by a SOG interrupt.
pub const SOG_WINDOW_MS: u64 = 3_000;
/// Bad HS observations in one window that trigger a SOG step down.
pub const SOG_BAD_HS_LIMIT: u16 = 17;
/// Bad HS observations at SOG ≤ 1 that trigger a re-optimization.
pub const SOG_BAD_HS_REOPTIMIZE: u16 = 40;
/// Lowest level the window-expiry step applies from.
pub const SOG_EXPIRY_MIN_LEVEL: u8 = 8;

const SOG_MONITOR_PROBES: u8 = 16;
const HLOW_MOVE_READS: u8 = 20;

fn lower_sog(cx: &mut SyncContext) -> Result<(), SyncError> {
    let level = cx.rt.sog_level - 1;
    set_sog_level(cx, level)?;
    cx.board.delay_ms(30);
    update_sp_dynamic(cx, false)?;
    cx.rt.sog_monitor.bad_hs = 0;
    Ok(())
}

/// Watch composite RGB sync for bad HS while the source still toggles
/// HLOW_LEN, and lower SOG before sync drops out.
pub fn monitor_sog(cx: &mut SyncContext) -> Result<(), SyncError> {
    if !cx.rt.sync_type_csync || cx.rt.input_is_component || cx.rt.new_mode_counter != 0 {
        return Ok(());
    }

    let irq = cx.board.interrupts()?;
    if irq.intersects(SyncInterrupts::SOG_BAD | SyncInterrupts::SOG_SWITCH) {
        reset_interrupt(cx, int_reset::SOG_SWITCH)?;
        let now = cx.board.millis();
        if now - cx.rt.sog_monitor.window_start_ms > SOG_WINDOW_MS {
            cx.rt.sog_monitor.restart(now);
        }
        cx.rt.last_vsync_lock_ms = now;
    }

    let in_window = cx.board.millis() - cx.rt.sog_monitor.window_start_ms < SOG_WINDOW_MS;
    if in_window {
        for i in 0..SOG_MONITOR_PROBES {
            if cx.board.sog_bad()? || !cx.board.sync_status()?.hs_active() {
                reset_interrupt(cx, int_reset::SOG_BAD)?;
                let start = match cx.rt.video_standard {
                    VideoStandard::Unknown => None,
                    _ => Some(cx.board.read(regs::HLOW_LEN)?),
                };
                for _ in 0..HLOW_MOVE_READS {
                    if Some(cx.board.read(regs::HLOW_LEN)?) != start {
                        cx.rt.sog_monitor.bad_hs += 1;
                        cx.rt.last_vsync_lock_ms = cx.board.millis();
                        break;
                    }
                }
            }
            if i % 3 == 0 {
                cx.board.delay_ms(1);
            }
        }

        let bad = cx.rt.sog_monitor.bad_hs;
        if bad >= SOG_BAD_HS_LIMIT {
            if cx.rt.sog_level >= 2 {
                lower_sog(cx)?;
                cx.rt.sog_monitor.adjusted = true;
            } else if bad > SOG_BAD_HS_REOPTIMIZE {
                optimize_sog_level(cx)?;
                cx.rt.sog_monitor.bad_hs = 0;
                cx.rt.sog_monitor.adjusted = true;
            }
            debug!(bad, sog = cx.rt.sog_level, "Preemptive SOG step");
            cx.rt.sog_monitor.window_start_ms = cx.board.millis();
        }
    } else if cx.rt.sog_monitor.adjusted {
        cx.rt.sog_monitor.adjusted = false;
        if cx.rt.sog_level >= SOG_EXPIRY_MIN_LEVEL {
            lower_sog(cx)?;
            cx.rt.phase_calibrated = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use gbs_hal::{SignalSource, SimulationDriver};

    fn context(source: SignalSource, standard: VideoStandard) -> (SyncContext, SimulationDriver) {
        let sim = SimulationDriver::new()
            .with_source(source)
            .with_synth_fitted(false);
        let mut cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
        cx.rt.video_standard = standard;
        cx.rt.source_disconnected = false;
        cx.rt.sync_type_csync = true;
        cx.rt.set_sog_level(10);
        sim.poke(regs::ADC_SOGCTRL, 10);
        (cx, sim)
    }

    #[test]
    fn first_stable_tick_unfreezes() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i(), VideoStandard::Ntsc);
        cx.rt.no_sync_counter = 5;
        cx.rt.output_frozen = true;
        run(&mut cx).unwrap();
        assert_eq!(cx.rt.continuous_stable_counter, 1);
        assert_eq!(cx.rt.no_sync_counter, 0);
        assert!(!cx.rt.output_frozen);
        assert_eq!(sim.peek(regs::CAPTURE_ENABLE), 1);
    }

    #[test]
    fn long_outage_defers_unfreeze_to_full_restore() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i(), VideoStandard::Ntsc);
        cx.rt.no_sync_counter = LONG_OUTAGE;
        cx.rt.output_frozen = true;
        run(&mut cx).unwrap();
        assert!(cx.rt.output_frozen);
        assert!(cx.rt.full_restore_pending);
        run(&mut cx).unwrap();
        assert!(!cx.rt.full_restore_pending);
        assert!(!cx.rt.output_frozen);
    }

    #[test]
    fn clamp_rechecked_at_45() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i(), VideoStandard::Ntsc);
        cx.rt.phase_calibrated = true;
        cx.rt.continuous_stable_counter = CLAMP_RECHECK_AT - 1;
        cx.rt.clamp_position_set = true;
        run(&mut cx).unwrap();
        assert!(!cx.rt.clamp_position_set);
    }

    #[test]
    fn even_line_count_enables_motion_adaptive() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i(), VideoStandard::Ntsc);
        cx.rt.phase_calibrated = true;
        cx.rt.continuous_stable_counter = DEINTERLACE_FROM;
        for _ in 0..3 {
            run(&mut cx).unwrap();
        }
        assert!(cx.rt.motion_adaptive_active);
        assert_eq!(sim.peek(regs::MAPDT_VT_SEL_PRGV), 0);
        // armed on the second even readout, counting that field and the next
        assert_eq!(cx.rt.deinterlace.timing_adjust_delay, TIMING_ADJUST_FIELDS - 2);
    }

    #[test]
    fn timing_adjust_counts_down_on_matching_parity() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i(), VideoStandard::Ntsc);
        cx.rt.phase_calibrated = true;
        cx.rt.continuous_stable_counter = DEINTERLACE_FROM;
        for _ in 0..3 {
            run(&mut cx).unwrap();
        }
        for _ in 0..TIMING_ADJUST_FIELDS - 2 {
            run(&mut cx).unwrap();
        }
        assert_eq!(cx.rt.deinterlace.timing_adjust_delay, 0);
    }

    #[test]
    fn bob_keeps_motion_adaptive_off() {
        let mut config = SyncConfig::default();
        config.options.deinterlace = DeinterlaceMode::Bob;
        let sim = SimulationDriver::new()
            .with_source(SignalSource::ntsc_480i())
            .with_synth_fitted(false);
        let mut cx = SyncContext::new(Box::new(sim.clone()), config);
        cx.rt.video_standard = VideoStandard::Ntsc;
        cx.rt.source_disconnected = false;
        cx.rt.phase_calibrated = true;
        cx.rt.motion_adaptive_active = true;
        cx.rt.continuous_stable_counter = DEINTERLACE_FROM;
        run(&mut cx).unwrap();
        assert!(!cx.rt.motion_adaptive_active);
        assert_eq!(sim.peek(regs::RUNTIME_FTL_ADJUSTED), 1);
    }

    #[test]
    fn noisy_sog_is_lowered_preemptively() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i().with_sog_noise(), VideoStandard::Ntsc);
        let start = cx.rt.sog_level;
        for _ in 0..4 {
            monitor_sog(&mut cx).unwrap();
        }
        assert!(cx.rt.sog_level < start);
        assert!(cx.rt.sog_monitor.adjusted);
        assert_eq!(sim.peek(regs::ADC_SOGCTRL), u16::from(cx.rt.sog_level));
    }

    #[test]
    fn monitor_ignores_component_input() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i().with_sog_noise(), VideoStandard::Ntsc);
        cx.rt.input_is_component = true;
        let writes = sim.write_count();
        monitor_sog(&mut cx).unwrap();
        assert_eq!(sim.write_count(), writes);
    }
}
