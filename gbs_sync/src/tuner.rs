//! Analog front-end tuning.
//!
//! SOG slice level search and sampling phase calibration. Both sweep a
//! register while watching a status readout, so each keeps its probe loop
//! short and restores whatever it borrowed from the debug bus.

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::sync_processor::latch_pllad;
use gbs_common::regs::{self, int_reset, test_bus};
use heapless::Deque;
use tracing::{debug, info, warn};

/// Phase steps swept by the calibration; one full turn plus overlap.
pub const PHASE_SWEEP_STEPS: u8 = 34;
/// `SYNC_PROC_HTOTAL` reads per phase step.
const PHASE_READS_PER_STEP: u8 = 20;
/// Allowed distance between the measured line length and the PLL divider.
const HTOTAL_MATCH_TOLERANCE: u16 = 8;
/// Neutral sampling phase.
pub const PHASE_CENTER: u8 = 16;

const SOG_START_RGB: u8 = 13;
const SOG_START_COMPONENT: u8 = 14;

// ─── SOG Level ──────────────────────────────────────────────────────

fn latch_phase_sp(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::PA_SP_S, u16::from(cx.rt.phase_sp))?;
    cx.board.write(regs::PA_SP_LAT, 0)?;
    cx.board.write(regs::PA_SP_LAT, 1)?;
    Ok(())
}

fn latch_phase_adc(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::PA_ADC_S, u16::from(cx.rt.phase_adc))?;
    cx.board.write(regs::PA_ADC_LAT, 0)?;
    cx.board.write(regs::PA_ADC_LAT, 1)?;
    Ok(())
}

/// Program a SOG level and relatch everything that samples behind it.
///
/// Changing the slice level disturbs the phase latches and the PLLAD, and
/// usually trips the SOG interrupts, so all of those are refreshed here.
pub fn set_sog_level(cx: &mut SyncContext, level: u8) -> Result<(), SyncError> {
    cx.rt.set_sog_level(level);
    cx.board.write(regs::ADC_SOGCTRL, u16::from(cx.rt.sog_level))?;
    latch_phase_sp(cx)?;
    latch_phase_adc(cx)?;
    latch_pllad(cx)?;
    cx.board.write(regs::INTERRUPT_CONTROL_00, int_reset::ALL)?;
    cx.board.write(regs::INTERRUPT_CONTROL_00, 0)?;
    Ok(())
}

/// Count horizontal sync activity for one observation window.
fn hs_window_hits(cx: &mut SyncContext) -> Result<u16, SyncError> {
    let target = cx.tuning().sog_window_hits;
    let window = u64::from(cx.tuning().sog_window_ms);
    let start = cx.board.millis();
    let mut hits: u16 = 0;
    while hits < target && cx.board.millis() - start < window {
        if cx.board.sync_status()?.hs_active() {
            hits += 1;
        } else if hits >= 4 {
            hits -= 3;
        }
    }
    Ok(hits)
}

/// Confirm a candidate level with a burst of status reads.
///
/// The first read without sliced sync ends the burst and rejects the level.
fn sog_level_confirmed(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let reads = cx.tuning().sog_confirm_reads;
    let needed = cx.tuning().sog_confirm_min;
    let mut good = 0u8;
    for _ in 0..reads {
        let hs = cx.board.sync_status()?.hs_active();
        if !hs || cx.board.read(regs::TEST_BUS_2F)? == 0 {
            return Ok(false);
        }
        good += 1;
    }
    Ok(good >= needed)
}

/// Walk the SOG level down from the top until sync is sliced cleanly.
///
/// Sources without composite sync get the top level directly. The level
/// found becomes the source maximum for the preemptive SOG monitor.
pub fn optimize_sog_level(cx: &mut SyncContext) -> Result<u8, SyncError> {
    let bypass = cx.rt.video_standard == gbs_common::video::VideoStandard::RgbHvBypass;
    if !cx.rt.board_has_power
        || bypass
        || cx.board.read(regs::SP_SOG_MODE)? != 1
        || !cx.rt.sync_type_csync
    {
        set_sog_level(cx, SOG_START_RGB)?;
        cx.rt.source_max_sog = SOG_START_RGB;
        return Ok(SOG_START_RGB);
    }

    let start = if cx.rt.input_is_component {
        SOG_START_COMPONENT
    } else {
        SOG_START_RGB
    };
    let saved_bus = cx.board.read(regs::TEST_BUS_SEL)?;
    let saved_sp = cx.board.read(regs::TEST_BUS_SP_SEL)?;
    cx.board.write_if_changed(regs::TEST_BUS_SEL, test_bus::SYNC_PROCESSOR)?;
    cx.board.write_if_changed(regs::TEST_BUS_SP_SEL, test_bus::SP_VSYNC)?;
    cx.board.write(regs::TEST_BUS_EN, 1)?;
    set_sog_level(cx, start)?;
    cx.board.delay_ms(100);

    let target = cx.tuning().sog_window_hits;
    let mut steps = 0u8;
    loop {
        if hs_window_hits(cx)? >= target && cx.board.read(regs::TEST_BUS_2F)? > 0 {
            cx.board.delay_ms(20);
            if sog_level_confirmed(cx)? {
                break;
            }
        }
        if cx.rt.sog_level >= 2 {
            let level = cx.rt.sog_level - 1;
            set_sog_level(cx, level)?;
            cx.board.delay_ms(8);
            steps += 1;
        } else {
            warn!("No clean SOG level found");
            set_sog_level(cx, SOG_START_RGB)?;
            break;
        }
    }

    cx.rt.source_max_sog = cx.rt.sog_level.max(1);
    cx.board.write_if_changed(regs::TEST_BUS_SEL, saved_bus)?;
    cx.board.write_if_changed(regs::TEST_BUS_SP_SEL, saved_sp)?;
    info!(level = cx.rt.sog_level, steps, "SOG level");
    Ok(cx.rt.sog_level)
}

// ─── Sampling Phase ─────────────────────────────────────────────────

/// ADC phase offset for the oversampling configuration in use.
///
/// Oversampled SD is always turned half a cycle. HD at OSR 2 only is when the
/// sweep found jitter to steer around.
fn adc_phase_adjust(cx: &SyncContext, jitter_found: bool) -> u8 {
    let std = cx.rt.video_standard;
    match cx.rt.osr {
        4 if std.is_sd_or_edtv() => 16,
        2 if std.is_hd() && jitter_found => 16,
        _ => 0,
    }
}

fn apply_phases(cx: &mut SyncContext, sp: u8, adc: u8) -> Result<(), SyncError> {
    cx.rt.set_phases(sp, adc);
    latch_phase_sp(cx)?;
    cx.board.delay_ms(1);
    latch_phase_adc(cx)?;
    Ok(())
}

/// Find the sync-processor sampling phase farthest from line-length jitter.
///
/// Sweeps every phase, scoring each by how often `SYNC_PROC_HTOTAL` disagrees
/// with the PLL divider. The worst three-step window is located and the phase
/// is placed half a turn away. Too few clean steps means the clock itself is
/// unstable: the prior phases are restored and `false` returned.
pub fn optimize_phase_sp(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let md = cx.board.read(regs::PLLAD_MD)?;
    let htotal = cx.board.read(regs::SYNC_PROC_HTOTAL)?;
    if htotal.abs_diff(md) > HTOTAL_MATCH_TOLERANCE {
        debug!(htotal, md, "Phase calibration skipped, line length off");
        return Ok(false);
    }

    if cx.rt.sog_level <= 2 {
        let adc = PHASE_CENTER + adc_phase_adjust(cx, false);
        apply_phases(cx, PHASE_CENTER, adc)?;
        return Ok(true);
    }

    let prior = (cx.rt.phase_sp, cx.rt.phase_adc);
    let min_clean = cx.tuning().phase_min_clean_steps;
    let mut window: Deque<u8, 3> = Deque::new();
    let mut worst_sum = 0u16;
    let mut worst_phase = 0u8;
    let mut clean_steps = 0u8;

    for _ in 0..PHASE_SWEEP_STEPS {
        let phase = cx.rt.phase_sp.wrapping_add(1);
        cx.rt.set_phases(phase, cx.rt.phase_adc);
        latch_phase_sp(cx)?;

        let mut bad = 0u8;
        for _ in 0..PHASE_READS_PER_STEP {
            if cx.board.read(regs::SYNC_PROC_HTOTAL)? != md {
                bad += 1;
            }
        }
        if bad == 0 {
            clean_steps += 1;
        }
        if window.is_full() {
            window.pop_front();
        }
        window.push_back(bad).ok();
        let sum: u16 = window.iter().map(|b| u16::from(*b)).sum();
        if sum > worst_sum {
            worst_sum = sum;
            worst_phase = cx.rt.phase_sp.wrapping_sub(1);
        }
    }

    if clean_steps < min_clean {
        warn!(clean_steps, "Phase calibration failed, pixel clock unstable");
        apply_phases(cx, prior.0, prior.1)?;
        return Ok(false);
    }

    let sp = if worst_sum == 0 {
        PHASE_CENTER
    } else {
        worst_phase.wrapping_add(PHASE_CENTER)
    };
    let adc = PHASE_CENTER + adc_phase_adjust(cx, worst_sum != 0);
    apply_phases(cx, sp, adc)?;
    info!(
        phase_sp = cx.rt.phase_sp,
        phase_adc = cx.rt.phase_adc,
        clean_steps,
        "Sampling phase"
    );
    Ok(true)
}
