//! Sync processor maintenance.
//!
//! Small register sequences the watcher and the tuners compose: resets,
//! latches, freeze/unfreeze, coast and clamp placement, and the per-standard
//! sync-separator parameters.
//!
//! # Module Structure
//!
//! - resets and latches - `reset_sync_processor`, `reset_mode_detect`,
//!   `latch_pllad`, `reset_interrupt`
//! - output - `freeze`, `unfreeze`, `go_low_power`
//! - separator tuning - `update_sp_dynamic`, `update_coast_position`,
//!   `update_clamp_position`, `prepare_sync_processor`
//! - board health - `check_board_power`, `set_reset_parameters`

use crate::board::Board;
use crate::classifier::{hs_stable, video_mode};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::tuner::set_sog_level;
use gbs_common::consts::HTOTAL_MAX;
use gbs_common::hal::HalError;
use gbs_common::regs::{self, int_reset, test_bus};
use gbs_common::status::SyncStatus16;
use tracing::{debug, info, warn};

/// Value written to the spare register by the power self-test.
const POWER_PROBE: u16 = 0x6a;

/// Coast window defaults while sync is unknown.
pub const COAST_START_DEFAULT: u16 = 0x10;
pub const COAST_STOP_DEFAULT: u16 = 0x100;

/// Clamp window defaults.
const CLAMP_START_DEFAULT: u16 = 32;
const CLAMP_STOP_DEFAULT: u16 = 48;

/// Horizontal timer used while searching for sync.
const H_TIMER_SEARCH: u16 = 0x3a;

/// Largest horizontal pulse-ignore length.
const IGNORE_MAX: u16 = 0x90;
/// Ignore lengths in `IGNORE_SNAP_RANGE` collapse to its lower bound.
const IGNORE_SNAP_RANGE: std::ops::RangeInclusive<u16> = 0x1A..=0x42;

// ─── Resets And Latches ─────────────────────────────────────────────

pub fn reset_sync_processor(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::SFTRST_SYNC_RSTZ, 0)?;
    cx.board.delay_us(10);
    cx.board.write(regs::SFTRST_SYNC_RSTZ, 1)?;
    Ok(())
}

pub fn reset_mode_detect(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::SFTRST_MODE_RSTZ, 0)?;
    cx.board.delay_ms(1);
    cx.board.write(regs::SFTRST_MODE_RSTZ, 1)?;
    Ok(())
}

/// Latch new PLLAD divider settings.
pub fn latch_pllad(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::PLLAD_LAT, 0)?;
    cx.board.delay_us(128);
    cx.board.write(regs::PLLAD_LAT, 1)?;
    Ok(())
}

/// Flip the mode-detect vsync polarity to shake it out of a stuck state.
pub fn nudge_mode_detect(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.toggle(regs::MD_VS_FLIP)?;
    Ok(())
}

/// Acknowledge latched interrupt `bits` (see [`int_reset`]).
pub fn reset_interrupt(cx: &mut SyncContext, bits: u16) -> Result<(), SyncError> {
    cx.board.write(regs::INTERRUPT_CONTROL_00, bits)?;
    cx.board.write(regs::INTERRUPT_CONTROL_00, 0)?;
    Ok(())
}

// ─── Output ─────────────────────────────────────────────────────────

/// Stop capturing new frames; the output keeps showing the last one.
pub fn freeze(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::CAPTURE_ENABLE, 0)?;
    cx.rt.output_frozen = true;
    Ok(())
}

pub fn unfreeze(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::CAPTURE_ENABLE, 1)?;
    cx.rt.output_frozen = false;
    Ok(())
}

/// Power the output down and fall back to input scanning.
pub fn go_low_power(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.write(regs::OUT_SYNC_CNTRL, 0)?;
    cx.board.write(regs::DAC_RGBS_PWDNZ, 0)?;
    set_reset_parameters(cx)?;
    prepare_sync_processor(cx)?;
    cx.board.delay_ms(100);
    cx.rt.is_in_low_power_mode = true;
    info!("Scanning inputs for sources");
    Ok(())
}

// ─── Board Health ───────────────────────────────────────────────────

fn self_test(board: &mut Board) -> Result<bool, HalError> {
    board.write(regs::ADC_UNUSED_69, POWER_PROBE)?;
    let probe = board.read(regs::ADC_UNUSED_69)?;
    board.write(regs::ADC_UNUSED_69, 0)?;
    let cleared = board.read(regs::ADC_UNUSED_69)?;
    Ok(probe == POWER_PROBE && cleared == 0)
}

/// Register write/read-back self-test.
///
/// A failure latches `board_has_power = false`; the first passing test after
/// that reinitializes the sync processor.
pub fn check_board_power(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let ok = self_test(&mut cx.board).unwrap_or_else(|e| {
        debug!("Self-test bus error: {e}");
        false
    });

    if !ok {
        cx.board.invalidate_segment();
        if cx.rt.board_has_power {
            warn!("Board not responding");
            cx.rt.board_has_power = false;
            cx.rt.continuous_stable_counter = 0;
        }
        return Ok(false);
    }

    if !cx.rt.board_has_power {
        info!("Board power restored");
        cx.rt.board_has_power = true;
        set_reset_parameters(cx)?;
        prepare_sync_processor(cx)?;
    }
    Ok(true)
}

/// Return the chip and the runtime state to their power-on defaults.
pub fn set_reset_parameters(cx: &mut SyncContext) -> Result<(), SyncError> {
    info!("Resetting sync parameters");
    cx.rt.reset();

    let b = &mut cx.board;
    b.write(regs::ADC_UNUSED_64, 0)?;
    b.write(regs::ADC_UNUSED_67, 0)?;
    b.write(regs::OPTION_SCALING_RGBHV, 0)?;
    b.write(regs::OPTION_PALFORCED60, 0)?;
    b.write(regs::RUNTIME_FTL_ADJUSTED, 0)?;
    b.write(regs::OUT_SYNC_CNTRL, 0)?;
    b.write(regs::DAC_RGBS_PWDNZ, 0)?;
    b.write(regs::ADC_SOGEN, 1)?;
    b.write(regs::SP_SOG_MODE, 1)?;
    b.write(regs::ADC_INPUT_SEL, 1)?;
    b.write(regs::PLL648_CONTROL_01, 0)?;
    b.write(regs::PAD_CKIN_ENZ, 0)?;
    b.write(regs::PLLAD_VCORST, 1)?;
    b.write(regs::SP_PRE_COAST, 9)?;
    b.write(regs::SP_POST_COAST, 18)?;
    b.write(regs::SP_NO_COAST_REG, 0)?;
    b.write(regs::SP_CS_CLP_ST, CLAMP_START_DEFAULT)?;
    b.write(regs::SP_CS_CLP_SP, CLAMP_STOP_DEFAULT)?;
    b.write(regs::SP_EXT_SYNC_SEL, 0)?;
    b.write(regs::SP_NO_CLAMP_REG, 1)?;
    b.write(regs::PLLAD_ICP, 0)?;
    b.write(regs::PLLAD_FS, 0)?;
    b.write(regs::PLLAD_MD, 0x700)?;
    b.write(regs::MD_HD1250P_CNTRL, u16::from(cx.rt.med_res_line_count))?;
    b.write(regs::SFTRST_SYNC_RSTZ, 1)?;
    b.write(regs::SFTRST_MODE_RSTZ, 1)?;

    let level = cx.rt.sog_level;
    set_sog_level(cx, level)?;
    reset_interrupt(cx, int_reset::ALL)?;
    Ok(())
}

/// Sync separator defaults for the current standard.
pub fn prepare_sync_processor(cx: &mut SyncContext) -> Result<(), SyncError> {
    let std = cx.rt.standard_id();
    let b = &mut cx.board;
    b.write(regs::SP_SOG_P_ATO, 0)?;
    b.write(regs::SP_H_TIMER_VAL, H_TIMER_SEARCH)?;
    let dlt = match std {
        0 => 0x70,
        1..=4 => 0xC0,
        5 | 6 => 0xA0,
        _ => 0x70,
    };
    b.write(regs::SP_DLT_REG, dlt)?;
    b.write(
        regs::SP_H_PULSE_IGNOR,
        if std == 1 || std == 2 { 0x6b } else { 0x02 },
    )?;
    b.write(regs::SP_SDCS_VSST_H, 0)?;
    b.write(regs::SP_SDCS_VSSP_H, 0)?;
    b.write(regs::SP_SDCS_VSST_L, 4)?;
    b.write(regs::SP_SDCS_VSSP_L, 1)?;

    let scaling_rgbhv = b.read(regs::OPTION_SCALING_RGBHV)? == 1;
    if std != 15 && !scaling_rgbhv {
        b.write(regs::SP_CLAMP_MANUAL, 0)?;
        b.write(regs::SP_NO_CLAMP_REG, 1)?;
        b.write(regs::SP_SOG_MODE, 1)?;
        b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
        b.write(regs::SP_H_CST_SP, COAST_STOP_DEFAULT)?;
        b.write(regs::SP_H_PROTECT, 1)?;
        b.write(regs::SP_HCST_AUTO_EN, 0)?;
        b.write(regs::SP_NO_COAST_REG, 0)?;
    }
    Ok(())
}

// ─── Oversampling ───────────────────────────────────────────────────

/// Set the ADC oversampling ratio, limited by the PLLAD post divider.
///
/// Returns the ratio actually applied.
pub fn set_over_sample_ratio(cx: &mut SyncContext, requested: u8) -> Result<u8, SyncError> {
    let ks = cx.board.read(regs::PLLAD_KS)?;
    let osr = match requested {
        4 if ks >= 2 => 4,
        4 | 2 if ks >= 1 => 2,
        _ => 1,
    };
    let (iclk2x, iclk1x, dec1, dec2) = match osr {
        4 => (0, 0, 0, 0),
        2 => (0, 1, 1, 0),
        _ => (1, 1, 1, 1),
    };
    cx.board.write(regs::ADC_CLK_ICLK2X, iclk2x)?;
    cx.board.write(regs::ADC_CLK_ICLK1X, iclk1x)?;
    cx.board.write(regs::DEC1_BYPS, dec1)?;
    cx.board.write(regs::DEC2_BYPS, dec2)?;
    cx.rt.osr = osr;
    latch_pllad(cx)?;
    debug!(requested, osr, ks, "Oversampling ratio");
    Ok(osr)
}

// ─── Separator Parameters ───────────────────────────────────────────

/// Refresh the sync separator parameters for the detected standard.
///
/// With `with_mode_check` and no mode detected, installs the search
/// parameters instead (detection level alternating on the no-sync counter).
pub fn update_sp_dynamic(cx: &mut SyncContext, with_mode_check: bool) -> Result<(), SyncError> {
    if !cx.rt.board_has_power || cx.rt.source_disconnected {
        return Ok(());
    }

    let mut mode = video_mode(cx)?;
    if mode == 0 {
        mode = video_mode(cx)?;
    }
    let std = cx.rt.standard_id();
    let csync = cx.rt.sync_type_csync;

    if std == 0 && mode == 0 {
        let dlt = cx.board.read(regs::SP_DLT_REG)?;
        cx.board
            .write(regs::SP_DLT_REG, if dlt > 0x30 { 0x30 } else { 0xC0 })?;
        return Ok(());
    }

    if mode == 0 && with_mode_check {
        let dlt = if cx.rt.no_sync_counter % 16 <= 8 {
            0x30
        } else {
            0xC0
        };
        let b = &mut cx.board;
        b.write(regs::SP_DLT_REG, dlt)?;
        b.write(regs::SP_H_PULSE_IGNOR, 0x02)?;
        b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
        b.write(regs::SP_H_CST_SP, COAST_STOP_DEFAULT)?;
        b.write(regs::SP_H_COAST, 0)?;
        b.write(regs::SP_H_TIMER_VAL, H_TIMER_SEARCH)?;
        if csync {
            b.write(regs::SP_COAST_INV_REG, 1)?;
        }
        cx.rt.coast_position_set = false;
        return Ok(());
    }

    if csync {
        cx.board.write(regs::SP_COAST_INV_REG, 0)?;
    }

    match std {
        1 | 2 => {
            write_sp_set(&mut cx.board, 7, 3, 0xC0, None)?;
            cx.board.write(regs::SP_H_TIMER_VAL, 0x28)?;
            if csync {
                update_csync_ignore_length(cx)?;
            }
        }
        3 | 4 | 8 => write_sp_set(&mut cx.board, 7, 6, 0xA0, Some(0x0E))?,
        5 => write_sp_set(&mut cx.board, 7, 7, 0x30, Some(0x08))?,
        6 | 7 => write_sp_set(&mut cx.board, 9, 18, 0x70, Some(0x06))?,
        s if s >= 13 && !csync => write_sp_set(&mut cx.board, 0, 0, 0, Some(0xff))?,
        s if s >= 13 => write_sp_set(&mut cx.board, 4, 7, 0x70, Some(0x02))?,
        _ => {}
    }
    Ok(())
}

fn write_sp_set(
    b: &mut Board,
    pre: u16,
    post: u16,
    dlt: u16,
    ignore: Option<u16>,
) -> Result<(), SyncError> {
    b.write_if_changed(regs::SP_PRE_COAST, pre)?;
    b.write_if_changed(regs::SP_POST_COAST, post)?;
    b.write_if_changed(regs::SP_DLT_REG, dlt)?;
    if let Some(ignore) = ignore {
        b.write_if_changed(regs::SP_H_PULSE_IGNOR, ignore)?;
    }
    Ok(())
}

/// Pulse-ignore length for composite SD sync, from the line period and the
/// measured sync-tip to line ratio.
fn update_csync_ignore_length(cx: &mut SyncContext) -> Result<(), SyncError> {
    let b = &mut cx.board;
    let mut hperiod = b.read(regs::HPERIOD_IF)?;
    let mut tries = 0;
    while (hperiod == 511 || hperiod < 200) && tries < 16 {
        b.delay_us(100);
        hperiod = b.read(regs::HPERIOD_IF)?;
        tries += 1;
    }
    if hperiod == 511 || hperiod < 200 {
        hperiod = 300;
    }
    // exactly 200 is an SD line period that overflowed
    let base: u16 = if hperiod <= 200 {
        0x18
    } else {
        (f32::from(hperiod) * 0.081) as u16
    };

    let mut ok = 0u8;
    let mut sum = 0.0f32;
    for _ in 0..30 {
        let htotal = f32::from(b.read(regs::SYNC_PROC_HTOTAL)?);
        let hlow = f32::from(b.read(regs::HLOW_LEN)?);
        let ratio = hlow / (htotal + 1.0);
        if (0.041..=0.152).contains(&ratio) {
            ok += 1;
            sum += ratio;
        }
    }
    let ratio = if ok >= 12 { sum / f32::from(ok) } else { 0.032 };
    let md = f32::from(b.read(regs::PLLAD_MD)?);
    let ignore = f32::from(base) + md * ratio * 0.38;

    let mut ignore = (ignore as u16).min(IGNORE_MAX);
    if IGNORE_SNAP_RANGE.contains(&ignore) {
        ignore = *IGNORE_SNAP_RANGE.start();
    }
    if b.read(regs::SP_H_PULSE_IGNOR)? != ignore {
        b.write(regs::SP_H_PULSE_IGNOR, ignore)?;
        cx.rt.coast_position_set = false;
        debug!(ignore, ratio, hperiod, "Pulse ignore length");
    }
    Ok(())
}

/// Place the horizontal coast window from the measured line period.
///
/// `auto` lets the separator track the window itself.
pub fn update_coast_position(cx: &mut SyncContext, auto: bool) -> Result<(), SyncError> {
    let std = cx.rt.standard_id();
    if std == 0 || std > 14 || !cx.rt.board_has_power || cx.rt.source_disconnected {
        return Ok(());
    }

    let first = cx.board.read(regs::HPERIOD_IF)?;
    let mut acc = 0u32;
    for _ in 0..8 {
        let v = cx.board.read(regs::HPERIOD_IF)?;
        if !hs_stable(cx)? || v.abs_diff(first) > 3 {
            return Ok(());
        }
        acc += u32::from(v);
    }
    acc = acc * 4 / 8;
    if acc >= 2040 {
        acc = 1716;
    }

    if acc <= 240 {
        let vt = cx.board.read(regs::VTOTAL)?;
        let vt2 = cx.board.read(regs::VTOTAL)?;
        if vt <= 322 && vt2 <= 322 {
            acc = 2000;
            if cx.rt.video_standard.is_sd() && cx.rt.sync_type_csync {
                let icp = cx.board.read(regs::PLLAD_ICP)?;
                let fs = cx.board.read(regs::PLLAD_FS)?;
                if icp >= 5 && fs == 1 {
                    cx.board.write(regs::PLLAD_ICP, 5)?;
                    cx.board.write(regs::PLLAD_FS, 0)?;
                    latch_pllad(cx)?;
                    cx.rt.phase_calibrated = false;
                }
            }
        }
    }

    if acc > 32 {
        let acc = acc as f32;
        let b = &mut cx.board;
        if auto {
            b.write(regs::SP_H_CST_ST, (acc * 0.0562) as u16)?;
            b.write(regs::SP_H_CST_SP, (acc * 0.1550) as u16)?;
            b.write(regs::SP_HCST_AUTO_EN, 1)?;
        } else {
            b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
            b.write(regs::SP_H_CST_SP, (acc * 0.968) as u16)?;
            b.write(regs::SP_HCST_AUTO_EN, 0)?;
        }
        cx.rt.coast_position_set = true;
    }
    Ok(())
}

/// Place the clamp window from the measured line length.
pub fn update_clamp_position(cx: &mut SyncContext) -> Result<(), SyncError> {
    if cx.rt.standard_id() == 0 || video_mode(cx)? == 0 {
        return Ok(());
    }
    let component = cx.rt.input_is_component;
    let csync = cx.rt.sync_type_csync;
    cx.board
        .write(regs::SP_CLAMP_MANUAL, if component { 0 } else { 1 })?;

    let source = if csync {
        regs::HPERIOD_IF
    } else {
        regs::SYNC_PROC_HTOTAL
    };
    let first = cx.board.read(source)?;
    let mut acc = 0u32;
    for _ in 0..16 {
        let v = cx.board.read(source)?;
        if !hs_stable(cx)? || v.abs_diff(first) > 3 {
            return Ok(());
        }
        acc += u32::from(v);
        cx.board.delay_us(100);
    }
    let acc = acc / 16;
    if acc > u32::from(HTOTAL_MAX) {
        return Ok(());
    }

    let acc = acc as f32;
    let (start_mult, stop_mult) = match (csync, component) {
        (true, false) => (0.032, 0.174),
        (true, true) => (0.089, 0.174),
        (false, false) => (0.010, 0.058),
        (false, true) => (0.032, 0.058),
    };
    let start = (1.0 + acc * start_mult) as u16;
    let stop = (2.0 + acc * stop_mult) as u16;

    let cur_start = cx.board.read(regs::SP_CS_CLP_ST)?;
    let cur_stop = cx.board.read(regs::SP_CS_CLP_SP)?;
    if start.abs_diff(cur_start) > 1 || stop.abs_diff(cur_stop) > 1 {
        cx.board.write(regs::SP_CS_CLP_ST, start)?;
        cx.board.write(regs::SP_CS_CLP_SP, stop)?;
        debug!(start, stop, "Clamp window");
    }
    cx.rt.clamp_position_set = true;
    Ok(())
}

// ─── Sync Edges ─────────────────────────────────────────────────────

/// Align the bypass sync outputs with the polarity of the incoming sync.
pub fn update_hv_sync_edge(cx: &mut SyncContext) -> Result<(), SyncError> {
    if cx.board.sog_bad()? {
        reset_interrupt(cx, int_reset::SOG_BAD)?;
        return Ok(());
    }
    let status = cx.board.sync_status()?;
    let csync = cx.rt.sync_type_csync;
    if csync && !status.hs_active() {
        return Ok(());
    }
    if !csync && !status.contains(SyncStatus16::HV_ACTIVE) {
        return Ok(());
    }

    let hs_high = status.contains(SyncStatus16::HS_POLARITY_HIGH);
    let swapped = orient_pulse(&mut cx.board, regs::HD_HS_ST, regs::HD_HS_SP, hs_high)?;
    if swapped {
        cx.board
            .write(regs::SP_HS2PLL_INV_REG, if hs_high { 0 } else { 1 })?;
    }
    if cx.rt.hs_polarity_high != Some(hs_high) {
        info!(active_high = hs_high, "HSync polarity");
        cx.rt.hs_polarity_high = Some(hs_high);
    }

    if !csync {
        let vs_high = status.contains(SyncStatus16::VS_POLARITY_HIGH);
        orient_pulse(&mut cx.board, regs::HD_VS_ST, regs::HD_VS_SP, vs_high)?;
        if cx.rt.vs_polarity_high != Some(vs_high) {
            info!(active_high = vs_high, "VSync polarity");
            cx.rt.vs_polarity_high = Some(vs_high);
        }
    }
    Ok(())
}

/// Swap start/stop so the pulse matches `active_high`; true when swapped.
fn orient_pulse(
    b: &mut Board,
    start: regs::Field,
    stop: regs::Field,
    active_high: bool,
) -> Result<bool, SyncError> {
    let st = b.read(start)?;
    let sp = b.read(stop)?;
    let wrong = if active_high { st > sp } else { st < sp };
    if wrong {
        b.write(start, sp)?;
        b.write(stop, st)?;
    }
    Ok(wrong)
}

// ─── SOG Quick Fix ──────────────────────────────────────────────────

/// Drop the SOG level in steps of two until the sync processor counts lines.
///
/// Only runs early in an outage (no-sync counter ≤ 5); below level 4 it
/// restarts from 13.
pub fn fast_sog_adjust(cx: &mut SyncContext) -> Result<(), SyncError> {
    if cx.rt.no_sync_counter > 5 {
        return Ok(());
    }
    let saved_bus = cx.board.read(regs::TEST_BUS_SEL)?;
    let saved_sp = cx.board.read(regs::TEST_BUS_SP_SEL)?;
    cx.board
        .write_if_changed(regs::TEST_BUS_SEL, test_bus::SYNC_PROCESSOR)?;
    cx.board
        .write_if_changed(regs::TEST_BUS_SP_SEL, test_bus::SP_VSYNC)?;

    while cx.board.read(regs::TEST_BUS_2F)? & 0x05 != 0x05 {
        if cx.rt.sog_level >= 4 {
            let level = cx.rt.sog_level - 2;
            set_sog_level(cx, level)?;
            cx.board.delay_ms(28);
        } else {
            set_sog_level(cx, 13)?;
            cx.board.delay_ms(40);
            break;
        }
    }

    cx.board.write_if_changed(regs::TEST_BUS_SEL, saved_bus)?;
    cx.board.write_if_changed(regs::TEST_BUS_SP_SEL, saved_sp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use gbs_common::video::VideoStandard;
    use gbs_hal::{SignalSource, SimulationDriver};

    fn context(source: SignalSource) -> (SyncContext, SimulationDriver) {
        let sim = SimulationDriver::new().with_source(source);
        let cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
        (cx, sim)
    }

    #[test]
    fn power_loss_and_restore() {
        let (mut cx, sim) = context(SignalSource::none());
        assert!(check_board_power(&mut cx).unwrap());

        sim.set_powered(false);
        assert!(!check_board_power(&mut cx).unwrap());
        assert!(!cx.rt.board_has_power);

        sim.set_powered(true);
        assert!(check_board_power(&mut cx).unwrap());
        assert!(cx.rt.board_has_power);
        assert_eq!(sim.peek(regs::SP_PRE_COAST), 9);
    }

    #[test]
    fn freeze_and_unfreeze_track_latch() {
        let (mut cx, sim) = context(SignalSource::none());
        freeze(&mut cx).unwrap();
        assert!(cx.rt.output_frozen);
        assert_eq!(sim.peek(regs::CAPTURE_ENABLE), 0);
        unfreeze(&mut cx).unwrap();
        assert!(!cx.rt.output_frozen);
        assert_eq!(sim.peek(regs::CAPTURE_ENABLE), 1);
    }

    #[test]
    fn oversampling_limited_by_post_divider() {
        let (mut cx, sim) = context(SignalSource::none());
        sim.poke(regs::PLLAD_KS, 1);
        assert_eq!(set_over_sample_ratio(&mut cx, 4).unwrap(), 2);
        assert_eq!(sim.peek(regs::DEC2_BYPS), 0);
        sim.poke(regs::PLLAD_KS, 0);
        assert_eq!(set_over_sample_ratio(&mut cx, 2).unwrap(), 1);
        assert_eq!(cx.rt.osr, 1);
        sim.poke(regs::PLLAD_KS, 2);
        assert_eq!(set_over_sample_ratio(&mut cx, 4).unwrap(), 4);
    }

    #[test]
    fn search_parameters_without_mode() {
        let (mut cx, sim) = context(SignalSource::none());
        cx.rt.video_standard = VideoStandard::Ntsc;
        cx.rt.source_disconnected = false;
        cx.rt.sync_type_csync = true;
        cx.rt.no_sync_counter = 9;
        update_sp_dynamic(&mut cx, true).unwrap();
        assert_eq!(sim.peek(regs::SP_DLT_REG), 0xC0);
        assert_eq!(sim.peek(regs::SP_H_PULSE_IGNOR), 0x02);
        assert_eq!(sim.peek(regs::SP_COAST_INV_REG), 1);
        assert!(!cx.rt.coast_position_set);
    }

    #[test]
    fn sd_csync_parameters() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i());
        cx.rt.video_standard = VideoStandard::Ntsc;
        cx.rt.source_disconnected = false;
        cx.rt.sync_type_csync = true;
        sim.poke(regs::PLLAD_MD, 2345);
        update_sp_dynamic(&mut cx, false).unwrap();
        assert_eq!(sim.peek(regs::SP_PRE_COAST), 7);
        assert_eq!(sim.peek(regs::SP_POST_COAST), 3);
        assert_eq!(sim.peek(regs::SP_H_TIMER_VAL), 0x28);
        let ignore = sim.peek(regs::SP_H_PULSE_IGNOR);
        assert!(ignore > 0x42 && ignore <= 0x90, "ignore {ignore:#x}");
    }

    #[test]
    fn coast_window_from_line_period() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i());
        cx.rt.video_standard = VideoStandard::Ntsc;
        cx.rt.source_disconnected = false;
        update_coast_position(&mut cx, false).unwrap();
        assert!(cx.rt.coast_position_set);
        assert_eq!(sim.peek(regs::SP_H_CST_ST), COAST_START_DEFAULT);
        // HPERIOD_IF 429 -> 1716 x 0.968
        assert_eq!(sim.peek(regs::SP_H_CST_SP), 1661);

        update_coast_position(&mut cx, true).unwrap();
        assert_eq!(sim.peek(regs::SP_HCST_AUTO_EN), 1);
        assert_eq!(sim.peek(regs::SP_H_CST_ST), 96);
    }

    #[test]
    fn clamp_window_written_once() {
        let (mut cx, sim) = context(SignalSource::vga_hv());
        cx.rt.video_standard = VideoStandard::RgbHvBypass;
        cx.rt.source_disconnected = false;
        sim.poke(regs::PLLAD_MD, 800);
        update_clamp_position(&mut cx).unwrap();
        assert!(cx.rt.clamp_position_set);
        assert_eq!(sim.peek(regs::SP_CS_CLP_ST), 9);
        assert_eq!(sim.peek(regs::SP_CS_CLP_SP), 48);

        let writes = sim.write_count();
        update_clamp_position(&mut cx).unwrap();
        // only the manual clamp bit is rewritten
        assert_eq!(sim.write_count(), writes + 1);
    }

    #[test]
    fn fast_sog_adjust_leaves_working_level() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i());
        set_sog_level(&mut cx, 8).unwrap();
        fast_sog_adjust(&mut cx).unwrap();
        assert_eq!(cx.rt.sog_level, 8);
    }

    #[test]
    fn fast_sog_adjust_steps_down_into_window() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i().with_sog_window(2, 6));
        set_sog_level(&mut cx, 10).unwrap();
        fast_sog_adjust(&mut cx).unwrap();
        assert_eq!(cx.rt.sog_level, 6);
        assert_eq!(sim.peek(regs::ADC_SOGCTRL), 6);
    }

    #[test]
    fn hv_sync_edge_orients_negative_hsync() {
        let (mut cx, sim) = context(SignalSource::vga_hv());
        sim.poke(regs::HD_HS_ST, 10);
        sim.poke(regs::HD_HS_SP, 100);
        update_hv_sync_edge(&mut cx).unwrap();
        assert_eq!(sim.peek(regs::HD_HS_ST), 100);
        assert_eq!(sim.peek(regs::HD_HS_SP), 10);
        assert_eq!(sim.peek(regs::SP_HS2PLL_INV_REG), 1);
        assert_eq!(cx.rt.hs_polarity_high, Some(false));
    }
}
