//! RGB/HV sub-machine.
//!
//! Separate-sync and CSync-on-HS sources bypass mode detection. Their
//! stability comes from the sync status bits, their line count decides
//! between upscaling (at most 535 lines) and plain bypass, and the measured
//! H-PLL rate picks the PLL gain settings in bypass.

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::clock_gen;
use crate::preset::apply_presets;
use crate::pulse_timer::{pll_rate, source_field_rate};
use crate::sync_processor::{
    COAST_START_DEFAULT, latch_pllad, prepare_sync_processor, reset_interrupt, reset_mode_detect,
    reset_sync_processor, set_over_sample_ratio, set_reset_parameters, update_hv_sync_edge,
    update_sp_dynamic,
};
use gbs_common::consts::DISPLAY_CLOCK_EXTERNAL;
use gbs_common::regs::{self, int_reset};
use gbs_common::status::{ModeStatus00, SyncStatus16};
use gbs_common::video::VideoStandard;
use tracing::{debug, info};

/// Line counts above this stay in bypass.
pub const UPSCALE_MAX_LINES: u16 = 535;
/// Unstable ticks tolerated for composite sync before a reset.
pub const CSYNC_NO_SYNC_LIMIT: u16 = 200;
/// Unstable ticks tolerated for separate sync before a reset.
pub const HV_NO_SYNC_LIMIT: u16 = 300;
/// Interval of the H-PLL rate and sync edge check.
pub const PLL_CHECK_INTERVAL_MS: u64 = 900;
/// Runs with SOG reporting bad sync before switching to composite handling.
pub const SOG_BAD_RUNS_TO_CSYNC: u8 = 4;

const LINE_SETTLE_READS: u8 = 30;
const LINE_TOLERANCE: u16 = 3;
const STABLE_SP_REFRESH_AT: u8 = 6;
const PLL_RATE_VALID: std::ops::Range<u32> = 101..7500;
const PLL_RATE_HYSTERESIS: u32 = 3;

/// H-PLL rate bucket boundaries.
const HPLL_BUCKETS: [u32; 4] = [1030, 2300, 3200, 3800];
/// (KS, FS, ICP) per H-PLL bucket 1..=5.
const HPLL_SETTINGS: [(u16, u16, u16); 5] = [(2, 0, 6), (1, 0, 6), (1, 1, 6), (0, 0, 6), (0, 1, 6)];

/// Bucket 1..=5 for a measured H-PLL rate.
pub fn hpll_bucket(rate: u32) -> u8 {
    HPLL_BUCKETS.iter().take_while(|&&limit| rate >= limit).count() as u8 + 1
}

/// Base standard whose preset an upscaled source is loaded with.
pub fn upscale_base(lines: u16, field_rate_hz: f32) -> VideoStandard {
    if lines < 280 {
        VideoStandard::Ntsc
    } else if lines < 380 {
        VideoStandard::Pal
    } else if field_rate_hz > 44.0 && field_rate_hz < 53.8 {
        VideoStandard::EdtvPal50
    } else {
        VideoStandard::EdtvNtsc60
    }
}

/// Bookkeeping owned by the watcher across ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RgbHvWatch {
    /// Line count the upscale preset was chosen for, 0 in bypass.
    pub preset_lines: u16,
}

fn source_lines(cx: &mut SyncContext) -> Result<u16, SyncError> {
    Ok(cx.board.read(regs::VTOTAL)?)
}

/// The line count stays within a few lines of `first` for a while.
fn lines_settled(cx: &mut SyncContext, first: u16) -> Result<bool, SyncError> {
    for _ in 0..LINE_SETTLE_READS {
        if source_lines(cx)?.abs_diff(first) > LINE_TOLERANCE {
            return Ok(false);
        }
        cx.board.delay_ms(10);
    }
    Ok(true)
}

fn separator_for_sync_type(cx: &mut SyncContext) -> Result<(), SyncError> {
    let b = &mut cx.board;
    if cx.rt.sync_type_csync {
        b.write(regs::SP_SOG_MODE, 1)?;
        b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
        b.write(regs::SP_H_CST_SP, 0x80)?;
        b.write(regs::SP_H_PROTECT, 1)?;
    } else {
        b.write(regs::SP_SOG_MODE, 0)?;
        b.write(regs::SP_CLAMP_MANUAL, 1)?;
        b.write(regs::SP_NO_COAST_REG, 1)?;
    }
    Ok(())
}

/// Load `base` and turn it into an upscaled RGB/HV setup.
fn enter_upscale(
    cx: &mut SyncContext,
    w: &mut RgbHvWatch,
    base: VideoStandard,
    lines: u16,
) -> Result<(), SyncError> {
    info!(%base, lines, "RGB/HV upscale");
    w.preset_lines = lines;
    cx.board.write(regs::OPTION_SCALING_RGBHV, 1)?;
    apply_presets(cx, base)?;

    {
        let b = &mut cx.board;
        b.write(regs::OPTION_SCALING_RGBHV, 1)?;
        b.write(regs::SP_SOG_P_ATO, 1)?;
        b.write(regs::SP_SDCS_VSST_L, 2)?;
        b.write(regs::SP_SDCS_VSSP_L, 0)?;
    }
    cx.rt.coast_position_set = false;
    cx.rt.clamp_position_set = false;
    cx.rt.video_standard = VideoStandard::RgbHvUpscale;

    if cx.board.read(regs::PLLAD_ICP)? >= 6 {
        cx.board.write(regs::PLLAD_ICP, 5)?;
        latch_pllad(cx)?;
        cx.board.delay_ms(40);
    }
    update_sp_dynamic(cx, true)?;
    separator_for_sync_type(cx)?;
    cx.board.delay_ms(300);

    if cx.ext_clock_in_use() {
        let clock = cx.board.read(regs::PLL648_CONTROL_01)?;
        if clock != u16::from(DISPLAY_CLOCK_EXTERNAL) {
            if clock != 0x35 {
                cx.board.write(regs::PRESET_DISPLAY_CLOCK, clock)?;
            }
            cx.board
                .write(regs::PLL648_CONTROL_01, u16::from(DISPLAY_CLOCK_EXTERNAL))?;
            cx.board.write(regs::PAD_CKIN_ENZ, 0)?;
        }
        clock_gen::sync_in_out_rate(cx)?;
    }
    Ok(())
}

fn enter_bypass(cx: &mut SyncContext, w: &mut RgbHvWatch) -> Result<(), SyncError> {
    info!("RGB/HV bypass");
    cx.rt.rgbhv_scaling_valid = false;
    w.preset_lines = 0;
    cx.board.write(regs::OPTION_SCALING_RGBHV, 0)?;
    apply_presets(cx, VideoStandard::RgbHvBypass)?;
    cx.board.delay_ms(300);
    Ok(())
}

/// Promote bypass to upscaling, re-pick the base preset, or fall back.
fn manage_scaling(cx: &mut SyncContext, w: &mut RgbHvWatch) -> Result<(), SyncError> {
    let lines = source_lines(cx)?;
    let std = cx.rt.video_standard;
    let in_range = lines != 0 && lines <= UPSCALE_MAX_LINES;

    if in_range && std == VideoStandard::RgbHvBypass {
        if !lines_settled(cx, lines)? {
            return Ok(());
        }
        cx.rt.rgbhv_scaling_valid = true;
        cx.board.write(regs::OPTION_SCALING_RGBHV, 1)?;
        cx.rt.auto_best_htotal_enabled = true;
        separator_for_sync_type(cx)?;
        cx.board.delay_ms(if cx.rt.sync_type_csync { 4 } else { 320 });
        let sfr = source_field_rate(&mut cx.board, true)?;
        enter_upscale(cx, w, upscale_base(lines, sfr), lines)?;
    } else if in_range && std == VideoStandard::RgbHvUpscale {
        let preset = w.preset_lines;
        let base = if lines < 280 && preset > 280 {
            Some(VideoStandard::Ntsc)
        } else if lines < 380 && preset > 380 {
            Some(VideoStandard::Pal)
        } else if lines > 380 && preset < 380 {
            Some(VideoStandard::EdtvNtsc60)
        } else {
            None
        };
        if let Some(base) = base
            && lines_settled(cx, lines)?
        {
            enter_upscale(cx, w, base, lines)?;
        }
    } else if lines > UPSCALE_MAX_LINES && std == VideoStandard::RgbHvUpscale && lines_settled(cx, lines)? {
        enter_bypass(cx, w)?;
    }
    Ok(())
}

/// Sync stability for the current sync type; clears a SOG fault on the way.
fn sync_stable(cx: &mut SyncContext) -> Result<bool, SyncError> {
    if !cx.rt.sync_type_csync {
        return Ok(cx.board.sync_status()?.contains(SyncStatus16::HV_ACTIVE));
    }
    if cx.board.sog_bad()? {
        reset_mode_detect(cx)?;
        cx.board.delay_ms(10);
        reset_interrupt(cx, int_reset::SOG_BAD)?;
        return Ok(false);
    }
    Ok(cx.board.mode_status()?.contains(ModeStatus00::HV_STABLE))
}

/// Measure the H-PLL rate, confirming a change once against spurs.
fn measure_pll(cx: &mut SyncContext) -> Result<u32, SyncError> {
    if cx.board.sog_bad()? {
        return Ok(0);
    }
    let csync = cx.rt.sync_type_csync;
    let mut rate = pll_rate(&mut cx.board, csync)?;
    if !PLL_RATE_VALID.contains(&rate) {
        return Ok(0);
    }
    let last = cx.rt.last_pll_rate;
    if rate.abs_diff(last) > PLL_RATE_HYSTERESIS {
        cx.board.delay_ms(40);
        if cx.board.sog_bad()? {
            cx.board.delay_ms(100);
        }
        rate = pll_rate(&mut cx.board, csync)?;
        if rate.abs_diff(last) > PLL_RATE_HYSTERESIS {
            cx.rt.last_pll_rate = rate;
        }
    }
    Ok(rate)
}

fn periodic_check(cx: &mut SyncContext) -> Result<(), SyncError> {
    let std = cx.rt.video_standard;
    if std == VideoStandard::RgbHvBypass {
        update_hv_sync_edge(cx)?;
        cx.board.delay_ms(100);
    }

    if !cx.rt.sync_type_csync {
        if cx.board.sog_bad()? {
            cx.rt.rgbhv_sog_bad_runs += 1;
            if cx.rt.rgbhv_sog_bad_runs >= SOG_BAD_RUNS_TO_CSYNC {
                info!("RGB/HV switching to composite sync handling");
                cx.rt.sync_type_csync = true;
                cx.rt.hpll_state = 0;
                cx.rt.rgbhv_sog_bad_runs = 0;
                cx.rt.rgbhv_no_sync_counter = 0;
                cx.rt.no_sync_counter = crate::watcher::escalation::LOW_POWER_AT;
            }
        } else {
            cx.rt.rgbhv_sog_bad_runs = 0;
        }
    }

    let rate = measure_pll(cx)?;
    reset_interrupt(cx, int_reset::SOG_BAD)?;

    let previous = cx.rt.hpll_state;
    if rate != 0 {
        cx.rt.hpll_state = hpll_bucket(rate);
    }
    let state = cx.rt.hpll_state;
    if state != previous {
        if std == VideoStandard::RgbHvBypass && state != 0 {
            let (ks, fs, icp) = HPLL_SETTINGS[usize::from(state - 1)];
            cx.board.write(regs::PLLAD_KS, ks)?;
            cx.board.write(regs::PLLAD_FS, fs)?;
            cx.board.write(regs::PLLAD_ICP, icp)?;
            latch_pllad(cx)?;
            cx.board.delay_ms(2);
            set_over_sample_ratio(cx, 4)?;
            info!(rate, state, "H-PLL retuned");
            cx.board.delay_ms(100);
        } else {
            debug!(rate, state, "H-PLL state changed");
        }
    }

    cx.rt.clamp_position_set = false;
    Ok(())
}

/// One RGB/HV tick. Returns whether sync was stable.
pub fn run(cx: &mut SyncContext, w: &mut RgbHvWatch) -> Result<bool, SyncError> {
    if cx.options().prefer_scaling_rgbhv && cx.rt.continuous_stable_counter >= 2 {
        manage_scaling(cx, w)?;
    }
    if !cx.options().prefer_scaling_rgbhv && cx.rt.video_standard == VideoStandard::RgbHvUpscale {
        enter_bypass(cx, w)?;
    }

    let stable = sync_stable(cx)?;
    let limit = if cx.rt.sync_type_csync {
        CSYNC_NO_SYNC_LIMIT
    } else {
        HV_NO_SYNC_LIMIT
    };
    if stable {
        cx.rt.rgbhv_no_sync_counter = 0;
        if cx.rt.bump_stable() == STABLE_SP_REFRESH_AT {
            update_sp_dynamic(cx, true)?;
        }
    } else {
        cx.rt.rgbhv_no_sync_counter = cx.rt.rgbhv_no_sync_counter.saturating_add(1);
        cx.rt.continuous_stable_counter = 0;
    }

    if cx.rt.rgbhv_no_sync_counter > limit {
        info!(limit, "RGB/HV sync lost");
        cx.rt.rgbhv_no_sync_counter = 0;
        set_reset_parameters(cx)?;
        prepare_sync_processor(cx)?;
        reset_sync_processor(cx)?;
        cx.rt.no_sync_counter = 0;
        w.preset_lines = 0;
        return Ok(false);
    }

    let now = cx.board.millis();
    if now - cx.rt.rgbhv_last_check_ms > PLL_CHECK_INTERVAL_MS {
        periodic_check(cx)?;
        cx.rt.rgbhv_last_check_ms = cx.board.millis();
    }
    Ok(stable)
}
