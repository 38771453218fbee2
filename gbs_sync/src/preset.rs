//! Preset application.
//!
//! Writing the per-resolution register tables is delegated to a
//! [`PresetActuator`]; the controller only decides *which* standard to load
//! and then runs the post-load steps that bring the sync separator, the
//! analog front end and the output timing lock up for it.
//!
//! [`TablePresets`] is the built-in actuator. It programs output timing,
//! PLL divider and display clock from a compact table, enough for the lock
//! loop to operate against.

use crate::board::Board;
use crate::classifier::{hs_stable, video_mode};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::{clock_gen, frame_sync, htotal};
use crate::pulse_timer::source_field_rate;
use crate::state::RuntimeState;
use crate::sync_processor::{
    latch_pllad, prepare_sync_processor, reset_interrupt, set_over_sample_ratio,
    set_reset_parameters, update_clamp_position, update_coast_position, update_sp_dynamic,
};
use crate::tuner::{optimize_sog_level, set_sog_level};
use gbs_common::consts::DISPLAY_CLOCK_EXTERNAL;
use gbs_common::regs::{self, int_reset};
use gbs_common::video::{InputPort, VideoStandard};
use tracing::{debug, info, warn};

/// SOG level for separate-sync RGB/HV sources.
const SOG_LEVEL_RGBHV: u8 = 24;
/// SP phase installed before the first sweep.
const PHASE_SP_INITIAL: u8 = 8;

/// Auto htotal attempts after a preset load.
const POST_LOAD_HTOTAL_ATTEMPTS: u8 = 4;

// ─── Actuator ───────────────────────────────────────────────────────

/// Writes the register table for one standard.
///
/// May block for hundreds of milliseconds. Implementations receive the
/// runtime state so they can record preset-derived values.
pub trait PresetActuator {
    fn name(&self) -> &'static str;

    fn write_preset(
        &mut self,
        board: &mut Board,
        rt: &mut RuntimeState,
        standard: VideoStandard,
        ext_clock: bool,
    ) -> Result<(), SyncError>;
}

/// Output timing written for one standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTiming {
    pub htotal: u16,
    pub vtotal: u16,
    /// Display clock selector (PLL648 control) for the internal clock.
    pub display_clock: u8,
    /// Input PLL divider (sampled pixels per input line).
    pub pllad_md: u16,
    pub hblank: (u16, u16),
    pub hsync: (u16, u16),
    pub vsync: (u16, u16),
}

impl OutputTiming {
    /// Built-in table entry for `standard`.
    pub const fn for_standard(standard: VideoStandard) -> Self {
        use VideoStandard::*;
        let sixty = Self {
            htotal: 1716,
            vtotal: 525,
            display_clock: 0x45,
            pllad_md: 2345,
            hblank: (1576, 140),
            hsync: (1616, 1680),
            vsync: (6, 12),
        };
        let fifty = Self {
            htotal: 1728,
            vtotal: 625,
            pllad_md: 2345,
            ..sixty
        };
        match standard {
            Pal => fifty,
            EdtvPal50 => Self {
                pllad_md: 1716,
                ..fifty
            },
            EdtvNtsc60 => Self {
                pllad_md: 1716,
                ..sixty
            },
            Hdtv720p => Self {
                htotal: 1650,
                vtotal: 750,
                display_clock: 0x25,
                pllad_md: 1650,
                ..sixty
            },
            Hdtv1080i | Hdtv1080p => Self {
                htotal: 2200,
                vtotal: 1125,
                display_clock: 0x85,
                pllad_md: 2200,
                ..sixty
            },
            MedRes25k => Self {
                pllad_md: 1800,
                ..sixty
            },
            VgaGraphics | RgbHvBypass | RgbHvUpscale => Self {
                pllad_md: 800,
                ..sixty
            },
            Ntsc | Unknown => sixty,
        }
    }
}

/// Built-in actuator backed by [`OutputTiming::for_standard`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TablePresets;

impl PresetActuator for TablePresets {
    fn name(&self) -> &'static str {
        "table"
    }

    fn write_preset(
        &mut self,
        board: &mut Board,
        rt: &mut RuntimeState,
        standard: VideoStandard,
        ext_clock: bool,
    ) -> Result<(), SyncError> {
        let t = OutputTiming::for_standard(standard);
        board.write(regs::VDS_HSYNC_RST, t.htotal)?;
        board.write(regs::VDS_VSYNC_RST, t.vtotal)?;
        board.write(regs::VDS_DIS_HB_ST, t.hblank.0)?;
        board.write(regs::VDS_DIS_HB_SP, t.hblank.1)?;
        board.write(regs::VDS_HB_ST, t.hblank.0)?;
        board.write(regs::VDS_HB_SP, t.hblank.1)?;
        board.write(regs::VDS_HS_ST, t.hsync.0)?;
        board.write(regs::VDS_HS_SP, t.hsync.1)?;
        board.write(regs::VDS_VS_ST, t.vsync.0)?;
        board.write(regs::VDS_VS_SP, t.vsync.1)?;
        board.write(regs::PLLAD_MD, t.pllad_md)?;
        board.write(regs::PRESET_DISPLAY_CLOCK, u16::from(t.display_clock))?;
        let clock = if ext_clock {
            DISPLAY_CLOCK_EXTERNAL
        } else {
            t.display_clock
        };
        board.write(regs::PLL648_CONTROL_01, u16::from(clock))?;
        rt.phase_adc = board.read(regs::PA_ADC_S)? as u8;
        debug!(%standard, htotal = t.htotal, vtotal = t.vtotal, "Preset written");
        Ok(())
    }
}

// ─── Apply ──────────────────────────────────────────────────────────

/// Standards output through the bypass path, without scaling.
const fn is_bypass(standard: VideoStandard) -> bool {
    matches!(
        standard,
        VideoStandard::Hdtv720p
            | VideoStandard::Hdtv1080i
            | VideoStandard::Hdtv1080p
            | VideoStandard::VgaGraphics
            | VideoStandard::RgbHvBypass
    )
}

/// Probe both inputs for horizontal activity; returns the active one.
fn probe_active_input(cx: &mut SyncContext) -> Result<Option<InputPort>, SyncError> {
    for port in [InputPort::Rgb, InputPort::Component] {
        cx.board.write(regs::ADC_INPUT_SEL, port.select_bit())?;
        cx.board.delay_ms(100);
        let status = cx.board.sync_status()?;
        if status.hs_active() {
            cx.rt.input_is_component = port == InputPort::Component;
            cx.rt.sync_type_csync = port == InputPort::Component || !status.vs_active();
            return Ok(Some(port));
        }
    }
    Ok(None)
}

/// Separator settings for RGB/HV sources, scaled or bypassed.
fn configure_rgbhv_separator(cx: &mut SyncContext) -> Result<(), SyncError> {
    let csync = cx.rt.sync_type_csync;
    let b = &mut cx.board;
    b.write(regs::SP_SOG_P_ATO, 1)?;
    b.write(regs::ADC_SOGEN, 1)?;
    if csync {
        b.write(regs::SP_EXT_SYNC_SEL, 1)?;
        b.write(regs::SP_SOG_MODE, 1)?;
        b.write(regs::SP_NO_COAST_REG, 0)?;
        b.write(regs::SP_PRE_COAST, 4)?;
        b.write(regs::SP_POST_COAST, 7)?;
        b.write(regs::SP_H_PROTECT, 1)?;
        cx.rt.set_sog_level(SOG_LEVEL_RGBHV);
    } else {
        b.write(regs::SP_EXT_SYNC_SEL, 0)?;
        b.write(regs::SP_SOG_MODE, 0)?;
        b.write(regs::SP_NO_COAST_REG, 1)?;
        b.write(regs::SP_PRE_COAST, 0)?;
        b.write(regs::SP_POST_COAST, 0)?;
        b.write(regs::SP_H_PULSE_IGNOR, 0xff)?;
        b.write(regs::SP_H_PROTECT, 0)?;
    }
    b.write(regs::SP_CLAMP_MANUAL, 1)?;
    b.write(regs::SP_COAST_INV_REG, 0)?;
    cx.rt.set_phases(PHASE_SP_INITIAL, 16);
    Ok(())
}

/// Load the preset for `standard` and bring the lock loop up on it.
///
/// `Unknown` falls back to the 480p table on whichever input shows sync, or
/// resets to power-on defaults when neither does. With PAL forced to 60 Hz,
/// 50 Hz standards load their 60 Hz table.
pub fn apply_presets(cx: &mut SyncContext, standard: VideoStandard) -> Result<(), SyncError> {
    if !cx.rt.board_has_power {
        warn!("Board not responding, preset skipped");
        return Ok(());
    }

    let mut standard = standard;
    if standard == VideoStandard::RgbHvUpscale {
        let status = cx.board.sync_status()?;
        if status.hs_active() {
            cx.rt.input_is_component = false;
            cx.rt.sync_type_csync = !status.vs_active();
        }
    }
    if standard == VideoStandard::Unknown {
        warn!("Source format not recognized, using fallback preset");
        if probe_active_input(cx)?.is_none() {
            set_reset_parameters(cx)?;
            return Ok(());
        }
        standard = VideoStandard::EdtvNtsc60;
    }

    let pal_forced = cx.options().pal_forced_60
        && matches!(standard, VideoStandard::Pal | VideoStandard::EdtvPal50);
    let table = match standard {
        VideoStandard::Pal if pal_forced => VideoStandard::Ntsc,
        VideoStandard::EdtvPal50 if pal_forced => VideoStandard::EdtvNtsc60,
        s => s,
    };
    if pal_forced {
        info!("PAL at 50 Hz output as 60 Hz");
    }

    cx.write_preset(table)?;
    cx.rt.video_standard = standard;
    info!(%standard, preset = cx.preset_name(), "Preset applied");

    if is_bypass(standard) {
        bypass_steps(cx)
    } else {
        post_preset_load_steps(cx, pal_forced)
    }
}

fn bypass_steps(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.rt.auto_best_htotal_enabled = false;
    cx.rt.clamp_position_set = false;
    cx.rt.hpll_state = 0;
    clock_gen::reset_clock(cx)?;
    frame_sync::reset(cx)?;

    if cx.rt.video_standard == VideoStandard::RgbHvBypass {
        configure_rgbhv_separator(cx)?;
        cx.board.write(regs::PLLAD_ICP, 4)?;
        cx.board.write(regs::PLLAD_FS, 0)?;
        cx.board.write(regs::PLLAD_KS, 1)?;
        set_over_sample_ratio(cx, 2)?;
    } else {
        update_sp_dynamic(cx, false)?;
        cx.board.write(regs::SP_NO_COAST_REG, 0)?;
        cx.board.write(regs::SP_COAST_INV_REG, 0)?;
    }
    let level = cx.rt.sog_level;
    set_sog_level(cx, level)?;
    latch_pllad(cx)?;
    cx.board.write(regs::OUT_SYNC_CNTRL, 1)?;
    cx.board.write(regs::DAC_RGBS_PWDNZ, 1)?;
    cx.rt.source_disconnected = false;
    cx.rt.output_frozen = true;
    Ok(())
}

/// Field rate band in which post-load auto htotal is attempted.
fn field_rate_plausible(standard: VideoStandard, sfr: f32) -> bool {
    match standard {
        VideoStandard::Ntsc | VideoStandard::EdtvNtsc60 => sfr > 58.6 && sfr < 61.4,
        VideoStandard::Pal | VideoStandard::EdtvPal50 => sfr > 49.1 && sfr < 51.1,
        _ => false,
    }
}

/// Everything after the table write for scaled output.
fn post_preset_load_steps(cx: &mut SyncContext, pal_forced: bool) -> Result<(), SyncError> {
    let standard = cx.rt.video_standard;
    {
        let b = &mut cx.board;
        b.write(regs::ADC_UNUSED_64, 0)?;
        b.write(regs::ADC_UNUSED_67, 0)?;
        b.write(regs::PAD_CKIN_ENZ, 0)?;
    }
    prepare_sync_processor(cx)?;
    if standard == VideoStandard::RgbHvUpscale {
        configure_rgbhv_separator(cx)?;
    }

    cx.board.write(regs::SP_H_PROTECT, 0)?;
    cx.board.write(regs::SP_COAST_INV_REG, 0)?;
    let scaling_rgbhv = cx.board.read(regs::OPTION_SCALING_RGBHV)? == 1;
    cx.rt.source_disconnected = false;
    if !scaling_rgbhv {
        update_sp_dynamic(cx, false)?;
    }
    cx.board.write(regs::SP_NO_CLAMP_REG, 1)?;
    cx.board.write(regs::OUT_SYNC_CNTRL, 1)?;

    cx.rt.auto_best_htotal_enabled = cx.options().auto_best_htotal;
    cx.rt.phase_adc = cx.board.read(regs::PA_ADC_S)? as u8;
    cx.rt.phase_sp = PHASE_SP_INITIAL;
    let level = if cx.rt.input_is_component { 14 } else { 13 };
    cx.rt.source_max_sog = level;
    set_sog_level(cx, level)?;

    cx.rt.clamp_position_set = false;
    cx.rt.coast_position_set = false;
    cx.rt.phase_calibrated = false;
    cx.rt.continuous_stable_counter = 0;
    cx.rt.no_sync_counter = 0;
    cx.rt.motion_adaptive_active = false;
    cx.rt.fail_retry_attempts = 0;
    cx.rt.output_frozen = true;
    cx.rt.board_has_power = true;

    let ks = match standard {
        s if s.is_sd() => 2,
        VideoStandard::EdtvNtsc60 | VideoStandard::EdtvPal50 | VideoStandard::MedRes25k => 1,
        _ => 1,
    };
    cx.board.write(regs::PLLAD_KS, ks)?;
    set_over_sample_ratio(cx, if ks == 2 { 4 } else { 2 })?;

    // composite sync with no activity on the test bus: the SOG level is off
    let mut avoid_auto_best = false;
    if cx.rt.sync_type_csync && cx.board.read(regs::TEST_BUS_2F)? == 0 {
        cx.board.delay_ms(4);
        if cx.board.read(regs::TEST_BUS_2F)? == 0 {
            optimize_sog_level(cx)?;
            avoid_auto_best = true;
            cx.board.delay_ms(4);
        }
    }
    latch_pllad(cx)?;

    if pal_forced {
        cx.board.write(regs::OPTION_PALFORCED60, 1)?;
    }

    clock_gen::reset_clock(cx)?;
    frame_sync::reset(cx)?;
    cx.rt.sync_lock_fail_ignore = cx.tuning().sync_lock_fail_ignore;

    let std_id = standard.native_id();
    if cx.rt.auto_best_htotal_enabled && !scaling_rgbhv && !avoid_auto_best && (1..=4).contains(&std_id) {
        update_coast_position(cx, false)?;
        reset_interrupt(cx, int_reset::NO_HSYNC | int_reset::SOG_BAD)?;
        cx.board.delay_ms(80);
        for _ in 0..POST_LOAD_HTOTAL_ATTEMPTS {
            if cx.board.sog_bad()? {
                optimize_sog_level(cx)?;
                reset_interrupt(cx, int_reset::SOG_BAD)?;
                cx.board.delay_ms(40);
            } else if hs_stable(cx)? && hs_stable(cx)? && video_mode(cx)? == std_id {
                let sfr = source_field_rate(&mut cx.board, false)?;
                if field_rate_plausible(standard, sfr) {
                    htotal::run_auto_best_htotal(cx)?;
                    break;
                }
            }
            cx.board.delay_ms(10);
        }
    } else {
        cx.board.delay_ms(30);
        update_coast_position(cx, false)?;
        update_clamp_position(cx)?;
    }

    cx.board.write(regs::DAC_RGBS_PWDNZ, 1)?;
    debug!(%standard, osr = cx.rt.osr, sog = cx.rt.sog_level, "Post preset steps done");
    Ok(())
}
