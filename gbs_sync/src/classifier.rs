//! Source classification.
//!
//! Turns the mode-detect and sync-processor status words into a native mode
//! id, and scans both inputs for an active source when none is known.
//!
//! # Module Structure
//!
//! - `video_mode` - per-tick mode id from the status words
//! - `hs_stable` / `sync_present` - cheap sync-presence probes
//! - `detect` / `input_and_sync_detect` - slow input scan used in low power

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::preset::apply_presets;
use crate::pulse_timer::source_field_rate;
use crate::state::COUNTER_SATURATION;
use crate::sync_processor::{go_low_power, reset_mode_detect, reset_sync_processor};
use crate::tuner::set_sog_level;
use gbs_common::consts::CLASSIFIER_MIN_FIELD_RATE_HZ;
use gbs_common::regs::{self, int_reset, test_bus};
use gbs_common::status::{ModeStatus00, ModeStatus03, ModeStatus04, SyncInterrupts, SyncStatus16};
use gbs_common::video::VideoStandard;
use serde::Serialize;
use tracing::{debug, info};

/// Mode id returned for stable but unrecognized timing.
pub const MODE_UNRECOGNIZED_STABLE: u8 = 9;

/// Test bus readout above which sync activity is assumed.
const SYNC_PRESENT_THRESHOLD: u16 = 0x0180;

/// `VPERIOD_IF` below which an interlaced HD readout is 1080i.
const HD_INTERLACED_VPERIOD_MAX: u16 = 1160;

const MED_RES_LINE_COUNT_MAX: u16 = 0x3c;

/// Result of one input scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDetection {
    NoSource,
    /// Activity on the RGB input (sync on green or CSync).
    RgbDetected,
    /// Activity on the component input.
    ComponentDetected,
    /// Separate H/V sync on the RGB input.
    RgbHvDetected,
}

// ─── Mode Id ────────────────────────────────────────────────────────

/// Native mode id of the current input, 0 when nothing is recognized.
///
/// Standards with separate sync only report whether H or V activity is
/// present. Stable timing that matches no standard returns
/// [`MODE_UNRECOGNIZED_STABLE`] once it has been seen 255 times in a row.
pub fn video_mode(cx: &mut SyncContext) -> Result<u8, SyncError> {
    let std = cx.rt.standard_id();
    if std >= 14 {
        let s16 = cx.board.sync_status()?;
        return Ok(if s16.intersects(SyncStatus16::HV_ACTIVE) {
            std
        } else {
            0
        });
    }

    let st00 = cx.board.mode_status()?;
    let st03 = ModeStatus03::from_bits_truncate(cx.board.read(regs::STATUS_03)? as u8);
    let st04_raw = cx.board.read(regs::STATUS_04)? as u8;
    let st04 = ModeStatus04::from_bits_truncate(st04_raw);

    if st00.is_fully_stable() {
        if st00.contains(ModeStatus00::SD) {
            if st00.contains(ModeStatus00::NTSC_I) {
                return Ok(1);
            }
            if st00.contains(ModeStatus00::PAL_I) {
                return Ok(2);
            }
            if st00.contains(ModeStatus00::EDTV60) {
                return Ok(3);
            }
            if st00.contains(ModeStatus00::EDTV50) {
                return Ok(4);
            }
        }
        if st03.contains(ModeStatus03::HD720P) {
            return Ok(5);
        }
        if std == 4 && st04_raw == ModeStatus04::PAL_EDTV.bits() {
            return Ok(4);
        }
        if st04.contains(ModeStatus04::HD_MODE) {
            if st04_raw & ModeStatus04::INTERLACED_MASK.bits() == ModeStatus04::INTERLACED_MASK.bits()
                && cx.board.read(regs::VPERIOD_IF)? < HD_INTERLACED_VPERIOD_MAX
            {
                return Ok(6);
            }
            if st04.contains(ModeStatus04::HD1080P) {
                return Ok(if st04.contains(ModeStatus04::LINE_24K) { 8 } else { 7 });
            }
        }
    }

    let st05 = cx.board.read(regs::STATUS_05)?;
    if st05 & 0x0c == 0
        && st00.bits() == ModeStatus00::STABLE_MASK.bits()
        && st03.contains(ModeStatus03::GRAPHICS)
    {
        return Ok(if cx.rt.input_is_component { 13 } else { 15 });
    }

    if st00.bits() & 0x2F == ModeStatus00::STABLE_MASK.bits() {
        if cx.board.sync_status()?.hs_active() {
            let lines = cx.board.read(regs::VTOTAL)?;
            let mut steady = true;
            for _ in 0..2 {
                cx.board.delay_ms(2);
                let again = cx.board.read(regs::VTOTAL)?;
                if again.abs_diff(lines) > 1 || cx.board.mode_status()? != st00 {
                    steady = false;
                    break;
                }
            }
            if !steady {
                cx.rt.not_recognized_counter = 0;
            } else if cx.rt.not_recognized_counter < COUNTER_SATURATION {
                cx.rt.not_recognized_counter += 1;
            }
        } else {
            cx.rt.not_recognized_counter = 0;
        }
    } else {
        cx.rt.not_recognized_counter = 0;
    }

    if cx.rt.not_recognized_counter == COUNTER_SATURATION {
        return Ok(MODE_UNRECOGNIZED_STABLE);
    }
    Ok(0)
}

// ─── Probes ─────────────────────────────────────────────────────────

/// Horizontal sync reaches the sync processor.
///
/// In bypass mode the latched no-hsync interrupt is checked and acknowledged;
/// SD sources additionally need negative polarity.
pub fn hs_stable(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let std = cx.rt.video_standard;
    if std == VideoStandard::RgbHvBypass {
        if !cx.board.interrupts()?.contains(SyncInterrupts::NO_HSYNC) {
            return Ok(true);
        }
        cx.board.write(regs::INTERRUPT_CONTROL_00, int_reset::NO_HSYNC)?;
        cx.board.write(regs::INTERRUPT_CONTROL_00, 0)?;
        return Ok(false);
    }

    let s16 = cx.board.sync_status()?;
    if std.is_sd() {
        return Ok(s16.hs_active() && !s16.contains(SyncStatus16::HS_POLARITY_HIGH));
    }
    Ok(s16.hs_active())
}

/// Any sync activity on the sync-processor test bus.
pub fn sync_present(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let b = &mut cx.board;
    let saved_bus = b.read(regs::TEST_BUS_SEL)?;
    let saved_sp = b.read(regs::TEST_BUS_SP_SEL)?;
    b.write_if_changed(regs::TEST_BUS_SEL, test_bus::SYNC_PROCESSOR)?;
    b.write_if_changed(regs::TEST_BUS_SP_SEL, test_bus::SP_VSYNC)?;
    let activity = b.read(regs::TEST_BUS)?;
    b.write_if_changed(regs::TEST_BUS_SEL, saved_bus)?;
    b.write_if_changed(regs::TEST_BUS_SP_SEL, saved_sp)?;
    Ok(activity > SYNC_PRESENT_THRESHOLD)
}

// ─── Input Scan ─────────────────────────────────────────────────────

fn wait_for<F>(cx: &mut SyncContext, budget_ms: u64, step_ms: u32, mut probe: F) -> Result<bool, SyncError>
where
    F: FnMut(&mut SyncContext) -> Result<bool, SyncError>,
{
    let start = cx.board.millis();
    while cx.board.millis() - start < budget_ms {
        if probe(cx)? {
            return Ok(true);
        }
        cx.board.delay_ms(step_ms);
    }
    Ok(false)
}

/// Scan the active input for sync, then try the other one.
///
/// Leaves the input selector on the port that should be probed next when
/// nothing was found.
pub fn detect(cx: &mut SyncContext) -> Result<InputDetection, SyncError> {
    let activity = wait_for(cx, 450, 10, hs_stable)?;
    let rgb = cx.board.read(regs::ADC_INPUT_SEL)? == 1;

    if activity && rgb {
        if let Some(found) = detect_rgb(cx)? {
            return Ok(found);
        }
        cx.board.write(regs::SP_SOG_MODE, 1)?;
        reset_sync_processor(cx)?;
        reset_mode_detect(cx)?;
        cx.board.delay_ms(40);
    } else if activity {
        return detect_component(cx);
    }

    if activity {
        debug!("Input lost");
        set_sog_level(cx, 2)?;
    }
    cx.board.toggle(regs::ADC_INPUT_SEL)?;
    cx.board.delay_ms(200);
    Ok(InputDetection::NoSource)
}

fn detect_rgb(cx: &mut SyncContext) -> Result<Option<InputDetection>, SyncError> {
    cx.rt.input_is_component = false;
    set_sog_level(cx, 13)?;

    let vs = wait_for(cx, 360, 1, |cx| Ok(cx.board.sync_status()?.vs_active()))?;
    if vs {
        cx.board.write(regs::MD_SEL_VGA60, 1)?;
        let hs = wait_for(cx, 400, 1, |cx| Ok(cx.board.sync_status()?.hs_active()))?;
        if !hs {
            debug!("VSync without HSync");
            return Ok(None);
        }
        return detect_hv_or_csync_on_hs(cx).map(Some);
    }

    // sync on green: sweep the slice level while mode detect settles
    cx.rt.sync_type_csync = true;
    cx.board.write(regs::MD_SEL_VGA60, 0)?;
    let start = cx.board.millis();
    let mut cycle: u32 = 0;
    while cx.board.millis() - start < 6_000 {
        let mode = video_mode(cx)?;
        if mode > 0 && mode != 8 {
            return Ok(Some(InputDetection::RgbDetected));
        }
        cycle += 1;
        if cycle % 150 == 0 {
            let level = match cx.rt.sog_level {
                1 => 2,
                l if l + 2 >= 15 => 1,
                l => l + 2,
            };
            set_sog_level(cx, level)?;
        }
        if mode == 8 {
            set_sog_level(cx, 13)?;
            cx.rt.source_max_sog = 13;
            cx.rt.med_res_line_count = cx.board.read(regs::MD_HD1250P_CNTRL)? as u8;
            return Ok(Some(InputDetection::RgbDetected));
        }
        let md = cx.board.read(regs::MD_HD1250P_CNTRL)?;
        cx.board
            .write(regs::MD_HD1250P_CNTRL, next_line_count(md, MED_RES_LINE_COUNT_MAX))?;
        cx.board.delay_ms(2);
    }
    Ok(Some(InputDetection::RgbDetected))
}

/// One step of the medium-res line count sweep, restarting past `ceiling`.
fn next_line_count(md: u16, ceiling: u16) -> u16 {
    if md < ceiling {
        md + 1
    } else {
        u16::from(crate::state::MED_RES_LINE_COUNT_START)
    }
}

/// Both pins active: CSync on the H pin or true separate sync.
fn detect_hv_or_csync_on_hs(cx: &mut SyncContext) -> Result<InputDetection, SyncError> {
    cx.board.write(regs::SP_H_PROTECT, 1)?;
    cx.board.delay_ms(120);

    let mut csync_hits = 0;
    for _ in 0..3 {
        if source_field_rate(&mut cx.board, true)? > CLASSIFIER_MIN_FIELD_RATE_HZ {
            csync_hits += 1;
        }
    }
    if csync_hits >= 2 {
        cx.board.write(regs::SP_PRE_COAST, 0x10)?;
        cx.board.delay_ms(40);
        cx.rt.sync_type_csync = true;
    } else {
        cx.rt.sync_type_csync = false;
    }

    // medium-res timing needs the mode detect line count dialed in
    for _ in 0..16 {
        if video_mode(cx)? == 8 {
            let level = cx.rt.sog_level;
            set_sog_level(cx, level)?;
            cx.rt.med_res_line_count = cx.board.read(regs::MD_HD1250P_CNTRL)? as u8;
            return Ok(InputDetection::RgbDetected);
        }
        let md = cx.board.read(regs::MD_HD1250P_CNTRL)?;
        let ceiling = regs::MD_HD1250P_CNTRL.max_value();
        cx.board.write(regs::MD_HD1250P_CNTRL, next_line_count(md, ceiling))?;
        cx.board.delay_ms(30);
    }

    cx.rt.video_standard = VideoStandard::RgbHvBypass;
    apply_presets(cx, VideoStandard::RgbHvBypass)?;
    cx.board.delay_ms(100);
    Ok(InputDetection::RgbHvDetected)
}

fn detect_component(cx: &mut SyncContext) -> Result<InputDetection, SyncError> {
    cx.rt.input_is_component = true;
    cx.board.write(regs::MD_SEL_VGA60, 0)?;
    let start = cx.board.millis();
    let mut cycle: u32 = 0;
    while cx.board.millis() - start < 6_000 {
        if video_mode(cx)? > 0 {
            return Ok(InputDetection::ComponentDetected);
        }
        cycle += 1;
        if cycle % 180 == 0 {
            let level = match cx.rt.sog_level {
                1 => 2,
                l if l + 2 >= 16 => 1,
                l => l + 2,
            };
            set_sog_level(cx, level)?;
            cx.rt.source_max_sog = level;
        }
        cx.board.delay_ms(2);
    }
    set_sog_level(cx, 14)?;
    cx.rt.source_max_sog = 14;
    Ok(InputDetection::ComponentDetected)
}

/// Run one input scan and latch the result into the runtime state.
pub fn input_and_sync_detect(cx: &mut SyncContext) -> Result<InputDetection, SyncError> {
    let found = detect(cx)?;
    match found {
        InputDetection::NoSource => {
            if !sync_present(cx)? && !cx.rt.is_in_low_power_mode {
                cx.rt.source_disconnected = true;
                cx.rt.video_standard = VideoStandard::Unknown;
                cx.board.write(regs::SP_SOG_MODE, 1)?;
                go_low_power(cx)?;
            }
        }
        InputDetection::RgbDetected | InputDetection::ComponentDetected => {
            cx.rt.input_is_component = found == InputDetection::ComponentDetected;
            cx.rt.source_disconnected = false;
            cx.rt.is_in_low_power_mode = false;
            info!(component = cx.rt.input_is_component, "Input active");
        }
        InputDetection::RgbHvDetected => {
            cx.rt.input_is_component = false;
            cx.rt.source_disconnected = false;
            cx.rt.is_in_low_power_mode = false;
            cx.rt.video_standard = VideoStandard::RgbHvBypass;
            info!(csync = cx.rt.sync_type_csync, "RGB/HV input active");
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use gbs_common::video::InputPort;
    use gbs_hal::{SignalSource, SimulationDriver};

    fn context(source: SignalSource) -> (SyncContext, SimulationDriver) {
        let sim = SimulationDriver::new().with_source(source);
        let cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
        (cx, sim)
    }

    #[test]
    fn sd_mode_ids() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i());
        assert_eq!(video_mode(&mut cx).unwrap(), 1);
        let (mut cx, _sim) = context(SignalSource::pal_576i());
        assert_eq!(video_mode(&mut cx).unwrap(), 2);
    }

    #[test]
    fn hd_mode_ids() {
        let mut src = SignalSource::edtv_480p().on_port(InputPort::Rgb);
        src.standard = VideoStandard::Hdtv720p;
        let (mut cx, _sim) = context(src.clone());
        assert_eq!(video_mode(&mut cx).unwrap(), 5);

        src.standard = VideoStandard::Hdtv1080i;
        let (mut cx, _sim) = context(src.clone());
        assert_eq!(video_mode(&mut cx).unwrap(), 6);

        src.standard = VideoStandard::Hdtv1080p;
        let (mut cx, _sim) = context(src);
        assert_eq!(video_mode(&mut cx).unwrap(), 7);
    }

    #[test]
    fn nothing_visible_is_mode_zero() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i().with_sog_window(20, 25));
        assert_eq!(video_mode(&mut cx).unwrap(), 0);
        assert_eq!(cx.rt.not_recognized_counter, 0);
    }

    #[test]
    fn bypass_mode_reports_activity_only() {
        let (mut cx, _sim) = context(SignalSource::vga_hv());
        cx.rt.video_standard = VideoStandard::RgbHvBypass;
        assert_eq!(video_mode(&mut cx).unwrap(), 15);
        assert!(hs_stable(&mut cx).unwrap());
    }

    #[test]
    fn sd_hsync_needs_negative_polarity() {
        let mut src = SignalSource::ntsc_480i();
        src.hs_active_high = true;
        let (mut cx, _sim) = context(src);
        cx.rt.video_standard = VideoStandard::Ntsc;
        assert!(!hs_stable(&mut cx).unwrap());
        cx.rt.video_standard = VideoStandard::EdtvNtsc60;
        assert!(hs_stable(&mut cx).unwrap());
    }

    #[test]
    fn sync_present_restores_test_bus() {
        let (mut cx, sim) = context(SignalSource::ntsc_480i());
        sim.poke(regs::TEST_BUS_SEL, test_bus::OUTPUT_FRAME);
        assert!(sync_present(&mut cx).unwrap());
        assert_eq!(sim.peek(regs::TEST_BUS_SEL), test_bus::OUTPUT_FRAME);

        let (mut cx, _sim) = context(SignalSource::none());
        assert!(!sync_present(&mut cx).unwrap());
    }

    #[test]
    fn empty_inputs_enter_low_power() {
        let (mut cx, sim) = context(SignalSource::none());
        let found = input_and_sync_detect(&mut cx).unwrap();
        assert_eq!(found, InputDetection::NoSource);
        assert!(cx.rt.source_disconnected);
        assert!(cx.rt.is_in_low_power_mode);
        assert_eq!(cx.rt.video_standard, VideoStandard::Unknown);
        assert_eq!(sim.peek(regs::DAC_RGBS_PWDNZ), 0);
    }

    #[test]
    fn sync_on_green_source_detected() {
        let (mut cx, _sim) = context(SignalSource::ntsc_480i());
        let found = input_and_sync_detect(&mut cx).unwrap();
        assert_eq!(found, InputDetection::RgbDetected);
        assert!(cx.rt.sync_type_csync);
        assert!(!cx.rt.input_is_component);
        assert!(!cx.rt.source_disconnected);
    }

    #[test]
    fn component_source_detected() {
        let (mut cx, sim) = context(SignalSource::edtv_480p());
        sim.poke(regs::ADC_INPUT_SEL, 0);
        let found = input_and_sync_detect(&mut cx).unwrap();
        assert_eq!(found, InputDetection::ComponentDetected);
        assert!(cx.rt.input_is_component);
    }

    #[test]
    fn line_count_sweep_stays_in_register() {
        let start = u16::from(crate::state::MED_RES_LINE_COUNT_START);
        assert_eq!(next_line_count(start, MED_RES_LINE_COUNT_MAX), start + 1);
        assert_eq!(next_line_count(MED_RES_LINE_COUNT_MAX, MED_RES_LINE_COUNT_MAX), start);

        let full = regs::MD_HD1250P_CNTRL.max_value();
        assert_eq!(full, 0xff);
        assert_eq!(next_line_count(full - 1, full), full);
        assert_eq!(next_line_count(full, full), start);
    }
}
