//! Output line length correction.

use crate::classifier::{hs_stable, video_mode};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::frame_sync;
use crate::pulse_timer::{BusSelection, average_period, output_frame_rate, route};
use crate::sync_processor::reset_interrupt;
use gbs_common::consts::HTOTAL_MAX;
use gbs_common::regs::{self, int_reset, test_bus};
use gbs_common::video::VideoStandard;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Input and output periods are averaged over this many samples.
const PERIOD_SAMPLES: u8 = 2;

/// Field-edge wait budget, in status polls.
const FIELD_WAIT_HIGH_POLLS: u16 = 400;
const FIELD_WAIT_TOTAL_POLLS: u16 = 800;

// Blanking repair ratios, relative to the new htotal.
const DIS_HB_ST_RATIO: f32 = 0.936;
const DIS_HB_SP_RATIO: f32 = 0.178;
const MEM_HB_ST_RATIO: f32 = 0.971;
const MEM_HB_SP_RATIO: f32 = 0.64;
const HS_INSIDE_BLANK_RATIO: f32 = 0.8;

/// Outcome of an htotal correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HtotalResult {
    /// Already at the target; nothing was written.
    Unchanged,
    /// New line length committed.
    Applied { from: u16, to: u16 },
    /// Correction refused.
    Rejected(&'static str),
}

impl HtotalResult {
    /// The output timing is where it should be.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Output htotal that makes one output frame as long as one input field.
///
/// Returns 0 when either pulse could not be measured.
pub fn compute_target_htotal(cx: &mut SyncContext) -> Result<u32, SyncError> {
    let b = &mut cx.board;
    let saved = BusSelection::save(b)?;
    let vds_bus = b.read(regs::VDS_TEST_BUS_SEL)?;
    b.write_if_changed(regs::VDS_TEST_BUS_SEL, 0)?;

    route(b, test_bus::MODE_DETECT, None)?;
    let input = average_period(b, PERIOD_SAMPLES);
    route(b, test_bus::OUTPUT_FRAME, None)?;
    let output = average_period(b, PERIOD_SAMPLES);

    saved.restore(b)?;
    b.write_if_changed(regs::VDS_TEST_BUS_SEL, vds_bus)?;

    let htotal = f64::from(b.read(regs::VDS_HSYNC_RST)?);
    let target = match (input, output) {
        (Some(input), Some(output)) if output > 0.0 => (htotal * input / output).floor() as u32,
        _ => 0,
    };
    debug!(?input, ?output, target, "Target htotal");
    Ok(target)
}

fn large_diff_fraction(cx: &SyncContext) -> f32 {
    match cx.rt.video_standard {
        VideoStandard::MedRes25k | VideoStandard::RgbHvUpscale => {
            cx.tuning().large_diff_fraction_wide
        }
        _ => cx.tuning().large_diff_fraction,
    }
}

/// Align a shifted blanking edge to an even pixel, rounding up when growing.
fn align_even(position: i32, diff: i32) -> i32 {
    if diff > 0 {
        (position + 1) & !1
    } else {
        position & !1
    }
}

/// Move the output to `target` pixels per line.
///
/// Blanking moves by half the difference so the picture stays centered;
/// anything pushed past the new line end is re-derived from the target.
/// Corrections larger than the large-diff threshold mean the source changed
/// format: they count toward disabling auto htotal instead of being applied.
pub fn apply_best_htotal(cx: &mut SyncContext, target: u32) -> Result<HtotalResult, SyncError> {
    let orig = cx.board.read(regs::VDS_HSYNC_RST)?;
    let diff = target as i64 - i64::from(orig);
    let magnitude = diff.unsigned_abs();

    if magnitude == 0 || (cx.ext_clock_in_use() && magnitude == 1) {
        debug!(htotal = orig, "HTotal adjust skipped");
        return Ok(HtotalResult::Unchanged);
    }
    if cx.board.read(regs::OPTION_PALFORCED60)? == 1 {
        return Ok(HtotalResult::Unchanged);
    }

    let threshold = f64::from(orig) * f64::from(large_diff_fraction(cx));
    if magnitude as f64 > threshold {
        warn!(from = orig, target, "HTotal adjust: large difference");
        if cx.rt.video_standard != VideoStandard::RgbHvUpscale {
            cx.rt.fail_retry_attempts = cx.rt.fail_retry_attempts.saturating_add(1);
            if cx.rt.fail_retry_attempts < cx.tuning().htotal_fail_retry_limit {
                frame_sync::reset(cx)?;
                cx.board.delay_ms(60);
            } else {
                warn!("Auto htotal disabled after repeated large corrections");
                cx.rt.auto_best_htotal_enabled = false;
            }
        }
        return Ok(HtotalResult::Rejected("large difference"));
    }
    if target == 0 {
        return Ok(HtotalResult::Rejected("zero target"));
    }
    if target > u32::from(HTOTAL_MAX) {
        return Ok(HtotalResult::Rejected("target out of range"));
    }
    if cx.board.sog_bad()? {
        return Ok(HtotalResult::Rejected("sog bad"));
    }
    cx.rt.fail_retry_attempts = 0;

    let diff = diff as i32;
    let best = target as i32;
    let half = diff / 2;
    let ftl = cx.options().frame_time_lock;
    let b = &mut cx.board;

    let mut dis_st = i32::from(b.read(regs::VDS_DIS_HB_ST)?) + half;
    let mut dis_sp = i32::from(b.read(regs::VDS_DIS_HB_SP)?) + half;
    let mem_st_raw = i32::from(b.read(regs::VDS_HB_ST)?);
    let mut mem_sp = i32::from(b.read(regs::VDS_HB_SP)?) + half;
    let mut mem_st = if mem_st_raw == dis_st - half {
        dis_st
    } else {
        mem_st_raw + half
    };
    dis_st = align_even(dis_st, diff);
    dis_sp = align_even(dis_sp, diff);
    mem_st = align_even(mem_st, diff);
    mem_sp = align_even(mem_sp, diff);

    if dis_st > best - 8 {
        dis_st = (best as f32 * DIS_HB_ST_RATIO) as i32;
    }
    if dis_sp > best {
        dis_sp = (best as f32 * DIS_HB_SP_RATIO) as i32;
    }
    if mem_st > best || mem_st > dis_st {
        mem_st = (dis_st as f32 * MEM_HB_ST_RATIO) as i32;
    }
    if mem_sp > best {
        mem_sp = (dis_sp as f32 * MEM_HB_SP_RATIO) as i32;
    }

    // hsync must stay inside the display blanking
    let mut hs_st = i32::from(b.read(regs::VDS_HS_ST)?);
    let mut hs_sp = i32::from(b.read(regs::VDS_HS_SP)?);
    let negative = hs_st > hs_sp && hs_st < best / 2;
    if negative {
        if hs_st >= dis_sp {
            hs_st = (dis_sp as f32 * HS_INSIDE_BLANK_RATIO) as i32;
            hs_sp = 4;
        }
    } else if hs_sp >= dis_sp {
        hs_sp = (dis_sp as f32 * HS_INSIDE_BLANK_RATIO) as i32;
        hs_st = 4;
    }

    // commit at the start of an output field
    let mut polls = 0u16;
    while b.read(regs::STATUS_VDS_FIELD)? == 1 && polls < FIELD_WAIT_HIGH_POLLS {
        polls += 1;
    }
    while b.read(regs::STATUS_VDS_FIELD)? == 0 && polls < FIELD_WAIT_TOTAL_POLLS {
        polls += 1;
    }

    let clamp = |v: i32| v.clamp(0, best) as u16;
    let to = target as u16;
    b.write(regs::VDS_HSYNC_RST, to)?;
    b.write(regs::VDS_DIS_HB_ST, clamp(dis_st))?;
    b.write(regs::VDS_DIS_HB_SP, clamp(dis_sp))?;
    b.write(regs::VDS_HB_ST, clamp(mem_st))?;
    b.write(regs::VDS_HB_SP, clamp(mem_sp))?;
    b.write(regs::VDS_HS_ST, clamp(hs_st))?;
    b.write(regs::VDS_HS_SP, clamp(hs_sp))?;

    let quiet = ftl && b.read(regs::RUNTIME_FTL_ADJUSTED)? == 1;
    if ftl {
        b.write(regs::RUNTIME_FTL_ADJUSTED, 0)?;
    }
    if quiet {
        debug!(from = orig, to, diff, "HTotal adjust");
    } else {
        info!(from = orig, to, diff, "HTotal adjust");
    }
    Ok(HtotalResult::Applied { from: orig, to })
}

fn hs_stable_for(cx: &mut SyncContext, polls: u8, delay_ms: u32) -> Result<bool, SyncError> {
    for _ in 0..polls {
        if delay_ms > 0 {
            cx.board.delay_ms(delay_ms);
        }
        if !hs_stable(cx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Measure and apply the best htotal once the source has settled.
///
/// Returns `true` when the output timing is locked (or frame sync already
/// holds it). Each unstable attempt spends one of the
/// `sync_lock_fail_ignore` credits; running out disables auto htotal and
/// turns the output on as is.
pub fn run_auto_best_htotal(cx: &mut SyncContext) -> Result<bool, SyncError> {
    if cx.rt.frame_sync.ready() {
        return Ok(true);
    }
    let std = cx.rt.video_standard;
    if !cx.rt.auto_best_htotal_enabled || !std.is_known() || std == VideoStandard::RgbHvBypass {
        return Ok(false);
    }

    let mut stable = hs_stable_for(cx, 64, 0)?;
    if stable {
        if cx.board.sog_bad()? {
            reset_interrupt(cx, int_reset::SOG_BAD)?;
            cx.board.delay_ms(40);
            stable = false;
        }
        reset_interrupt(cx, int_reset::SOG_BAD)?;
    }

    if stable && video_mode(cx)? == std.native_id() {
        let target = frame_sync::init(cx)?;
        if cx.board.sog_bad()? {
            stable = false;
        }
        stable = stable && hs_stable_for(cx, 16, 0)?;
        reset_interrupt(cx, int_reset::SOG_BAD)?;
        if target > u32::from(HTOTAL_MAX) {
            stable = false;
        }
        stable = stable && hs_stable_for(cx, 24, 1)?;

        if stable && target > 0 && apply_best_htotal(cx, target)?.is_ok() {
            cx.rt.sync_lock_fail_ignore = cx.tuning().sync_lock_fail_ignore;
            return Ok(true);
        }
    }

    if !stable {
        frame_sync::reset(cx)?;
        if cx.rt.sync_lock_fail_ignore > 0 {
            cx.rt.sync_lock_fail_ignore -= 1;
            if cx.rt.sync_lock_fail_ignore == 0 {
                cx.board.write(regs::DAC_RGBS_PWDNZ, 1)?;
                cx.rt.auto_best_htotal_enabled = false;
                warn!("Auto htotal disabled, source never settled");
            }
        }
        debug!(remaining = cx.rt.sync_lock_fail_ignore, "Auto htotal retry");
    }

    let counter = cx.rt.continuous_stable_counter;
    if counter != 0 && counter != u8::MAX {
        cx.rt.continuous_stable_counter += 1;
    }
    Ok(false)
}

/// Walk htotal one step at a time toward an exact 60 or 50 Hz output.
///
/// Only starts when the output is within a few hertz of either rate and stops
/// as soon as a step no longer improves the error, settling on the closest
/// line length seen.
pub fn snap_to_integral_frame_rate(cx: &mut SyncContext) -> Result<bool, SyncError> {
    let mut ofr = output_frame_rate(&mut cx.board)?;
    if ofr < 1.0 {
        cx.board.delay_ms(1);
        ofr = output_frame_rate(&mut cx.board)?;
    }
    let target = if ofr > 56.5 && ofr < 64.5 {
        60.0
    } else if ofr > 46.5 && ofr < 54.5 {
        50.0
    } else {
        debug!(ofr, "Output rate out of snap range");
        return Ok(false);
    };
    info!(target, "Snapping output rate");

    let mut current = cx.board.read(regs::VDS_HSYNC_RST)?;
    let mut closest = current;
    let mut closest_diff = (target - ofr).abs();

    loop {
        let next = if target > ofr {
            current.checked_sub(1)
        } else if target < ofr {
            (current < HTOTAL_MAX).then_some(current + 1)
        } else {
            return Ok(true);
        };
        let Some(next) = next else {
            return Ok(false);
        };
        if !apply_best_htotal(cx, u32::from(next))?.is_ok() {
            return Ok(false);
        }
        current = next;

        ofr = output_frame_rate(&mut cx.board)?;
        if ofr < 1.0 {
            return Ok(false);
        }
        let diff = (target - ofr).abs();
        if diff < closest_diff {
            closest_diff = diff;
            closest = current;
        } else {
            break;
        }
    }

    if closest != current {
        apply_best_htotal(cx, u32::from(closest))?;
    }
    Ok(true)
}
