//! External clock synthesizer.
//!
//! When a synthesizer is fitted it feeds the scaler's clock input and the
//! display clock selector is set to external (0x75). Instead of stretching
//! htotal, the lock loop then retunes the synthesizer by the ratio of source
//! to output rate, one clamped step at a time.

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::pulse_timer::{output_frame_rate, source_field_rate};
use gbs_common::consts::{DEFAULT_EXT_CLOCK_HZ, DISPLAY_CLOCK_EXTERNAL, LOCK_MAX_RATE_HZ, LOCK_MIN_RATE_HZ};
use gbs_common::hal::ClockSynth;
use gbs_common::regs;
use gbs_common::status::SynthStatus;
use tracing::{debug, info, warn};

/// Lock wait after a full clock reset.
const RESET_LOCK_TIMEOUT_MS: u32 = 250;

/// Step size of a smooth retune.
const SMOOTH_STEP_HZ: u32 = 1_000;
/// Retunes at least this large are programmed in one shot.
const SMOOTH_MAX_SPAN_HZ: u32 = 750_000;

/// Stable ticks required before a lost lock triggers a resync.
const MONITOR_RESYNC_STABLE: u8 = 20;

// ─── Log Throttle ───────────────────────────────────────────────────

/// Lets one message through per interval.
#[derive(Debug, Clone, Copy)]
pub struct LogThrottle {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl LogThrottle {
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    /// Whether a message may be emitted at `now_ms`; records it if so.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms.saturating_sub(last) < self.interval_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn with_synth<T>(
    cx: &mut SyncContext,
    f: impl FnOnce(&mut dyn ClockSynth) -> Result<T, gbs_common::hal::HalError>,
) -> Result<Option<T>, SyncError> {
    match cx.board.synth() {
        Some(synth) => Ok(Some(f(synth)?)),
        None => Ok(None),
    }
}

/// Display clock selector value to synthesizer frequency.
pub fn display_clock_hz(code: u8) -> u32 {
    match code {
        0x25 => 40_500_000,
        0x45 => 54_000_000,
        0x55 => 64_800_000,
        0x65 => 81_000_000,
        0x85 => 108_000_000,
        0x95 => 129_600_000,
        0xa5 => 162_000_000,
        _ => DEFAULT_EXT_CLOCK_HZ,
    }
}

fn synth_status(cx: &mut SyncContext) -> Result<Option<SynthStatus>, SyncError> {
    with_synth(cx, |s| s.status())
}

/// Poll the lock predicate for up to `timeout_ms`.
fn wait_for_lock(cx: &mut SyncContext, timeout_ms: u32) -> Result<bool, SyncError> {
    let start = cx.board.millis();
    loop {
        if synth_status(cx)?.is_some_and(|st| st.is_locked()) {
            return Ok(true);
        }
        if cx.board.millis().saturating_sub(start) >= u64::from(timeout_ms) {
            return Ok(false);
        }
        cx.board.delay_ms(1);
    }
}

fn program(cx: &mut SyncContext, hz: u32) -> Result<(), SyncError> {
    with_synth(cx, |s| {
        s.set_frequency(hz)?;
        s.enable_output(true)?;
        s.clear_sticky()
    })?;
    Ok(())
}

fn ratio_in_band(hz: f32) -> bool {
    (LOCK_MIN_RATE_HZ..=LOCK_MAX_RATE_HZ).contains(&hz)
}

// ─── Operations ─────────────────────────────────────────────────────

/// Look for a synthesizer that answers and finished initialization.
pub fn detect(cx: &mut SyncContext) -> Result<bool, SyncError> {
    cx.rt.ext_clock_gen_present = false;
    cx.rt.ext_clock_freq_hz = DEFAULT_EXT_CLOCK_HZ;
    if cx.options().disable_external_clock_generator {
        info!("External clock generator disabled, skipping detection");
        return Ok(false);
    }
    let present = with_synth(cx, |s| Ok(s.probe()? && s.status()?.is_ready()))?.unwrap_or(false);
    cx.rt.ext_clock_gen_present = present;
    if present {
        info!(hz = DEFAULT_EXT_CLOCK_HZ, "External clock generator detected");
    }
    Ok(present)
}

/// Program the synthesizer to the display clock the current preset asks for.
///
/// The clock input is held disconnected until lock; one PLL reset is tried
/// when the first wait runs out.
pub fn reset_clock(cx: &mut SyncContext) -> Result<bool, SyncError> {
    if !cx.rt.ext_clock_gen_present {
        return Ok(false);
    }
    let code = match cx.board.read(regs::PRESET_DISPLAY_CLOCK)? {
        0 => cx.board.read(regs::PLL648_CONTROL_01)?,
        code => code,
    };
    let hz = display_clock_hz(code as u8);

    cx.board.write(regs::PAD_CKIN_ENZ, 1)?;
    program(cx, hz)?;
    cx.rt.ext_clock_freq_hz = hz;

    let mut locked = wait_for_lock(cx, RESET_LOCK_TIMEOUT_MS)?;
    if !locked {
        with_synth(cx, |s| s.reset_pll())?;
        locked = wait_for_lock(cx, RESET_LOCK_TIMEOUT_MS)?;
    }
    cx.board.write(regs::PAD_CKIN_ENZ, 0)?;
    with_synth(cx, |s| s.clear_sticky())?;

    if locked {
        info!(hz, "Clock gen reset");
    } else {
        warn!(hz, "Clock gen reset without lock");
    }
    Ok(locked)
}

/// Move `ext_clock_freq_hz` to `hz` in 1 kHz steps, then land exactly.
///
/// Differences of 750 kHz or more jump directly.
pub fn set_frequency_smooth(cx: &mut SyncContext, hz: u32) -> Result<(), SyncError> {
    let mut current = cx.rt.ext_clock_freq_hz;
    cx.rt.ext_clock_freq_hz = hz;
    if current.abs_diff(hz) < SMOOTH_MAX_SPAN_HZ {
        while current.abs_diff(hz) > SMOOTH_STEP_HZ {
            current = if current > hz {
                current - SMOOTH_STEP_HZ
            } else {
                current + SMOOTH_STEP_HZ
            };
            with_synth(cx, |s| s.set_frequency(current))?;
        }
    }
    with_synth(cx, |s| s.set_frequency(hz))?;
    Ok(())
}

/// Retune the synthesizer so the output frame rate follows the source.
///
/// Returns `true` when a new frequency locked. A failed lock rolls the
/// device back to the previous frequency.
pub fn sync_in_out_rate(cx: &mut SyncContext) -> Result<bool, SyncError> {
    if !cx.rt.ext_clock_gen_present {
        return Ok(false);
    }
    if cx.board.read(regs::PAD_CKIN_ENZ)? != 0
        || cx.board.read(regs::PLL648_CONTROL_01)? != u16::from(DISPLAY_CLOCK_EXTERNAL)
    {
        return Ok(false);
    }

    let sfr = source_field_rate(&mut cx.board, false)?;
    if !ratio_in_band(sfr) {
        debug!(sfr, "Clock sync skipped, source rate out of band");
        return Ok(false);
    }
    let ofr = output_frame_rate(&mut cx.board)?;
    if !ratio_in_band(ofr) {
        debug!(ofr, "Clock sync skipped, output rate out of band");
        return Ok(false);
    }

    let clamp = f64::from(cx.tuning().ext_clock_ratio_clamp);
    let ratio = (f64::from(sfr) / f64::from(ofr)).clamp(1.0 - clamp, 1.0 + clamp);
    let old = cx.rt.ext_clock_freq_hz;
    let new = (ratio * f64::from(old)) as u32;

    cx.board.write(regs::PAD_CKIN_ENZ, 1)?;
    program(cx, new)?;
    let locked = wait_for_lock(cx, cx.tuning().ext_clock_lock_timeout_ms)?;
    if locked {
        cx.rt.ext_clock_freq_hz = new;
    } else {
        if cx.clock_log.allow(cx.board.millis()) {
            warn!(old, attempted = new, "Clock sync lock failed, rolling back");
        }
        program(cx, old)?;
        cx.rt.ext_clock_freq_hz = old;
    }
    cx.board.write(regs::PAD_CKIN_ENZ, 0)?;

    let diff = i64::from(cx.rt.ext_clock_freq_hz) - i64::from(old);
    debug!(sfr, ofr, hz = cx.rt.ext_clock_freq_hz, diff, "Clock sync");
    Ok(locked)
}

/// Periodic lock check; resyncs a stable source whose clock lost lock.
///
/// Returns `true` when the synthesizer reports lock.
pub fn monitor_lock(cx: &mut SyncContext) -> Result<bool, SyncError> {
    if !cx.ext_clock_in_use() || cx.rt.source_disconnected {
        return Ok(true);
    }
    // SYS_INIT may stay latched while the PLL runs; only loss of lock counts
    let locked = synth_status(cx)?.is_some_and(|st| !st.contains(SynthStatus::LOL_A));
    if !locked {
        if cx.clock_log.allow(cx.board.millis()) {
            warn!("Clock gen lock lost");
        }
        if cx.rt.continuous_stable_counter > MONITOR_RESYNC_STABLE && cx.rt.no_sync_counter == 0 {
            sync_in_out_rate(cx)?;
        }
    }
    Ok(locked)
}
