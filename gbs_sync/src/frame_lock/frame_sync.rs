//! Frame-time lock.
//!
//! After auto htotal has matched the output frame length to the input field
//! length, a small residual drift remains. The frame-time lock measures the
//! phase of the output vsync relative to the input vsync and, when it wanders
//! outside a window around the target phase, temporarily lengthens or
//! shortens the output frame by a couple of lines until it comes back.

use crate::config::FrameLockMethod;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::htotal::compute_target_htotal;
use crate::pulse_timer::{BusSelection, SAMPLE_TIMEOUT_US, route};
use gbs_common::regs::{self, test_bus};
use serde::Serialize;
use tracing::{debug, trace};

/// Output vsync trails input vsync by this much when in phase.
pub const TARGET_PHASE_DEG: i32 = 90;

/// Phase error tolerated before a correction is applied.
pub const PHASE_WINDOW_DEG: i32 = 12;

/// Lines added to or removed from vtotal while correcting.
pub const SYNC_CORRECTION_LINES: i8 = 2;

/// Outcome of one frame-time lock step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FtlStep {
    /// `init` has not captured base timings yet.
    NotReady,
    /// A vsync edge could not be captured.
    MeasurementFailed,
    /// Phase inside the window; base timing in effect.
    InPhase { phase_deg: i32 },
    /// Correction in effect.
    Corrected { phase_deg: i32, lines: i8 },
}

/// Base output timing and the correction currently applied on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSync {
    ready: bool,
    vtotal_base: u16,
    vs_start_base: u16,
    vs_stop_base: u16,
    correction: i8,
}

impl FrameSync {
    pub const fn new() -> Self {
        Self {
            ready: false,
            vtotal_base: 0,
            vs_start_base: 0,
            vs_stop_base: 0,
            correction: 0,
        }
    }

    /// Base timings captured and a target htotal was measured.
    #[inline]
    pub const fn ready(&self) -> bool {
        self.ready
    }

    /// Lines currently added to vtotal (negative when shortened).
    #[inline]
    pub const fn correction(&self) -> i8 {
        self.correction
    }

    #[inline]
    pub const fn vtotal_base(&self) -> u16 {
        self.vtotal_base
    }
}

fn offset(base: u16, lines: i8) -> u16 {
    (i32::from(base) + i32::from(lines)).max(0) as u16
}

fn write_vertical(cx: &mut SyncContext, lines: i8) -> Result<(), SyncError> {
    let fs = cx.rt.frame_sync;
    let move_vsync = cx.options().frame_lock_method == FrameLockMethod::VtotalAndVsync;
    let b = &mut cx.board;
    b.write(regs::VDS_VSYNC_RST, offset(fs.vtotal_base, lines))?;
    if move_vsync {
        b.write(regs::VDS_VS_ST, offset(fs.vs_start_base, lines))?;
        b.write(regs::VDS_VS_SP, offset(fs.vs_stop_base, lines))?;
    }
    Ok(())
}

/// Measure the target htotal and capture the base vertical timing.
///
/// Returns the target htotal, 0 when it could not be measured.
pub fn init(cx: &mut SyncContext) -> Result<u32, SyncError> {
    reset(cx)?;
    let target = compute_target_htotal(cx)?;
    let b = &mut cx.board;
    let fs = FrameSync {
        ready: target != 0,
        vtotal_base: b.read(regs::VDS_VSYNC_RST)?,
        vs_start_base: b.read(regs::VDS_VS_ST)?,
        vs_stop_base: b.read(regs::VDS_VS_SP)?,
        correction: 0,
    };
    debug!(target, vtotal = fs.vtotal_base, "Frame sync init");
    cx.rt.frame_sync = fs;
    Ok(target)
}

/// Drop any correction, restoring the base vertical timing.
pub fn reset(cx: &mut SyncContext) -> Result<(), SyncError> {
    if cx.rt.frame_sync.ready && cx.rt.frame_sync.correction != 0 {
        write_vertical(cx, 0)?;
        debug!("Frame sync correction removed");
    }
    cx.rt.frame_sync = FrameSync::new();
    Ok(())
}

/// Output vsync phase relative to input vsync, in degrees (-180, 180].
fn measure_phase(cx: &mut SyncContext) -> Result<Option<i32>, SyncError> {
    let b = &mut cx.board;
    let saved = BusSelection::save(b)?;
    route(b, test_bus::MODE_DETECT, None)?;
    let input = b.pulse_sample(SAMPLE_TIMEOUT_US);
    route(b, test_bus::OUTPUT_FRAME, None)?;
    let output = b.pulse_sample(SAMPLE_TIMEOUT_US);
    saved.restore(b)?;

    let (Some(input), Some(output)) = (input, output) else {
        return Ok(None);
    };
    let period = i64::from(input.period_ticks());
    if period == 0 {
        return Ok(None);
    }
    let delta = i64::from(output.start_tick.wrapping_sub(input.start_tick));
    let mut phase = (delta.rem_euclid(period) * 360 / period) as i32;
    if phase > 180 {
        phase -= 360;
    }
    Ok(Some(phase))
}

/// One frame-time lock step.
pub fn run(cx: &mut SyncContext) -> Result<FtlStep, SyncError> {
    if !cx.rt.frame_sync.ready {
        return Ok(FtlStep::NotReady);
    }
    let Some(phase) = measure_phase(cx)? else {
        trace!("Frame sync: no vsync edge");
        return Ok(FtlStep::MeasurementFailed);
    };

    let mut error = phase - TARGET_PHASE_DEG;
    if error > 180 {
        error -= 360;
    } else if error <= -180 {
        error += 360;
    }

    let lines = if error.abs() <= PHASE_WINDOW_DEG {
        0
    } else if error > 0 {
        -SYNC_CORRECTION_LINES
    } else {
        SYNC_CORRECTION_LINES
    };

    if lines != cx.rt.frame_sync.correction {
        write_vertical(cx, lines)?;
        cx.rt.frame_sync.correction = lines;
        debug!(phase, lines, "Frame sync correction");
    }
    Ok(if lines == 0 {
        FtlStep::InPhase { phase_deg: phase }
    } else {
        FtlStep::Corrected {
            phase_deg: phase,
            lines,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use gbs_hal::{SignalSource, SimulationDriver};

    fn context(config: SyncConfig) -> (SyncContext, SimulationDriver) {
        let sim = SimulationDriver::new()
            .with_source(SignalSource::ntsc_480i())
            .with_synth_fitted(false);
        sim.poke(regs::VDS_HSYNC_RST, 1716);
        sim.poke(regs::VDS_VSYNC_RST, 525);
        sim.poke(regs::VDS_VS_ST, 6);
        sim.poke(regs::VDS_VS_SP, 12);
        sim.set_display_clock_hz(Some(54_054_000.0));
        let cx = SyncContext::new(Box::new(sim.clone()), config);
        (cx, sim)
    }

    #[test]
    fn not_ready_writes_nothing() {
        let (mut cx, sim) = context(SyncConfig::default());
        let writes = sim.write_count();
        assert_eq!(run(&mut cx).unwrap(), FtlStep::NotReady);
        assert_eq!(sim.write_count(), writes);
    }

    #[test]
    fn init_captures_base_timing() {
        let (mut cx, _sim) = context(SyncConfig::default());
        assert_eq!(init(&mut cx).unwrap(), 1717);
        assert!(cx.rt.frame_sync.ready());
        assert_eq!(cx.rt.frame_sync.vtotal_base(), 525);
        assert_eq!(cx.rt.frame_sync.correction(), 0);
    }

    #[test]
    fn correction_stays_within_two_lines_and_resets() {
        let (mut cx, sim) = context(SyncConfig::default());
        init(&mut cx).unwrap();
        for _ in 0..6 {
            match run(&mut cx).unwrap() {
                FtlStep::Corrected { lines, .. } => {
                    assert_eq!(lines.abs(), SYNC_CORRECTION_LINES);
                    assert_eq!(sim.peek(regs::VDS_VSYNC_RST), offset(525, lines));
                    assert_eq!(sim.peek(regs::VDS_VS_ST), offset(6, lines));
                }
                FtlStep::InPhase { .. } => assert_eq!(sim.peek(regs::VDS_VSYNC_RST), 525),
                other => panic!("unexpected step {other:?}"),
            }
        }
        reset(&mut cx).unwrap();
        assert_eq!(sim.peek(regs::VDS_VSYNC_RST), 525);
        assert_eq!(sim.peek(regs::VDS_VS_ST), 6);
        assert!(!cx.rt.frame_sync.ready());
    }

    #[test]
    fn vtotal_only_leaves_vsync() {
        let mut config = SyncConfig::default();
        config.options.frame_lock_method = FrameLockMethod::VtotalOnly;
        let (mut cx, sim) = context(config);
        init(&mut cx).unwrap();
        for _ in 0..6 {
            run(&mut cx).unwrap();
            assert_eq!(sim.peek(regs::VDS_VS_ST), 6);
            assert_eq!(sim.peek(regs::VDS_VS_SP), 12);
        }
    }

    #[test]
    fn lost_source_fails_measurement() {
        let (mut cx, sim) = context(SyncConfig::default());
        init(&mut cx).unwrap();
        sim.set_source(SignalSource::none());
        assert_eq!(run(&mut cx).unwrap(), FtlStep::MeasurementFailed);
    }
}
