//! Single-pulse period measurement.
//!
//! The scaler exposes one internal timing pulse on its debug pin. The edge
//! handler records two consecutive rising edges into a [`PulseCapture`];
//! this module arms it, waits with a bounded wall-clock timeout and turns the
//! captured tick pair into a period or rate.
//!
//! # Rates
//!
//! - [`source_field_rate`] - input vertical rate, via the input formatter or
//!   the sync processor test bus
//! - [`output_frame_rate`] - output frame rate from the display timing block
//! - [`pll_rate`] - horizontal PLL feedback rate, used to bucket RGB/HV sources

use crate::board::Board;
use crate::error::SyncError;
use gbs_common::consts::{LOCK_MAX_RATE_HZ, LOCK_MIN_RATE_HZ};
use gbs_common::hal::{PulseCapture, Timebase};
use gbs_common::regs::{self, test_bus};
use std::sync::Arc;

/// Longest wait for both edges of one sample.
pub const SAMPLE_TIMEOUT_US: u64 = 150_000;

const POLL_INTERVAL_US: u32 = 100;

/// Relative disagreement between two output samples that triggers a third.
const OUTPUT_RATE_REL_TOLERANCE: f32 = 0.00833;
/// Absolute disagreement between two output samples that triggers a third.
const OUTPUT_RATE_ABS_TOLERANCE_HZ: f32 = 0.5;

/// Input formatter test selection that exposes the averaged frame time.
const IF_TEST_FRAME_TIME: u16 = 3;

/// Captured edge pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub start_tick: u32,
    pub stop_tick: u32,
}

impl Sample {
    /// Ticks between the two edges; survives counter wrap.
    #[inline]
    pub const fn period_ticks(&self) -> u32 {
        self.stop_tick.wrapping_sub(self.start_tick)
    }

    /// Pulse rate in Hz for a counter running at `tick_rate_hz`.
    pub fn frequency_hz(&self, tick_rate_hz: u32) -> f32 {
        match self.period_ticks() {
            0 => 0.0,
            period => (f64::from(tick_rate_hz) / f64::from(period)) as f32,
        }
    }
}

/// Arms the shared capture cell and waits for a result.
#[derive(Debug, Clone)]
pub struct PulseTimer {
    capture: Arc<PulseCapture>,
}

impl PulseTimer {
    pub fn new() -> Self {
        Self {
            capture: Arc::new(PulseCapture::new()),
        }
    }

    /// Handle to hand to the edge input.
    pub fn capture(&self) -> Arc<PulseCapture> {
        Arc::clone(&self.capture)
    }

    /// Discard any previous capture and wait for the next edge.
    #[inline]
    pub fn arm(&self) {
        self.capture.arm();
    }

    /// Arm, then block up to `timeout_us` for both edges.
    ///
    /// Returns `None` on timeout and leaves the capture disarmed.
    pub fn sample<T: Timebase + ?Sized>(&self, tb: &mut T, timeout_us: u64) -> Option<Sample> {
        self.arm();
        let start = tb.micros();
        loop {
            if let Some((start_tick, stop_tick)) = self.capture.snapshot() {
                return Some(Sample {
                    start_tick,
                    stop_tick,
                });
            }
            if tb.micros().saturating_sub(start) > timeout_us {
                self.capture.disarm();
                return None;
            }
            tb.delay_us(POLL_INTERVAL_US);
        }
    }

    /// Period of one pulse in ticks, `None` on timeout.
    pub fn pulse_ticks<T: Timebase + ?Sized>(&self, tb: &mut T, timeout_us: u64) -> Option<u32> {
        self.sample(tb, timeout_us)
            .map(|s| s.period_ticks())
            .filter(|p| *p > 0)
    }
}

impl Default for PulseTimer {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Test Bus Routing ───────────────────────────────────────────────

/// Debug bus selection to restore after a measurement.
#[derive(Debug, Clone, Copy)]
pub struct BusSelection {
    test_bus: u16,
    sp_bus: u16,
    if_test: u16,
    pad_enable: u16,
}

impl BusSelection {
    /// Snapshot the current debug routing.
    pub fn save(board: &mut Board) -> Result<Self, SyncError> {
        Ok(Self {
            test_bus: board.read(regs::TEST_BUS_SEL)?,
            sp_bus: board.read(regs::TEST_BUS_SP_SEL)?,
            if_test: board.read(regs::IF_TEST_SEL)?,
            pad_enable: board.read(regs::PAD_BOUT_EN)?,
        })
    }

    /// Put the routing back, writing only what changed.
    pub fn restore(self, board: &mut Board) -> Result<(), SyncError> {
        board.write_if_changed(regs::TEST_BUS_SEL, self.test_bus)?;
        board.write_if_changed(regs::TEST_BUS_SP_SEL, self.sp_bus)?;
        board.write_if_changed(regs::IF_TEST_SEL, self.if_test)?;
        board.write_if_changed(regs::PAD_BOUT_EN, self.pad_enable)?;
        Ok(())
    }
}

/// Point the debug pin at `bus` (and `sp_bus` on the sync-processor bus).
pub(crate) fn route(board: &mut Board, bus: u16, sp_bus: Option<u16>) -> Result<(), SyncError> {
    board.write_if_changed(regs::TEST_BUS_SEL, bus)?;
    if let Some(sp) = sp_bus {
        board.write_if_changed(regs::TEST_BUS_SP_SEL, sp)?;
    }
    if bus == test_bus::MODE_DETECT {
        board.write_if_changed(regs::IF_TEST_SEL, IF_TEST_FRAME_TIME)?;
    }
    board.write_if_changed(regs::PAD_BOUT_EN, 1)?;
    Ok(())
}

fn in_lock_band(hz: f32) -> bool {
    (LOCK_MIN_RATE_HZ..=LOCK_MAX_RATE_HZ).contains(&hz)
}

// ─── Rates ──────────────────────────────────────────────────────────

/// Average period in ticks of the pulse currently routed to the pin.
///
/// Takes `count` samples; any timeout fails the whole measurement.
pub fn average_period(board: &mut Board, count: u8) -> Option<f64> {
    let mut acc = 0.0f64;
    for _ in 0..count.max(1) {
        acc += f64::from(board.pulse_ticks(SAMPLE_TIMEOUT_US)?);
    }
    Some(acc / f64::from(count.max(1)))
}

/// Input field rate in Hz, 0.0 when nothing was captured.
///
/// `use_sp_bus` reads the vertical sync decoded by the sync processor instead
/// of the input formatter; the classifier uses it to tell embedded CSync from
/// separate sync. A reading outside 47–86 Hz is retried once.
pub fn source_field_rate(board: &mut Board, use_sp_bus: bool) -> Result<f32, SyncError> {
    let saved = BusSelection::save(board)?;
    if use_sp_bus {
        route(board, test_bus::SYNC_PROCESSOR, Some(test_bus::SP_VSYNC))?;
    } else {
        route(board, test_bus::MODE_DETECT, None)?;
    }

    let tick_rate = board.tick_rate_hz();
    let mut hz = 0.0;
    for _ in 0..2 {
        hz = board
            .pulse_sample(SAMPLE_TIMEOUT_US)
            .map(|s| s.frequency_hz(tick_rate))
            .unwrap_or(0.0);
        if in_lock_band(hz) {
            break;
        }
    }

    saved.restore(board)?;
    Ok(hz)
}

/// Output frame rate in Hz, 0.0 when the output is not running.
///
/// Two samples; a third one breaks a disagreement, and the two closest
/// samples are averaged.
pub fn output_frame_rate(board: &mut Board) -> Result<f32, SyncError> {
    let saved = BusSelection::save(board)?;
    route(board, test_bus::OUTPUT_FRAME, None)?;

    let tick_rate = board.tick_rate_hz();
    let take = |board: &mut Board| {
        board
            .pulse_sample(SAMPLE_TIMEOUT_US)
            .map(|s| s.frequency_hz(tick_rate))
            .unwrap_or(0.0)
    };
    let first = take(&mut *board);
    let second = take(&mut *board);
    let rate = if agree(first, second) {
        (first + second) / 2.0
    } else {
        let third = take(&mut *board);
        if agree(first, third) {
            (first + third) / 2.0
        } else if agree(second, third) {
            (second + third) / 2.0
        } else {
            third
        }
    };

    saved.restore(board)?;
    Ok(rate)
}

fn agree(a: f32, b: f32) -> bool {
    if a <= 0.0 || b <= 0.0 {
        return false;
    }
    let diff = (a - b).abs();
    diff <= OUTPUT_RATE_ABS_TOLERANCE_HZ && diff / a.max(b) <= OUTPUT_RATE_REL_TOLERANCE
}

/// Horizontal PLL feedback rate in Hz, 0 when nothing was captured.
pub fn pll_rate(board: &mut Board, csync: bool) -> Result<u32, SyncError> {
    let saved = BusSelection::save(board)?;
    let sp = if csync {
        test_bus::SP_HPLL_CSYNC
    } else {
        test_bus::SP_HPLL_HV
    };
    route(board, test_bus::SYNC_PROCESSOR, Some(sp))?;

    let tick_rate = board.tick_rate_hz();
    let rate = board
        .pulse_sample(SAMPLE_TIMEOUT_US)
        .map(|s| s.frequency_hz(tick_rate).round() as u32)
        .unwrap_or(0);

    saved.restore(board)?;
    Ok(rate)
}
