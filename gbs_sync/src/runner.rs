//! Outer scheduler.
//!
//! `SyncRunner` owns the controller context and the watcher and paces
//! everything else around the watcher tick: the board power self-test, the
//! input scan while in low power, coast and clamp placement once a source has
//! settled, auto htotal, frame-time lock, and the clock synthesizer monitor.
//!
//! Time comes from the board's timebase, so a simulated board runs the same
//! schedule in virtual time.

use crate::classifier::{InputDetection, hs_stable, input_and_sync_detect, video_mode};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::frame_lock::{FtlStep, clock_gen, frame_sync, htotal};
use crate::sync_processor::{
    check_board_power, set_reset_parameters, update_clamp_position, update_coast_position,
};
use crate::watcher::{SyncWatcher, TickOutcome, WatchState};
use bitflags::bitflags;
use gbs_common::regs;
use gbs_common::video::VideoStandard;
use serde::Serialize;
use tracing::{debug, info, warn};

// ─── Cadence ────────────────────────────────────────────────────────

/// Interval of the register self-test.
pub const POWER_CHECK_INTERVAL_MS: u64 = 100;
/// Stable ticks before coast placement.
pub const COAST_AFTER_STABLE: u8 = 7;
/// Stable ticks before clamp placement.
pub const CLAMP_AFTER_STABLE: u8 = 4;
/// Stable ticks before auto htotal.
pub const AUTO_HTOTAL_AFTER_STABLE: u8 = 10;
/// Stable ticks before frame-time lock corrections.
pub const FRAME_LOCK_AFTER_STABLE: u8 = 20;
/// Hold-off after the last vsync disturbance before auto htotal.
const AUTO_HTOTAL_VSYNC_HOLDOFF_MS: u64 = 500;
/// Measured source htotal must lie in this range for auto htotal.
const SOURCE_HTOTAL_MIN: u16 = 598;
const SOURCE_HTOTAL_MAX: u16 = 4095;
/// Frame-time lock only runs while source and output line lengths agree.
const FRAME_LOCK_HTOTAL_TOLERANCE: u16 = 3;

bitflags! {
    /// Scheduled work that ran during one step.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TickEvents: u16 {
        const POWER_CHECKED   = 0x0001;
        const INPUT_SCANNED   = 0x0002;
        const SOURCE_FOUND    = 0x0004;
        const COAST_UPDATED   = 0x0008;
        const CLAMP_UPDATED   = 0x0010;
        const AUTO_HTOTAL     = 0x0020;
        const FRAME_LOCK      = 0x0040;
        const CLOCK_MONITORED = 0x0080;
    }
}

/// Result of one runner step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub outcome: TickOutcome,
    pub events: TickEvents,
}

/// Point-in-time view of the controller, serialized for `--status-json`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub uptime_ms: u64,
    pub steps: u64,
    pub board_powered: bool,
    pub watcher: WatchState,
    pub standard: VideoStandard,
    pub csync: bool,
    pub component: bool,
    pub low_power: bool,
    pub output_frozen: bool,
    pub no_sync_counter: u16,
    pub stable_counter: u8,
    pub sog_level: u8,
    pub phase_sp: u8,
    pub phase_adc: u8,
    pub osr: u8,
    pub auto_htotal: bool,
    pub frame_sync_ready: bool,
    pub frame_sync_correction: i8,
    pub ext_clock_present: bool,
    pub ext_clock_hz: u32,
    pub rgbhv_preset_lines: u16,
}

/// Drives the watcher and the periodic timing work.
#[derive(Debug)]
pub struct SyncRunner {
    cx: SyncContext,
    watcher: SyncWatcher,
    steps: u64,
    started_ms: u64,
    last_power_check_ms: u64,
    last_input_scan_ms: Option<u64>,
    last_auto_htotal_ms: Option<u64>,
    last_clock_check_ms: u64,
}

impl SyncRunner {
    pub fn new(cx: SyncContext) -> Self {
        let now = cx.board.millis();
        Self {
            cx,
            watcher: SyncWatcher::new(),
            steps: 0,
            started_ms: now,
            last_power_check_ms: now,
            last_input_scan_ms: None,
            last_auto_htotal_ms: None,
            last_clock_check_ms: now,
        }
    }

    /// Bring the board up: driver init, self-test, synthesizer detection.
    pub fn init(&mut self) -> Result<(), SyncError> {
        let cx = &mut self.cx;
        cx.board.init()?;
        if !check_board_power(cx)? {
            return Err(SyncError::BoardNotResponding);
        }
        set_reset_parameters(cx)?;
        let synth = clock_gen::detect(cx)?;
        info!(board = cx.board.name(), synth, presets = cx.preset_name(), "Controller ready");
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), SyncError> {
        self.cx.board.write(regs::DAC_RGBS_PWDNZ, 0)?;
        self.cx.board.shutdown()?;
        Ok(())
    }

    #[inline]
    pub fn context(&self) -> &SyncContext {
        &self.cx
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut SyncContext {
        &mut self.cx
    }

    #[inline]
    pub fn watcher(&self) -> &SyncWatcher {
        &self.watcher
    }

    /// One watcher tick plus whatever periodic work is due, then wait out
    /// the tick interval.
    pub fn step(&mut self) -> Result<StepReport, SyncError> {
        let mut events = TickEvents::empty();
        let outcome = self.step_inner(&mut events)?;
        self.steps += 1;
        let tick_ms = self.cx.tuning().watcher_tick_ms;
        self.cx.board.delay_ms(tick_ms);
        Ok(StepReport { outcome, events })
    }

    fn step_inner(&mut self, events: &mut TickEvents) -> Result<TickOutcome, SyncError> {
        let now = self.cx.board.millis();
        if now - self.last_power_check_ms >= POWER_CHECK_INTERVAL_MS || !self.cx.rt.board_has_power {
            self.last_power_check_ms = now;
            check_board_power(&mut self.cx)?;
            *events |= TickEvents::POWER_CHECKED;
        }
        if !self.cx.rt.board_has_power {
            return Ok(TickOutcome::BoardNotResponding);
        }

        if self.cx.rt.source_disconnected || self.cx.rt.is_in_low_power_mode {
            let poll = self.cx.tuning().low_power_poll_ms;
            let due = self.last_input_scan_ms.is_none_or(|t| now - t >= poll);
            if due {
                *events |= TickEvents::INPUT_SCANNED;
                let found = input_and_sync_detect(&mut self.cx)?;
                self.last_input_scan_ms = Some(self.cx.board.millis());
                if found != InputDetection::NoSource {
                    info!(?found, "Source found");
                    *events |= TickEvents::SOURCE_FOUND;
                    self.watcher.source_found();
                }
            }
        }

        let outcome = self.watcher.tick(&mut self.cx)?;
        if matches!(outcome, TickOutcome::LowPower | TickOutcome::BoardNotResponding) {
            return Ok(outcome);
        }

        self.place_coast_and_clamp(events)?;
        self.auto_htotal(events)?;
        self.frame_lock(events)?;

        let now = self.cx.board.millis();
        if now - self.last_clock_check_ms >= self.cx.tuning().clock_monitor_interval_ms {
            self.last_clock_check_ms = now;
            clock_gen::monitor_lock(&mut self.cx)?;
            *events |= TickEvents::CLOCK_MONITORED;
        }
        Ok(outcome)
    }

    fn place_coast_and_clamp(&mut self, events: &mut TickEvents) -> Result<(), SyncError> {
        let cx = &mut self.cx;
        let std = cx.rt.video_standard;
        let id = std.native_id();
        let stable = cx.rt.continuous_stable_counter;

        if (1..=14).contains(&id)
            && !cx.rt.coast_position_set
            && stable >= COAST_AFTER_STABLE
            && hs_stable(cx)?
            && video_mode(cx)? == id
        {
            update_coast_position(cx, false)?;
            if cx.rt.coast_position_set && std.is_sd() {
                cx.board.write(regs::SP_H_PROTECT, 1)?;
            }
            *events |= TickEvents::COAST_UPDATED;
        }

        if id != 0 && !cx.rt.clamp_position_set && cx.rt.continuous_stable_counter >= CLAMP_AFTER_STABLE {
            update_clamp_position(cx)?;
            if cx.rt.clamp_position_set {
                cx.board.write(regs::SP_NO_CLAMP_REG, 0)?;
            }
            *events |= TickEvents::CLAMP_UPDATED;
        }
        Ok(())
    }

    fn auto_htotal(&mut self, events: &mut TickEvents) -> Result<(), SyncError> {
        let cx = &mut self.cx;
        let now = cx.board.millis();
        let interval = cx.tuning().auto_htotal_interval_ms;
        if !cx.rt.auto_best_htotal_enabled
            || cx.rt.frame_sync.ready()
            || cx.rt.continuous_stable_counter < AUTO_HTOTAL_AFTER_STABLE
            || !cx.rt.coast_position_set
            || now.saturating_sub(cx.rt.last_vsync_lock_ms) <= AUTO_HTOTAL_VSYNC_HOLDOFF_MS
            || self.last_auto_htotal_ms.is_some_and(|t| now - t < interval)
        {
            return Ok(());
        }
        let source_htotal = cx.board.read(regs::SYNC_PROC_HTOTAL)?;
        if source_htotal <= SOURCE_HTOTAL_MIN || source_htotal >= SOURCE_HTOTAL_MAX {
            return Ok(());
        }

        self.last_auto_htotal_ms = Some(now);
        *events |= TickEvents::AUTO_HTOTAL;
        let locked = htotal::run_auto_best_htotal(cx)?;
        debug!(locked, "Auto htotal");
        if locked && cx.ext_clock_in_use() {
            clock_gen::sync_in_out_rate(cx)?;
        }
        Ok(())
    }

    fn frame_lock(&mut self, events: &mut TickEvents) -> Result<(), SyncError> {
        let cx = &mut self.cx;
        let now = cx.board.millis();
        if !cx.options().frame_time_lock
            || !cx.rt.frame_sync.ready()
            || now.saturating_sub(cx.rt.last_vsync_lock_ms) <= cx.tuning().frame_lock_interval_ms
            || cx.rt.continuous_stable_counter <= FRAME_LOCK_AFTER_STABLE
            || cx.rt.no_sync_counter != 0
        {
            return Ok(());
        }
        let source_htotal = cx.board.read(regs::SYNC_PROC_HTOTAL)?;
        let pll_divider = cx.board.read(regs::PLLAD_MD)?;
        if source_htotal.abs_diff(pll_divider) > FRAME_LOCK_HTOTAL_TOLERANCE {
            return Ok(());
        }

        *events |= TickEvents::FRAME_LOCK;
        match frame_sync::run(cx)? {
            FtlStep::MeasurementFailed => {
                if cx.rt.sync_lock_fail_ignore > 0 {
                    cx.rt.sync_lock_fail_ignore -= 1;
                } else {
                    warn!("Frame lock keeps failing, resetting");
                    frame_sync::reset(cx)?;
                    cx.rt.sync_lock_fail_ignore = cx.tuning().sync_lock_fail_ignore;
                }
            }
            FtlStep::InPhase { .. } | FtlStep::Corrected { .. } => {
                cx.rt.sync_lock_fail_ignore = cx.tuning().sync_lock_fail_ignore;
            }
            FtlStep::NotReady => {}
        }
        cx.rt.last_vsync_lock_ms = cx.board.millis();
        Ok(())
    }

    /// Snapshot of the controller state.
    pub fn status(&self) -> StatusSnapshot {
        let rt = &self.cx.rt;
        StatusSnapshot {
            uptime_ms: self.cx.board.millis() - self.started_ms,
            steps: self.steps,
            board_powered: rt.board_has_power,
            watcher: self.watcher.state(),
            standard: rt.video_standard,
            csync: rt.sync_type_csync,
            component: rt.input_is_component,
            low_power: rt.is_in_low_power_mode,
            output_frozen: rt.output_frozen,
            no_sync_counter: rt.no_sync_counter,
            stable_counter: rt.continuous_stable_counter,
            sog_level: rt.sog_level,
            phase_sp: rt.phase_sp,
            phase_adc: rt.phase_adc,
            osr: rt.osr,
            auto_htotal: rt.auto_best_htotal_enabled,
            frame_sync_ready: rt.frame_sync.ready(),
            frame_sync_correction: rt.frame_sync.correction(),
            ext_clock_present: rt.ext_clock_gen_present,
            ext_clock_hz: rt.ext_clock_freq_hz,
            rgbhv_preset_lines: self.watcher.rgbhv_preset_lines(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use gbs_hal::{SignalSource, SimulationDriver};

    fn runner(source: SignalSource) -> (SyncRunner, SimulationDriver) {
        let sim = SimulationDriver::new()
            .with_source(source)
            .with_synth_fitted(false);
        let cx = SyncContext::new(Box::new(sim.clone()), SyncConfig::default());
        let mut runner = SyncRunner::new(cx);
        runner.init().unwrap();
        (runner, sim)
    }

    #[test]
    fn init_fails_on_dead_board() {
        let sim = SimulationDriver::new();
        sim.set_powered(false);
        let cx = SyncContext::new(Box::new(sim), SyncConfig::default());
        let mut runner = SyncRunner::new(cx);
        assert!(matches!(runner.init(), Err(SyncError::BoardNotResponding)));
    }

    #[test]
    fn first_step_scans_inputs() {
        let (mut runner, _sim) = runner(SignalSource::ntsc_480i());
        let report = runner.step().unwrap();
        assert!(report.events.contains(TickEvents::INPUT_SCANNED));
        assert!(report.events.contains(TickEvents::SOURCE_FOUND));
        assert!(!runner.context().rt.source_disconnected);
    }

    #[test]
    fn no_source_stays_in_low_power() {
        let (mut runner, _sim) = runner(SignalSource::none());
        for _ in 0..3 {
            assert_eq!(runner.step().unwrap().outcome, TickOutcome::LowPower);
        }
        assert_eq!(runner.watcher().state(), WatchState::LowPower);
    }

    #[test]
    fn power_loss_is_reported() {
        let (mut runner, sim) = runner(SignalSource::ntsc_480i());
        sim.set_powered(false);
        runner
            .context_mut()
            .board
            .delay_ms(POWER_CHECK_INTERVAL_MS as u32);
        let report = runner.step().unwrap();
        assert!(report.events.contains(TickEvents::POWER_CHECKED));
        assert_eq!(report.outcome, TickOutcome::BoardNotResponding);
        assert!(!runner.status().board_powered);
    }

    #[test]
    fn status_serializes() {
        let (runner, _sim) = runner(SignalSource::none());
        let json = serde_json::to_value(runner.status()).unwrap();
        assert_eq!(json["standard"], "unknown");
        assert_eq!(json["watcher"], "low_power");
        assert_eq!(json["board_powered"], true);
    }
}
