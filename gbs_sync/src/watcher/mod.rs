//! Sync watcher.
//!
//! Called once per watcher tick. Compares the mode read back from the scaler
//! with the standard whose preset is applied and picks one branch:
//!
//! - **No sync**: mode 0 or HS unstable. Escalation runs on the no-sync
//!   counter and eventually gives up into low power.
//! - **Format change**: a different mode is read back. After enough ticks it
//!   is confirmed with 30 re-reads and its preset is applied.
//! - **Stable**: the applied standard is read back with stable HS.
//!   Counter-scheduled maintenance runs.
//!
//! RGB/HV sources bypass mode detect and run their own sub-machine.
//!
//! # Module Structure
//!
//! - `machine` - `WatchMachine` phase transitions
//! - `escalation` - no-sync hysteresis table and recovery actions
//! - `stable` - stable maintenance, deinterlacer switch, preemptive SOG monitor
//! - `rgbhv` - separate-sync stability, upscale/bypass choice, H-PLL buckets

pub mod escalation;
pub mod machine;
pub mod rgbhv;
pub mod stable;

pub use machine::{TransitionResult, WatchEvent, WatchMachine, WatchState};
pub use rgbhv::RgbHvWatch;

use crate::classifier::{hs_stable, video_mode};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::preset::apply_presets;
use crate::sync_processor::{
    COAST_START_DEFAULT, COAST_STOP_DEFAULT, freeze, go_low_power, unfreeze, update_sp_dynamic,
};
use escalation::{LOW_POWER_AT, UNCONFIRMED_GRACE};
use gbs_common::regs;
use gbs_common::video::VideoStandard;
use serde::Serialize;
use tracing::{debug, info, warn};

/// New-mode count at which the output is frozen and coast relaxed.
pub const FORMAT_FREEZE_AT: u8 = 3;
/// New-mode count from which the change is confirmed.
pub const FORMAT_CONFIRM_AT: u8 = 8;
/// Re-reads that must all agree before a format change is applied.
pub const FORMAT_CONFIRM_READS: u8 = 30;
/// Counter value a flaky graphics read-back is pulled back to.
const FLAKY_GRAPHICS_RETRY: u8 = 5;

/// What one watcher tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Register self-test failed; nothing else ran.
    BoardNotResponding,
    /// Output powered down; the runner scans inputs.
    LowPower,
    NoSync { counter: u16 },
    FormatPending { counter: u8 },
    FormatApplied { standard: VideoStandard },
    FormatRejected,
    Stable { counter: u8 },
}

/// Per-tick sync supervision.
#[derive(Debug, Default)]
pub struct SyncWatcher {
    machine: WatchMachine,
    rgbhv: RgbHvWatch,
}

impl SyncWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> WatchState {
        self.machine.state()
    }

    /// Line count the RGB/HV upscale preset was picked for.
    #[inline]
    pub fn rgbhv_preset_lines(&self) -> u16 {
        self.rgbhv.preset_lines
    }

    fn event(&mut self, event: WatchEvent) {
        if let TransitionResult::Rejected(reason) = self.machine.handle_event(event) {
            debug!(?event, reason, "Watcher transition rejected");
        }
    }

    /// The input scan found a source.
    pub fn source_found(&mut self) {
        self.rgbhv = RgbHvWatch::default();
        self.event(WatchEvent::SourceFound);
    }

    /// Run one watcher tick.
    pub fn tick(&mut self, cx: &mut SyncContext) -> Result<TickOutcome, SyncError> {
        if !cx.rt.board_has_power {
            return Ok(TickOutcome::BoardNotResponding);
        }
        if cx.rt.is_in_low_power_mode || cx.rt.source_disconnected {
            if self.machine.state() != WatchState::LowPower {
                self.event(WatchEvent::SourceLost);
            }
            return Ok(TickOutcome::LowPower);
        }
        if self.machine.state() == WatchState::LowPower {
            self.event(WatchEvent::SourceFound);
        }

        let std = cx.rt.video_standard;
        let mut detected = video_mode(cx)?;
        // graphics modes read back as 0 now and then
        if std == VideoStandard::VgaGraphics && detected == 0 && !cx.board.sog_bad()? {
            detected = VideoStandard::VgaGraphics.native_id();
        }
        let hs = hs_stable(cx)?;

        stable::monitor_sog(cx)?;

        let std_id = std.native_id();
        let mut outcome = None;
        if std != VideoStandard::RgbHvBypass && (detected == 0 || !hs) {
            let format_pending = cx.rt.new_mode_counter > 0;
            escalation::run(cx, format_pending)?;
            cx.rt.new_mode_counter = 0;
            self.event(WatchEvent::SyncDropped);
            outcome = Some(TickOutcome::NoSync {
                counter: cx.rt.no_sync_counter,
            });
        } else if detected != 0 && detected != std_id && std != VideoStandard::RgbHvBypass {
            outcome = Some(self.format_change(cx, detected)?);
        } else if hs && detected == std_id && std != VideoStandard::RgbHvBypass {
            stable::run(cx)?;
            self.event(WatchEvent::SyncHeld);
            outcome = Some(TickOutcome::Stable {
                counter: cx.rt.continuous_stable_counter,
            });
        }

        if cx.rt.video_standard.is_rgbhv() && !cx.rt.source_disconnected {
            let stable = rgbhv::run(cx, &mut self.rgbhv)?;
            if outcome.is_none() {
                outcome = Some(if stable {
                    self.event(WatchEvent::SyncHeld);
                    TickOutcome::Stable {
                        counter: cx.rt.continuous_stable_counter,
                    }
                } else {
                    self.event(WatchEvent::SyncDropped);
                    TickOutcome::NoSync {
                        counter: cx.rt.rgbhv_no_sync_counter,
                    }
                });
            }
        }

        if cx.rt.no_sync_counter >= LOW_POWER_AT {
            info!("No sync, entering low power");
            cx.board.write(regs::DAC_RGBS_PWDNZ, 0)?;
            cx.rt.no_sync_counter = 0;
            go_low_power(cx)?;
            self.event(WatchEvent::SourceLost);
            return Ok(TickOutcome::LowPower);
        }

        Ok(outcome.unwrap_or(TickOutcome::NoSync {
            counter: cx.rt.no_sync_counter,
        }))
    }

    /// A mode other than the applied one was read back.
    fn format_change(&mut self, cx: &mut SyncContext, detected: u8) -> Result<TickOutcome, SyncError> {
        self.event(WatchEvent::FormatSeen);
        let n = cx.rt.bump_new_mode();
        cx.rt.continuous_stable_counter = 0;
        debug!(detected, counter = n, "Format change pending");

        if n == FORMAT_FREEZE_AT {
            freeze(cx)?;
            cx.board.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
            cx.board.write(regs::SP_H_CST_SP, COAST_STOP_DEFAULT)?;
            cx.rt.coast_position_set = false;
            cx.board.delay_ms(10);
            if video_mode(cx)? == 0 {
                update_sp_dynamic(cx, true)?;
                cx.board.delay_ms(40);
            }
        }
        if n < FORMAT_CONFIRM_AT {
            return Ok(TickOutcome::FormatPending { counter: n });
        }

        let mut pending = n;
        for _ in 0..FORMAT_CONFIRM_READS {
            pending = confirm_read(pending, detected, video_mode(cx)?);
        }
        let confirmed = pending != 0;

        if !confirmed {
            warn!(detected, "Format change not confirmed");
            unfreeze(cx)?;
            cx.rt.new_mode_counter = 0;
            if cx.rt.video_standard == VideoStandard::Unknown {
                cx.rt.no_sync_counter = UNCONFIRMED_GRACE;
            }
            self.event(WatchEvent::FormatRejected);
            return Ok(TickOutcome::FormatRejected);
        }

        let standard = VideoStandard::from_native(detected);
        info!(%standard, "Format change");
        cx.rt.output_frozen = false;
        cx.rt.sync_type_csync = cx.board.read(regs::SP_SOG_MODE)? == 1;
        apply_presets(cx, standard)?;
        cx.rt.video_standard = standard;
        cx.rt.new_mode_counter = 0;
        cx.rt.no_sync_counter = 0;
        cx.rt.continuous_stable_counter = 0;
        cx.board.delay_ms(20);
        let now = cx.board.millis();
        cx.rt.sog_monitor.restart(now);
        self.event(WatchEvent::FormatConfirmed);
        Ok(TickOutcome::FormatApplied { standard })
    }
}

/// Fold one confirm readout into the pending counter; zero rejects.
///
/// Graphics sources flicker, so a graphics readout re-arms the counter
/// instead of ending the confirm. Any readout that disagrees clears it.
fn confirm_read(pending: u8, detected: u8, readout: u8) -> u8 {
    let mut pending = pending;
    if readout == VideoStandard::VgaGraphics.native_id() {
        pending = FLAKY_GRAPHICS_RETRY;
    }
    if readout != detected {
        pending = 0;
    }
    pending
}
