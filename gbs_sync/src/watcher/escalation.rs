//! No-sync escalation.
//!
//! Every watcher tick without usable sync bumps the no-sync counter and runs
//! whatever actions the counter value triggers. Early values only freeze the
//! output so a short drop is invisible; later ones relax, refresh and finally
//! rebuild the separator settings, probe the other input, and give up into
//! low power input scanning.
//!
//! The thresholds are calibrated against real sources.

use crate::classifier::hs_stable;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::sync_processor::{
    COAST_START_DEFAULT, COAST_STOP_DEFAULT, freeze, nudge_mode_detect, reset_mode_detect,
    reset_sync_processor, unfreeze, update_sp_dynamic,
};
use crate::tuner::{optimize_sog_level, set_sog_level};
use gbs_common::regs;
use heapless::Vec;
use tracing::{debug, info, trace};

// ─── Thresholds ─────────────────────────────────────────────────────

/// First missed tick: freeze and do nothing else.
pub const FREEZE_ONLY_AT: u16 = 1;
/// Counter values up to this always freeze.
pub const FREEZE_ALWAYS_UNTIL: u16 = 3;
pub const SOG_RAISE_AT: u16 = 2;
pub const COAST_RELAX_AT: u16 = 8;
pub const SP_REFRESH_EVERY: u16 = 27;
pub const FREEZE_CHECK_EVERY: u16 = 32;
pub const CLAMP_UNLOCK_AT: u16 = 34;
pub const MD_NUDGE_AT: u16 = 38;
pub const H_PROTECT_ABOVE: u16 = 47;
pub const H_PROTECT_EVERY: u16 = 16;
pub const DEEP_RECOVERY_EVERY: u16 = 150;
/// Deep recoveries that also probe for a discrete vsync.
pub const VSYNC_PROBE_EVERY: u16 = 900;
/// Deep recoveries that drop SOG to 0 instead of re-optimizing.
pub const SOG_ZERO_EVERY: u16 = 450;
pub const ALT_INPUT_EVERY: u16 = 413;
/// Counter value that hands over to low power input detection.
pub const LOW_POWER_AT: u16 = 0x7FE;
/// Counter value installed when a format from standby was not confirmed.
pub const UNCONFIRMED_GRACE: u16 = 0x5FF;
/// Counter at or above which a returning source gets a full restore.
pub const LONG_OUTAGE: u16 = DEEP_RECOVERY_EVERY;

/// SOG level installed when the source seems gone during deep recovery.
const SOG_FALLBACK_LEVEL: u8 = 5;
const HLOW_PROBE_READS: u8 = 128;
const ALT_INPUT_WAIT_MS: u64 = 210;

// ─── Table ──────────────────────────────────────────────────────────

/// When an escalation action fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    At(u16),
    Every(u16),
    AboveEvery { above: u16, every: u16 },
}

impl Trigger {
    #[inline]
    pub const fn fires(self, counter: u16) -> bool {
        match self {
            Trigger::At(n) => counter == n,
            Trigger::Every(n) => counter % n == 0,
            Trigger::AboveEvery { above, every } => counter > above && counter % every == 0,
        }
    }
}

/// Recovery action run on a no-sync tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSyncAction {
    /// Raise the lowest SOG levels by one for SD sources.
    RaiseSog,
    /// Default coast window, looser pre/post coast for SD.
    RelaxCoast,
    /// Sync separator parameters with mode check.
    RefreshSyncParams,
    /// Unfreeze when HS activity is back, freeze otherwise.
    FreezeByActivity,
    /// Release the clamp on YPbPr.
    UnlockClamp,
    NudgeModeDetect,
    /// Alternate H-protect for composite sync.
    ToggleHProtect,
    /// Rebuild separator settings and the SOG level.
    DeepRecovery,
    /// Look for sync on the other input.
    ProbeAlternateInput,
}

/// Rows in [`ESCALATION`]; also the most actions one counter value can fire.
pub const ESCALATION_ROWS: usize = 9;

/// Escalation table, evaluated in order.
pub const ESCALATION: [(Trigger, NoSyncAction); ESCALATION_ROWS] = [
    (Trigger::At(SOG_RAISE_AT), NoSyncAction::RaiseSog),
    (Trigger::At(COAST_RELAX_AT), NoSyncAction::RelaxCoast),
    (Trigger::Every(SP_REFRESH_EVERY), NoSyncAction::RefreshSyncParams),
    (Trigger::Every(FREEZE_CHECK_EVERY), NoSyncAction::FreezeByActivity),
    (Trigger::At(CLAMP_UNLOCK_AT), NoSyncAction::UnlockClamp),
    (Trigger::At(MD_NUDGE_AT), NoSyncAction::NudgeModeDetect),
    (
        Trigger::AboveEvery {
            above: H_PROTECT_ABOVE,
            every: H_PROTECT_EVERY,
        },
        NoSyncAction::ToggleHProtect,
    ),
    (Trigger::Every(DEEP_RECOVERY_EVERY), NoSyncAction::DeepRecovery),
    (Trigger::Every(ALT_INPUT_EVERY), NoSyncAction::ProbeAlternateInput),
];

/// Actions triggered at `counter`, in table order.
pub fn actions_at(counter: u16) -> Vec<NoSyncAction, ESCALATION_ROWS> {
    if counter <= FREEZE_ONLY_AT {
        return Vec::new();
    }
    ESCALATION
        .iter()
        .filter(|(trigger, _)| trigger.fires(counter))
        .map(|&(_, action)| action)
        .collect()
}

// ─── Execution ──────────────────────────────────────────────────────

/// One no-sync tick: bump the counter and run what it triggers.
///
/// `format_pending` suppresses the actions that only make sense for a plain
/// outage.
pub fn run(cx: &mut SyncContext, format_pending: bool) -> Result<(), SyncError> {
    let n = cx.rt.bump_no_sync();
    cx.rt.continuous_stable_counter = 0;
    cx.rt.last_vsync_lock_ms = cx.board.millis();

    if n == FREEZE_ONLY_AT {
        freeze(cx)?;
        return Ok(());
    }

    cx.rt.phase_calibrated = false;
    if n <= FREEZE_ALWAYS_UNTIL || !cx.board.sync_status()?.hs_active() {
        freeze(cx)?;
    }

    for action in actions_at(n) {
        if action == NoSyncAction::RaiseSog && format_pending {
            continue;
        }
        trace!(counter = n, ?action, "No-sync escalation");
        execute(cx, action)?;
    }
    Ok(())
}

fn execute(cx: &mut SyncContext, action: NoSyncAction) -> Result<(), SyncError> {
    let n = cx.rt.no_sync_counter;
    match action {
        NoSyncAction::RaiseSog => {
            if cx.rt.sog_level <= 1 && cx.rt.video_standard.is_sd() {
                let level = cx.rt.sog_level + 1;
                set_sog_level(cx, level)?;
                cx.board.delay_ms(30);
            }
        }
        NoSyncAction::RelaxCoast => {
            let sd = cx.rt.video_standard.is_sd();
            let b = &mut cx.board;
            b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
            b.write(regs::SP_H_CST_SP, COAST_STOP_DEFAULT)?;
            if sd {
                b.write(regs::SP_PRE_COAST, 9)?;
                b.write(regs::SP_POST_COAST, 9)?;
                let ignore = b.read(regs::SP_H_PULSE_IGNOR)?;
                if ignore >= 0x33 {
                    b.write(regs::SP_H_PULSE_IGNOR, ignore / 2)?;
                }
            }
            cx.rt.coast_position_set = false;
        }
        NoSyncAction::RefreshSyncParams => update_sp_dynamic(cx, true)?,
        NoSyncAction::FreezeByActivity => {
            if cx.board.sync_status()?.hs_active() {
                unfreeze(cx)?;
            } else {
                freeze(cx)?;
            }
        }
        NoSyncAction::UnlockClamp => {
            if cx.rt.input_is_component {
                cx.board.write(regs::SP_NO_CLAMP_REG, 1)?;
                cx.rt.clamp_position_set = false;
            }
        }
        NoSyncAction::NudgeModeDetect => nudge_mode_detect(cx)?,
        NoSyncAction::ToggleHProtect => {
            if cx.rt.sync_type_csync {
                cx.board.toggle(regs::SP_H_PROTECT)?;
            }
        }
        NoSyncAction::DeepRecovery => deep_recovery(cx, n)?,
        NoSyncAction::ProbeAlternateInput => probe_alternate_input(cx)?,
    }
    Ok(())
}

fn deep_recovery(cx: &mut SyncContext, n: u16) -> Result<(), SyncError> {
    if n == DEEP_RECOVERY_EVERY || n % VSYNC_PROBE_EVERY == 0 {
        info!(counter = n, "No signal");
        // a discrete vsync means the source needs the input scan
        let ext_sync = cx.board.read(regs::SP_EXT_SYNC_SEL)?;
        cx.board.write(regs::SP_EXT_SYNC_SEL, 0)?;
        cx.board.delay_ms(240);
        if cx.board.sync_status()?.vs_active() {
            cx.board.delay_ms(10);
            if cx.board.sync_status()?.vs_active() {
                debug!("Discrete vsync present");
                cx.rt.no_sync_counter = LOW_POWER_AT;
            }
        }
        cx.board.write(regs::SP_EXT_SYNC_SEL, ext_sync)?;
    }

    {
        let b = &mut cx.board;
        b.write(regs::SP_H_COAST, 0)?;
        b.write(regs::SP_H_PROTECT, 0)?;
        b.write(regs::SP_H_CST_ST, COAST_START_DEFAULT)?;
        b.write(regs::SP_H_CST_SP, COAST_STOP_DEFAULT)?;
        b.write(regs::SP_CS_CLP_ST, 32)?;
        b.write(regs::SP_CS_CLP_SP, 48)?;
    }
    update_sp_dynamic(cx, true)?;
    nudge_mode_detect(cx)?;
    cx.board.delay_ms(80);

    // HLOW_LEN keeps moving while a source is attached; it reads 0 until the PLL runs
    let mut start = Some(cx.board.read(regs::HLOW_LEN)?);
    if cx.board.read(regs::PLLAD_VCORST)? == 1 {
        start = None;
    }
    let mut attached = false;
    for _ in 0..HLOW_PROBE_READS {
        if Some(cx.board.read(regs::HLOW_LEN)?) != start {
            attached = true;
            break;
        }
    }
    if attached {
        if n % SOG_ZERO_EVERY == 0 {
            set_sog_level(cx, 0)?;
        } else {
            optimize_sog_level(cx)?;
        }
    } else {
        set_sog_level(cx, SOG_FALLBACK_LEVEL)?;
    }

    reset_sync_processor(cx)?;
    cx.board.delay_ms(8);
    reset_mode_detect(cx)?;
    cx.board.delay_ms(8);
    Ok(())
}

fn probe_alternate_input(cx: &mut SyncContext) -> Result<(), SyncError> {
    cx.board.toggle(regs::ADC_INPUT_SEL)?;
    cx.board.delay_ms(40);
    let start = cx.board.millis();
    while cx.board.millis() - start <= ALT_INPUT_WAIT_MS {
        if hs_stable(cx)? {
            info!("Sync on the other input");
            cx.rt.no_sync_counter = LOW_POWER_AT;
            return Ok(());
        }
        cx.board.delay_ms(1);
    }
    cx.board.toggle(regs::ADC_INPUT_SEL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_but_freeze_on_first_drop() {
        assert!(actions_at(0).is_empty());
        assert!(actions_at(FREEZE_ONLY_AT).is_empty());
    }

    #[test]
    fn named_thresholds() {
        assert_eq!(actions_at(2).as_slice(), &[NoSyncAction::RaiseSog]);
        assert_eq!(actions_at(8).as_slice(), &[NoSyncAction::RelaxCoast]);
        assert_eq!(actions_at(27).as_slice(), &[NoSyncAction::RefreshSyncParams]);
        assert_eq!(actions_at(32).as_slice(), &[NoSyncAction::FreezeByActivity]);
        assert_eq!(actions_at(34).as_slice(), &[NoSyncAction::UnlockClamp]);
        assert_eq!(actions_at(38).as_slice(), &[NoSyncAction::NudgeModeDetect]);
        assert!(actions_at(3).is_empty());
        assert!(actions_at(9).is_empty());
    }

    #[test]
    fn h_protect_only_above_47() {
        assert!(!actions_at(32).contains(&NoSyncAction::ToggleHProtect));
        assert!(!actions_at(16).contains(&NoSyncAction::ToggleHProtect));
        assert!(actions_at(48).contains(&NoSyncAction::ToggleHProtect));
        assert!(actions_at(64).contains(&NoSyncAction::ToggleHProtect));
    }

    #[test]
    fn coinciding_triggers_run_in_table_order() {
        // 864 = 27 * 32
        assert_eq!(
            actions_at(864).as_slice(),
            &[
                NoSyncAction::RefreshSyncParams,
                NoSyncAction::FreezeByActivity,
                NoSyncAction::ToggleHProtect,
            ]
        );
        assert!(actions_at(150).contains(&NoSyncAction::DeepRecovery));
        assert!(actions_at(826).contains(&NoSyncAction::ProbeAlternateInput));
    }

    #[test]
    fn any_counter_fits_the_action_list() {
        let busiest = (0..=u16::MAX).map(|n| actions_at(n).len()).max();
        assert!(busiest.is_some_and(|n| n > 1 && n <= ESCALATION_ROWS));
    }
}
