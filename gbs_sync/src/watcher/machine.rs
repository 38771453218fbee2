//! Watcher phase transitions.
//!
//! LowPower → NoSync ↔ FormatPending → Stable, with any phase dropping back to
//! NoSync on sync loss and to LowPower once the source is given up on.

use serde::Serialize;

/// Phase of the sync watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Output powered down, inputs being scanned.
    #[default]
    LowPower,
    /// No usable sync; escalation running on the no-sync counter.
    NoSync,
    /// A standard other than the applied one is being confirmed.
    FormatPending,
    /// The applied standard keeps being read back.
    Stable,
}

/// Result of a watcher transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Ok(WatchState),
    Rejected(&'static str),
}

/// Observation that can move the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// Input scan found sync.
    SourceFound,
    /// Escalation gave up; back to input scanning.
    SourceLost,
    /// Mode read-back or HS stability missing this tick.
    SyncDropped,
    /// A different standard was read back.
    FormatSeen,
    /// The new standard survived the re-reads and its preset was applied.
    FormatConfirmed,
    /// The new standard did not survive the re-reads.
    FormatRejected,
    /// The applied standard was read back with stable sync.
    SyncHeld,
}

/// Holds the current watcher phase.
#[derive(Debug, Clone, Default)]
pub struct WatchMachine {
    state: WatchState,
}

impl WatchMachine {
    pub const fn new() -> Self {
        Self {
            state: WatchState::LowPower,
        }
    }

    #[inline]
    pub const fn state(&self) -> WatchState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: WatchEvent) -> TransitionResult {
        use WatchEvent::*;
        use WatchState::*;

        let next = match (self.state, event) {
            (_, SourceLost) => LowPower,
            (LowPower, SourceFound) => NoSync,
            (LowPower, _) => {
                return TransitionResult::Rejected("LowPower: only SourceFound allowed");
            }

            (_, SyncDropped) => NoSync,
            (_, FormatSeen) => FormatPending,
            (FormatPending, FormatConfirmed) => Stable,
            (FormatPending, FormatRejected) => NoSync,
            (_, SyncHeld) => Stable,

            (_, SourceFound) => return TransitionResult::Rejected("source already active"),
            (_, FormatConfirmed | FormatRejected) => {
                return TransitionResult::Rejected("no format change pending");
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WatchEvent::*;
    use WatchState::*;

    fn active() -> WatchMachine {
        let mut sm = WatchMachine::new();
        sm.handle_event(SourceFound);
        sm
    }

    #[test]
    fn starts_scanning_inputs() {
        assert_eq!(WatchMachine::new().state(), LowPower);
    }

    #[test]
    fn low_power_waits_for_a_source() {
        let mut sm = WatchMachine::new();
        assert!(matches!(sm.handle_event(SyncHeld), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), LowPower);
        assert_eq!(sm.handle_event(SourceFound), TransitionResult::Ok(NoSync));
    }

    #[test]
    fn format_change_path() {
        let mut sm = active();
        assert_eq!(sm.handle_event(FormatSeen), TransitionResult::Ok(FormatPending));
        assert_eq!(sm.handle_event(FormatSeen), TransitionResult::Ok(FormatPending));
        assert_eq!(sm.handle_event(FormatConfirmed), TransitionResult::Ok(Stable));
        assert_eq!(sm.handle_event(SyncHeld), TransitionResult::Ok(Stable));
    }

    #[test]
    fn rejected_format_returns_to_no_sync() {
        let mut sm = active();
        sm.handle_event(FormatSeen);
        assert_eq!(sm.handle_event(FormatRejected), TransitionResult::Ok(NoSync));
        assert!(matches!(
            sm.handle_event(FormatConfirmed),
            TransitionResult::Rejected(_)
        ));
    }

    #[test]
    fn any_phase_can_lose_the_source() {
        let mut sm = active();
        sm.handle_event(SyncHeld);
        assert_eq!(sm.handle_event(SyncDropped), TransitionResult::Ok(NoSync));
        assert_eq!(sm.handle_event(SourceLost), TransitionResult::Ok(LowPower));
    }
}
