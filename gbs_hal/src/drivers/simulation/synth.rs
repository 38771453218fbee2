//! Simulated external clock synthesizer.

use gbs_common::status::SynthStatus;

/// Default settle time between programming and lock.
const LOCK_SETTLE_US: u64 = 5_000;

/// Clock synthesizer model with a settle delay and an injectable lock failure.
#[derive(Debug, Clone)]
pub struct SimSynth {
    fitted: bool,
    frequency_hz: u32,
    output_enabled: bool,
    locks_at_us: u64,
    lock_fails: bool,
    sticky: SynthStatus,
    pll_resets: u32,
    programmed: Vec<u32>,
}

impl SimSynth {
    /// A synthesizer fitted to the board, or an empty footprint.
    pub fn new(fitted: bool) -> Self {
        Self {
            fitted,
            frequency_hz: 0,
            output_enabled: false,
            locks_at_us: 0,
            lock_fails: false,
            sticky: SynthStatus::empty(),
            pll_resets: 0,
            programmed: Vec::new(),
        }
    }

    /// Whether the device answers on the bus.
    pub fn fitted(&self) -> bool {
        self.fitted
    }

    /// Make every subsequent lock attempt fail.
    pub fn set_lock_fails(&mut self, fails: bool) {
        self.lock_fails = fails;
    }

    /// Output PLL locked at `now_us`.
    pub fn locked(&self, now_us: u64) -> bool {
        self.fitted && !self.lock_fails && now_us >= self.locks_at_us
    }

    /// Synthesizer drives a usable clock at `now_us`.
    pub fn clock_valid(&self, now_us: u64) -> bool {
        self.output_enabled && self.locked(now_us)
    }

    /// Device status byte at `now_us`.
    pub fn status(&mut self, now_us: u64) -> SynthStatus {
        let mut status = SynthStatus::empty();
        if !self.locked(now_us) {
            status |= SynthStatus::LOL_A;
            self.sticky |= SynthStatus::LOL_A;
        }
        status
    }

    /// Clear sticky bits.
    pub fn clear_sticky(&mut self) {
        self.sticky = SynthStatus::empty();
    }

    /// Sticky bits accumulated since the last clear.
    pub fn sticky(&self) -> SynthStatus {
        self.sticky
    }

    /// Program the output frequency; lock is lost until the PLL settles.
    pub fn set_frequency(&mut self, hz: u32, now_us: u64) {
        if hz != self.frequency_hz {
            self.locks_at_us = now_us + LOCK_SETTLE_US;
        }
        self.frequency_hz = hz;
        self.programmed.push(hz);
    }

    /// Enable or disable output 0.
    pub fn enable_output(&mut self, enable: bool) {
        self.output_enabled = enable;
    }

    /// Soft-reset PLL A.
    pub fn reset_pll(&mut self, now_us: u64) {
        self.pll_resets += 1;
        self.locks_at_us = now_us + LOCK_SETTLE_US;
    }

    /// Currently programmed frequency.
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Output 0 enabled.
    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    /// Number of PLL soft resets issued.
    pub fn pll_resets(&self) -> u32 {
        self.pll_resets
    }

    /// Every frequency programmed, in order.
    pub fn programmed(&self) -> &[u32] {
        &self.programmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_after_settle_time() {
        let mut synth = SimSynth::new(true);
        synth.set_frequency(81_000_000, 100);
        synth.enable_output(true);
        assert!(!synth.status(101).is_locked());
        assert!(synth.status(100 + LOCK_SETTLE_US).is_locked());
        assert!(synth.clock_valid(100 + LOCK_SETTLE_US));
        assert!(synth.sticky().contains(SynthStatus::LOL_A));
        synth.clear_sticky();
        assert!(synth.sticky().is_empty());
    }

    #[test]
    fn injected_failure_never_locks() {
        let mut synth = SimSynth::new(true);
        synth.set_lock_fails(true);
        synth.set_frequency(54_000_000, 0);
        assert!(!synth.status(1_000_000).is_locked());
    }

    #[test]
    fn absent_device_is_never_locked() {
        let synth = SimSynth::new(false);
        assert!(!synth.locked(u64::MAX));
        assert!(!synth.fitted());
    }
}
