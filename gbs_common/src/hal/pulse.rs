//! Edge capture cell shared between the control thread and the edge handler.
//!
//! The handler records the tick of the first rising edge after `arm`, then
//! the tick of the next one, and publishes both as one 64-bit word. Readers
//! only ever see a complete pair.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const STARTED: u8 = 2;
const DONE: u8 = 3;

/// Single-shot two-edge capture.
#[derive(Debug, Default)]
pub struct PulseCapture {
    phase: AtomicU8,
    start: AtomicU32,
    pair: AtomicU64,
}

impl PulseCapture {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(IDLE),
            start: AtomicU32::new(0),
            pair: AtomicU64::new(0),
        }
    }

    /// Discard any previous result and wait for the next edge.
    ///
    /// Safe to call at any point, including after a timed-out capture.
    pub fn arm(&self) {
        self.pair.store(0, Ordering::Relaxed);
        self.phase.store(ARMED, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.phase.store(IDLE, Ordering::Release);
    }

    /// Whether the handler still wants edges.
    #[inline]
    pub fn is_armed(&self) -> bool {
        matches!(self.phase.load(Ordering::Acquire), ARMED | STARTED)
    }

    /// Edge handler entry point.
    pub fn on_edge(&self, tick: u32) {
        match self.phase.load(Ordering::Acquire) {
            ARMED => {
                self.start.store(tick, Ordering::Relaxed);
                self.phase.store(STARTED, Ordering::Release);
            }
            STARTED => {
                let start = self.start.load(Ordering::Relaxed);
                self.pair
                    .store(u64::from(start) | (u64::from(tick) << 32), Ordering::Release);
                self.phase.store(DONE, Ordering::Release);
            }
            _ => {}
        }
    }

    /// `(start_tick, stop_tick)` once both edges were captured.
    pub fn snapshot(&self) -> Option<(u32, u32)> {
        if self.phase.load(Ordering::Acquire) != DONE {
            return None;
        }
        let pair = self.pair.load(Ordering::Acquire);
        Some((pair as u32, (pair >> 32) as u32))
    }
}
