//! Scaler driver traits and error types.
//!
//! A board driver is the bundle of four capabilities the controller needs:
//! register access ([`RegisterBus`]), a clock ([`Timebase`]), the sync
//! debug-pin edge input ([`PulseInput`]) and, on boards that have one, the
//! display clock synthesizer ([`ClockSynth`]). [`ScalerDriver`] ties them
//! together with a lifecycle.

use crate::consts::TICK_RATE_HZ;
use crate::hal::pulse::PulseCapture;
use crate::status::SynthStatus;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a board driver.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// The board did not come up.
    #[error("board init failed: {0}")]
    InitFailed(String),

    /// A register transfer was not acknowledged.
    #[error("register transfer at offset 0x{offset:02x} failed: {reason}")]
    Bus { offset: u8, reason: String },

    /// The clock synthesizer stopped answering after it was detected.
    #[error("clock synthesizer: {0}")]
    Synth(String),

    #[error("no board driver named {0:?}")]
    DriverNotFound(String),

    #[error("board driver {0:?} registered twice")]
    DuplicateDriver(&'static str),
}

/// Builds a boxed driver; registered by name in the driver registry.
pub type DriverFactory = fn() -> Box<dyn ScalerDriver>;

/// Optional driver diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DriverDiagnostics {
    /// Register bytes read
    pub bus_reads: u64,
    /// Register bytes written
    pub bus_writes: u64,
    /// Edges delivered to an armed capture
    pub edges_delivered: u64,
}

/// Byte-level access to the scaler's register space.
///
/// Segment selection is an ordinary write to the segment-select offset; the
/// caller is responsible for caching the current segment.
pub trait RegisterBus {
    fn write_bytes(&mut self, offset: u8, data: &[u8]) -> Result<(), HalError>;

    fn read_bytes(&mut self, offset: u8, buf: &mut [u8]) -> Result<(), HalError>;
}

/// Monotonic time and blocking delays.
pub trait Timebase {
    /// Microseconds since the driver was created.
    fn micros(&self) -> u64;

    /// Free-running capture counter; wraps.
    fn ticks(&self) -> u32 {
        self.micros() as u32
    }

    fn tick_rate_hz(&self) -> u32 {
        TICK_RATE_HZ
    }

    fn delay_us(&mut self, us: u32);

    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }

    fn millis(&self) -> u64 {
        self.micros() / 1000
    }
}

/// The rising-edge input wired to the scaler's debug output pin.
pub trait PulseInput {
    /// Route edges into `capture` until `detach` is called.
    fn attach(&mut self, capture: Arc<PulseCapture>);

    fn detach(&mut self);
}

/// External clock synthesizer feeding the display clock input.
pub trait ClockSynth {
    /// Whether the device acknowledges on its bus address.
    fn probe(&mut self) -> Result<bool, HalError>;

    /// Device status byte.
    fn status(&mut self) -> Result<SynthStatus, HalError>;

    /// Clear the sticky status bits.
    fn clear_sticky(&mut self) -> Result<(), HalError>;

    /// Program the output multisynth; does not touch the output enable.
    fn set_frequency(&mut self, hz: u32) -> Result<(), HalError>;

    fn enable_output(&mut self, enable: bool) -> Result<(), HalError>;

    /// Soft-reset PLL A.
    fn reset_pll(&mut self) -> Result<(), HalError>;
}

/// A scaler board.
///
/// The controller owns exactly one driver. `init` runs once before the first
/// bus transfer and `shutdown` once after the last; everything in between
/// happens on the control thread.
pub trait ScalerDriver: RegisterBus + Timebase + PulseInput + Send {
    /// Registry name, e.g. `"simulation"`.
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Fails with [`HalError::InitFailed`] when the board cannot be reached.
    fn init(&mut self) -> Result<(), HalError>;

    fn shutdown(&mut self) -> Result<(), HalError>;

    /// The external clock synthesizer, when the board has one fitted.
    fn clock_synth(&mut self) -> Option<&mut dyn ClockSynth>;

    /// Transfer counters, for drivers that keep them.
    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestDriver {
        now_us: u64,
        initialized: bool,
    }

    impl RegisterBus for TestDriver {
        fn write_bytes(&mut self, _offset: u8, _data: &[u8]) -> Result<(), HalError> {
            Ok(())
        }

        fn read_bytes(&mut self, _offset: u8, buf: &mut [u8]) -> Result<(), HalError> {
            buf.fill(0);
            Ok(())
        }
    }

    impl Timebase for TestDriver {
        fn micros(&self) -> u64 {
            self.now_us
        }

        fn delay_us(&mut self, us: u32) {
            self.now_us += u64::from(us);
        }
    }

    impl PulseInput for TestDriver {
        fn attach(&mut self, _capture: Arc<PulseCapture>) {}

        fn detach(&mut self) {}
    }

    impl ScalerDriver for TestDriver {
        fn name(&self) -> &'static str {
            "test"
        }

        fn version(&self) -> &'static str {
            "0.1.0"
        }

        fn init(&mut self) -> Result<(), HalError> {
            self.initialized = true;
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), HalError> {
            self.initialized = false;
            Ok(())
        }

        fn clock_synth(&mut self) -> Option<&mut dyn ClockSynth> {
            None
        }
    }

    #[test]
    fn test_bus_error_names_the_offset() {
        let err = HalError::Bus {
            offset: 0x3a,
            reason: "nak".to_string(),
        };
        assert_eq!(err.to_string(), "register transfer at offset 0x3a failed: nak");
        assert!(HalError::DuplicateDriver("simulation").to_string().contains("twice"));
    }

    #[test]
    fn test_timebase_defaults() {
        let mut driver = TestDriver {
            now_us: 0,
            initialized: false,
        };
        driver.delay_ms(3);
        assert_eq!(driver.millis(), 3);
        assert_eq!(driver.ticks(), 3000);
        assert_eq!(driver.tick_rate_hz(), TICK_RATE_HZ);
    }

    #[test]
    fn test_driver_lifecycle_and_defaults() {
        let mut driver = TestDriver {
            now_us: 0,
            initialized: false,
        };
        driver.init().unwrap();
        assert!(driver.initialized);
        assert!(driver.diagnostics().is_none());
        assert!(driver.clock_synth().is_none());
        driver.shutdown().unwrap();
        assert!(!driver.initialized);
    }
}
