//! Hardware abstraction layer for the scaler board.
//!
//! This module contains the driver traits implemented by `gbs_hal` drivers
//! and the lock-free edge capture cell shared with the edge interrupt.

pub mod driver;
pub mod pulse;

pub use driver::{
    ClockSynth, DriverDiagnostics, DriverFactory, HalError, PulseInput, RegisterBus,
    ScalerDriver, Timebase,
};
pub use pulse::PulseCapture;
