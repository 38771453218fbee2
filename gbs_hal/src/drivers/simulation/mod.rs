//! Simulation driver module.
//!
//! A virtual-time model of the scaler board: register file with computed
//! status, a configurable analog source, a debug-pulse generator and a clock
//! synthesizer. Used by tests, benches and the controller's dry-run mode.

mod driver;
mod model;
mod source;
mod synth;

pub use driver::{SimSynthPort, SimulationDriver};
pub use model::{AsicModel, WriteRecord};
pub use source::{SignalSource, SyncKind};
pub use synth::SimSynth;

use gbs_common::hal::driver::ScalerDriver;

/// Registry name of the simulation driver.
pub const NAME: &str = "simulation";

/// Factory function to create a simulation driver instance.
pub fn create_driver() -> Box<dyn ScalerDriver> {
    Box::new(SimulationDriver::new())
}
