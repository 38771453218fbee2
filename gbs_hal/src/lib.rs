//! # GBS HAL Library
//!
//! Driver registry and board drivers for the scaler.
//!
//! Drivers implement the `ScalerDriver` trait defined in
//! `gbs_common::hal::driver`. The sync controller picks one by name at
//! startup through [`DriverRegistry`].
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          gbs_hal                           │
//! │  ┌─────────────────────┐        ┌───────────────────────┐  │
//! │  │  Driver Registry    │──────► │  ScalerDriver         │  │
//! │  │  name -> factory    │        │  (trait object)       │  │
//! │  └─────────────────────┘        └──────────┬────────────┘  │
//! │                                            │               │
//! │                                 ┌──────────▼────────────┐  │
//! │                                 │  SimulationDriver     │  │
//! │                                 │  asic model + source  │  │
//! │                                 │  + synthesizer        │  │
//! │                                 └───────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;

// Re-export key types for convenience
pub use crate::driver_registry::DriverRegistry;
pub use crate::drivers::simulation::{SignalSource, SimulationDriver, SyncKind};
