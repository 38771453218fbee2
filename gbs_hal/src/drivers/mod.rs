//! Board drivers compiled into this crate.
//!
//! - [`simulation`] - virtual-time board model, needs no hardware
//!
//! A new driver goes in its own submodule, implements
//! `gbs_common::hal::ScalerDriver`, and gets a line in [`BUILTIN_DRIVERS`].

pub mod simulation;

use gbs_common::hal::DriverFactory;

/// Registry name and factory of every built-in driver.
pub const BUILTIN_DRIVERS: &[(&str, DriverFactory)] =
    &[(simulation::NAME, simulation::create_driver)];
