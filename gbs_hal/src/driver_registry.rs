//! Name-to-factory lookup for board drivers.
//!
//! The controller binary takes a `--driver` name and resolves it here once
//! at startup.

use crate::drivers::BUILTIN_DRIVERS;
use gbs_common::hal::driver::{DriverFactory, HalError, ScalerDriver};
use std::collections::BTreeMap;

/// Board drivers known by name.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-filled with [`BUILTIN_DRIVERS`].
    pub fn with_builtin_drivers() -> Self {
        Self {
            factories: BUILTIN_DRIVERS.iter().copied().collect(),
        }
    }

    /// Add a driver under `name`; names are unique.
    pub fn register(&mut self, name: &'static str, factory: DriverFactory) -> Result<(), HalError> {
        if self.factories.contains_key(name) {
            return Err(HalError::DuplicateDriver(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Whether `name` resolves to a driver.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the driver registered as `name`.
    pub fn create_driver(&self, name: &str) -> Result<Box<dyn ScalerDriver>, HalError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| HalError::DriverNotFound(name.to_string()))
    }

    /// Registered names in sorted order.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
