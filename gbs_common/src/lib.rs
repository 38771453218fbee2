//! GBS Common Library
//!
//! This crate provides the pieces shared by the scaler driver and the sync
//! controller: register map, video standard buckets, status words, HAL traits
//! and configuration loading.
//!
//! # Module Structure
//!
//! - [`config`] - `[service]` table and TOML loading
//! - [`consts`] - Timing and bus constants
//! - [`hal`] - Scaler driver traits, errors and the edge capture cell
//! - [`regs`] - Register field descriptors for the scaler
//! - [`status`] - Typed status words read from the scaler and the clock synthesizer
//! - [`video`] - Native video standard ids and input ports
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use gbs_common::prelude::*;
//!
//! assert_eq!(VideoStandard::from_native(1), VideoStandard::Ntsc);
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
pub mod regs;
pub mod status;
pub mod video;
