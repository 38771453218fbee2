//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use gbs_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use gbs_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::{LogFormat, LogLevel};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ServiceConfig, Validate, load_toml, parse_toml};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{HTOTAL_MAX, TICK_RATE_HZ};

// ─── HAL ────────────────────────────────────────────────────────────
pub use crate::hal::{
    ClockSynth, DriverFactory, HalError, PulseCapture, PulseInput, RegisterBus, ScalerDriver,
    Timebase,
};

// ─── Registers & Status ─────────────────────────────────────────────
pub use crate::regs::Field;
pub use crate::status::{
    ModeStatus00, ModeStatus03, ModeStatus04, SyncInterrupts, SyncStatus16, SynthStatus,
};

// ─── Video ──────────────────────────────────────────────────────────
pub use crate::video::{InputPort, VideoStandard};
