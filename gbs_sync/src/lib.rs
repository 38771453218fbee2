//! # GBS Sync Controller Library
//!
//! Adaptive sync watcher and timing-lock controller for TV5725-class video
//! scalers with an optional external clock synthesizer.
//!
//! The controller runs cooperatively on one thread. Every watcher tick it
//! classifies the input, applies presets on confirmed format changes, rides
//! out sync drops with a counter-gated escalation, and keeps the output frame
//! rate matched to the source through auto htotal, frame-time lock, or the
//! external clock.
//!
//! # Module Structure
//!
//! - [`board`] - field-level register access, timebase and pulse input
//! - [`pulse_timer`] - edge capture and rate measurement
//! - [`sync_processor`] - sync separator maintenance and low-level resets
//! - [`classifier`] - mode ids and the low-power input scan
//! - [`tuner`] - SOG slice level and sampling phase calibration
//! - [`frame_lock`] - auto htotal, frame-time lock, clock synthesizer
//! - [`preset`] - preset actuator and the steps around a preset load
//! - [`watcher`] - per-tick sync supervision
//! - [`runner`] - outer scheduler and status snapshot
//! - [`state`] / [`context`] / [`config`] / [`error`] - shared plumbing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SyncRunner                                                   │
//! │  power check ─ input scan ─ watcher tick ─ coast/clamp       │
//! │  auto htotal ─ frame-time lock ─ clock monitor               │
//! │            │                                                 │
//! │  ┌─────────▼──────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │ SyncWatcher        │──►│ classifier   │   │ frame_lock │  │
//! │  │ escalation/stable/ │──►│ tuner        │   │ clock_gen  │  │
//! │  │ rgbhv              │──►│ preset       │   └─────┬──────┘  │
//! │  └─────────┬──────────┘   └──────┬───────┘         │         │
//! │            └──────────── SyncContext ──────────────┘         │
//! │                     Board + RuntimeState                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod board;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod frame_lock;
pub mod preset;
pub mod pulse_timer;
pub mod runner;
pub mod state;
pub mod sync_processor;
pub mod tuner;
pub mod watcher;

pub use config::SyncConfig;
pub use context::SyncContext;
pub use error::SyncError;
pub use runner::{StatusSnapshot, StepReport, SyncRunner, TickEvents};
pub use watcher::{SyncWatcher, TickOutcome};
