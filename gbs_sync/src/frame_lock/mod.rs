//! Frame timing lock.
//!
//! Keeps the output frame rate matched to the source. Three mechanisms
//! cooperate:
//!
//! - **Auto htotal** nudges the output line length so one output frame takes
//!   as long as one input field.
//! - **Frame-time lock** holds the residual phase error with temporary
//!   ±2 line vtotal corrections.
//! - **External clock sync** retunes the clock synthesizer instead, when one
//!   drives the display clock.
//!
//! # Module Structure
//!
//! - `htotal` - target computation, correction, auto htotal, integral snap
//! - `frame_sync` - `FrameSync` state and the vtotal phase nudge
//! - `clock_gen` - clock synthesizer detection, reset, rate sync and monitor

pub mod clock_gen;
pub mod frame_sync;
pub mod htotal;

pub use clock_gen::LogThrottle;
pub use frame_sync::{FrameSync, FtlStep};
pub use htotal::HtotalResult;
