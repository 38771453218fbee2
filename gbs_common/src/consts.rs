//! Timing and bus constants shared by the driver and the controller.
//!
//! Single source of truth for numeric limits; imported by all crates.

use static_assertions::const_assert;

/// Rate of the free-running capture tick counter (1 µs resolution).
pub const TICK_RATE_HZ: u32 = 1_000_000;

/// Scaler bus register used to select the active segment.
pub const SEGMENT_SELECT_OFFSET: u8 = 0xF0;

/// Number of register segments exposed by the scaler.
pub const SEGMENT_COUNT: usize = 6;

/// Largest value of the 12-bit horizontal total registers.
pub const HTOTAL_MAX: u16 = 4095;

/// Mask applied to 5-bit SOG level and phase values.
pub const FIVE_BIT_MASK: u8 = 0x1f;

/// Lowest decoded field rate the classifier accepts as a real vertical sync.
pub const CLASSIFIER_MIN_FIELD_RATE_HZ: f32 = 40.0;

/// Plausible field/frame rate band for lock decisions.
pub const LOCK_MIN_RATE_HZ: f32 = 47.0;
/// Upper edge of the plausible field/frame rate band.
pub const LOCK_MAX_RATE_HZ: f32 = 86.0;

/// Display clock selector value that routes the external synthesizer to the scaler.
pub const DISPLAY_CLOCK_EXTERNAL: u8 = 0x75;

/// Frequency programmed into the synthesizer when no preset clock is known.
pub const DEFAULT_EXT_CLOCK_HZ: u32 = 81_000_000;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gbs/sync.toml";

const_assert!(TICK_RATE_HZ >= 1_000_000);
const_assert!(HTOTAL_MAX as u32 == (1 << 12) - 1);
const_assert!(SEGMENT_COUNT <= u8::MAX as usize);
