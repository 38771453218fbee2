//! Controller configuration.
//!
//! `SyncConfig` is loaded with the shared TOML loader and validated in the
//! same step. User preferences live under `[options]`; calibrated
//! constants of the lock loop live under `[tuning]` and default to the
//! values the controller was tuned with.
//!
//! ```toml
//! [service]
//! service_name = "gbs-sync"
//!
//! [options]
//! frame_time_lock = true
//!
//! [tuning]
//! large_diff_fraction = 0.06
//! ```

use gbs_common::config::{ConfigError, ServiceConfig, Validate, load_toml, parse_toml};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;

// ─── Options ────────────────────────────────────────────────────────

/// How the frame-time lock corrects phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLockMethod {
    /// Nudge vtotal and move the vertical sync with it.
    #[default]
    VtotalAndVsync,
    /// Nudge vtotal only.
    VtotalOnly,
}

/// Deinterlacer mode preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeinterlaceMode {
    /// Motion adaptive, switched off automatically for progressive sources.
    #[default]
    MotionAdaptive,
    /// Always bob.
    Bob,
}

/// User preferences affecting the lock loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Enable the frame-time lock.
    pub frame_time_lock: bool,
    pub frame_lock_method: FrameLockMethod,
    pub deinterlace: DeinterlaceMode,
    /// Prefer scaling separate-sync sources when their line count allows it.
    pub prefer_scaling_rgbhv: bool,
    /// Never use the external clock synthesizer even if fitted.
    pub disable_external_clock_generator: bool,
    /// Track the source rate by correcting output htotal.
    pub auto_best_htotal: bool,
    /// PAL sources are forced to a 60 Hz output; htotal corrections are skipped.
    pub pal_forced_60: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            frame_time_lock: false,
            frame_lock_method: FrameLockMethod::default(),
            deinterlace: DeinterlaceMode::default(),
            prefer_scaling_rgbhv: true,
            disable_external_clock_generator: false,
            auto_best_htotal: true,
            pal_forced_60: false,
        }
    }
}

// ─── Tuning ─────────────────────────────────────────────────────────

/// Default large-correction threshold as a fraction of the current htotal.
pub const DEFAULT_LARGE_DIFF_FRACTION: f32 = 0.06;
/// Wider threshold for medium-res and upscaled RGB/HV sources.
pub const DEFAULT_LARGE_DIFF_FRACTION_WIDE: f32 = 0.16;
/// Refused corrections tolerated before auto htotal is switched off.
pub const DEFAULT_HTOTAL_FAIL_RETRY_LIMIT: u8 = 8;
/// Failed auto htotal runs tolerated after a success.
pub const DEFAULT_SYNC_LOCK_FAIL_IGNORE: u8 = 16;
/// HSACT hits required inside one SOG window.
pub const DEFAULT_SOG_WINDOW_HITS: u16 = 60;
/// Length of one SOG window.
pub const DEFAULT_SOG_WINDOW_MS: u32 = 60;
/// Confirmation reads after a full window.
pub const DEFAULT_SOG_CONFIRM_READS: u8 = 50;
/// Good confirmation reads required.
pub const DEFAULT_SOG_CONFIRM_MIN: u8 = 49;
/// Clean sweep steps required before a phase is committed.
pub const DEFAULT_PHASE_MIN_CLEAN_STEPS: u8 = 17;
/// Largest relative retune of the external clock in one step.
pub const DEFAULT_EXT_CLOCK_RATIO_CLAMP: f32 = 0.0006;
/// Lock wait after an external clock retune.
pub const DEFAULT_EXT_CLOCK_LOCK_TIMEOUT_MS: u32 = 80;

const_assert!(DEFAULT_SOG_CONFIRM_MIN <= DEFAULT_SOG_CONFIRM_READS);
const_assert!(DEFAULT_PHASE_MIN_CLEAN_STEPS <= 34);

/// Calibrated constants of the lock loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub large_diff_fraction: f32,
    pub large_diff_fraction_wide: f32,
    pub htotal_fail_retry_limit: u8,
    pub sync_lock_fail_ignore: u8,
    pub sog_window_hits: u16,
    pub sog_window_ms: u32,
    pub sog_confirm_reads: u8,
    pub sog_confirm_min: u8,
    pub phase_min_clean_steps: u8,
    pub ext_clock_ratio_clamp: f32,
    pub ext_clock_lock_timeout_ms: u32,
    /// Interval between watcher ticks in the runner.
    pub watcher_tick_ms: u32,
    /// Interval between auto htotal attempts while stable.
    pub auto_htotal_interval_ms: u64,
    /// Interval between frame-time lock corrections.
    pub frame_lock_interval_ms: u64,
    /// Interval between external clock lock checks.
    pub clock_monitor_interval_ms: u64,
    /// Minimum spacing of repeated lock-failure log lines.
    pub lock_fail_log_interval_ms: u64,
    /// Interval between sync-present probes in low power mode.
    pub low_power_poll_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            large_diff_fraction: DEFAULT_LARGE_DIFF_FRACTION,
            large_diff_fraction_wide: DEFAULT_LARGE_DIFF_FRACTION_WIDE,
            htotal_fail_retry_limit: DEFAULT_HTOTAL_FAIL_RETRY_LIMIT,
            sync_lock_fail_ignore: DEFAULT_SYNC_LOCK_FAIL_IGNORE,
            sog_window_hits: DEFAULT_SOG_WINDOW_HITS,
            sog_window_ms: DEFAULT_SOG_WINDOW_MS,
            sog_confirm_reads: DEFAULT_SOG_CONFIRM_READS,
            sog_confirm_min: DEFAULT_SOG_CONFIRM_MIN,
            phase_min_clean_steps: DEFAULT_PHASE_MIN_CLEAN_STEPS,
            ext_clock_ratio_clamp: DEFAULT_EXT_CLOCK_RATIO_CLAMP,
            ext_clock_lock_timeout_ms: DEFAULT_EXT_CLOCK_LOCK_TIMEOUT_MS,
            watcher_tick_ms: 10,
            auto_htotal_interval_ms: 3_000,
            frame_lock_interval_ms: 1_670,
            clock_monitor_interval_ms: 2_000,
            lock_fail_log_interval_ms: 1_000,
            low_power_poll_ms: 300,
        }
    }
}

impl Validate for Tuning {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if !(0.0..0.5).contains(&self.large_diff_fraction) || self.large_diff_fraction == 0.0 {
            return invalid("tuning.large_diff_fraction must be in (0, 0.5)");
        }
        if self.large_diff_fraction_wide < self.large_diff_fraction
            || self.large_diff_fraction_wide >= 0.5
        {
            return invalid("tuning.large_diff_fraction_wide must be in [large_diff_fraction, 0.5)");
        }
        if self.htotal_fail_retry_limit == 0 {
            return invalid("tuning.htotal_fail_retry_limit must be at least 1");
        }
        if self.sog_window_hits == 0 || self.sog_window_ms == 0 {
            return invalid("tuning.sog_window_hits and sog_window_ms must be non-zero");
        }
        if self.sog_confirm_min > self.sog_confirm_reads {
            return invalid("tuning.sog_confirm_min exceeds sog_confirm_reads");
        }
        if self.phase_min_clean_steps == 0 || self.phase_min_clean_steps > 34 {
            return invalid("tuning.phase_min_clean_steps must be in 1..=34");
        }
        if !(self.ext_clock_ratio_clamp > 0.0 && self.ext_clock_ratio_clamp < 0.01) {
            return invalid("tuning.ext_clock_ratio_clamp must be in (0, 0.01)");
        }
        if self.ext_clock_lock_timeout_ms == 0 || self.watcher_tick_ms == 0 {
            return invalid("tuning timeouts and tick interval must be non-zero");
        }
        Ok(())
    }
}

// ─── Top-level ──────────────────────────────────────────────────────

/// Complete controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub options: SyncOptions,
    #[serde(default)]
    pub tuning: Tuning,
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.tuning.validate()
    }
}

impl SyncConfig {
    /// Load from a TOML file and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

/// Parse and validate an inline TOML document.
pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    parse_toml(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbs_common::config::LogLevel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.service.service_name, "gbs-sync");
        assert!(config.options.auto_best_htotal);
        assert!(!config.options.frame_time_lock);
        assert_eq!(config.tuning.htotal_fail_retry_limit, DEFAULT_HTOTAL_FAIL_RETRY_LIMIT);
    }

    #[test]
    fn sections_override_defaults() {
        let config = load_config_from_str(
            r#"
            [service]
            log_level = "debug"
            service_name = "bench"

            [options]
            frame_time_lock = true
            frame_lock_method = "vtotal_only"
            deinterlace = "bob"

            [tuning]
            large_diff_fraction = 0.05
            "#,
        )
        .unwrap();
        assert_eq!(config.service.log_level, LogLevel::Debug);
        assert!(config.options.frame_time_lock);
        assert_eq!(config.options.frame_lock_method, FrameLockMethod::VtotalOnly);
        assert_eq!(config.options.deinterlace, DeinterlaceMode::Bob);
        assert!((config.tuning.large_diff_fraction - 0.05).abs() < f32::EPSILON);
        assert!((config.tuning.large_diff_fraction_wide - DEFAULT_LARGE_DIFF_FRACTION_WIDE).abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_range_tuning_is_rejected() {
        let result = load_config_from_str("[tuning]\nlarge_diff_fraction = 0.7\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = load_config_from_str("[tuning]\nsog_confirm_reads = 10\nsog_confirm_min = 11\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = load_config_from_str("[tuning]\nphase_min_clean_steps = 35\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn empty_service_name_is_rejected() {
        let result = load_config_from_str("[service]\nservice_name = \"\"\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[options]\npal_forced_60 = true").unwrap();
        let config = SyncConfig::load_validated(file.path()).unwrap();
        assert!(config.options.pal_forced_60);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let result = SyncConfig::load_validated(Path::new("/nonexistent/sync.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn parse_error_is_reported() {
        let result = load_config_from_str("[options\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = load_config_from_str(include_str!("../config/sync.toml")).unwrap();
        let defaults = Tuning::default();
        assert_eq!(config.tuning.sync_lock_fail_ignore, defaults.sync_lock_fail_ignore);
        assert_eq!(config.tuning.frame_lock_interval_ms, defaults.frame_lock_interval_ms);
        assert_eq!(config.options.frame_lock_method, FrameLockMethod::VtotalAndVsync);
        assert!(config.options.prefer_scaling_rgbhv);
    }
}
