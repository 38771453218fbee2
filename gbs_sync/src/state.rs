//! Controller runtime state.
//!
//! One `RuntimeState` exists per controller. It is created at boot, passed by
//! `&mut` into every component through the [`SyncContext`](crate::context::SyncContext)
//! and reinitialized wholesale with [`RuntimeState::reset`] when sync is lost
//! past the low-power timeout.

use crate::frame_lock::FrameSync;
use gbs_common::consts::FIVE_BIT_MASK;
use gbs_common::video::VideoStandard;
use serde::Serialize;

/// SOG level programmed after a reset.
pub const DEFAULT_SOG_LEVEL: u8 = 5;

/// `source_max_sog` value meaning the SOG optimizer has not run for this source.
pub const SOG_NOT_OPTIMIZED: u8 = 31;

/// Medium-resolution line-count calibration start value.
pub const MED_RES_LINE_COUNT_START: u8 = 0x33;

/// Saturation point of the stable and new-mode counters.
pub const COUNTER_SATURATION: u8 = 255;

// ─── Watcher Phase ──────────────────────────────────────────────────

/// Coarse phase of the sync watcher, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherPhase {
    /// No usable sync, escalation counter running.
    #[default]
    NoSync,
    /// A different standard is being confirmed.
    NewFormatPending,
    /// The applied standard keeps being read back.
    Stable,
    /// Scanning inputs with the output powered down.
    LowPower,
}

// ─── Preemptive SOG Monitor ─────────────────────────────────────────

/// Window bookkeeping for the preemptive SOG monitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SogMonitor {
    /// Start of the current observation window.
    pub window_start_ms: u64,
    /// Bad horizontal sync observations inside the window.
    pub bad_hs: u16,
    /// SOG was lowered inside the current window.
    pub adjusted: bool,
}

impl SogMonitor {
    /// Start a fresh window at `now_ms`.
    #[inline]
    pub fn restart(&mut self, now_ms: u64) {
        self.window_start_ms = now_ms;
        self.bad_hs = 0;
    }
}

// ─── Deinterlace Tracker ────────────────────────────────────────────

/// Field-parity bookkeeping for the deinterlacer auto-switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeinterlaceTracker {
    /// Last `VPERIOD_IF` readout.
    pub last_vperiod: u16,
    /// Consecutive even-parity line counts.
    pub even_count: u8,
    /// Consecutive odd-parity line counts.
    pub odd_count: u8,
    /// Fields left before the timing re-adjust fires (0 = idle).
    pub timing_adjust_delay: u8,
    /// Parity the delay counts down on.
    pub timing_adjust_parity: bool,
}

impl DeinterlaceTracker {
    /// Drop all parity evidence.
    #[inline]
    pub fn reset_filters(&mut self) {
        self.even_count = 0;
        self.odd_count = 0;
    }
}

// ─── Runtime State ──────────────────────────────────────────────────

/// Controller context mutated by every component.
///
/// Counters saturate instead of wrapping. SOG and phase values are masked to
/// five bits by their setters before reaching hardware.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    // ── Source ──
    /// Standard whose preset is currently applied.
    pub video_standard: VideoStandard,
    /// Sync is composite (sync on green or CSync on the H pin).
    pub sync_type_csync: bool,
    /// Active input is YPbPr.
    pub input_is_component: bool,

    // ── Analog front end ──
    pub sog_level: u8,
    pub phase_adc: u8,
    pub phase_sp: u8,
    /// Highest SOG level the optimizer found stable (31 = not run).
    pub source_max_sog: u8,
    /// ADC oversampling ratio (0 = not configured).
    pub osr: u8,

    // ── Hysteresis counters ──
    pub no_sync_counter: u16,
    pub continuous_stable_counter: u8,
    pub new_mode_counter: u8,
    pub not_recognized_counter: u8,
    pub rgbhv_no_sync_counter: u16,

    // ── Latches ──
    pub board_has_power: bool,
    pub source_disconnected: bool,
    pub output_frozen: bool,
    pub clamp_position_set: bool,
    pub coast_position_set: bool,
    pub phase_calibrated: bool,
    pub is_in_low_power_mode: bool,
    /// Stable branch should re-run the SOG optimizer after a long outage.
    pub full_restore_pending: bool,

    // ── Clock synthesizer ──
    pub ext_clock_gen_present: bool,
    pub ext_clock_freq_hz: u32,

    // ── Frame timing lock ──
    pub auto_best_htotal_enabled: bool,
    pub fail_retry_attempts: u8,
    pub sync_lock_fail_ignore: u8,
    pub frame_sync: FrameSync,
    /// Last time the input vsync was seen settled; frame lock holds off after it.
    pub last_vsync_lock_ms: u64,

    // ── RGB/HV sub-machine ──
    /// Bucket (1..=5) of the last measured H-PLL rate, 0 = unknown.
    pub hpll_state: u8,
    pub last_pll_rate: u32,
    /// Consecutive bypass runs with SOG reporting bad sync.
    pub rgbhv_sog_bad_runs: u8,
    pub rgbhv_scaling_valid: bool,
    pub rgbhv_last_check_ms: u64,
    pub hs_polarity_high: Option<bool>,
    pub vs_polarity_high: Option<bool>,

    // ── Mode detect ──
    pub med_res_line_count: u8,

    // ── Maintenance bookkeeping ──
    pub sog_monitor: SogMonitor,
    pub deinterlace: DeinterlaceTracker,
    pub motion_adaptive_active: bool,
}

impl RuntimeState {
    /// Boot state with auto htotal enabled as configured.
    pub fn new(auto_best_htotal: bool) -> Self {
        Self {
            video_standard: VideoStandard::Unknown,
            sync_type_csync: false,
            input_is_component: false,
            sog_level: DEFAULT_SOG_LEVEL,
            phase_adc: 16,
            phase_sp: 16,
            source_max_sog: SOG_NOT_OPTIMIZED,
            osr: 0,
            no_sync_counter: 0,
            continuous_stable_counter: 0,
            new_mode_counter: 0,
            not_recognized_counter: 0,
            rgbhv_no_sync_counter: 0,
            board_has_power: true,
            source_disconnected: true,
            output_frozen: false,
            clamp_position_set: false,
            coast_position_set: false,
            phase_calibrated: false,
            is_in_low_power_mode: false,
            full_restore_pending: false,
            ext_clock_gen_present: false,
            ext_clock_freq_hz: 0,
            auto_best_htotal_enabled: auto_best_htotal,
            fail_retry_attempts: 0,
            sync_lock_fail_ignore: 0,
            frame_sync: FrameSync::new(),
            last_vsync_lock_ms: 0,
            hpll_state: 0,
            last_pll_rate: 0,
            rgbhv_sog_bad_runs: 0,
            rgbhv_scaling_valid: false,
            rgbhv_last_check_ms: 0,
            hs_polarity_high: None,
            vs_polarity_high: None,
            med_res_line_count: MED_RES_LINE_COUNT_START,
            sog_monitor: SogMonitor::default(),
            deinterlace: DeinterlaceTracker::default(),
            motion_adaptive_active: false,
        }
    }

    /// Reinitialize everything that describes the current source.
    ///
    /// Board power, synthesizer presence and frequency, and the auto htotal
    /// preference survive.
    pub fn reset(&mut self) {
        let keep = (
            self.board_has_power,
            self.ext_clock_gen_present,
            self.ext_clock_freq_hz,
            self.auto_best_htotal_enabled,
            self.is_in_low_power_mode,
        );
        *self = Self::new(keep.3);
        self.board_has_power = keep.0;
        self.ext_clock_gen_present = keep.1;
        self.ext_clock_freq_hz = keep.2;
        self.is_in_low_power_mode = keep.4;
    }

    /// Set the SOG level, masked to its register width.
    #[inline]
    pub fn set_sog_level(&mut self, level: u8) {
        self.sog_level = level & FIVE_BIT_MASK;
    }

    /// Set both sampling phases, wrapping into range.
    #[inline]
    pub fn set_phases(&mut self, sp: u8, adc: u8) {
        self.phase_sp = sp & FIVE_BIT_MASK;
        self.phase_adc = adc & FIVE_BIT_MASK;
    }

    /// Saturating increment of the no-sync counter.
    #[inline]
    pub fn bump_no_sync(&mut self) -> u16 {
        self.no_sync_counter = self.no_sync_counter.saturating_add(1);
        self.no_sync_counter
    }

    /// Increment of the stable counter, saturating at 255.
    #[inline]
    pub fn bump_stable(&mut self) -> u8 {
        self.continuous_stable_counter = self.continuous_stable_counter.saturating_add(1);
        self.continuous_stable_counter
    }

    /// Increment of the new-mode counter, saturating at 255.
    #[inline]
    pub fn bump_new_mode(&mut self) -> u8 {
        self.new_mode_counter = self.new_mode_counter.saturating_add(1);
        self.new_mode_counter
    }

    /// Native mode id of the applied standard.
    #[inline]
    pub const fn standard_id(&self) -> u8 {
        self.video_standard.native_id()
    }

    /// Coarse phase derived from the counters and latches.
    pub fn phase(&self) -> WatcherPhase {
        if self.is_in_low_power_mode {
            WatcherPhase::LowPower
        } else if self.new_mode_counter > 0 {
            WatcherPhase::NewFormatPending
        } else if self.continuous_stable_counter > 0 {
            WatcherPhase::Stable
        } else {
            WatcherPhase::NoSync
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(true)
    }
}
