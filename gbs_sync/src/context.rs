//! Controller context.
//!
//! Bundles the board, the runtime state, the loaded configuration and the
//! preset actuator. Every component takes `&mut SyncContext`; nothing in the
//! controller reaches for process-wide state.

use crate::board::Board;
use crate::config::{SyncConfig, SyncOptions, Tuning};
use crate::error::SyncError;
use crate::frame_lock::LogThrottle;
use crate::preset::{PresetActuator, TablePresets};
use crate::state::RuntimeState;
use gbs_common::hal::ScalerDriver;
use gbs_common::video::VideoStandard;

/// Everything a controller operation needs.
pub struct SyncContext {
    pub board: Board,
    pub rt: RuntimeState,
    pub config: SyncConfig,
    /// Rate limit for synthesizer lock-failure messages.
    pub clock_log: LogThrottle,
    presets: Box<dyn PresetActuator>,
}

impl SyncContext {
    /// Context over `driver` using the built-in preset tables.
    pub fn new(driver: Box<dyn ScalerDriver>, config: SyncConfig) -> Self {
        let rt = RuntimeState::new(config.options.auto_best_htotal);
        let clock_log = LogThrottle::new(config.tuning.lock_fail_log_interval_ms);
        Self {
            board: Board::new(driver),
            rt,
            config,
            clock_log,
            presets: Box::new(TablePresets),
        }
    }

    /// Builder: replace the preset actuator.
    pub fn with_presets(mut self, presets: Box<dyn PresetActuator>) -> Self {
        self.presets = presets;
        self
    }

    #[inline]
    pub fn options(&self) -> &SyncOptions {
        &self.config.options
    }

    #[inline]
    pub fn tuning(&self) -> &Tuning {
        &self.config.tuning
    }

    /// The external clock synthesizer drives the display clock.
    #[inline]
    pub fn ext_clock_in_use(&self) -> bool {
        self.rt.ext_clock_gen_present && !self.config.options.disable_external_clock_generator
    }

    /// Write the register table for `standard` through the actuator.
    pub(crate) fn write_preset(&mut self, standard: VideoStandard) -> Result<(), SyncError> {
        let ext_clock = self.ext_clock_in_use();
        self.presets
            .write_preset(&mut self.board, &mut self.rt, standard, ext_clock)
    }

    pub fn preset_name(&self) -> &'static str {
        self.presets.name()
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("board", &self.board)
            .field("standard", &self.rt.video_standard)
            .field("presets", &self.presets.name())
            .finish()
    }
}
