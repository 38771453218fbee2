//! Analog signal sources fed into the simulated board.
//!
//! A source describes what the scaler's front end would see on one input:
//! its sync arrangement, timings, and which SOG slice levels separate its
//! sync cleanly. Builder methods tweak a preset for a specific test.

use gbs_common::video::{InputPort, VideoStandard};
use serde::{Deserialize, Serialize};

/// How sync is carried by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Composite sync on green or luma; needs a SOG slice level.
    SyncOnGreen,
    /// Composite sync on the horizontal sync pin, vertical pin also active.
    CsyncOnHs,
    /// Separate horizontal and vertical sync.
    SeparateHv,
}

impl SyncKind {
    /// Sync is composite (decoded from one signal).
    pub const fn is_composite(self) -> bool {
        !matches!(self, Self::SeparateHv)
    }

    /// The vertical sync pin carries a signal.
    pub const fn has_vsync_pin(self) -> bool {
        !matches!(self, Self::SyncOnGreen)
    }
}

/// Signal on one input of the simulated board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSource {
    /// Anything connected at all.
    pub present: bool,
    /// Input the source is plugged into.
    pub port: InputPort,
    /// Sync arrangement.
    pub sync: SyncKind,
    /// Standard the mode-detect block recognizes.
    pub standard: VideoStandard,
    /// Vertical rate in Hz.
    pub field_rate_hz: f64,
    /// Horizontal rate in Hz.
    pub line_rate_hz: f64,
    /// Lines per field as counted by the sync processor.
    pub lines: u16,
    /// Input formatter vertical period readout.
    pub vperiod_if: u16,
    /// Inclusive SOG levels at which composite sync is sliced cleanly.
    pub sog_window: (u8, u8),
    /// Horizontal sync polarity is active high.
    pub hs_active_high: bool,
    /// Lowest `MD_HD1250P_CNTRL` value at which medium-res timing is recognized.
    pub med_res_threshold: u8,
    /// Inclusive sync-processor phase range where the sampled line length jitters.
    pub bad_phase: Option<(u8, u8)>,
    /// Sampled line length jitters at every phase.
    pub pixel_clock_jitter: bool,
    /// The SOG comparator reports bad sync even when sliced.
    pub sog_noise: bool,
}

impl SignalSource {
    /// Nothing connected.
    pub fn none() -> Self {
        Self {
            present: false,
            port: InputPort::Rgb,
            sync: SyncKind::SyncOnGreen,
            standard: VideoStandard::Unknown,
            field_rate_hz: 0.0,
            line_rate_hz: 0.0,
            lines: 0,
            vperiod_if: 0,
            sog_window: (0, 0),
            hs_active_high: false,
            med_res_threshold: 0,
            bad_phase: None,
            pixel_clock_jitter: false,
            sog_noise: false,
        }
    }

    /// 480i over RGBS with sync on green.
    pub fn ntsc_480i() -> Self {
        Self {
            present: true,
            port: InputPort::Rgb,
            sync: SyncKind::SyncOnGreen,
            standard: VideoStandard::Ntsc,
            field_rate_hz: 59.94,
            line_rate_hz: 15_734.26,
            lines: 263,
            vperiod_if: 524,
            sog_window: (2, 14),
            hs_active_high: false,
            med_res_threshold: 0,
            bad_phase: Some((6, 9)),
            pixel_clock_jitter: false,
            sog_noise: false,
        }
    }

    /// 240p over RGBS, as produced by most consoles.
    pub fn ntsc_240p() -> Self {
        Self {
            field_rate_hz: 59.83,
            lines: 262,
            vperiod_if: 523,
            ..Self::ntsc_480i()
        }
    }

    /// 576i over RGBS.
    pub fn pal_576i() -> Self {
        Self {
            standard: VideoStandard::Pal,
            field_rate_hz: 50.0,
            line_rate_hz: 15_625.0,
            lines: 313,
            vperiod_if: 624,
            ..Self::ntsc_480i()
        }
    }

    /// 480p over YPbPr.
    pub fn edtv_480p() -> Self {
        Self {
            port: InputPort::Component,
            standard: VideoStandard::EdtvNtsc60,
            line_rate_hz: 31_468.5,
            lines: 525,
            vperiod_if: 525,
            ..Self::ntsc_480i()
        }
    }

    /// 640x480 VGA with separate sync.
    pub fn vga_hv() -> Self {
        Self {
            present: true,
            port: InputPort::Rgb,
            sync: SyncKind::SeparateHv,
            standard: VideoStandard::RgbHvBypass,
            field_rate_hz: 59.94,
            line_rate_hz: 31_468.5,
            lines: 525,
            vperiod_if: 525,
            sog_window: (0, 31),
            hs_active_high: false,
            med_res_threshold: 0,
            bad_phase: None,
            pixel_clock_jitter: false,
            sog_noise: false,
        }
    }

    /// Move the source to another input.
    pub fn on_port(mut self, port: InputPort) -> Self {
        self.port = port;
        self
    }

    /// Override the vertical rate.
    pub fn with_field_rate(mut self, hz: f64) -> Self {
        self.field_rate_hz = hz;
        self
    }

    /// Override the clean SOG slice range.
    pub fn with_sog_window(mut self, low: u8, high: u8) -> Self {
        self.sog_window = (low, high);
        self
    }

    /// Override the jittering sampling-phase range.
    pub fn with_bad_phase(mut self, range: Option<(u8, u8)>) -> Self {
        self.bad_phase = range;
        self
    }

    /// Make every sampling phase jitter.
    pub fn with_pixel_clock_jitter(mut self) -> Self {
        self.pixel_clock_jitter = true;
        self
    }

    /// Keep the SOG comparator reporting bad sync.
    pub fn with_sog_noise(mut self) -> Self {
        self.sog_noise = true;
        self
    }

    /// Medium-res timing that the mode detect only recognizes once calibrated.
    pub fn with_med_res_threshold(mut self, threshold: u8) -> Self {
        self.standard = VideoStandard::MedRes25k;
        self.med_res_threshold = threshold;
        self
    }

    /// Whether sync reaches the sync processor at the given slice level.
    pub fn sync_visible(&self, port: InputPort, sog_level: u8, sog_enabled: bool) -> bool {
        if !self.present || port != self.port {
            return false;
        }
        match self.sync {
            SyncKind::SeparateHv | SyncKind::CsyncOnHs => true,
            SyncKind::SyncOnGreen => {
                sog_enabled && (self.sog_window.0..=self.sog_window.1).contains(&sog_level)
            }
        }
    }

    /// Field period in microseconds.
    pub fn field_period_us(&self) -> Option<f64> {
        (self.field_rate_hz > 0.0).then(|| 1_000_000.0 / self.field_rate_hz)
    }

    /// Horizontal PLL feedback pulse rate exposed on the sync-processor test bus.
    pub fn hpll_rate_hz(&self) -> f64 {
        self.line_rate_hz / 16.0
    }

    /// Whether `phase` falls inside the jittering range (which may wrap).
    pub fn phase_is_bad(&self, phase: u8) -> bool {
        if self.pixel_clock_jitter {
            return true;
        }
        match self.bad_phase {
            Some((lo, hi)) if lo <= hi => (lo..=hi).contains(&phase),
            Some((lo, hi)) => phase >= lo || phase <= hi,
            None => false,
        }
    }
}

impl Default for SignalSource {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn sync_on_green_needs_level_in_window() {
        let src = SignalSource::ntsc_480i().with_sog_window(4, 8);
        assert!(src.sync_visible(InputPort::Rgb, 6, true));
        assert!(!src.sync_visible(InputPort::Rgb, 9, true));
        assert!(!src.sync_visible(InputPort::Rgb, 6, false));
        assert!(!src.sync_visible(InputPort::Component, 6, true));
    }

    #[test]
    fn separate_sync_ignores_slice_level() {
        let src = SignalSource::vga_hv();
        assert!(src.sync_visible(InputPort::Rgb, 31, false));
    }

    #[test]
    fn wrapping_bad_phase_range() {
        let src = SignalSource::ntsc_480i().with_bad_phase(Some((30, 2)));
        assert!(src.phase_is_bad(31));
        assert!(src.phase_is_bad(1));
        assert!(!src.phase_is_bad(10));
    }

    #[test]
    fn source_loads_from_toml_file() {
        let text = toml::to_string(&SignalSource::pal_576i()).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let parsed: SignalSource = toml::from_str(&content).unwrap();
        assert_eq!(parsed, SignalSource::pal_576i());
        assert_eq!(parsed.standard, VideoStandard::Pal);
    }
}
