//! Native video standard ids and physical inputs.
//!
//! The scaler's mode-detect block reports sources as small integer ids. The
//! controller only ever needs to bucket a source into one of these.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video standard bucket understood by the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStandard {
    /// No source recognized.
    #[default]
    Unknown,
    /// 480i / 240p, 15 kHz.
    Ntsc,
    /// 576i / 288p, 15 kHz.
    Pal,
    /// 480p.
    EdtvNtsc60,
    /// 576p.
    EdtvPal50,
    /// 720p.
    Hdtv720p,
    /// 1080i.
    Hdtv1080i,
    /// 1080p.
    Hdtv1080p,
    /// Medium resolution, 25 kHz class arcade timings.
    MedRes25k,
    /// Graphics modes carried over the component input.
    VgaGraphics,
    /// RGB with separate sync, scaled through the regular pipeline.
    RgbHvUpscale,
    /// RGB with separate sync, passed through.
    RgbHvBypass,
}

impl VideoStandard {
    /// Native mode id as reported by the mode-detect block.
    pub const fn native_id(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Ntsc => 1,
            Self::Pal => 2,
            Self::EdtvNtsc60 => 3,
            Self::EdtvPal50 => 4,
            Self::Hdtv720p => 5,
            Self::Hdtv1080i => 6,
            Self::Hdtv1080p => 7,
            Self::MedRes25k => 8,
            Self::VgaGraphics => 13,
            Self::RgbHvUpscale => 14,
            Self::RgbHvBypass => 15,
        }
    }

    /// Map a native mode id back to a standard.
    ///
    /// Id 9 (stable but unrecognized timing) is treated as a graphics mode.
    pub const fn from_native(id: u8) -> Self {
        match id {
            1 => Self::Ntsc,
            2 => Self::Pal,
            3 => Self::EdtvNtsc60,
            4 => Self::EdtvPal50,
            5 => Self::Hdtv720p,
            6 => Self::Hdtv1080i,
            7 => Self::Hdtv1080p,
            8 => Self::MedRes25k,
            9 | 13 => Self::VgaGraphics,
            14 => Self::RgbHvUpscale,
            15 => Self::RgbHvBypass,
            _ => Self::Unknown,
        }
    }

    /// Any standard other than `Unknown`.
    #[inline]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// 15 kHz NTSC / PAL.
    #[inline]
    pub const fn is_sd(self) -> bool {
        matches!(self, Self::Ntsc | Self::Pal)
    }

    /// SD or EDTV (native ids 1..=4).
    #[inline]
    pub const fn is_sd_or_edtv(self) -> bool {
        matches!(
            self,
            Self::Ntsc | Self::Pal | Self::EdtvNtsc60 | Self::EdtvPal50
        )
    }

    /// 720p, 1080i or 1080p.
    #[inline]
    pub const fn is_hd(self) -> bool {
        matches!(self, Self::Hdtv720p | Self::Hdtv1080i | Self::Hdtv1080p)
    }

    /// Separate-sync RGB handling (upscale or bypass).
    #[inline]
    pub const fn is_rgbhv(self) -> bool {
        matches!(self, Self::RgbHvUpscale | Self::RgbHvBypass)
    }

    /// Graphics class ids (13 and above).
    #[inline]
    pub const fn is_graphics_class(self) -> bool {
        self.native_id() >= 13
    }

    /// Standards whose nominal field rate is 60 Hz.
    #[inline]
    pub const fn is_sixty_hz_family(self) -> bool {
        matches!(self, Self::Ntsc | Self::EdtvNtsc60)
    }

    /// Standards whose nominal field rate is 50 Hz.
    #[inline]
    pub const fn is_fifty_hz_family(self) -> bool {
        matches!(self, Self::Pal | Self::EdtvPal50)
    }
}

impl fmt::Display for VideoStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Ntsc => "NTSC 15kHz",
            Self::Pal => "PAL 15kHz",
            Self::EdtvNtsc60 => "EDTV 60Hz",
            Self::EdtvPal50 => "EDTV 50Hz",
            Self::Hdtv720p => "720p",
            Self::Hdtv1080i => "1080i",
            Self::Hdtv1080p => "1080p",
            Self::MedRes25k => "medium res",
            Self::VgaGraphics => "graphics",
            Self::RgbHvUpscale => "RGB/HV upscale",
            Self::RgbHvBypass => "RGB/HV bypass",
        };
        write!(f, "{name} ({})", self.native_id())
    }
}

/// Physical input selected by the ADC input multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputPort {
    /// RGBS / RGBHV input.
    Rgb,
    /// YPbPr input.
    Component,
}

impl InputPort {
    /// Value of the ADC input select bit for this port.
    #[inline]
    pub const fn select_bit(self) -> u16 {
        match self {
            Self::Rgb => 1,
            Self::Component => 0,
        }
    }

    /// Decode the ADC input select bit.
    #[inline]
    pub const fn from_select_bit(bit: u16) -> Self {
        if bit & 1 == 1 { Self::Rgb } else { Self::Component }
    }

    /// The other input.
    #[inline]
    pub const fn other(self) -> Self {
        match self {
            Self::Rgb => Self::Component,
            Self::Component => Self::Rgb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [VideoStandard; 12] = [
        VideoStandard::Unknown,
        VideoStandard::Ntsc,
        VideoStandard::Pal,
        VideoStandard::EdtvNtsc60,
        VideoStandard::EdtvPal50,
        VideoStandard::Hdtv720p,
        VideoStandard::Hdtv1080i,
        VideoStandard::Hdtv1080p,
        VideoStandard::MedRes25k,
        VideoStandard::VgaGraphics,
        VideoStandard::RgbHvUpscale,
        VideoStandard::RgbHvBypass,
    ];

    #[test]
    fn native_ids_map_back() {
        for std in ALL {
            assert_eq!(VideoStandard::from_native(std.native_id()), std);
        }
    }

    #[test]
    fn unrecognized_stable_timing_is_graphics() {
        assert_eq!(VideoStandard::from_native(9), VideoStandard::VgaGraphics);
        assert_eq!(VideoStandard::from_native(10), VideoStandard::Unknown);
    }

    #[test]
    fn classification_helpers() {
        assert!(VideoStandard::Ntsc.is_sd());
        assert!(!VideoStandard::EdtvNtsc60.is_sd());
        assert!(VideoStandard::EdtvPal50.is_sd_or_edtv());
        assert!(VideoStandard::Hdtv1080i.is_hd());
        assert!(VideoStandard::RgbHvBypass.is_rgbhv());
        assert!(VideoStandard::VgaGraphics.is_graphics_class());
        assert!(!VideoStandard::MedRes25k.is_graphics_class());
    }

    #[test]
    fn input_port_select_bit() {
        assert_eq!(InputPort::from_select_bit(1), InputPort::Rgb);
        assert_eq!(InputPort::Rgb.other().select_bit(), 0);
    }
}
