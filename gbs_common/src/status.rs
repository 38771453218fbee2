//! Typed status words.
//!
//! Raw bytes read from the mode-detect and sync-processor status registers,
//! plus the clock synthesizer's device status byte.

use bitflags::bitflags;

bitflags! {
    /// Mode-detect status byte 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeStatus00: u8 {
        const HS_STABLE  = 0x01;
        const VS_STABLE  = 0x02;
        const HV_STABLE  = 0x04;
        const NTSC_I     = 0x08;
        const EDTV60     = 0x10;
        const PAL_I      = 0x20;
        const EDTV50     = 0x40;
        const SD         = 0x80;
    }
}

impl ModeStatus00 {
    /// All three stability bits.
    pub const STABLE_MASK: Self = Self::from_bits_truncate(0x07);

    /// Horizontal, vertical and combined stability all reported.
    #[inline]
    pub const fn is_fully_stable(&self) -> bool {
        self.contains(Self::STABLE_MASK)
    }
}

impl Default for ModeStatus00 {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Mode-detect status byte 3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeStatus03: u8 {
        const GRAPHICS = 0x02;
        const HD720P   = 0x10;
    }
}

bitflags! {
    /// Mode-detect status byte 4 (HD family).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeStatus04: u8 {
        const INTERLACE_A = 0x01;
        const LINE_24K    = 0x04;
        const HD1080P     = 0x10;
        const HD_MODE     = 0x20;
        const INTERLACE_B = 0x40;
        const PAL_EDTV    = 0x80;
    }
}

impl ModeStatus04 {
    /// Bits that together identify 1080i.
    pub const INTERLACED_MASK: Self = Self::from_bits_truncate(0x61);
}

bitflags! {
    /// Sync-processor activity byte (status 0x16).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncStatus16: u8 {
        const HS_POLARITY_HIGH = 0x01;
        const HS_ACTIVE        = 0x02;
        const VS_POLARITY_HIGH = 0x04;
        const VS_ACTIVE        = 0x08;
    }
}

impl SyncStatus16 {
    /// Horizontal and vertical activity, required for separate-sync sources.
    pub const HV_ACTIVE: Self = Self::from_bits_truncate(0x0a);

    #[inline]
    pub const fn hs_active(&self) -> bool {
        self.contains(Self::HS_ACTIVE)
    }

    #[inline]
    pub const fn vs_active(&self) -> bool {
        self.contains(Self::VS_ACTIVE)
    }
}

bitflags! {
    /// Latched sync interrupt status (status 0x0f).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncInterrupts: u8 {
        const SOG_BAD    = 0x01;
        const SOG_SWITCH = 0x02;
        const NO_HSYNC   = 0x04;
    }
}

impl Default for SyncInterrupts {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Clock synthesizer device status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SynthStatus: u8 {
        const LOS      = 0x10;
        const LOL_A    = 0x20;
        const LOL_B    = 0x40;
        const SYS_INIT = 0x80;
    }
}

impl SynthStatus {
    /// Bits that must be clear for the output PLL to count as locked.
    pub const LOCK_MASK: Self = Self::from_bits_truncate(0x20 | 0x80);

    #[inline]
    pub const fn is_locked(&self) -> bool {
        !self.intersects(Self::LOCK_MASK)
    }

    /// Device finished power-on initialization and answers on the bus.
    #[inline]
    pub const fn is_ready(&self) -> bool {
        !self.contains(Self::SYS_INIT)
    }
}

impl Default for SynthStatus {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_mask_requires_all_three_bits() {
        assert!(ModeStatus00::from_bits_truncate(0x87).is_fully_stable());
        assert!(!ModeStatus00::from_bits_truncate(0x83).is_fully_stable());
    }

    #[test]
    fn hv_active_mask() {
        let s = SyncStatus16::from_bits_truncate(0x0b);
        assert!(s.contains(SyncStatus16::HV_ACTIVE));
        assert!(!SyncStatus16::HS_ACTIVE.contains(SyncStatus16::HV_ACTIVE));
    }

    #[test]
    fn synth_lock_ignores_pll_b() {
        assert!(SynthStatus::empty().is_locked());
        assert!(SynthStatus::LOL_B.is_locked());
        assert!(!SynthStatus::LOL_A.is_locked());
        assert!(!SynthStatus::SYS_INIT.is_locked());
        assert!(!SynthStatus::SYS_INIT.is_ready());
    }

    #[test]
    fn interrupts_default_empty() {
        assert!(SyncInterrupts::default().is_empty());
    }
}
