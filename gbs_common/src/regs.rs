//! Register field descriptors for the scaler.
//!
//! The scaler exposes six 256-byte segments behind a segment-select register.
//! A field is a bit range inside one segment that may straddle up to three
//! consecutive bytes; multi-byte fields are little-endian.

use crate::consts::SEGMENT_COUNT;
use static_assertions::const_assert;

/// A named bit range inside one register segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: &'static str,
    pub segment: u8,
    pub offset: u8,
    pub shift: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(name: &'static str, segment: u8, offset: u8, shift: u8, width: u8) -> Self {
        Self {
            name,
            segment,
            offset,
            shift,
            width,
        }
    }

    /// Number of bytes touched by a read-modify-write of this field.
    #[inline]
    pub const fn byte_len(&self) -> usize {
        (self.shift as usize + self.width as usize).div_ceil(8)
    }

    /// Unshifted value mask.
    #[inline]
    pub const fn mask(&self) -> u32 {
        (1u32 << self.width) - 1
    }

    /// Largest value the field can hold.
    #[inline]
    pub const fn max_value(&self) -> u16 {
        self.mask() as u16
    }

    /// Extract the field value from the bytes starting at `offset`.
    pub fn decode(&self, bytes: &[u8]) -> u16 {
        let raw = bytes
            .iter()
            .take(self.byte_len())
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
        ((raw >> self.shift) & self.mask()) as u16
    }

    /// Merge `value` into `bytes` (starting at `offset`), leaving other bits alone.
    ///
    /// Bits of `value` beyond the field width are dropped.
    pub fn encode(&self, bytes: &mut [u8], value: u16) {
        let len = self.byte_len().min(bytes.len());
        let mut raw = bytes
            .iter()
            .take(len)
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
        let field_mask = self.mask() << self.shift;
        raw = (raw & !field_mask) | ((u32::from(value) << self.shift) & field_mask);
        for (i, byte) in bytes.iter_mut().take(len).enumerate() {
            *byte = (raw >> (8 * i)) as u8;
        }
    }
}

macro_rules! fields {
    ($($name:ident = ($seg:expr, $off:expr, $shift:expr, $width:expr);)*) => {
        $(
            pub const $name: Field = Field::new(stringify!($name), $seg, $off, $shift, $width);
            const_assert!(($seg as usize) < SEGMENT_COUNT);
            const_assert!($shift + $width <= 24);
        )*

        /// Every field in the map, for diagnostics.
        pub const ALL_FIELDS: &[Field] = &[$($name),*];
    };
}

fields! {
    // ─── Segment 0: status, test bus, reset and pads ───
    STATUS_00 = (0, 0x00, 0, 8);
    STATUS_03 = (0, 0x03, 0, 8);
    STATUS_04 = (0, 0x04, 0, 8);
    STATUS_05 = (0, 0x05, 0, 8);
    TEST_BUS = (0, 0x0B, 0, 16);
    STATUS_INT = (0, 0x0F, 0, 8);
    STATUS_VDS_FIELD = (0, 0x13, 0, 1);
    STATUS_16 = (0, 0x16, 0, 8);
    SYNC_PROC_HTOTAL = (0, 0x17, 0, 12);
    HLOW_LEN = (0, 0x19, 0, 12);
    VTOTAL = (0, 0x1B, 0, 11);
    INTERRUPT_CONTROL_00 = (0, 0x2E, 0, 8);
    TEST_BUS_2F = (0, 0x2F, 0, 8);
    PLL648_CONTROL_01 = (0, 0x41, 0, 8);
    DAC_RGBS_PWDNZ = (0, 0x44, 0, 1);
    SFTRST_MODE_RSTZ = (0, 0x47, 1, 1);
    SFTRST_SYNC_RSTZ = (0, 0x47, 2, 1);
    PAD_BOUT_EN = (0, 0x48, 5, 1);
    PAD_CKIN_ENZ = (0, 0x48, 6, 1);
    TEST_BUS_SEL = (0, 0x4D, 0, 5);
    TEST_BUS_EN = (0, 0x4D, 5, 1);
    OUT_SYNC_CNTRL = (0, 0x4F, 5, 1);

    // ─── Segment 1: input formatter and mode detect ───
    HPERIOD_IF = (1, 0x24, 0, 9);
    VPERIOD_IF = (1, 0x26, 0, 11);
    IF_TEST_SEL = (1, 0x2C, 0, 4);
    MD_VS_FLIP = (1, 0x60, 0, 1);
    MD_SEL_VGA60 = (1, 0x60, 7, 1);
    MD_HD1250P_CNTRL = (1, 0x6C, 0, 8);

    // ─── Segment 2: deinterlacer ───
    DEINT_00 = (2, 0x00, 0, 8);
    MAPDT_VT_SEL_PRGV = (2, 0x16, 7, 1);

    // ─── Segment 3: video display timing ───
    VDS_HSYNC_RST = (3, 0x01, 0, 12);
    VDS_VSYNC_RST = (3, 0x02, 4, 11);
    VDS_HB_ST = (3, 0x04, 0, 12);
    VDS_HB_SP = (3, 0x05, 4, 12);
    VDS_HS_ST = (3, 0x0A, 0, 12);
    VDS_HS_SP = (3, 0x0B, 4, 12);
    VDS_VS_ST = (3, 0x0D, 0, 11);
    VDS_VS_SP = (3, 0x0E, 4, 11);
    VDS_DIS_HB_ST = (3, 0x10, 0, 12);
    VDS_DIS_HB_SP = (3, 0x11, 4, 12);
    VDS_TEST_BUS_SEL = (3, 0x50, 0, 4);
    HD_HS_ST = (3, 0xDF, 0, 12);
    HD_HS_SP = (3, 0xE1, 0, 12);
    HD_VS_ST = (3, 0xE6, 0, 11);
    HD_VS_SP = (3, 0xE8, 0, 11);

    // ─── Segment 4: capture and frame buffer ───
    CAPTURE_ENABLE = (4, 0x21, 0, 1);
    WFF_ENABLE = (4, 0x42, 0, 1);
    RFF_ENABLE = (4, 0x4D, 7, 1);

    // ─── Segment 5: ADC, PLLAD and sync processor ───
    ADC_CLK_ICLK2X = (5, 0x00, 3, 1);
    ADC_CLK_ICLK1X = (5, 0x00, 4, 1);
    ADC_SOGEN = (5, 0x02, 0, 1);
    ADC_SOGCTRL = (5, 0x02, 1, 5);
    ADC_INPUT_SEL = (5, 0x02, 6, 1);
    PLLAD_VCORST = (5, 0x11, 0, 1);
    PLLAD_LAT = (5, 0x11, 7, 1);
    PLLAD_MD = (5, 0x12, 0, 12);
    PLLAD_FS = (5, 0x16, 3, 1);
    PLLAD_KS = (5, 0x16, 4, 2);
    PLLAD_CKOS = (5, 0x16, 6, 2);
    PLLAD_ICP = (5, 0x17, 0, 3);
    PA_ADC_LAT = (5, 0x18, 0, 1);
    PA_ADC_S = (5, 0x18, 1, 5);
    PA_SP_LAT = (5, 0x19, 0, 1);
    PA_SP_S = (5, 0x19, 1, 5);
    DEC1_BYPS = (5, 0x1F, 0, 1);
    DEC2_BYPS = (5, 0x1F, 1, 1);
    SP_SOG_P_ATO = (5, 0x20, 1, 1);
    SP_EXT_SYNC_SEL = (5, 0x20, 3, 1);
    SP_H_TIMER_VAL = (5, 0x33, 0, 8);
    SP_DLT_REG = (5, 0x35, 0, 12);
    SP_H_PULSE_IGNOR = (5, 0x37, 0, 8);
    SP_PRE_COAST = (5, 0x38, 0, 8);
    SP_POST_COAST = (5, 0x39, 0, 8);
    SP_SDCS_VSST_H = (5, 0x3B, 0, 3);
    SP_SDCS_VSSP_H = (5, 0x3B, 4, 3);
    SP_H_COAST = (5, 0x3E, 2, 1);
    SP_H_PROTECT = (5, 0x3E, 4, 1);
    SP_SDCS_VSST_L = (5, 0x3F, 0, 8);
    SP_SDCS_VSSP_L = (5, 0x40, 0, 8);
    SP_CS_CLP_ST = (5, 0x41, 0, 12);
    SP_CS_CLP_SP = (5, 0x43, 0, 12);
    SP_H_CST_ST = (5, 0x4D, 0, 12);
    SP_H_CST_SP = (5, 0x4F, 0, 12);
    SP_COAST_INV_REG = (5, 0x55, 5, 1);
    SP_HCST_AUTO_EN = (5, 0x55, 7, 1);
    SP_SOG_MODE = (5, 0x56, 0, 1);
    SP_CLAMP_MANUAL = (5, 0x56, 2, 1);
    SP_HS2PLL_INV_REG = (5, 0x56, 5, 1);
    SP_NO_COAST_REG = (5, 0x56, 6, 1);
    SP_NO_CLAMP_REG = (5, 0x57, 0, 1);
    TEST_BUS_SP_SEL = (5, 0x63, 0, 8);
    ADC_UNUSED_64 = (5, 0x64, 0, 8);
    OPTION_SCALING_RGBHV = (5, 0x65, 0, 1);
    OPTION_PALFORCED60 = (5, 0x65, 1, 1);
    RUNTIME_FTL_ADJUSTED = (5, 0x65, 2, 1);
    PRESET_DISPLAY_CLOCK = (5, 0x66, 0, 8);
    ADC_UNUSED_67 = (5, 0x67, 0, 8);
    ADC_UNUSED_69 = (5, 0x69, 0, 8);
}

/// Bits written to `INTERRUPT_CONTROL_00` to acknowledge a latched status bit.
pub mod int_reset {
    pub const SOG_BAD: u16 = 1 << 0;
    pub const SOG_SWITCH: u16 = 1 << 1;
    pub const NO_HSYNC: u16 = 1 << 2;
    pub const ALL: u16 = 0xff;
}

/// Test bus selections used by the rate measurements.
pub mod test_bus {
    /// Mode-detect vertical sync.
    pub const MODE_DETECT: u16 = 0x00;
    /// Output frame pulse from the display timing block.
    pub const OUTPUT_FRAME: u16 = 0x02;
    /// Sync processor, sub-selected by `TEST_BUS_SP_SEL`.
    pub const SYNC_PROCESSOR: u16 = 0x0a;

    /// Sync processor: decoded vertical sync.
    pub const SP_VSYNC: u16 = 0x0f;
    /// Sync processor: horizontal PLL feedback for a composite sync source.
    pub const SP_HPLL_CSYNC: u16 = 0x6b;
    /// Sync processor: horizontal PLL feedback for a separate sync source.
    pub const SP_HPLL_HV: u16 = 0x09;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_accounts_for_shift() {
        assert_eq!(STATUS_00.byte_len(), 1);
        assert_eq!(SYNC_PROC_HTOTAL.byte_len(), 2);
        assert_eq!(VDS_HB_SP.byte_len(), 2);
        assert_eq!(VDS_VSYNC_RST.byte_len(), 2);
        assert_eq!(ADC_SOGCTRL.byte_len(), 1);
    }

    #[test]
    fn decode_spanning_field() {
        // 12-bit value 0x6B4 stored at shift 4.
        let bytes = [0x4F, 0x6B];
        assert_eq!(VDS_HB_SP.decode(&bytes), 0x6B4);
    }

    #[test]
    fn encode_preserves_neighbouring_bits() {
        let mut bytes = [0b1000_0001];
        ADC_SOGCTRL.encode(&mut bytes, 0x1f);
        assert_eq!(bytes[0], 0b1011_1111);
        ADC_SOGCTRL.encode(&mut bytes, 0);
        assert_eq!(bytes[0], 0b1000_0001);
    }

    #[test]
    fn encode_truncates_to_width() {
        let mut bytes = [0u8];
        PA_SP_S.encode(&mut bytes, 0x21);
        assert_eq!(PA_SP_S.decode(&bytes), 0x01);
    }

    #[test]
    fn field_names_are_unique() {
        let mut names: Vec<_> = ALL_FIELDS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
