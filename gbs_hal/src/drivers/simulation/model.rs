//! Register-level model of the scaler.
//!
//! Plain register memory for everything the controller writes, with the
//! status registers recomputed from the attached [`SignalSource`] on every
//! read. Only the behaviour the sync controller observes is modeled.

use super::source::{SignalSource, SyncKind};
use super::synth::SimSynth;
use gbs_common::consts::{DISPLAY_CLOCK_EXTERNAL, SEGMENT_COUNT, SEGMENT_SELECT_OFFSET};
use gbs_common::regs::{self, Field, int_reset, test_bus};
use gbs_common::status::{ModeStatus00, SyncInterrupts, SyncStatus16};
use gbs_common::video::{InputPort, VideoStandard};

/// Reference clock of the input formatter counters.
const IF_CLOCK_HZ: f64 = 27_000_000.0;

/// Rate of the decoded vertical pulse on the sync-processor bus for separate sync.
const SP_VSYNC_HV_HZ: f64 = 18.5;

/// Output period assumed for the field flag when no display timing is programmed.
const IDLE_FIELD_PERIOD_US: f64 = 16_683.0;

/// One byte written over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Segment selected at the time of the write.
    pub segment: u8,
    /// Byte offset inside the segment.
    pub offset: u8,
    /// Byte value.
    pub value: u8,
}

/// Everything outside the register file that status readouts depend on.
pub struct SignalContext<'a> {
    /// Connected source.
    pub source: &'a SignalSource,
    /// Clock synthesizer.
    pub synth: &'a SimSynth,
    /// Current virtual time.
    pub now_us: u64,
}

/// Scaler register file plus status logic.
#[derive(Debug, Clone)]
pub struct AsicModel {
    regs: [[u8; 256]; SEGMENT_COUNT],
    segment: u8,
    powered: bool,
    latched: SyncInterrupts,
    refreshes: u64,
    display_clock_override: Option<f64>,
    log: Vec<WriteRecord>,
}

impl AsicModel {
    /// Power-on register state.
    pub fn new() -> Self {
        let mut model = Self {
            regs: [[0; 256]; SEGMENT_COUNT],
            segment: 0,
            powered: true,
            latched: SyncInterrupts::empty(),
            refreshes: 0,
            display_clock_override: None,
            log: Vec::new(),
        };
        model.poke(regs::ADC_INPUT_SEL, 1);
        model.poke(regs::ADC_SOGEN, 1);
        model.poke(regs::ADC_SOGCTRL, 5);
        model.poke(regs::SP_SOG_MODE, 1);
        model.poke(regs::CAPTURE_ENABLE, 1);
        model.poke(regs::SFTRST_SYNC_RSTZ, 1);
        model.poke(regs::SFTRST_MODE_RSTZ, 1);
        model
    }

    /// Cut or restore power; an unpowered chip reads back zeros and drops writes.
    pub fn set_powered(&mut self, powered: bool) {
        self.powered = powered;
    }

    /// Whether the chip is powered.
    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Force the display clock, bypassing the PLL648 selector.
    pub fn set_display_clock_override(&mut self, hz: Option<f64>) {
        self.display_clock_override = hz;
    }

    /// Raw field value from register memory, without status refresh.
    pub fn peek(&self, field: Field) -> u16 {
        let start = field.offset as usize;
        let end = (start + field.byte_len()).min(256);
        field.decode(&self.regs[field.segment as usize][start..end])
    }

    /// Set a field directly in register memory.
    pub fn poke(&mut self, field: Field, value: u16) {
        let start = field.offset as usize;
        let end = (start + field.byte_len()).min(256);
        field.encode(&mut self.regs[field.segment as usize][start..end], value);
    }

    /// Every byte written so far.
    pub fn write_log(&self) -> &[WriteRecord] {
        &self.log
    }

    /// Values written to a single-byte field, in order.
    pub fn field_history(&self, field: Field) -> Vec<u16> {
        self.log
            .iter()
            .filter(|w| w.segment == field.segment && w.offset == field.offset)
            .map(|w| field.decode(&[w.value]))
            .collect()
    }

    /// Bus write starting at `offset` of the current segment.
    pub fn write(&mut self, offset: u8, data: &[u8]) {
        if !self.powered {
            return;
        }
        if offset == SEGMENT_SELECT_OFFSET {
            if let Some(&segment) = data.first() {
                self.segment = segment;
            }
            return;
        }
        let segment = self.segment as usize;
        if segment >= SEGMENT_COUNT {
            return;
        }
        for (i, &value) in data.iter().enumerate() {
            let Some(off) = (offset as usize).checked_add(i).filter(|o| *o < 256) else {
                break;
            };
            self.regs[segment][off] = value;
            self.log.push(WriteRecord {
                segment: self.segment,
                offset: off as u8,
                value,
            });
        }

        let int_ctl = regs::INTERRUPT_CONTROL_00;
        if self.segment == int_ctl.segment && data.first().is_some() && offset == int_ctl.offset {
            self.acknowledge(self.peek(int_ctl));
        }
    }

    fn acknowledge(&mut self, bits: u16) {
        if bits & int_reset::ALL == int_reset::ALL {
            self.latched = SyncInterrupts::empty();
            return;
        }
        if bits & int_reset::SOG_BAD != 0 {
            self.latched.remove(SyncInterrupts::SOG_BAD);
        }
        if bits & int_reset::SOG_SWITCH != 0 {
            self.latched.remove(SyncInterrupts::SOG_SWITCH);
        }
        if bits & int_reset::NO_HSYNC != 0 {
            self.latched.remove(SyncInterrupts::NO_HSYNC);
        }
    }

    /// Bus read starting at `offset` of the current segment.
    pub fn read(&mut self, offset: u8, buf: &mut [u8], ctx: &SignalContext<'_>) {
        buf.fill(0);
        if !self.powered {
            return;
        }
        if offset == SEGMENT_SELECT_OFFSET {
            if let Some(first) = buf.first_mut() {
                *first = self.segment;
            }
            return;
        }
        let segment = self.segment as usize;
        if segment >= SEGMENT_COUNT {
            return;
        }
        if segment <= 1 {
            self.refresh_status(ctx);
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            let off = offset as usize + i;
            if off >= 256 {
                break;
            }
            *byte = self.regs[segment][off];
        }
    }

    fn input_port(&self) -> InputPort {
        InputPort::from_select_bit(self.peek(regs::ADC_INPUT_SEL))
    }

    fn sync_visible(&self, src: &SignalSource) -> bool {
        src.sync_visible(
            self.input_port(),
            self.peek(regs::ADC_SOGCTRL) as u8,
            self.peek(regs::ADC_SOGEN) == 1,
        )
    }

    fn on_port(&self, src: &SignalSource) -> bool {
        src.present && src.port == self.input_port()
    }

    fn refresh_status(&mut self, ctx: &SignalContext<'_>) {
        let src = ctx.source;
        let visible = self.sync_visible(src);
        let on_port = self.on_port(src);
        self.refreshes = self.refreshes.wrapping_add(1);

        if on_port && src.sync == SyncKind::SyncOnGreen && (!visible || src.sog_noise) {
            self.latched |= SyncInterrupts::SOG_BAD;
        }
        if !visible {
            self.latched |= SyncInterrupts::NO_HSYNC;
        }

        let mut s16 = SyncStatus16::empty();
        if visible {
            s16 |= SyncStatus16::HS_ACTIVE;
            if src.hs_active_high {
                s16 |= SyncStatus16::HS_POLARITY_HIGH;
            }
        }
        if on_port && src.sync.has_vsync_pin() {
            s16 |= SyncStatus16::VS_ACTIVE;
        }

        let (st00, st03, st04) = if visible {
            self.mode_detect_bits(src)
        } else {
            (0, 0, 0)
        };

        let jitter = visible
            && src.phase_is_bad(self.peek(regs::PA_SP_S) as u8)
            && self.refreshes % 2 == 1;
        let htotal = if visible {
            self.peek(regs::PLLAD_MD) + u16::from(jitter)
        } else {
            0
        };
        let hperiod = if visible && src.line_rate_hz > 0.0 {
            ((IF_CLOCK_HZ / src.line_rate_hz / 4.0).round() as u16).min(511)
        } else {
            0
        };
        let hlow = if on_port {
            100 + (self.refreshes % 7) as u16
        } else {
            0
        };

        self.poke(regs::STATUS_00, st00);
        self.poke(regs::STATUS_03, st03);
        self.poke(regs::STATUS_04, st04);
        self.poke(regs::STATUS_05, if visible { 0 } else { 0x0c });
        self.poke(regs::STATUS_16, u16::from(s16.bits()));
        self.poke(regs::STATUS_INT, u16::from(self.latched.bits()));
        self.poke(regs::TEST_BUS, if on_port { 0x0500 } else { 0 });
        self.poke(regs::TEST_BUS_2F, if visible { 0x05 } else { 0 });
        self.poke(regs::SYNC_PROC_HTOTAL, htotal);
        self.poke(regs::HLOW_LEN, hlow);
        self.poke(regs::VTOTAL, if visible { src.lines } else { 0 });
        self.poke(regs::HPERIOD_IF, hperiod);
        self.poke(regs::VPERIOD_IF, if visible { src.vperiod_if } else { 0 });

        let field_period = self
            .output_period_us(ctx)
            .unwrap_or(IDLE_FIELD_PERIOD_US);
        let field = (ctx.now_us as f64 / field_period) as u64 & 1;
        self.poke(regs::STATUS_VDS_FIELD, field as u16);
    }

    fn mode_detect_bits(&self, src: &SignalSource) -> (u16, u16, u16) {
        let stable = ModeStatus00::STABLE_MASK.bits();
        let sd = ModeStatus00::SD.bits();
        let st00 = |flag: ModeStatus00| u16::from(stable | sd | flag.bits());
        match src.standard {
            VideoStandard::Ntsc => (st00(ModeStatus00::NTSC_I), 0, 0),
            VideoStandard::Pal => (st00(ModeStatus00::PAL_I), 0, 0),
            VideoStandard::EdtvNtsc60 => (st00(ModeStatus00::EDTV60), 0, 0),
            VideoStandard::EdtvPal50 => (st00(ModeStatus00::EDTV50), 0, 0x80),
            VideoStandard::Hdtv720p => (u16::from(stable), 0x10, 0),
            VideoStandard::Hdtv1080i => (u16::from(stable), 0, 0x61),
            VideoStandard::Hdtv1080p => (u16::from(stable), 0, 0x30),
            VideoStandard::MedRes25k => {
                if self.peek(regs::MD_HD1250P_CNTRL) >= u16::from(src.med_res_threshold) {
                    (u16::from(stable), 0, 0x34)
                } else {
                    (u16::from(stable), 0, 0)
                }
            }
            VideoStandard::VgaGraphics
            | VideoStandard::RgbHvBypass
            | VideoStandard::RgbHvUpscale => (u16::from(stable), 0x02, 0),
            VideoStandard::Unknown => (u16::from(stable), 0, 0),
        }
    }

    /// Display clock feeding the output timing generator.
    pub fn display_clock_hz(&self, ctx: &SignalContext<'_>) -> f64 {
        if let Some(hz) = self.display_clock_override {
            return hz;
        }
        match self.peek(regs::PLL648_CONTROL_01) as u8 {
            DISPLAY_CLOCK_EXTERNAL => {
                if self.peek(regs::PAD_CKIN_ENZ) == 0 && ctx.synth.clock_valid(ctx.now_us) {
                    f64::from(ctx.synth.frequency_hz())
                } else {
                    0.0
                }
            }
            0x25 => 40_500_000.0,
            0x45 => 54_000_000.0,
            0x55 => 64_800_000.0,
            0x85 => 108_000_000.0,
            0x95 => 129_600_000.0,
            0xa5 => 162_000_000.0,
            _ => 81_000_000.0,
        }
    }

    /// Output frame period from the display timing registers.
    pub fn output_period_us(&self, ctx: &SignalContext<'_>) -> Option<f64> {
        let htotal = f64::from(self.peek(regs::VDS_HSYNC_RST));
        let vtotal = f64::from(self.peek(regs::VDS_VSYNC_RST));
        let clock = self.display_clock_hz(ctx);
        (htotal > 0.0 && vtotal > 0.0 && clock > 0.0).then(|| htotal * vtotal * 1_000_000.0 / clock)
    }

    /// Period of the pulse currently routed to the debug pin.
    pub fn pulse_period_us(&self, ctx: &SignalContext<'_>) -> Option<f64> {
        if !self.powered || self.peek(regs::PAD_BOUT_EN) == 0 {
            return None;
        }
        let src = ctx.source;
        let visible = self.sync_visible(src);
        match self.peek(regs::TEST_BUS_SEL) {
            test_bus::OUTPUT_FRAME => self.output_period_us(ctx),
            test_bus::MODE_DETECT if visible => src.field_period_us(),
            test_bus::SYNC_PROCESSOR if visible => match self.peek(regs::TEST_BUS_SP_SEL) {
                test_bus::SP_VSYNC if src.sync.is_composite() => src.field_period_us(),
                test_bus::SP_VSYNC => Some(1_000_000.0 / SP_VSYNC_HV_HZ),
                test_bus::SP_HPLL_CSYNC | test_bus::SP_HPLL_HV => {
                    let rate = src.hpll_rate_hz();
                    (rate > 0.0).then(|| 1_000_000.0 / rate)
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for AsicModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(source: &'a SignalSource, synth: &'a SimSynth) -> SignalContext<'a> {
        SignalContext {
            source,
            synth,
            now_us: 0,
        }
    }

    fn select(model: &mut AsicModel, segment: u8) {
        model.write(SEGMENT_SELECT_OFFSET, &[segment]);
    }

    #[test]
    fn ntsc_source_reports_sd_mode_bits() {
        let src = SignalSource::ntsc_480i();
        let synth = SimSynth::new(false);
        let mut model = AsicModel::new();
        model.poke(regs::ADC_SOGCTRL, 8);

        select(&mut model, 0);
        let mut buf = [0u8; 1];
        model.read(regs::STATUS_00.offset, &mut buf, &ctx(&src, &synth));
        assert_eq!(buf[0], 0x8F);
        model.read(regs::STATUS_16.offset, &mut buf, &ctx(&src, &synth));
        assert!(SyncStatus16::from_bits_truncate(buf[0]).hs_active());
    }

    #[test]
    fn sog_outside_window_latches_sog_bad() {
        let src = SignalSource::ntsc_480i().with_sog_window(4, 6);
        let synth = SimSynth::new(false);
        let mut model = AsicModel::new();
        model.poke(regs::ADC_SOGCTRL, 12);

        select(&mut model, 0);
        let mut buf = [0u8; 1];
        model.read(regs::STATUS_INT.offset, &mut buf, &ctx(&src, &synth));
        let int = SyncInterrupts::from_bits_truncate(buf[0]);
        assert!(int.contains(SyncInterrupts::SOG_BAD | SyncInterrupts::NO_HSYNC));

        model.poke(regs::ADC_SOGCTRL, 5);
        model.write(regs::INTERRUPT_CONTROL_00.offset, &[int_reset::SOG_BAD as u8]);
        model.write(regs::INTERRUPT_CONTROL_00.offset, &[0]);
        model.read(regs::STATUS_INT.offset, &mut buf, &ctx(&src, &synth));
        assert!(!SyncInterrupts::from_bits_truncate(buf[0]).contains(SyncInterrupts::SOG_BAD));
    }

    #[test]
    fn unpowered_chip_reads_zero_and_drops_writes() {
        let src = SignalSource::none();
        let synth = SimSynth::new(false);
        let mut model = AsicModel::new();
        model.set_powered(false);
        select(&mut model, 5);
        model.write(regs::ADC_UNUSED_69.offset, &[0x6a]);
        let mut buf = [0xffu8; 1];
        model.read(regs::ADC_UNUSED_69.offset, &mut buf, &ctx(&src, &synth));
        assert_eq!(buf[0], 0);
        assert!(model.write_log().is_empty());
    }

    #[test]
    fn output_period_follows_display_timing() {
        let src = SignalSource::none();
        let synth = SimSynth::new(false);
        let mut model = AsicModel::new();
        model.poke(regs::VDS_HSYNC_RST, 1716);
        model.poke(regs::VDS_VSYNC_RST, 525);
        model.poke(regs::PLL648_CONTROL_01, 0x45);
        let period = model.output_period_us(&ctx(&src, &synth)).unwrap();
        assert!((period - 16_683.333).abs() < 0.01);
    }

    #[test]
    fn field_history_tracks_single_byte_writes() {
        let mut model = AsicModel::new();
        select(&mut model, 5);
        for level in [13u16, 12, 11] {
            let mut byte = [model.peek(regs::ADC_SOGCTRL) as u8];
            regs::ADC_SOGCTRL.encode(&mut byte, level);
            model.write(regs::ADC_SOGCTRL.offset, &byte);
        }
        assert_eq!(model.field_history(regs::ADC_SOGCTRL), vec![13, 12, 11]);
    }
}
