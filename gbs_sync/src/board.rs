//! Field-level register and timebase access.
//!
//! `Board` owns the driver, caches the selected segment so consecutive
//! accesses in one segment cost a single bus transaction, and owns the pulse
//! timer wired to the driver's edge input. Every hardware access the
//! controller makes goes through here.

use crate::pulse_timer::{PulseTimer, Sample};
use gbs_common::consts::SEGMENT_SELECT_OFFSET;
use gbs_common::hal::{ClockSynth, DriverDiagnostics, HalError, ScalerDriver};
use gbs_common::regs::{self, Field};
use gbs_common::status::{ModeStatus00, SyncInterrupts, SyncStatus16};

/// Register bus, timebase and pulse input of one scaler board.
pub struct Board {
    driver: Box<dyn ScalerDriver>,
    segment: Option<u8>,
    pulse: PulseTimer,
}

impl Board {
    /// Take ownership of `driver` and route its edge input into the pulse timer.
    pub fn new(mut driver: Box<dyn ScalerDriver>) -> Self {
        let pulse = PulseTimer::new();
        driver.attach(pulse.capture());
        Self {
            driver,
            segment: None,
            pulse,
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn init(&mut self) -> Result<(), HalError> {
        self.segment = None;
        self.driver.init()
    }

    pub fn shutdown(&mut self) -> Result<(), HalError> {
        self.driver.detach();
        self.driver.shutdown()
    }

    pub fn diagnostics(&self) -> Option<DriverDiagnostics> {
        self.driver.diagnostics()
    }

    // ─── Register Access ────────────────────────────────────────────

    fn select(&mut self, segment: u8) -> Result<(), HalError> {
        if self.segment != Some(segment) {
            self.driver.write_bytes(SEGMENT_SELECT_OFFSET, &[segment])?;
            self.segment = Some(segment);
        }
        Ok(())
    }

    /// Forget the cached segment; the next access re-selects.
    ///
    /// Needed after a power loss, when the chip may have dropped the select.
    #[inline]
    pub fn invalidate_segment(&mut self) {
        self.segment = None;
    }

    pub fn read(&mut self, field: Field) -> Result<u16, HalError> {
        self.select(field.segment)?;
        let len = field.byte_len();
        let mut buf = [0u8; 3];
        self.driver.read_bytes(field.offset, &mut buf[..len])?;
        Ok(field.decode(&buf[..len]))
    }

    /// Write a field; byte-aligned fields skip the read-modify-write.
    pub fn write(&mut self, field: Field, value: u16) -> Result<(), HalError> {
        self.select(field.segment)?;
        let len = field.byte_len();
        let mut buf = [0u8; 3];
        if field.shift != 0 || field.width % 8 != 0 {
            self.driver.read_bytes(field.offset, &mut buf[..len])?;
        }
        field.encode(&mut buf[..len], value);
        self.driver.write_bytes(field.offset, &buf[..len])
    }

    /// Write only when the field holds a different value.
    pub fn write_if_changed(&mut self, field: Field, value: u16) -> Result<(), HalError> {
        if self.read(field)? != value & field.max_value() {
            self.write(field, value)?;
        }
        Ok(())
    }

    /// Invert a one-bit field.
    pub fn toggle(&mut self, field: Field) -> Result<(), HalError> {
        let value = self.read(field)?;
        self.write(field, value ^ 1)
    }

    // ─── Status Words ───────────────────────────────────────────────

    pub fn mode_status(&mut self) -> Result<ModeStatus00, HalError> {
        Ok(ModeStatus00::from_bits_truncate(
            self.read(regs::STATUS_00)? as u8,
        ))
    }

    pub fn sync_status(&mut self) -> Result<SyncStatus16, HalError> {
        Ok(SyncStatus16::from_bits_truncate(
            self.read(regs::STATUS_16)? as u8,
        ))
    }

    pub fn interrupts(&mut self) -> Result<SyncInterrupts, HalError> {
        Ok(SyncInterrupts::from_bits_truncate(
            self.read(regs::STATUS_INT)? as u8,
        ))
    }

    /// SOG comparator latched bad sync since the last acknowledge.
    pub fn sog_bad(&mut self) -> Result<bool, HalError> {
        Ok(self.interrupts()?.contains(SyncInterrupts::SOG_BAD))
    }

    // ─── Time ───────────────────────────────────────────────────────

    #[inline]
    pub fn millis(&self) -> u64 {
        self.driver.millis()
    }

    #[inline]
    pub fn micros(&self) -> u64 {
        self.driver.micros()
    }

    #[inline]
    pub fn tick_rate_hz(&self) -> u32 {
        self.driver.tick_rate_hz()
    }

    #[inline]
    pub fn delay_ms(&mut self, ms: u32) {
        self.driver.delay_ms(ms);
    }

    #[inline]
    pub fn delay_us(&mut self, us: u32) {
        self.driver.delay_us(us);
    }

    // ─── Pulse Input ────────────────────────────────────────────────

    /// Capture one edge pair of the pulse currently routed to the debug pin.
    pub fn pulse_sample(&mut self, timeout_us: u64) -> Option<Sample> {
        self.pulse.sample(self.driver.as_mut(), timeout_us)
    }

    /// Period in ticks of the pulse currently routed to the debug pin.
    pub fn pulse_ticks(&mut self, timeout_us: u64) -> Option<u32> {
        self.pulse.pulse_ticks(self.driver.as_mut(), timeout_us)
    }

    // ─── Clock Synthesizer ──────────────────────────────────────────

    /// The external clock synthesizer, when fitted.
    pub fn synth(&mut self) -> Option<&mut dyn ClockSynth> {
        self.driver.clock_synth()
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("driver", &self.driver.name())
            .field("segment", &self.segment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbs_hal::SimulationDriver;

    #[test]
    fn segment_select_is_cached() {
        let sim = SimulationDriver::new();
        let mut board = Board::new(Box::new(sim.clone()));
        board.read(regs::PLLAD_MD).unwrap();
        let selects = board.diagnostics().unwrap().bus_writes;
        board.read(regs::SP_DLT_REG).unwrap();
        board.read(regs::ADC_SOGCTRL).unwrap();
        assert_eq!(board.diagnostics().unwrap().bus_writes, selects);
    }

    #[test]
    fn byte_aligned_write_skips_read() {
        let sim = SimulationDriver::new();
        let mut board = Board::new(Box::new(sim.clone()));
        board.write(regs::ADC_UNUSED_69, 0x6a).unwrap();
        let before = board.diagnostics().unwrap().bus_reads;
        board.write(regs::ADC_UNUSED_69, 0x00).unwrap();
        assert_eq!(board.diagnostics().unwrap().bus_reads, before);
        assert_eq!(sim.peek(regs::ADC_UNUSED_69), 0);
    }

    #[test]
    fn partial_write_keeps_neighbours() {
        let sim = SimulationDriver::new();
        let mut board = Board::new(Box::new(sim.clone()));
        board.write(regs::VDS_HB_ST, 0xABC).unwrap();
        board.write(regs::VDS_HB_SP, 0x123).unwrap();
        assert_eq!(board.read(regs::VDS_HB_ST).unwrap(), 0xABC);
        assert_eq!(board.read(regs::VDS_HB_SP).unwrap(), 0x123);
    }

    #[test]
    fn write_if_changed_is_silent_on_match() {
        let sim = SimulationDriver::new();
        let mut board = Board::new(Box::new(sim.clone()));
        board.write(regs::SP_PRE_COAST, 9).unwrap();
        let writes = sim.write_count();
        board.write_if_changed(regs::SP_PRE_COAST, 9).unwrap();
        assert_eq!(sim.write_count(), writes);
        board.toggle(regs::MD_VS_FLIP).unwrap();
        assert_eq!(sim.peek(regs::MD_VS_FLIP), 1);
    }
}
