//! Simulated board integration tests.
//!
//! Drives the simulation driver purely through the `ScalerDriver` trait
//! object returned by the registry, the way the controller does.

use gbs_common::consts::SEGMENT_SELECT_OFFSET;
use gbs_common::hal::{PulseCapture, ScalerDriver};
use gbs_common::regs;
use gbs_common::status::{SyncStatus16, SynthStatus};
use gbs_hal::drivers::simulation;
use gbs_hal::{DriverRegistry, SignalSource, SimulationDriver};
use std::sync::Arc;

fn read_field(driver: &mut dyn ScalerDriver, field: regs::Field) -> u16 {
    driver
        .write_bytes(SEGMENT_SELECT_OFFSET, &[field.segment])
        .unwrap();
    let mut buf = [0u8; 3];
    let len = field.byte_len();
    driver.read_bytes(field.offset, &mut buf[..len]).unwrap();
    field.decode(&buf[..len])
}

fn write_field(driver: &mut dyn ScalerDriver, field: regs::Field, value: u16) {
    driver
        .write_bytes(SEGMENT_SELECT_OFFSET, &[field.segment])
        .unwrap();
    let mut buf = [0u8; 3];
    let len = field.byte_len();
    driver.read_bytes(field.offset, &mut buf[..len]).unwrap();
    field.encode(&mut buf[..len], value);
    driver.write_bytes(field.offset, &buf[..len]).unwrap();
}

#[test]
fn test_registry_driver_is_usable_trait_object() {
    let registry = DriverRegistry::with_builtin_drivers();
    let mut driver = registry.create_driver(simulation::NAME).unwrap();
    driver.init().unwrap();
    assert_eq!(driver.name(), "simulation");

    write_field(driver.as_mut(), regs::ADC_UNUSED_69, 0x6a);
    assert_eq!(read_field(driver.as_mut(), regs::ADC_UNUSED_69), 0x6a);
    driver.shutdown().unwrap();
}

#[test]
fn test_source_on_other_input_is_invisible() {
    let sim = SimulationDriver::new().with_source(
        SignalSource::ntsc_480i().on_port(gbs_common::video::InputPort::Component),
    );
    let mut driver: Box<dyn ScalerDriver> = Box::new(sim);

    let s16 = SyncStatus16::from_bits_truncate(read_field(driver.as_mut(), regs::STATUS_16) as u8);
    assert!(!s16.hs_active());

    write_field(driver.as_mut(), regs::ADC_INPUT_SEL, 0);
    let s16 = SyncStatus16::from_bits_truncate(read_field(driver.as_mut(), regs::STATUS_16) as u8);
    assert!(s16.hs_active());
}

#[test]
fn test_source_field_pulse_on_mode_detect_bus() {
    let sim = SimulationDriver::new().with_source(SignalSource::pal_576i());
    let mut driver: Box<dyn ScalerDriver> = Box::new(sim);
    write_field(driver.as_mut(), regs::TEST_BUS_SEL, 0);
    write_field(driver.as_mut(), regs::PAD_BOUT_EN, 1);

    let capture = Arc::new(PulseCapture::new());
    driver.attach(Arc::clone(&capture));
    capture.arm();
    driver.delay_ms(50);
    let (start, stop) = capture.snapshot().expect("two edges within 50 ms");
    assert_eq!(stop.wrapping_sub(start), 20_000);
    driver.detach();
}

#[test]
fn test_external_clock_drives_output_only_when_locked() {
    let sim = SimulationDriver::new();
    let probe = sim.clone();
    let mut driver: Box<dyn ScalerDriver> = Box::new(sim);

    write_field(driver.as_mut(), regs::PLL648_CONTROL_01, 0x75);
    write_field(driver.as_mut(), regs::VDS_HSYNC_RST, 1716);
    write_field(driver.as_mut(), regs::VDS_VSYNC_RST, 525);
    {
        let synth = driver.clock_synth().expect("synth fitted");
        synth.set_frequency(54_000_000).unwrap();
        synth.enable_output(true).unwrap();
        assert!(synth.status().unwrap().contains(SynthStatus::LOL_A));
    }
    driver.delay_ms(20);
    assert!(driver.clock_synth().unwrap().status().unwrap().is_locked());
    assert_eq!(probe.synth_frequency_hz(), 54_000_000);
}
