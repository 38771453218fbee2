//! Simulation driver implementation.
//!
//! The `SimulationDriver` implements `ScalerDriver` on top of a virtual
//! clock: bus accesses and delays advance simulated time instead of
//! sleeping, and edges of the selected debug pulse are delivered to an
//! attached capture as simulated time passes them.
//!
//! The driver is a cheap handle; clones share the same board, so a test can
//! keep one to steer the source while the controller owns another.

use super::model::{AsicModel, SignalContext, WriteRecord};
use super::source::SignalSource;
use super::synth::SimSynth;
use gbs_common::hal::driver::{
    ClockSynth, DriverDiagnostics, HalError, PulseInput, RegisterBus, ScalerDriver, Timebase,
};
use gbs_common::hal::pulse::PulseCapture;
use gbs_common::regs::Field;
use gbs_common::status::SynthStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Simulated time consumed by one bus transaction.
const BUS_LATENCY_US: u64 = 50;

#[derive(Debug)]
struct SimState {
    now_us: u64,
    model: AsicModel,
    source: SignalSource,
    synth: SimSynth,
    capture: Option<Arc<PulseCapture>>,
    diagnostics: DriverDiagnostics,
    initialized: bool,
}

impl SimState {
    fn advance(&mut self, us: u64) {
        let start = self.now_us;
        self.now_us = self.now_us.saturating_add(us);

        let Some(capture) = self.capture.as_ref() else {
            return;
        };
        if !capture.is_armed() {
            return;
        }
        let ctx = SignalContext {
            source: &self.source,
            synth: &self.synth,
            now_us: start,
        };
        let Some(period) = self.model.pulse_period_us(&ctx) else {
            return;
        };
        if period <= 0.0 {
            return;
        }

        let mut k = (start as f64 / period).floor() + 1.0;
        while capture.is_armed() {
            let edge = k * period;
            if edge > self.now_us as f64 {
                break;
            }
            capture.on_edge(edge.floor() as u64 as u32);
            self.diagnostics.edges_delivered += 1;
            k += 1.0;
        }
    }
}

/// Simulated scaler board implementing the `ScalerDriver` trait.
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    state: Arc<Mutex<SimState>>,
    synth_port: SimSynthPort,
}

/// Bus handle for the simulated clock synthesizer.
#[derive(Debug, Clone)]
pub struct SimSynthPort {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulationDriver {
    /// Create a powered board with no source connected and a synthesizer fitted.
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(SimState {
            now_us: 0,
            model: AsicModel::new(),
            source: SignalSource::none(),
            synth: SimSynth::new(true),
            capture: None,
            diagnostics: DriverDiagnostics::default(),
            initialized: false,
        }));
        Self {
            synth_port: SimSynthPort {
                state: Arc::clone(&state),
            },
            state,
        }
    }

    /// Builder: connect `source`.
    pub fn with_source(self, source: SignalSource) -> Self {
        self.set_source(source);
        self
    }

    /// Builder: fit or remove the clock synthesizer.
    pub fn with_synth_fitted(self, fitted: bool) -> Self {
        lock(&self.state).synth = SimSynth::new(fitted);
        self
    }

    /// Replace the connected source.
    pub fn set_source(&self, source: SignalSource) {
        debug!(standard = %source.standard, present = source.present, "Simulated source changed");
        lock(&self.state).source = source;
    }

    /// Current source.
    pub fn source(&self) -> SignalSource {
        lock(&self.state).source.clone()
    }

    /// Cut or restore board power.
    pub fn set_powered(&self, powered: bool) {
        lock(&self.state).model.set_powered(powered);
    }

    /// Force the output display clock regardless of the clock selector.
    pub fn set_display_clock_hz(&self, hz: Option<f64>) {
        lock(&self.state).model.set_display_clock_override(hz);
    }

    /// Make synthesizer lock attempts fail.
    pub fn set_synth_lock_fails(&self, fails: bool) {
        lock(&self.state).synth.set_lock_fails(fails);
    }

    /// Frequency programmed into the synthesizer.
    pub fn synth_frequency_hz(&self) -> u32 {
        lock(&self.state).synth.frequency_hz()
    }

    /// Synthesizer output enabled.
    pub fn synth_output_enabled(&self) -> bool {
        lock(&self.state).synth.output_enabled()
    }

    /// Number of PLL soft resets.
    pub fn synth_pll_resets(&self) -> u32 {
        lock(&self.state).synth.pll_resets()
    }

    /// Every frequency programmed into the synthesizer.
    pub fn synth_programmed(&self) -> Vec<u32> {
        lock(&self.state).synth.programmed().to_vec()
    }

    /// Register value without advancing time or refreshing status.
    pub fn peek(&self, field: Field) -> u16 {
        lock(&self.state).model.peek(field)
    }

    /// Set a register value without bus traffic.
    pub fn poke(&self, field: Field, value: u16) {
        lock(&self.state).model.poke(field, value);
    }

    /// Number of bytes written over the bus so far.
    pub fn write_count(&self) -> usize {
        lock(&self.state).model.write_log().len()
    }

    /// Bytes written since index `from`.
    pub fn writes_since(&self, from: usize) -> Vec<WriteRecord> {
        let state = lock(&self.state);
        state.model.write_log().get(from..).unwrap_or_default().to_vec()
    }

    /// Values written to a single-byte field, in order.
    pub fn field_history(&self, field: Field) -> Vec<u16> {
        lock(&self.state).model.field_history(field)
    }

    /// Current simulated time in microseconds.
    pub fn now_us(&self) -> u64 {
        lock(&self.state).now_us
    }
}

impl Default for SimulationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimulationDriver {
    fn write_bytes(&mut self, offset: u8, data: &[u8]) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        state.model.write(offset, data);
        state.diagnostics.bus_writes += data.len() as u64;
        Ok(())
    }

    fn read_bytes(&mut self, offset: u8, buf: &mut [u8]) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        let SimState {
            now_us,
            model,
            source,
            synth,
            diagnostics,
            ..
        } = &mut *state;
        let ctx = SignalContext {
            source,
            synth,
            now_us: *now_us,
        };
        model.read(offset, buf, &ctx);
        diagnostics.bus_reads += buf.len() as u64;
        Ok(())
    }
}

impl Timebase for SimulationDriver {
    fn micros(&self) -> u64 {
        lock(&self.state).now_us
    }

    fn delay_us(&mut self, us: u32) {
        lock(&self.state).advance(u64::from(us));
    }
}

impl PulseInput for SimulationDriver {
    fn attach(&mut self, capture: Arc<PulseCapture>) {
        lock(&self.state).capture = Some(capture);
    }

    fn detach(&mut self) {
        lock(&self.state).capture = None;
    }
}

impl ScalerDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn init(&mut self) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        info!(
            source = %state.source.standard,
            synth_fitted = state.synth.fitted(),
            "Initializing simulation driver"
        );
        state.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        info!("Shutting down simulation driver");
        state.capture = None;
        state.initialized = false;
        Ok(())
    }

    fn clock_synth(&mut self) -> Option<&mut dyn ClockSynth> {
        if lock(&self.state).synth.fitted() {
            Some(&mut self.synth_port)
        } else {
            None
        }
    }

    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        Some(lock(&self.state).diagnostics.clone())
    }
}

impl ClockSynth for SimSynthPort {
    fn probe(&mut self) -> Result<bool, HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        Ok(state.synth.fitted())
    }

    fn status(&mut self) -> Result<SynthStatus, HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        let now = state.now_us;
        Ok(state.synth.status(now))
    }

    fn clear_sticky(&mut self) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        state.synth.clear_sticky();
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US * 4);
        let now = state.now_us;
        state.synth.set_frequency(hz, now);
        Ok(())
    }

    fn enable_output(&mut self, enable: bool) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        state.synth.enable_output(enable);
        Ok(())
    }

    fn reset_pll(&mut self) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        state.advance(BUS_LATENCY_US);
        let now = state.now_us;
        state.synth.reset_pll(now);
        Ok(())
    }
}
