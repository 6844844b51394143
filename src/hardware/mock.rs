//! Mock Hardware Implementations
//!
//! Provides simulated hardware for testing and dry runs without a lab bench.
//! All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep), so tests running on a paused tokio clock see
//! deterministic timing.
//!
//! # Available Mocks
//!
//! - `MockSourceMeter` - single-diode photovoltaic cell behind a source-meter
//! - `MockStage` - substrate stage that records every move
//! - `MockSwitchMatrix` - relay board that records every connection
//! - `MockHardwareFactory` - hands the above to the acquisition engine
//!
//! Every mock is cheaply cloneable; clones share state so a test can keep one
//! handle for inspection while the engine owns the other.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{
    HardwareFactory, HardwareSweep, Output, OutputStatus, SourceMeter, SourceMode,
    SubstrateStage, SwitchMatrix,
};

// =============================================================================
// Diode model
// =============================================================================

/// Single-diode model of an illuminated solar cell.
///
/// Current is reported the way a source-meter sees it (sink convention):
/// `I(V) = I0·(exp(V/nVt) − 1) − Iph`, so photocurrent reads negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiodeModel {
    /// Photogenerated current in amperes (0 for a dark or missing device)
    pub photocurrent: f64,
    /// Reverse saturation current in amperes
    pub saturation_current: f64,
    /// Ideality factor times thermal voltage, in volts
    pub thermal_voltage: f64,
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self {
            photocurrent: 2.2e-3,
            saturation_current: 1e-12,
            thermal_voltage: 0.035,
        }
    }
}

impl DiodeModel {
    /// A device that produces no photocurrent.
    pub fn dark() -> Self {
        Self {
            photocurrent: 0.0,
            ..Self::default()
        }
    }

    /// Terminal current at a forced voltage.
    pub fn current_at(&self, voltage: f64) -> f64 {
        self.saturation_current * ((voltage / self.thermal_voltage).exp() - 1.0)
            - self.photocurrent
    }

    /// Terminal voltage at a forced current.
    pub fn voltage_at(&self, current: f64) -> f64 {
        let arg = (current + self.photocurrent) / self.saturation_current + 1.0;
        if arg <= 0.0 {
            return 0.0;
        }
        self.thermal_voltage * arg.ln()
    }
}

// =============================================================================
// MockSourceMeter - Simulated Source-Measure Unit
// =============================================================================

#[derive(Debug)]
struct SmuState {
    mode: SourceMode,
    output_on: bool,
    voltage_limit: f64,
    current_limit: f64,
    voltage: f64,
    current: f64,
    reads: usize,
    sweep_buffer: Option<(Vec<f64>, Vec<f64>)>,
}

impl Default for SmuState {
    fn default() -> Self {
        Self {
            mode: SourceMode::Voltage,
            output_on: false,
            voltage_limit: 100.0,
            current_limit: 1.0,
            voltage: 0.0,
            current: 0.0,
            reads: 0,
            sweep_buffer: None,
        }
    }
}

#[derive(Debug, Default)]
struct CommandLog {
    voltages: Vec<f64>,
    on_calls: usize,
    off_calls: usize,
    limits: Vec<(Option<f64>, Option<f64>)>,
    sweeps: Vec<(f64, f64, f64, Option<f64>)>,
}

/// Mock source-meter backed by a [`DiodeModel`]
///
/// Simulates a Keithley 2400 class instrument with:
/// - Voltage and current source modes
/// - Protection limits with compliance clamping
/// - Configurable I/O latency per command (1 ms default)
/// - Optional instrument-internal sweep
/// - Fault injection: fail every read after N successful ones
///
/// # Example
///
/// ```rust,ignore
/// let smu = MockSourceMeter::new();
/// smu.set_output(Output::Voltage(0.0)).await?;
/// let (_, current) = smu.read_values().await?;
/// assert!(current < 0.0); // photocurrent in sink convention
/// ```
#[derive(Clone)]
pub struct MockSourceMeter {
    model: DiodeModel,
    latency: Duration,
    hardware_sweep: bool,
    fail_after_reads: Option<usize>,
    state: Arc<RwLock<SmuState>>,
    log: Arc<Mutex<CommandLog>>,
}

impl MockSourceMeter {
    /// Create a mock with the default illuminated cell
    pub fn new() -> Self {
        Self::with_model(DiodeModel::default())
    }

    /// Create a mock with a specific device model
    pub fn with_model(model: DiodeModel) -> Self {
        Self {
            model,
            latency: Duration::from_millis(1),
            hardware_sweep: false,
            fail_after_reads: None,
            state: Arc::new(RwLock::new(SmuState::default())),
            log: Arc::new(Mutex::new(CommandLog::default())),
        }
    }

    /// Set the simulated per-command I/O latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Expose the instrument-internal sweep capability
    pub fn with_hardware_sweep(mut self) -> Self {
        self.hardware_sweep = true;
        self
    }

    /// Fail every read after `reads` successful ones
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    /// Voltages passed to `set_output`, in call order
    pub fn voltage_log(&self) -> Vec<f64> {
        self.log.lock().map(|l| l.voltages.clone()).unwrap_or_default()
    }

    /// Number of `on()` calls
    pub fn on_count(&self) -> usize {
        self.log.lock().map(|l| l.on_calls).unwrap_or_default()
    }

    /// Number of `off()` calls
    pub fn off_count(&self) -> usize {
        self.log.lock().map(|l| l.off_calls).unwrap_or_default()
    }

    /// Limits passed to `set_limit`, in call order
    pub fn limit_log(&self) -> Vec<(Option<f64>, Option<f64>)> {
        self.log.lock().map(|l| l.limits.clone()).unwrap_or_default()
    }

    /// Hardware sweeps requested as `(start, end, step, aux)`
    pub fn sweep_log(&self) -> Vec<(f64, f64, f64, Option<f64>)> {
        self.log.lock().map(|l| l.sweeps.clone()).unwrap_or_default()
    }

    /// Number of successful `read_values` calls
    pub async fn read_count(&self) -> usize {
        self.state.read().await.reads
    }

    /// Whether the output stage is enabled
    pub async fn is_on(&self) -> bool {
        self.state.read().await.output_on
    }

    async fn io_delay(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    fn record<F: FnOnce(&mut CommandLog)>(&self, f: F) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

impl Default for MockSourceMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceMeter for MockSourceMeter {
    async fn set_mode(&self, mode: SourceMode) -> Result<()> {
        self.io_delay().await;
        self.state.write().await.mode = mode;
        debug!("MockSourceMeter: SOUR:FUNC {}", mode);
        Ok(())
    }

    async fn set_limit(&self, voltage: Option<f64>, current: Option<f64>) -> Result<()> {
        self.io_delay().await;
        let mut state = self.state.write().await;
        if let Some(v) = voltage {
            state.voltage_limit = v.abs();
        }
        if let Some(i) = current {
            state.current_limit = i.abs();
        }
        self.record(|l| l.limits.push((voltage, current)));
        Ok(())
    }

    async fn set_output(&self, output: Output) -> Result<OutputStatus> {
        self.io_delay().await;
        let mut state = self.state.write().await;
        if state.mode != output.mode() {
            state.mode = output.mode();
        }

        let requested = output.level();
        let limit = match output {
            Output::Voltage(_) => state.voltage_limit,
            Output::Current(_) => state.current_limit,
        };
        let applied = requested.clamp(-limit, limit);

        match output {
            Output::Voltage(_) => {
                state.voltage = applied;
                self.record(|l| l.voltages.push(requested));
            }
            Output::Current(_) => state.current = applied,
        }

        if applied != requested {
            Ok(OutputStatus::Clamped { requested, applied })
        } else {
            Ok(OutputStatus::Applied)
        }
    }

    async fn read_values(&self) -> Result<(f64, f64)> {
        self.io_delay().await;
        let mut state = self.state.write().await;
        if let Some(limit) = self.fail_after_reads {
            if state.reads >= limit {
                bail!("MockSourceMeter: VISA read timeout after {} reads", limit);
            }
        }
        state.reads += 1;

        if !state.output_on {
            return Ok((0.0, 0.0));
        }

        let reading = match state.mode {
            SourceMode::Voltage => {
                let current = self
                    .model
                    .current_at(state.voltage)
                    .clamp(-state.current_limit, state.current_limit);
                (state.voltage, current)
            }
            SourceMode::Current => {
                let voltage = self
                    .model
                    .voltage_at(state.current)
                    .clamp(-state.voltage_limit, state.voltage_limit);
                (voltage, state.current)
            }
        };
        Ok(reading)
    }

    async fn on(&self) -> Result<()> {
        self.io_delay().await;
        self.state.write().await.output_on = true;
        self.record(|l| l.on_calls += 1);
        Ok(())
    }

    async fn off(&self) -> Result<()> {
        self.io_delay().await;
        self.state.write().await.output_on = false;
        self.record(|l| l.off_calls += 1);
        debug!("MockSourceMeter: OUTP OFF");
        Ok(())
    }

    fn hardware_sweep(&self) -> Option<&dyn HardwareSweep> {
        if self.hardware_sweep {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl HardwareSweep for MockSourceMeter {
    async fn sweep(&self, start: f64, end: f64, step: f64, aux: Option<f64>) -> Result<()> {
        if step == 0.0 || (end - start) * step < 0.0 {
            bail!("MockSourceMeter: invalid sweep {} -> {} step {}", start, end, step);
        }
        self.io_delay().await;
        let mut state = self.state.write().await;
        let points = ((end - start) / step).round() as usize + 1;
        let voltages: Vec<f64> = (0..points)
            .map(|k| (start + k as f64 * step).clamp(-state.voltage_limit, state.voltage_limit))
            .collect();
        let currents = voltages
            .iter()
            .map(|&v| {
                self.model
                    .current_at(v)
                    .clamp(-state.current_limit, state.current_limit)
            })
            .collect();
        state.sweep_buffer = Some((voltages, currents));
        self.record(|l| l.sweeps.push((start, end, step, aux)));
        Ok(())
    }

    async fn read_sweep_values(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        self.io_delay().await;
        let mut state = self.state.write().await;
        if let Some(limit) = self.fail_after_reads {
            if state.reads >= limit {
                bail!("MockSourceMeter: sweep buffer read failed");
            }
        }
        state.reads += 1;
        state
            .sweep_buffer
            .take()
            .ok_or_else(|| anyhow!("MockSourceMeter: no sweep data buffered"))
    }
}

// =============================================================================
// MockStage - Simulated Substrate Stage
// =============================================================================

/// A recorded stage move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMove {
    /// Moved to the centre of a substrate
    Substrate(u32),
    /// Moved to a device of a substrate
    Device(u32, u32),
    /// Moved to the parking position
    Park,
}

/// Mock substrate stage
///
/// Records every move and takes `move_time` per move (20 ms default).
#[derive(Clone)]
pub struct MockStage {
    moves: Arc<Mutex<Vec<StageMove>>>,
    released: Arc<Mutex<bool>>,
    move_time: Duration,
}

impl MockStage {
    /// Create new mock stage at the origin
    pub fn new() -> Self {
        Self {
            moves: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(false)),
            move_time: Duration::from_millis(20),
        }
    }

    /// Create mock stage with a custom per-move duration
    pub fn with_move_time(move_time: Duration) -> Self {
        Self {
            move_time,
            ..Self::new()
        }
    }

    /// Every move so far, in order
    pub fn moves(&self) -> Vec<StageMove> {
        self.moves.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Whether `release` was called
    pub fn is_released(&self) -> bool {
        self.released.lock().map(|r| *r).unwrap_or(false)
    }

    async fn travel(&self, target: StageMove) {
        debug!("MockStage: moving to {:?}", target);
        sleep(self.move_time).await;
        if let Ok(mut moves) = self.moves.lock() {
            moves.push(target);
        }
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubstrateStage for MockStage {
    async fn move_to_substrate(&self, substrate: u32) -> Result<()> {
        self.travel(StageMove::Substrate(substrate)).await;
        Ok(())
    }

    async fn move_to_device(&self, substrate: u32, device: u32) -> Result<()> {
        self.travel(StageMove::Device(substrate, device)).await;
        Ok(())
    }

    async fn park(&self) -> Result<()> {
        self.travel(StageMove::Park).await;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if let Ok(mut released) = self.released.lock() {
            *released = true;
        }
        Ok(())
    }
}

// =============================================================================
// MockSwitchMatrix - Simulated Relay Board
// =============================================================================

/// Mock switch matrix that records every `(row, col)` connection
#[derive(Clone, Default)]
pub struct MockSwitchMatrix {
    connections: Arc<Mutex<Vec<(u32, u32)>>>,
    released: Arc<Mutex<bool>>,
}

impl MockSwitchMatrix {
    /// Create a new relay board with all relays open
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection so far, in order
    pub fn connections(&self) -> Vec<(u32, u32)> {
        self.connections.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Whether `release` was called
    pub fn is_released(&self) -> bool {
        self.released.lock().map(|r| *r).unwrap_or(false)
    }
}

#[async_trait]
impl SwitchMatrix for MockSwitchMatrix {
    async fn connect(&self, row: u32, col: u32) -> Result<()> {
        debug!("MockSwitchMatrix: connect ({}, {})", row, col);
        if let Ok(mut connections) = self.connections.lock() {
            connections.push((row, col));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if let Ok(mut released) = self.released.lock() {
            *released = true;
        }
        Ok(())
    }
}

// =============================================================================
// MockHardwareFactory
// =============================================================================

/// Factory handing mock hardware to the acquisition engine
///
/// Each `source_meter()` call returns a clone of the same [`MockSourceMeter`],
/// so the test keeps full visibility into what the engine did.
#[derive(Clone)]
pub struct MockHardwareFactory {
    source_meter: MockSourceMeter,
    resource: String,
    stage: Option<MockStage>,
    switch_matrix: Option<MockSwitchMatrix>,
    unreachable: bool,
}

impl MockHardwareFactory {
    /// Factory with only a source-meter (single hard-wired device)
    pub fn new(source_meter: MockSourceMeter) -> Self {
        Self {
            source_meter,
            resource: "GPIB0::24::INSTR".to_string(),
            stage: None,
            switch_matrix: None,
            unreachable: false,
        }
    }

    /// Name the VISA resource the source-meter stands in for
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Add a positioning stage
    pub fn with_stage(mut self, stage: MockStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Add a switch matrix
    pub fn with_switch_matrix(mut self, switch_matrix: MockSwitchMatrix) -> Self {
        self.switch_matrix = Some(switch_matrix);
        self
    }

    /// Make `source_meter()` fail as if the VISA resource were missing
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// The shared source-meter handle
    pub fn source_meter_handle(&self) -> &MockSourceMeter {
        &self.source_meter
    }
}

#[async_trait]
impl HardwareFactory for MockHardwareFactory {
    async fn source_meter(&self) -> Result<Box<dyn SourceMeter>> {
        if self.unreachable {
            bail!("VISA resource {} not found", self.resource);
        }
        debug!(resource = %self.resource, "MockHardwareFactory: source-meter acquired");
        Ok(Box::new(self.source_meter.clone()))
    }

    async fn stage(&self) -> Result<Option<Box<dyn SubstrateStage>>> {
        Ok(self
            .stage
            .clone()
            .map(|s| Box::new(s) as Box<dyn SubstrateStage>))
    }

    async fn switch_matrix(&self) -> Result<Option<Box<dyn SwitchMatrix>>> {
        Ok(self
            .switch_matrix
            .clone()
            .map(|s| Box::new(s) as Box<dyn SwitchMatrix>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diode_model_is_self_consistent() {
        let model = DiodeModel::default();
        let voc = model.voltage_at(0.0);
        assert!(voc > 0.6 && voc < 0.9, "unexpected Voc {voc}");
        assert!(model.current_at(voc).abs() < 1e-9);
        assert!((model.current_at(0.0) + model.photocurrent).abs() < 1e-15);
    }

    #[test]
    fn dark_device_has_no_open_circuit_voltage() {
        let model = DiodeModel::dark();
        assert_eq!(model.voltage_at(0.0), 0.0);
        assert_eq!(model.current_at(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_compliance_clamp_reported() {
        let smu = MockSourceMeter::new();
        smu.set_limit(Some(20.0), Some(1.0)).await.unwrap();
        let status = smu.set_output(Output::Voltage(25.0)).await.unwrap();
        assert_eq!(
            status,
            OutputStatus::Clamped {
                requested: 25.0,
                applied: 20.0
            }
        );
        assert!(!smu.set_output(Output::Voltage(0.5)).await.unwrap().is_clamped());
    }

    #[tokio::test]
    async fn test_reads_zero_while_off() {
        let smu = MockSourceMeter::new();
        smu.set_output(Output::Voltage(0.0)).await.unwrap();
        assert_eq!(smu.read_values().await.unwrap(), (0.0, 0.0));
        smu.on().await.unwrap();
        let (_, current) = smu.read_values().await.unwrap();
        assert!(current < 0.0);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let smu = MockSourceMeter::new().failing_after(1);
        smu.on().await.unwrap();
        assert!(smu.read_values().await.is_ok());
        assert!(smu.read_values().await.is_err());
        assert_eq!(smu.read_count().await, 1);
    }

    #[tokio::test]
    async fn test_hardware_sweep_buffer() {
        let smu = MockSourceMeter::new().with_hardware_sweep();
        let sweep = smu.hardware_sweep().expect("sweep capability");
        sweep.sweep(1.0, 0.0, -0.5, Some(0.2)).await.unwrap();
        let (v, i) = sweep.read_sweep_values().await.unwrap();
        assert_eq!(v, vec![1.0, 0.5, 0.0]);
        assert_eq!(i.len(), 3);
        assert!(sweep.read_sweep_values().await.is_err());
        assert_eq!(smu.sweep_log(), vec![(1.0, 0.0, -0.5, Some(0.2))]);
    }

    #[tokio::test]
    async fn test_factory_shares_handles() {
        let smu = MockSourceMeter::new();
        let factory = MockHardwareFactory::new(smu.clone()).with_stage(MockStage::new());
        let owned = factory.source_meter().await.unwrap();
        owned.on().await.unwrap();
        owned.off().await.unwrap();
        assert_eq!(smu.on_count(), 1);
        assert_eq!(smu.off_count(), 1);
        assert!(factory.stage().await.unwrap().is_some());
        assert!(factory.switch_matrix().await.unwrap().is_none());
        assert!(MockHardwareFactory::new(MockSourceMeter::new())
            .unreachable()
            .source_meter()
            .await
            .is_err());
    }
}
