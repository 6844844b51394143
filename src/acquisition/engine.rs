//! Acquisition orchestrator.
//!
//! [`AcquisitionEngine`] runs one measurement campaign at a time on a
//! background tokio task. The caller only issues `start`/`stop` and reads the
//! typed event channel; the worker owns every hardware handle and the session
//! for the run's duration.
//!
//! # Run sequence
//!
//! ```text
//! start ─> Activating   acquire SMU (+ stage, switch), limit 20 V / 1 A, output on
//!       ─> for each active cell, in visit order:
//!            SweepingDevice  per sub-device: position, route, forward + backward sweep,
//!                            extract, emit "<id>_forward" / "<id>_backward"
//!            Tracking        optional, on the sub-device with the largest forward MPP
//!       ─> Completing   output off, park + release stage, release switch
//!       ─> Idle         "System: ready", Finished(report)
//! ```
//!
//! `Completing` runs on every exit path. A raised [`StopFlag`] is polled
//! between voltage steps and tracking ticks and unwinds through `Stopping`;
//! any other error unwinds through `Failed` and aborts the remaining devices
//! while keeping the results already emitted.
//!
//! # Example
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let engine = AcquisitionEngine::new(MockHardwareFactory::new(MockSourceMeter::new()), tx);
//!
//! engine.start(AcquisitionRequest {
//!     parameters,
//!     layout: SubstrateGrid::single_row(&["cell-A"])?,
//!     settings: MeasurementSettings::default(),
//! })?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let AcquisitionEvent::Finished(report) = event {
//!         println!("{} results", report.session.len());
//!         break;
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::{
    AcquisitionEvent, CellEvent, CellProgress, ErrorEvent, ResultEvent, RunOutcome, RunReport,
    StatusEvent,
};
use super::layout::{CellPosition, SubstrateGrid};
use super::parameters::AcquisitionParameters;
use super::session::Session;
use super::state::AcquisitionState;
use crate::cancellation::StopFlag;
use crate::error::{AppResult, DaqError, ErrorKind};
use crate::hardware::{
    HardwareFactory, HardwareSweep, Output, OutputStatus, SourceMeter, SourceMode,
    SubstrateStage, SwitchMatrix, SAFETY_CURRENT_LIMIT, SAFETY_VOLTAGE_LIMIT,
};
use crate::measurement::{
    extract_performance, sweep_voltage, track_max_power_point, JvCurve, MeasurementSettings,
    PerformanceRecord, SweepDirection,
};

/// Everything a run needs besides hardware.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    /// Sweep and tracking parameters
    pub parameters: AcquisitionParameters,
    /// Which devices to measure, and in what order
    pub layout: SubstrateGrid,
    /// Irradiance-derived input power and sign convention
    pub settings: MeasurementSettings,
}

impl AcquisitionRequest {
    /// Check the request before any hardware is touched.
    pub fn validate(&self) -> AppResult<()> {
        self.parameters.validate()?;
        if self.layout.active_cells().is_empty() {
            return Err(DaqError::Validation(
                "layout has no active, labelled devices".to_string(),
            ));
        }
        if !self.settings.power_in.is_finite() || self.settings.power_in < 0.0 {
            return Err(DaqError::Validation(format!(
                "incident power must be a non-negative number, got {}",
                self.settings.power_in
            )));
        }
        Ok(())
    }
}

/// Event channel plus the shared state snapshot.
#[derive(Clone)]
struct EventSink {
    tx: mpsc::UnboundedSender<AcquisitionEvent>,
    state: Arc<watch::Sender<AcquisitionState>>,
}

impl EventSink {
    fn emit(&self, event: AcquisitionEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.tx.send(event);
    }

    fn set_state(&self, state: AcquisitionState) {
        let previous = self.state.send_replace(state);
        debug!(from = %previous, to = %state, "State transition");
        self.emit(AcquisitionEvent::State(state));
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(AcquisitionEvent::Status(StatusEvent::now(message)));
    }

    fn cell(&self, cell: &CellPosition, progress: CellProgress) {
        self.emit(AcquisitionEvent::Cell(CellEvent {
            row: cell.row,
            col: cell.col,
            substrate: cell.substrate,
            progress,
        }));
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.emit(AcquisitionEvent::Error(ErrorEvent {
            kind,
            message: message.into(),
        }));
    }
}

/// Background J-V acquisition engine.
///
/// One run at a time; `start` while a run is active returns
/// [`DaqError::AlreadyRunning`]. Dropping the engine requests a stop of the
/// active run, which still tears down cleanly.
pub struct AcquisitionEngine {
    factory: Arc<dyn HardwareFactory>,
    events: EventSink,
    stop: StopFlag,
    worker: Mutex<Option<JoinHandle<RunReport>>>,
}

impl AcquisitionEngine {
    /// Create an idle engine.
    ///
    /// # Arguments
    ///
    /// * `factory` - Acquires the hardware when a run activates
    /// * `events` - Receives every event of every run
    pub fn new<F>(factory: F, events: mpsc::UnboundedSender<AcquisitionEvent>) -> Self
    where
        F: HardwareFactory + 'static,
    {
        let (state, _) = watch::channel(AcquisitionState::Idle);
        Self {
            factory: Arc::new(factory),
            events: EventSink {
                tx: events,
                state: Arc::new(state),
            },
            stop: StopFlag::new(),
            worker: Mutex::new(None),
        }
    }

    /// Current engine state.
    pub fn state(&self) -> AcquisitionState {
        *self.events.state.borrow()
    }

    /// True while a run is active.
    pub fn is_running(&self) -> bool {
        !self.state().can_begin()
    }

    /// Validate `request` and launch a run on a background task.
    ///
    /// Returns the run id. Validation failures are returned (and reported as an
    /// error event) without touching hardware.
    ///
    /// # Errors
    ///
    /// - [`DaqError::AlreadyRunning`] if a run is active
    /// - [`DaqError::VoltageRange`] / [`DaqError::Validation`] for bad input
    pub fn start(&self, request: AcquisitionRequest) -> AppResult<Uuid> {
        if !self.state().can_begin() {
            return Err(DaqError::AlreadyRunning);
        }
        if let Err(err) = request.validate() {
            warn!("Acquisition rejected: {}", err);
            self.events.error(err.kind(), err.to_string());
            return Err(err);
        }

        let claimed = self.events.state.send_if_modified(|state| {
            if state.can_begin() {
                *state = AcquisitionState::Activating;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(DaqError::AlreadyRunning);
        }
        self.stop.reset();

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            label = %request.parameters.device_label,
            devices = request.layout.active_cells().len(),
            "Starting acquisition"
        );
        self.events.emit(AcquisitionEvent::ControlsEnabled(false));
        self.events
            .emit(AcquisitionEvent::State(AcquisitionState::Activating));

        let worker = Worker {
            run_id,
            factory: Arc::clone(&self.factory),
            request,
            events: self.events.clone(),
            stop: self.stop.clone(),
        };
        let handle = tokio::spawn(worker.run());
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(handle);
        }
        Ok(run_id)
    }

    /// Request a cooperative stop of the active run.
    ///
    /// Returns `true` if this call raised the stop flag. A no-op when idle or
    /// when a stop is already pending.
    pub fn stop(&self) -> bool {
        if !self.state().can_stop() {
            debug!("Stop ignored: engine idle");
            return false;
        }
        let raised = self.stop.trigger("stop requested");
        if raised {
            info!("Stop requested");
        }
        raised
    }

    /// Wait for the active run to end and return its report.
    ///
    /// `None` if no run was started since the last `wait`.
    pub async fn wait(&self) -> Option<RunReport> {
        let handle = self.worker.lock().ok().and_then(|mut slot| slot.take())?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Acquisition worker terminated abnormally: {}", e);
                self.events.state.send_replace(AcquisitionState::Idle);
                None
            }
        }
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        if self.state().can_stop() {
            self.stop.trigger("engine dropped");
        }
    }
}

/// Hardware owned by a run. Every handle is taken exactly once in teardown.
#[derive(Default)]
struct Rig {
    smu: Option<Box<dyn SourceMeter>>,
    stage: Option<Box<dyn SubstrateStage>>,
    switch: Option<Box<dyn SwitchMatrix>>,
}

impl Rig {
    fn smu(&self) -> AppResult<&dyn SourceMeter> {
        self.smu
            .as_deref()
            .ok_or_else(|| DaqError::InstrumentActivation("source-meter not acquired".to_string()))
    }
}

/// Sub-device selected for maximum-power-point tracking.
struct TrackingTarget {
    device: u32,
    device_id: String,
    vpp: f64,
    mpp: f64,
    curve: JvCurve,
}

struct Worker {
    run_id: Uuid,
    factory: Arc<dyn HardwareFactory>,
    request: AcquisitionRequest,
    events: EventSink,
    stop: StopFlag,
}

impl Worker {
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    async fn run(self) -> RunReport {
        let mut session = Session::new(self.run_id, self.request.parameters.clone());
        let mut rig = Rig::default();

        let (outcome, error) = match self.execute(&mut rig, &mut session).await {
            Ok(()) => {
                self.events.status("Acquisition completed");
                (RunOutcome::Completed, None)
            }
            Err(DaqError::Cancelled) => {
                self.events.set_state(AcquisitionState::Stopping);
                self.events.status(format!(
                    "Acquisition stopped: {}",
                    self.stop.reason().unwrap_or_else(|| "stop requested".to_string())
                ));
                (RunOutcome::Stopped, None)
            }
            Err(err) => {
                self.events.set_state(AcquisitionState::Failed);
                error!("Acquisition failed: {}", err);
                self.events.error(err.kind(), err.to_string());
                (RunOutcome::Failed, Some(err.to_string()))
            }
        };

        self.events.set_state(AcquisitionState::Completing);
        self.teardown(&mut rig).await;
        self.events.emit(AcquisitionEvent::ControlsEnabled(true));
        self.events.status("System: ready");
        self.events.set_state(AcquisitionState::Idle);

        info!(%outcome, results = session.len(), "Acquisition finished");
        let report = RunReport {
            outcome,
            error,
            session,
        };
        self.events
            .emit(AcquisitionEvent::Finished(report.clone()));
        report
    }

    async fn execute(&self, rig: &mut Rig, session: &mut Session) -> AppResult<()> {
        self.stop.check()?;
        self.activate(rig).await?;

        for cell in self.request.layout.active_cells() {
            self.stop.check()?;
            self.events.cell(&cell, CellProgress::Measuring);
            let outcome = self.process_cell(rig, &cell, session).await;
            let progress = match &outcome {
                Ok(()) => CellProgress::Done,
                Err(e) if e.is_cancelled() => CellProgress::Stopped,
                Err(_) => CellProgress::Failed,
            };
            self.events.cell(&cell, progress);
            outcome?;
        }
        Ok(())
    }

    async fn process_cell(
        &self,
        rig: &Rig,
        cell: &CellPosition,
        session: &mut Session,
    ) -> AppResult<()> {
        let Some(target) = self.measure_cell(rig, cell, session).await? else {
            return Ok(());
        };
        self.events
            .status(format!("Device with max power: {}", target.device_id));
        if self.request.parameters.tracking_enabled {
            self.track(rig, cell, target, session).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn activate(&self, rig: &mut Rig) -> AppResult<()> {
        self.events.status("Activating instruments");

        let smu = self
            .factory
            .source_meter()
            .await
            .map_err(DaqError::activation)?;
        rig.smu = Some(Box::new(ComplianceMonitor {
            inner: smu,
            events: self.events.clone(),
        }));
        rig.stage = self.factory.stage().await.map_err(DaqError::activation)?;
        rig.switch = self
            .factory
            .switch_matrix()
            .await
            .map_err(DaqError::activation)?;

        let smu = rig.smu()?;
        smu.set_limit(Some(SAFETY_VOLTAGE_LIMIT), Some(SAFETY_CURRENT_LIMIT))
            .await
            .map_err(DaqError::activation)?;
        smu.on().await.map_err(DaqError::activation)?;

        info!(
            stage = rig.stage.is_some(),
            switch_matrix = rig.switch.is_some(),
            "Instruments activated"
        );
        Ok(())
    }

    #[instrument(
        skip(self, rig, session),
        fields(substrate = cell.substrate, label = %cell.label),
        err
    )]
    async fn measure_cell(
        &self,
        rig: &Rig,
        cell: &CellPosition,
        session: &mut Session,
    ) -> AppResult<Option<TrackingTarget>> {
        let layout = &self.request.layout;
        let settings = &self.request.settings;
        let spec = self.request.parameters.sweep_spec()?;
        let smu = rig.smu()?;

        self.events.set_state(AcquisitionState::SweepingDevice);
        if let Some(stage) = rig.stage.as_deref() {
            let substrate = cell.substrate;
            stage.move_to_substrate(substrate).await.map_err(|e| {
                DaqError::read(e.context(format!("moving stage to substrate {substrate}")))
            })?;
        }

        let mut best: Option<TrackingTarget> = None;
        for device in 1..=layout.devices_per_substrate() {
            self.stop.check()?;
            let device_id = layout.device_id(&cell.label, device);
            self.events
                .status(format!("Acquiring JV from device: {}", device_id));
            self.route(rig, cell.substrate, device).await?;

            let forward =
                sweep_voltage(smu, &spec, SweepDirection::Forward, settings, &self.stop).await?;
            let backward =
                sweep_voltage(smu, &spec, SweepDirection::Backward, settings, &self.stop).await?;

            let fwd = extract_performance(&forward, settings.power_in);
            let bwd = extract_performance(&backward, settings.power_in);
            info!(
                device = %device_id,
                voc = fwd.voc,
                jsc = fwd.jsc,
                mpp = fwd.mpp,
                ff = fwd.fill_factor,
                hysteresis_mpp = fwd.mpp - bwd.mpp,
                "Device measured"
            );

            self.publish(
                session,
                format!("{}{}", device_id, SweepDirection::Forward.suffix()),
                PerformanceRecord::now(&fwd, 0.0),
                forward.clone(),
                true,
            );
            self.publish(
                session,
                format!("{}{}", device_id, SweepDirection::Backward.suffix()),
                PerformanceRecord::now(&bwd, 0.0),
                backward,
                true,
            );

            if best.as_ref().map_or(true, |b| fwd.mpp > b.mpp) {
                best = Some(TrackingTarget {
                    device,
                    device_id,
                    vpp: fwd.vpp,
                    mpp: fwd.mpp,
                    curve: forward,
                });
            }
        }
        Ok(best)
    }

    #[instrument(skip(self, rig, cell, target, session), fields(device = %target.device_id), err)]
    async fn track(
        &self,
        rig: &Rig,
        cell: &CellPosition,
        target: TrackingTarget,
        session: &mut Session,
    ) -> AppResult<()> {
        let parameters = &self.request.parameters;
        let smu = rig.smu()?;

        self.events.set_state(AcquisitionState::Tracking);
        self.route(rig, cell.substrate, target.device).await?;
        self.events.status(format!(
            "Tracking device: {} at Vpp = {:.3} V",
            target.device_id, target.vpp
        ));

        let total = parameters.num_tracking_points;
        let mut ticks = track_max_power_point(
            smu,
            parameters.tracking_spec(target.vpp)?,
            self.request.settings,
        );
        let mut n = 0;
        loop {
            self.stop.check()?;
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(DaqError::Cancelled),
                next = ticks.next() => next,
            };
            let Some(record) = next else { break };
            let record = record?;
            n += 1;

            self.events.status(format!(
                "Tracking device: {} (time-step: {}/{} - {:.1}s)",
                target.device_id, n, total, record.elapsed_seconds
            ));
            self.publish(
                session,
                target.device_id.clone(),
                record,
                target.curve.clone(),
                n == total,
            );
        }
        Ok(())
    }

    async fn route(&self, rig: &Rig, substrate: u32, device: u32) -> AppResult<()> {
        if let Some(stage) = rig.stage.as_deref() {
            stage
                .move_to_device(substrate, device)
                .await
                .map_err(|e| {
                    DaqError::read(e.context(format!(
                        "moving stage to substrate {substrate} device {device}"
                    )))
                })?;
        }
        if let Some(switch) = rig.switch.as_deref() {
            switch.connect(substrate, device).await.map_err(|e| {
                DaqError::read(e.context(format!(
                    "switching to substrate {substrate} device {device}"
                )))
            })?;
        }
        Ok(())
    }

    fn publish(
        &self,
        session: &mut Session,
        device_id: String,
        record: PerformanceRecord,
        curve: JvCurve,
        persist: bool,
    ) {
        session.record(device_id.clone(), record, curve.clone());
        self.events.emit(AcquisitionEvent::Result(ResultEvent {
            device_id,
            record,
            curve,
            persist,
        }));
    }

    /// Power down and release everything. Errors are logged, never returned.
    async fn teardown(&self, rig: &mut Rig) {
        if let Some(smu) = rig.smu.take() {
            if let Err(e) = smu.off().await {
                warn!("Failed to switch source-meter output off: {:#}", e);
            }
        }
        if let Some(stage) = rig.stage.take() {
            if let Err(e) = stage.park().await {
                warn!("Failed to park stage: {:#}", e);
            }
            if let Err(e) = stage.release().await {
                warn!("Failed to release stage: {:#}", e);
            }
        }
        if let Some(switch) = rig.switch.take() {
            if let Err(e) = switch.release().await {
                warn!("Failed to release switch matrix: {:#}", e);
            }
        }
    }
}

/// Source-meter wrapper that reports compliance clamps as warning events.
struct ComplianceMonitor {
    inner: Box<dyn SourceMeter>,
    events: EventSink,
}

#[async_trait]
impl SourceMeter for ComplianceMonitor {
    async fn set_mode(&self, mode: SourceMode) -> Result<()> {
        self.inner.set_mode(mode).await
    }

    async fn set_limit(&self, voltage: Option<f64>, current: Option<f64>) -> Result<()> {
        self.inner.set_limit(voltage, current).await
    }

    async fn set_output(&self, output: Output) -> Result<OutputStatus> {
        let status = self.inner.set_output(output).await?;
        if let OutputStatus::Clamped { requested, applied } = status {
            self.events.error(
                ErrorKind::ComplianceWarning,
                format!(
                    "Compliance: requested {} {} clamped to {}",
                    requested,
                    output.mode(),
                    applied
                ),
            );
        }
        Ok(status)
    }

    async fn read_values(&self) -> Result<(f64, f64)> {
        self.inner.read_values().await
    }

    async fn on(&self) -> Result<()> {
        self.inner.on().await
    }

    async fn off(&self) -> Result<()> {
        self.inner.off().await
    }

    fn hardware_sweep(&self) -> Option<&dyn HardwareSweep> {
        self.inner.hardware_sweep()
    }
}
