//! Integration tests for mock hardware implementations
//!
//! These tests verify that the mock source-meter, stage and switch matrix
//! implement the capability traits and behave like the bench instruments.

use jv_daq::hardware::mock::{
    DiodeModel, MockHardwareFactory, MockSourceMeter, MockStage, MockSwitchMatrix, StageMove,
};
use jv_daq::hardware::{
    HardwareFactory, HardwareSweep, Output, SourceMeter, SourceMode, SubstrateStage, SwitchMatrix,
};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// MockSourceMeter Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_circuit_in_current_mode() {
    let smu = MockSourceMeter::new();
    smu.on().await.unwrap();
    smu.set_mode(SourceMode::Current).await.unwrap();
    smu.set_output(Output::Current(0.0)).await.unwrap();

    let (voltage, current) = smu.read_values().await.unwrap();
    let expected = DiodeModel::default().voltage_at(0.0);
    assert!((voltage - expected).abs() < 1e-12);
    assert_eq!(current, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_current_limited_in_forward_bias() {
    let smu = MockSourceMeter::new();
    smu.set_limit(Some(20.0), Some(0.01)).await.unwrap();
    smu.on().await.unwrap();
    smu.set_output(Output::Voltage(1.5)).await.unwrap();

    let (_, current) = smu.read_values().await.unwrap();
    assert_eq!(current, 0.01);
}

#[tokio::test(start_paused = true)]
async fn test_dark_device_reads_no_photocurrent() {
    let smu = MockSourceMeter::with_model(DiodeModel::dark());
    smu.on().await.unwrap();
    smu.set_output(Output::Voltage(0.0)).await.unwrap();
    assert_eq!(smu.read_values().await.unwrap(), (0.0, 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_latency_per_command() {
    let smu = MockSourceMeter::new().with_latency(Duration::from_millis(10));

    let start = Instant::now();
    smu.set_output(Output::Voltage(0.2)).await.unwrap();
    smu.read_values().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn test_hardware_sweep_is_opt_in() {
    assert!(MockSourceMeter::new().hardware_sweep().is_none());

    let smu = MockSourceMeter::new().with_hardware_sweep();
    let sweep = smu.hardware_sweep().unwrap();
    assert!(sweep.sweep(0.0, 1.0, -0.5, None).await.is_err());
    sweep.sweep(0.0, 1.0, 0.5, None).await.unwrap();
    let (v, i) = sweep.read_sweep_values().await.unwrap();
    assert_eq!(v, vec![0.0, 0.5, 1.0]);
    assert_eq!(v.len(), i.len());
}

// =============================================================================
// MockStage / MockSwitchMatrix Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stage_records_moves_with_travel_time() {
    let stage = MockStage::with_move_time(Duration::from_millis(50));

    let start = Instant::now();
    stage.move_to_substrate(3).await.unwrap();
    stage.move_to_device(3, 2).await.unwrap();
    stage.park().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(150));

    assert_eq!(
        stage.moves(),
        vec![StageMove::Substrate(3), StageMove::Device(3, 2), StageMove::Park]
    );
    assert!(!stage.is_released());
    stage.release().await.unwrap();
    assert!(stage.is_released());
}

#[tokio::test]
async fn test_switch_matrix_records_connections() {
    let switch = MockSwitchMatrix::new();
    switch.connect(1, 1).await.unwrap();
    switch.connect(4, 6).await.unwrap();
    assert_eq!(switch.connections(), vec![(1, 1), (4, 6)]);
    switch.release().await.unwrap();
    assert!(switch.is_released());
}

// =============================================================================
// MockHardwareFactory Tests
// =============================================================================

#[tokio::test]
async fn test_factory_hands_out_shared_handles() {
    let stage = MockStage::with_move_time(Duration::ZERO);
    let factory = MockHardwareFactory::new(MockSourceMeter::new())
        .with_stage(stage.clone())
        .with_switch_matrix(MockSwitchMatrix::new());

    let owned = factory.stage().await.unwrap().unwrap();
    owned.move_to_substrate(7).await.unwrap();
    assert_eq!(stage.moves(), vec![StageMove::Substrate(7)]);
    assert!(factory.switch_matrix().await.unwrap().is_some());

    let smu = factory.source_meter().await.unwrap();
    smu.set_limit(Some(20.0), Some(1.0)).await.unwrap();
    assert_eq!(
        factory.source_meter_handle().limit_log(),
        vec![(Some(20.0), Some(1.0))]
    );
}

#[tokio::test]
async fn test_unreachable_factory_names_configured_resource() {
    let factory = MockHardwareFactory::new(MockSourceMeter::new())
        .with_resource("TCPIP0::10.0.0.7::INSTR")
        .unreachable();

    let err = factory.source_meter().await.err().unwrap();
    assert!(err.to_string().contains("TCPIP0::10.0.0.7::INSTR"), "{err}");
}
