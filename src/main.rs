//! CLI Entry Point for jv-daq
//!
//! Provides command-line interface for:
//! - Running a J-V acquisition campaign (mock hardware until real drivers are wired in)
//! - Writing a default configuration file
//! - Validating a configuration file
//!
//! # Usage
//!
//! ```bash
//! jv-daq run --label A1 --label A2
//! jv-daq init-config config/jv_daq.toml
//! jv-daq check-config --config config/jv_daq.toml
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use jv_daq::acquisition::{
    AcquisitionEngine, AcquisitionEvent, AcquisitionRequest, CellProgress, ResultEvent,
    RunOutcome,
};
use jv_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use jv_daq::hardware::mock::{MockHardwareFactory, MockSourceMeter, MockStage, MockSwitchMatrix};
use jv_daq::storage::{CsvResultWriter, ResultSink};
use jv_daq::tracing_setup;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "jv-daq")]
#[command(about = "J-V acquisition and MPP tracking for photovoltaic devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the labelled devices once
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Device labels, assigned to holder cells in visit order
        #[arg(long = "label", required = true)]
        labels: Vec<String>,

        /// Override the CSV output directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            labels,
            csv_dir,
        } => run(config, labels, csv_dir).await,
        Commands::InitConfig { path } => init_config(path),
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(config_path: PathBuf, labels: Vec<String>, csv_dir: Option<PathBuf>) -> Result<()> {
    let mut config = AppConfig::load_from(&config_path)?;
    if let Some(dir) = csv_dir {
        config.storage.csv_dir = dir;
    }
    config.validate()?;
    tracing_setup::init_from_config(&config)?;
    info!(config = %config_path.display(), "Configuration loaded");

    let parameters = config.acquisition_parameters(labels.first().map(String::as_str));
    let request = AcquisitionRequest {
        parameters: parameters.clone(),
        layout: config.layout(&labels)?,
        settings: config.measurement_settings(),
    };

    let mut sink = if config.storage.save_local_csv {
        let mut writer = CsvResultWriter::new(&config.storage.csv_dir);
        writer.begin(&parameters).await?;
        println!("💾 Saving results to {}", writer.dir().display());
        Some(writer)
    } else {
        None
    };

    println!("🔧 Initializing mock hardware...");
    print_instruments(&config);
    let factory = mock_factory(&config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = AcquisitionEngine::new(factory, tx);

    let run_id = engine.start(request)?;
    println!("▶️  Acquisition {} started - Press Ctrl+C to stop", run_id);

    let report = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(AcquisitionEvent::Finished(report)) => break report,
                Some(event) => {
                    if let AcquisitionEvent::Result(result) = &event {
                        save(sink.as_mut(), result).await;
                    }
                    log_event(&event);
                }
                None => bail!("acquisition engine closed its event channel"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n⏹  Stopping...");
                engine.stop();
            }
        }
    };

    if let Some(writer) = sink.as_mut() {
        for path in writer.flush().await? {
            info!("Saved partial results to '{}'", path.display());
        }
    }

    println!();
    let results = report.session.len();
    match report.outcome {
        RunOutcome::Completed => println!("✅ Acquisition completed: {} results", results),
        RunOutcome::Stopped => println!("⏹  Acquisition stopped: {} results", results),
        RunOutcome::Failed => {
            eprintln!(
                "❌ Acquisition failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
            bail!("acquisition {} failed", report.run_id());
        }
    }
    Ok(())
}

async fn save(sink: Option<&mut CsvResultWriter>, result: &ResultEvent) {
    let Some(writer) = sink else { return };
    if let Err(e) = writer.write(result).await {
        error!("Failed to save {}: {}", result.device_id, e);
    }
}

/// Simulated instruments standing in for the configured ones.
///
/// A parameter analyzer maps to a source-meter with an internal sweep, a
/// non-empty switch box id adds a switch matrix.
fn mock_factory(config: &AppConfig) -> MockHardwareFactory {
    let instruments = &config.instruments;
    let mut smu = MockSourceMeter::new();
    if config.acquisition.prefer_hardware_sweep && !instruments.parameter_analyzer_id.is_empty() {
        smu = smu.with_hardware_sweep();
    }
    let factory = MockHardwareFactory::new(smu)
        .with_resource(&instruments.source_meter_id)
        .with_stage(MockStage::new());
    if instruments.switch_box_id.is_empty() {
        factory
    } else {
        factory.with_switch_matrix(MockSwitchMatrix::new())
    }
}

fn print_instruments(config: &AppConfig) {
    let instruments = &config.instruments;
    println!("   Source-meter:       {}", or_none(&instruments.source_meter_id));
    println!("   Parameter analyzer: {}", or_none(&instruments.parameter_analyzer_id));
    println!("   Switch box:         {}", or_none(&instruments.switch_box_id));
}

fn or_none(id: &str) -> &str {
    if id.is_empty() {
        "none"
    } else {
        id
    }
}

fn log_event(event: &AcquisitionEvent) {
    match event {
        AcquisitionEvent::Status(status) => println!("   {}", status.message),
        AcquisitionEvent::Result(result) => println!(
            "   {:<24} Voc {:>7.3} V  Jsc {:>8.3}  FF {:>5.1} %  PCE {:>6.2} %",
            result.device_id,
            result.record.voc,
            result.record.jsc,
            result.record.fill_factor,
            result.record.efficiency * 100.0
        ),
        AcquisitionEvent::Cell(cell) => match cell.progress {
            CellProgress::Measuring => println!(
                "🔬 Substrate #{} ({}, {})",
                cell.substrate,
                cell.row + 1,
                cell.col + 1
            ),
            CellProgress::Failed => warn!(substrate = cell.substrate, "Substrate failed"),
            CellProgress::Done | CellProgress::Stopped => {}
        },
        AcquisitionEvent::Error(err) => warn!(kind = ?err.kind, "{}", err.message),
        AcquisitionEvent::State(_)
        | AcquisitionEvent::ControlsEnabled(_)
        | AcquisitionEvent::Finished(_) => {}
    }
}

fn init_config(path: PathBuf) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    AppConfig::default().save(&path)?;
    println!("📝 Wrote default configuration to {}", path.display());
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = AppConfig::load_from(&path)?;
    config.validate()?;
    println!("✅ {} is valid", path.display());
    println!(
        "   Holder: {}x{} substrates, {} devices each",
        config.devices.rows, config.devices.cols, config.devices.devices_per_substrate
    );
    println!(
        "   Sweep: {} V to {} V, step {} V, start {} V",
        config.acquisition.min_voltage,
        config.acquisition.max_voltage,
        config.acquisition.step_voltage,
        config.acquisition.start_voltage
    );
    println!(
        "   Incident power: {:.4}",
        config.measurement_settings().power_in
    );
    print_instruments(&config);
    Ok(())
}
