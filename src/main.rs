//! CLI entry point for keithley-daq
//!
//! Drives a Keithley 2400-series SMU over RS-232:
//! - `config`: print the validated device configuration
//! - `status`: measure voltage and current
//! - `set`: set the source voltage
//! - `ramp`: ramp the source voltage in fixed steps
//! - `run`: full run lifecycle, held until Ctrl-C
//!
//! # Usage
//!
//! ```bash
//! keithley-daq --config config/keithley_2410.yaml status
//! keithley-daq --config config/keithley_2410.yaml ramp --target -50 --step 5
//! keithley-daq --config config/keithley_2410.yaml run --v-start 0 --v-set -100 --v-step 10
//! ```
//!
//! The instrument calls block, so each one runs on tokio's blocking pool;
//! the async side only waits for them and for Ctrl-C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keithley_daq::adapters::{SerialSettings, SerialTransport};
use keithley_daq::config::SmuConfig;
use keithley_daq::error::SmuResult;
use keithley_daq::instrument::{SmuController, Status};
use keithley_daq::logging;
use keithley_daq::producer::{RunSettings, SmuProducer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keithley-daq")]
#[command(about = "Serial control of Keithley 2400-series source-measure units", long_about = None)]
struct Cli {
    /// Device configuration file (YAML, or TOML by extension)
    #[arg(long, short, global = true, default_value = "config/keithley_2410.yaml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the validated configuration
    Config,

    /// Measure voltage and current
    Status,

    /// Set the source voltage
    Set {
        /// Level in `unit`
        #[arg(long, allow_hyphen_values = true)]
        value: f64,

        /// V or mV
        #[arg(long, default_value = "V")]
        unit: String,

        /// Switch the output on after setting the level
        #[arg(long)]
        enable_output: bool,
    },

    /// Ramp the source voltage
    Ramp {
        /// Target level in `unit`
        #[arg(long, allow_hyphen_values = true)]
        target: f64,

        /// Step size in `unit`
        #[arg(long)]
        step: f64,

        /// V or mV
        #[arg(long, default_value = "V")]
        unit: String,
    },

    /// Initialise, configure and start a run; stop and reset on Ctrl-C
    Run {
        /// Start voltage (V)
        #[arg(long, allow_hyphen_values = true)]
        v_start: f64,

        /// Run voltage (V)
        #[arg(long, allow_hyphen_values = true)]
        v_set: f64,

        /// Ramp step (V)
        #[arg(long)]
        v_step: f64,

        /// Seconds between status readings during the run (0 disables)
        #[arg(long, default_value = "10")]
        interval: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Config => print_config(cli.config),
        Commands::Status => {
            let status = with_controller(cli.config, |smu| smu.status()).await?;
            print_status(&status);
            Ok(())
        }
        Commands::Set {
            value,
            unit,
            enable_output,
        } => {
            let status = with_controller(cli.config, move |smu| {
                smu.set_voltage(value, &unit)?;
                if enable_output {
                    smu.enable_output()?;
                }
                smu.status()
            })
            .await?;
            print_status(&status);
            Ok(())
        }
        Commands::Ramp { target, step, unit } => {
            let status = with_controller(cli.config, move |smu| {
                smu.ramp(target, step, &unit)?;
                smu.status()
            })
            .await?;
            print_status(&status);
            Ok(())
        }
        Commands::Run {
            v_start,
            v_set,
            v_step,
            interval,
        } => {
            let settings = RunSettings {
                v_start,
                v_set,
                v_step,
            };
            run(cli.config, settings, interval).await
        }
    }
}

fn print_config(path: PathBuf) -> Result<()> {
    let config = SmuConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn print_status(status: &Status) {
    println!(
        "Voltage: {:.6} V +/- {:.6} V",
        status.voltage.mean, status.voltage.std_dev
    );
    println!(
        "Current: {:.6} uA +/- {:.6} uA",
        status.current.mean, status.current.std_dev
    );
}

/// Run a blocking instrument task on the blocking pool.
async fn blocking<R, F>(task: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Instrument task panicked")
}

/// Open the configured port, run `action` on a fresh controller, close.
async fn with_controller<R, F>(path: PathBuf, action: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce(&mut SmuController<SerialTransport>) -> SmuResult<R> + Send + 'static,
{
    let config = SmuConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;

    blocking(move || -> Result<R> {
        let transport = SerialTransport::open(SerialSettings::from_config(&config))?;
        let mut smu = SmuController::new(config, transport)?;
        let outcome = action(&mut smu);
        let closed = smu.close();
        let value = outcome?;
        closed?;
        Ok(value)
    })
    .await?
}

async fn run(path: PathBuf, settings: RunSettings, interval: f64) -> Result<()> {
    let mut producer = SmuProducer::serial("keithley-daq");

    let (returned, started) = blocking(move || {
        let started = producer
            .initialise(&path)
            .and_then(|()| producer.configure(settings))
            .and_then(|()| producer.start_run());
        (producer, started)
    })
    .await?;
    producer = returned;

    if let Err(e) = started {
        warn!("Run did not start: {}", e);
        blocking(move || producer.reset()).await??;
        return Err(e).context("Failed to start run");
    }
    info!("Run started at {} V, press Ctrl-C to stop", settings.v_set);

    let period = Duration::try_from_secs_f64(interval).unwrap_or(Duration::ZERO);
    let mut ticker = (!period.is_zero()).then(|| tokio::time::interval(period));
    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            () = tick => {
                let (returned, status) = blocking(move || {
                    let status = producer.controller_mut().and_then(|smu| smu.status());
                    (producer, status)
                })
                .await?;
                producer = returned;
                match status {
                    Ok(status) => print_status(&status),
                    Err(e) => warn!("Status reading failed: {}", e),
                }
            }
        }
    }

    info!("Stopping run");
    let (stopped, reset) = blocking(move || {
        let stopped = producer.stop_run();
        (stopped, producer.reset())
    })
    .await?;
    stopped.context("Failed to stop run")?;
    reset.context("Failed to reset instrument")?;
    Ok(())
}
