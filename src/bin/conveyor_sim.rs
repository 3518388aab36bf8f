//! Conveyor line controller against a simulated plant.
//!
//! Loads a line configuration, connects to an MQTT broker and runs the
//! control loop. Drives and cylinders are simulated; sensors follow the
//! `io-expander/devices/{device}/inputs/{port}` mirror topics, so sensor
//! names in the configuration are `device/port` addresses.
//!
//! # Usage
//!
//! ```sh
//! cargo run --features mqtt --bin conveyor_sim -- --config config/line.json
//!
//! # JSON logs, debug level
//! cargo run --features mqtt --bin conveyor_sim -- -c config/line.json --json -v
//! ```
//!
//! Accepted `conveyors/control/restart` payloads are written back to the
//! configuration file unless `--no-persist` is given.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conveyor_fsm::config::LineConfig;
use conveyor_fsm::control_loop::ControlLoop;
use conveyor_fsm::hal::{MockHal, SensorMirror, SystemClock};
use conveyor_fsm::messages::EventRouter;
use conveyor_fsm::services::{run_control, MqttRuntimeConfig, MqttServiceRunner, RumqttClient};

/// Conveyor line controller (simulated plant)
#[derive(Parser, Debug)]
#[command(name = "conveyor_sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Line configuration file
    #[arg(short, long, default_value = "config/line.json")]
    config: PathBuf,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    port: u16,

    /// MQTT client id
    #[arg(long, default_value = "conveyor-fsm")]
    client_id: String,

    /// Do not write accepted reconfigurations back to the config file
    #[arg(long)]
    no_persist: bool,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging(args: &Args) {
    let default = if args.verbose {
        "info,conveyor_fsm=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = LineConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        path = %args.config.display(),
        conveyors = config.conveyors.len(),
        cycle_ms = config.control.cycle_ms,
        "configuration loaded"
    );

    let mirror = Arc::new(SensorMirror::new());
    let hal = MockHal::with_mirror(Arc::clone(&mirror)).provisioning();
    let control = ControlLoop::new(hal, config).context("building conveyor topology")?;

    let mut router = EventRouter::new(
        Arc::clone(control.safety()),
        Arc::clone(control.picking()),
        Arc::clone(control.requests()),
        mirror,
    );
    if !args.no_persist {
        router = router.with_config_path(&args.config);
    }

    let mqtt = MqttRuntimeConfig::new(args.host, args.port).client_id(args.client_id);
    let (client, events) = RumqttClient::connect(&mqtt);
    let runner = MqttServiceRunner::new(client, router);

    run_control(control, runner, SystemClock::new()).await;
    events.abort();
    info!("controller stopped");
    Ok(())
}
