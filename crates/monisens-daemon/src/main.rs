//! MoniSens Daemon - Main entry point
//!
//! Hosts one device module: brings it up from the configuration file, or
//! interactively over the API, routes its telemetry and serves the status
//! API until interrupted.

mod answer;
mod api;
mod config;
mod host;
mod registry;
mod router;
mod server;
mod setup;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "monisens")]
#[command(about = "MoniSens device module host")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "monisens.toml")]
    config: PathBuf,

    /// Bind address for the status server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the device's schemas and sensors, then exit
    #[arg(long)]
    describe: bool,

    /// Initialize the module only; connect and configure through the setup API
    #[arg(long, conflicts_with = "describe")]
    interactive: bool,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("MoniSens v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote example configuration");
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        device = %config.device.name,
        module = %config.device.module,
        "Configuration loaded"
    );

    let module = registry::instantiate(&config.device.module)?;
    let state = state::AppState::new(config.clone());
    let host = Arc::new(host::Host::new(module, state.clone()));

    if args.interactive {
        if let Err(e) = host.begin().await {
            error!(error = %e, "Module initialization failed");
            host.shutdown().await?;
            return Err(e.into());
        }
        info!(bind = %config.daemon.bind, "Waiting for device setup over the API");
    } else {
        let catalog = match host.bring_up(&config.device).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(error = %e, "Device bring-up failed");
                host.shutdown().await?;
                return Err(e);
            }
        };

        if args.describe {
            let status = state.status.read().await.clone();
            let description = serde_json::json!({
                "device": status.device,
                "module": status.module,
                "version": status.version,
                "connection": status.connection_schema,
                "configuration": status.device_schema,
                "sensors": status.sensors,
            });
            println!("{}", serde_json::to_string_pretty(&description)?);
            host.shutdown().await?;
            return Ok(());
        }

        host.start(catalog).await?;
    }

    let server_state = state.clone();
    let server_host = host.clone();
    let bind = config.daemon.bind.clone();
    let server = tokio::spawn(async move { server::run(server_state, server_host, &bind).await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
        result = server => {
            match result {
                Ok(Ok(())) => info!("Status server stopped"),
                Ok(Err(e)) => error!(error = %e, "Status server failed"),
                Err(e) => error!(error = %e, "Status server task aborted"),
            }
        }
    }

    host.shutdown().await?;
    let counters = state.counters.snapshot();
    info!(
        accepted = counters.accepted,
        rejected = counters.rejected,
        logs = counters.logs,
        "Telemetry summary"
    );
    Ok(())
}
