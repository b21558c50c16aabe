// Module declarations for the application's core components
pub mod calculator;     // Token to variable conversion
pub mod channels;       // Inter-component communication channels
pub mod config;         // Configuration management
pub mod datalog_writer; // JSON-lines output of every work cycle
pub mod error;          // Error helpers
pub mod kaco;           // KACO serial protocol implementation
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod property;       // Command and field definitions
pub mod provider;       // Work cycle orchestration per inverter
pub mod scheduler;      // Periodic work cycles

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::datalog_writer::DatalogWriter;
use crate::provider::Schueco;
use crate::scheduler::Scheduler;

use log::LevelFilter;

/// Sets up env_logger. Without `RUST_LOG` the level starts at info and is
/// switched to the configured one once the config file has been read.
fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never);

    if let Err(e) = builder.try_init() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

fn apply_loglevel(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }

    match level.parse::<LevelFilter>() {
        Ok(level) => log::set_max_level(level),
        Err(_) => warn!("unknown loglevel {}, staying at info", level),
    }
}

/// Main application entry point
pub async fn app(options: Options) -> Result<()> {
    init_logging();

    info!(
        "schueco-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );

    let config = ConfigWrapper::new(options.config_file.clone()).map_err(|err| {
        error!("Failed to load config: {:#}", err);
        err
    })?;
    apply_loglevel(&config.loglevel());

    if options.test_connection {
        return tokio::task::spawn_blocking(move || test_connections(&config)).await?;
    }

    if options.once {
        return tokio::task::spawn_blocking(move || run_once(&config)).await?;
    }

    run(config).await
}

/// Connection test for every enabled inverter; fails if any of them fails.
fn test_connections(config: &ConfigWrapper) -> Result<()> {
    let mut failed = 0;

    for inverter in config.enabled_inverters() {
        let provider = Schueco::new(inverter.clone())?;
        match provider.test_provider_connection(&inverter) {
            Ok(message) => info!("{}: {}", inverter.name(), message),
            Err(e) => {
                error!("{}: {}", inverter.name(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} inverter(s) failed the connection test", failed);
    }
    Ok(())
}

/// Single work cycle per inverter, results as JSON lines on stdout.
fn run_once(config: &ConfigWrapper) -> Result<()> {
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();

    for inverter in config.enabled_inverters() {
        let mut provider = Schueco::new(inverter)?;
        let cycle = provider.run_cycle()?;
        writeln!(stdout, "{}", serde_json::to_string(&cycle)?)?;
    }

    Ok(())
}

async fn run(config: ConfigWrapper) -> Result<()> {
    info!("Initializing channels...");
    let channels = Channels::new();

    let datalog_handle = match config.datalog_file() {
        Some(path) => {
            info!("  Creating DatalogWriter...");
            let writer = DatalogWriter::new(&path)?;
            let receiver = channels.to_datalog.subscribe();
            Some(tokio::spawn(async move {
                if let Err(e) = writer.start(receiver).await {
                    error!("DatalogWriter task failed: {}", e);
                }
            }))
        }
        None => None,
    };

    info!("  Creating Scheduler...");
    let scheduler = Scheduler::new(config, channels.clone());
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler task failed: {:#}", e);
        }
    });

    info!("Waiting for shutdown signal...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutdown signal received, stopping components...");
    let _ = channels.to_scheduler.send(scheduler::ChannelData::Shutdown);
    if let Err(e) = scheduler_handle.await {
        error!("Error waiting for scheduler task: {}", e);
    }

    let _ = channels.to_datalog.send(datalog_writer::ChannelData::Shutdown);
    if let Some(handle) = datalog_handle {
        if let Err(e) = handle.await {
            error!("Error waiting for datalog task: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
