// callistod -- acquisition daemon for the e-Callisto radio spectrometer.
//
// Reads the station configuration and channel plan, brings the receiver into
// a known state, then records FITS files until terminated. Recording is
// controlled by the schedule file, SIGHUP and the optional TCP command
// server.
//
// Usage:
//   callistod --config /etc/callisto/callisto.cfg
//   callistod --config callisto.cfg --load-channels --check-only
//   callistod --debug --serial-debug

mod signals;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use callisto_config::{ChannelPlan, Config, ScheduleFile, DEFAULT_CONFIG_FILE};
use callisto_core::{initial_recording, Command, CommandFlags};
use callisto_device::{spawn_drain, Scheduler, SpectrometerBuilder};
use callisto_server::{CommandContext, CommandServer};
use callisto_sink::{FitsWriter, PrnWriter, StationInfo};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// e-Callisto for Unix -- radio spectrometer acquisition daemon.
#[derive(Parser)]
#[command(name = "callistod", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory for FITS files (overrides `datapath`).
    #[arg(short = 'o', long)]
    datadir: Option<PathBuf>,

    /// Directory for overview reports (overrides `ovspath`).
    #[arg(short = 'O', long)]
    ovsdir: Option<PathBuf>,

    /// Schedule file (overrides `schedulefile`).
    #[arg(short = 's', long)]
    schedule: Option<PathBuf>,

    /// Write the channel plan into the receiver EEPROM.
    #[arg(short = 'L', long)]
    load_channels: bool,

    /// Only check that the device is a Callisto, then exit.
    #[arg(short = 'C', long)]
    check_only: bool,

    /// Log debug messages.
    #[arg(short = 'd', long)]
    debug: bool,

    /// Log debug messages and all serial traffic.
    #[arg(short = 'D', long)]
    serial_debug: bool,

    /// Bind the command server to IPv4 only (default: IPv6 with IPv4
    /// mapping).
    #[arg(short = '4', long)]
    ipv4: bool,
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug || cli.serial_debug { "debug" } else { "info" };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.serial_debug {
        filter = filter.add_directive("callisto_transport=trace".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn check_directory(dir: &Path, what: &str) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .with_context(|| format!("cannot access {what} directory {}", dir.display()))?;
    if !meta.is_dir() {
        bail!("{what} directory {} is not a directory", dir.display());
    }
    if meta.permissions().readonly() {
        bail!("{what} directory {} is not writable", dir.display());
    }
    Ok(())
}

fn station_info(config: &Config) -> StationInfo {
    let frequency_file = config
        .channel_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    StationInfo {
        instrument: config.instrument.clone(),
        origin: config.origin.clone(),
        latitude: config.location.latitude,
        longitude: config.location.longitude,
        height: config.location.height,
        frequency_file,
        agc_level: config.agc_level,
        focus_code: config.focus_code,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("cannot load configuration {}", cli.config.display()))?;
    if let Some(dir) = &cli.datadir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.ovsdir {
        config.overview_dir = dir.clone();
    }
    if let Some(file) = &cli.schedule {
        config.schedule_file = file.clone();
    }

    let plan = ChannelPlan::load(&config.channel_file).with_context(|| {
        format!("cannot load channel file {}", config.channel_file.display())
    })?;
    check_directory(&config.data_dir, "data")?;
    check_directory(&config.overview_dir, "overview")?;

    let settings = config.receiver_settings(&plan);
    let samplerate = settings.samplerate;
    let flags = Arc::new(CommandFlags::new());
    let cancel = CancellationToken::new();

    let builder = SpectrometerBuilder::new(settings, plan.channels.clone())
        .serial_port(&config.serial_port)
        .upload_channels(cli.load_channels)
        .flags(flags.clone())
        .cancel_token(cancel.clone())
        .overview_sink(Box::new(PrnWriter::new(
            config.overview_dir.clone(),
            &config.instrument,
        )));

    if cli.check_only {
        let receiver = builder
            .verify_channels(false)
            .build()
            .await
            .context("receiver check failed")?;
        info!(firmware = receiver.firmware().version, "device is a Callisto");
        return Ok(());
    }

    let mut scheduler = Scheduler::new(Box::new(ScheduleFile::new(
        config.schedule_file.clone(),
        config.focus_code,
    )));
    let entries = scheduler.load(Utc::now()).with_context(|| {
        format!("cannot load schedule file {}", config.schedule_file.display())
    })?;
    let autostart = config
        .autostart
        .or_else(|| initial_recording(entries))
        .unwrap_or(true);

    let mut receiver = builder
        .scheduler(scheduler)
        .build()
        .await
        .context("receiver startup failed")?;

    let frequencies: Vec<f64> = receiver.channels().iter().map(|c| c.freq_mhz).collect();
    let consumer = receiver
        .take_consumer()
        .context("sample buffers already in use")?;
    let writer = FitsWriter::new(
        config.data_dir.clone(),
        station_info(&config),
        frequencies.clone(),
        samplerate,
    );
    let drain_stop = CancellationToken::new();
    let drain = spawn_drain(consumer, writer, drain_stop.clone());

    if config.net_port > 0 {
        let addr = if cli.ipv4 {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.net_port))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, config.net_port))
        };
        let context = CommandContext {
            flags: flags.clone(),
            sweeps: receiver.sweep_reader(),
            frequencies: Arc::from(frequencies),
        };
        CommandServer::bind(addr, context, cancel.clone())
            .await
            .context("cannot start command server")?
            .spawn();
    }

    signals::spawn(flags.clone(), cancel.clone()).context("cannot install signal handlers")?;

    if autostart {
        flags.request(Command::Start);
    } else {
        info!("waiting for schedule or command to start recording");
    }

    info!(
        port = %config.serial_port,
        channels = receiver.channels().len(),
        samplerate,
        "acquisition started"
    );
    let result = receiver.run().await;

    drain_stop.cancel();
    if let Err(e) = drain.await {
        error!(error = %e, "FITS writer task failed");
    }
    cancel.cancel();

    result.context("acquisition failed")?;
    info!("terminated");
    Ok(())
}
