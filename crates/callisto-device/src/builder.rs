//! SpectrometerBuilder -- fluent builder for connecting to a receiver.
//!
//! Building runs the whole startup handshake: reset the receiver (it must go
//! quiet), check its identification reply, detect the firmware version,
//! optionally upload the channel table and verify it against the EEPROM.
//! Any failure is a startup error and nothing is left running.
//!
//! # Example
//!
//! ```no_run
//! use callisto_device::builder::SpectrometerBuilder;
//! # use callisto_core::{Channel, ReceiverSettings};
//!
//! # async fn example(settings: ReceiverSettings, channels: Vec<Channel>) -> callisto_core::Result<()> {
//! let mut receiver = SpectrometerBuilder::new(settings, channels)
//!     .serial_port("/dev/ttyUSB0")
//!     .build()
//!     .await?;
//! receiver.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use callisto_core::error::{Error, Result};
use callisto_core::flags::CommandFlags;
use callisto_core::transport::Transport;
use callisto_core::types::{Channel, DeviceState, FirmwareProfile, ReceiverSettings};

use crate::buffers::buffer_pair;
use crate::demux::Demux;
use crate::eeprom;
use crate::engine::{Spectrometer, DEFAULT_SHUTDOWN_WAIT};
use crate::hexdata::HexDecoder;
use crate::link::{DeviceLink, DEFAULT_READ_TIMEOUT, FLUSH_LIMIT};
use crate::overview::OverviewCollector;
use crate::protocol::{self, MAX_MESSAGE};
use crate::recovery::ResetTracker;
use crate::scheduler::Scheduler;
use crate::sink::{NullOverviewSink, OverviewSink};

/// Fluent builder for [`Spectrometer`].
pub struct SpectrometerBuilder {
    settings: ReceiverSettings,
    channels: Vec<Channel>,
    serial_port: Option<String>,
    baud_rate: u32,
    read_timeout: Duration,
    shutdown_wait: Duration,
    upload_channels: bool,
    verify_channels: bool,
    flags: Option<Arc<CommandFlags>>,
    cancel: Option<CancellationToken>,
    scheduler: Option<Scheduler>,
    overview_sink: Option<Box<dyn OverviewSink>>,
}

impl SpectrometerBuilder {
    /// Create a builder for the given acquisition settings and channel plan.
    pub fn new(settings: ReceiverSettings, channels: Vec<Channel>) -> Self {
        SpectrometerBuilder {
            settings,
            channels,
            serial_port: None,
            baud_rate: callisto_transport::DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_wait: DEFAULT_SHUTDOWN_WAIT,
            upload_channels: false,
            verify_channels: true,
            flags: None,
            cancel: None,
            scheduler: None,
            overview_sink: None,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default 115200 baud.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Device-level read timeout (default: 1s). A silent device is
    /// detected, and an overview sweep is finished, after this long.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bound on the final flush during shutdown (default: 10s).
    pub fn shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }

    /// Write the channel table into the EEPROM before verifying it.
    pub fn upload_channels(mut self, enabled: bool) -> Self {
        self.upload_channels = enabled;
        self
    }

    /// Read the channel table back and adopt the device's frequencies
    /// (default: on).
    pub fn verify_channels(mut self, enabled: bool) -> Self {
        self.verify_channels = enabled;
        self
    }

    /// Share an existing set of command flags (signal handlers, network
    /// server).
    pub fn flags(mut self, flags: Arc<CommandFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Use an existing termination token.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Evaluate this schedule on every loop iteration.
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Where finished overview reports go (default: discarded).
    pub fn overview_sink(mut self, sink: Box<dyn OverviewSink>) -> Self {
        self.overview_sink = Some(sink);
        self
    }

    fn validate(&self) -> Result<()> {
        let s = &self.settings;
        if s.nchannels == 0 || s.nchannels != self.channels.len() {
            return Err(Error::Config(format!(
                "{} channels configured but {} defined",
                s.nchannels,
                self.channels.len()
            )));
        }
        if s.samplerate == 0 || s.filetime == 0 {
            return Err(Error::Config("samplerate and filetime must be positive".into()));
        }
        Ok(())
    }

    /// Run the startup handshake over a caller-provided transport.
    ///
    /// This is the entry point for testing with a `MockTransport`.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Spectrometer> {
        self.validate()?;
        let cancel = self.cancel.unwrap_or_default();
        let (producer, consumer, reader) = buffer_pair(
            self.settings.buffer_capacity(),
            self.settings.nchannels,
            self.settings.sweep_micros(),
            cancel.clone(),
        )?;

        let mut link = DeviceLink::with_timeout(transport, self.read_timeout);
        let mut resets = ResetTracker::new();

        link.send(protocol::RESET).await?;
        if !link.discard_input(FLUSH_LIMIT).await? {
            return Err(Error::Startup(
                "device does not seem to be Callisto (reset failed)".into(),
            ));
        }
        resets.record(Instant::now());

        link.send(protocol::ID_QUERY).await?;
        let reply = link.read_until_quiet(MAX_MESSAGE).await?;
        if !reply.starts_with(protocol::ID_RESPONSE) {
            return Err(Error::Startup(format!(
                "device does not seem to be Callisto (ID failed: {:?})",
                String::from_utf8_lossy(&reply)
            )));
        }

        link.send(protocol::VERSION_QUERY).await?;
        let reply = link.read_until_quiet(MAX_MESSAGE).await?;
        let firmware = FirmwareProfile::detect(&reply).ok_or_else(|| {
            let first = reply.split(|&b| b == b'\r').next().unwrap_or_default();
            Error::UnsupportedFirmware(String::from_utf8_lossy(first).into_owned())
        })?;
        info!(version = firmware.version, "detected firmware");

        let mut channels = self.channels;
        if self.upload_channels {
            eeprom::upload_channels(
                &mut link,
                &firmware,
                &channels,
                self.settings.local_oscillator,
                self.settings.charge_pump,
            )
            .await?;
        }
        if self.verify_channels {
            eeprom::verify_channels(
                &mut link,
                &firmware,
                &mut channels,
                self.settings.local_oscillator,
            )
            .await?;
            debug!(channels = channels.len(), "channel table verified");
        }

        Ok(Spectrometer {
            link,
            settings: self.settings,
            channels,
            firmware,
            state: DeviceState::Stopped,
            demux: Demux::new(),
            decoder: HexDecoder::new(firmware),
            producer,
            consumer: Some(consumer),
            reader,
            flags: self.flags.unwrap_or_default(),
            resets,
            overview: OverviewCollector::new(),
            overview_sink: self
                .overview_sink
                .unwrap_or_else(|| Box::new(NullOverviewSink)),
            scheduler: self.scheduler,
            cancel,
            shutdown_wait: self.shutdown_wait,
        })
    }

    /// Open the configured serial port and run the startup handshake.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Spectrometer> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::Config("serial_port is required for build()".into()))?;
        let transport = callisto_transport::SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}
