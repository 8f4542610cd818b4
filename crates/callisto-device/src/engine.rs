//! The acquisition control loop.
//!
//! [`Spectrometer`] owns everything the acquisition context touches: the
//! device link, the stream demultiplexer and hex decoder, the write side of
//! the buffer pair, the device state and the recovery bookkeeping. Other
//! tasks only ever interact with it through the shared [`CommandFlags`], the
//! hand-off cell (drained by the sink task) and the read-only
//! [`SweepReader`].
//!
//! Each call to [`Spectrometer::step`] is one iteration of the loop:
//!
//! 1. fire due schedule entries,
//! 2. act on pending command flags,
//! 3. read and dispatch one byte (or handle a read timeout).
//!
//! Every recoverable [`Fault`] is answered the same way: reset the device
//! and host state, re-send the clock/gain configuration, and restart
//! acquisition if it was active.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callisto_core::error::{Error, Result};
use callisto_core::flags::CommandFlags;
use callisto_core::types::{Channel, Command, DeviceState, FirmwareProfile, ReceiverSettings};

use crate::buffers::{Consumer, Producer, SweepReader};
use crate::demux::{Demux, DemuxEvent};
use crate::fault::Fault;
use crate::hexdata::{HexDecoder, HexWord};
use crate::link::{DeviceLink, FLUSH_LIMIT};
use crate::overview::OverviewCollector;
use crate::protocol;
use crate::recovery::ResetTracker;
use crate::scheduler::Scheduler;
use crate::sink::OverviewSink;

/// Sleep between iterations while stopped.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Default bound on the final buffer flush during shutdown.
pub const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// A connected, identified receiver and its acquisition state.
pub struct Spectrometer {
    pub(crate) link: DeviceLink,
    pub(crate) settings: ReceiverSettings,
    pub(crate) channels: Vec<Channel>,
    pub(crate) firmware: FirmwareProfile,
    pub(crate) state: DeviceState,
    pub(crate) demux: Demux,
    pub(crate) decoder: HexDecoder,
    pub(crate) producer: Producer,
    pub(crate) consumer: Option<Consumer>,
    pub(crate) reader: SweepReader,
    pub(crate) flags: Arc<CommandFlags>,
    pub(crate) resets: ResetTracker,
    pub(crate) overview: OverviewCollector,
    pub(crate) overview_sink: Box<dyn OverviewSink>,
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) cancel: CancellationToken,
    pub(crate) shutdown_wait: Duration,
}

impl Spectrometer {
    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current device state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The detected firmware.
    pub fn firmware(&self) -> &FirmwareProfile {
        &self.firmware
    }

    pub fn settings(&self) -> &ReceiverSettings {
        &self.settings
    }

    /// Channel plan, with device-verified frequencies when verification ran.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Shared command flags; raise one to request a start, stop or overview.
    pub fn flags(&self) -> Arc<CommandFlags> {
        Arc::clone(&self.flags)
    }

    /// Termination token. Cancelling it ends [`run`](Self::run) after the
    /// current iteration.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot view of the latest sweep.
    pub fn sweep_reader(&self) -> SweepReader {
        self.reader.clone()
    }

    /// Take the drain side of the buffer pair. Returns `None` once taken.
    pub fn take_consumer(&mut self) -> Option<Consumer> {
        self.consumer.take()
    }

    // -----------------------------------------------------------------------
    // Device commands
    // -----------------------------------------------------------------------

    async fn init(&mut self) -> Result<()> {
        self.link.send(&protocol::init_command(&self.settings)).await
    }

    async fn start(&mut self) -> Result<()> {
        self.link
            .send(&protocol::start_command(&self.settings))
            .await?;
        self.state = DeviceState::Starting;
        debug!("start sequence sent");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.link.send(protocol::STOP).await?;
        self.state = DeviceState::Stopping;
        debug!("stop sent");
        Ok(())
    }

    async fn start_overview(&mut self) -> Result<()> {
        self.link.send(protocol::OVERVIEW).await?;
        self.state = DeviceState::Overview;
        self.overview.begin(Utc::now());
        debug!("overview started");
        Ok(())
    }

    fn finish_overview(&mut self) {
        self.state = DeviceState::Stopped;
        let Some(report) = self.overview.finish(self.settings.agc_level) else {
            return;
        };
        info!(points = report.points.len(), "overview finished");
        if let Err(e) = self.overview_sink.write_overview(&report) {
            error!(error = %e, "cannot write overview report");
        }
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Return device and host to a known stopped state.
    ///
    /// Waits for any outstanding hand-off, empties both buffers, resets the
    /// stream parsers, optionally sends the device reset command and then
    /// discards stale input. Returns whether the line went quiet, or
    /// [`Error::ResetLoop`] when resets come too fast to continue.
    pub(crate) async fn reset(&mut self, send_command: bool) -> Result<bool> {
        self.producer.reset().await;
        self.decoder.reset();
        self.demux.reset();
        self.overview.abandon();
        self.state = DeviceState::Stopped;

        if send_command {
            self.link.send(protocol::RESET).await?;
        }
        let quiet = self.link.discard_input(FLUSH_LIMIT).await?;

        if self.resets.record(Instant::now()) {
            error!("reset loop detected, terminating");
            return Err(Error::ResetLoop);
        }
        Ok(quiet)
    }

    /// Reset, reinitialize and resume if acquisition was active.
    async fn recover(&mut self, fault: Fault) -> Result<()> {
        let resume = match fault {
            Fault::DeviceAutoReset => self.state == DeviceState::Running,
            _ => self.state.is_recording(),
        };
        match fault {
            Fault::DeviceAutoReset => warn!(state = %self.state, "hardware reset detected, resetting software"),
            _ => error!(state = %self.state, %fault, "resetting"),
        }

        if !self.reset(fault.needs_device_reset()).await? {
            warn!("device still sending after reset");
        }
        self.init().await?;
        if resume {
            self.start().await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control loop
    // -----------------------------------------------------------------------

    async fn apply_commands(&mut self) -> Result<()> {
        let flags = Arc::clone(&self.flags);

        if flags.is_pending(Command::Overview) {
            match self.state {
                DeviceState::Overview => flags.clear(Command::Overview),
                DeviceState::Starting | DeviceState::Running => {
                    // Resume recording once the overview is done.
                    self.stop().await?;
                    flags.request(Command::Start);
                }
                DeviceState::Stopped => {
                    flags.clear(Command::Overview);
                    self.start_overview().await?;
                }
                DeviceState::Stopping => {}
            }
        } else if flags.take(Command::Stop) {
            flags.clear(Command::Start);
            if self.state.is_recording() {
                self.stop().await?;
            }
        } else if self.state == DeviceState::Stopped && flags.take(Command::Start) {
            // A start raised during an overview stays pending until the sweep
            // ends and the state is Stopped again.
            self.init().await?;
            self.start().await?;
        } else if self.state == DeviceState::Running && flags.take(Command::Start) {
            debug!("new output file requested");
            self.producer.request_switch();
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: &str) -> Result<()> {
        if message == protocol::MSG_STARTED {
            match self.state {
                DeviceState::Starting => {
                    self.state = DeviceState::Running;
                    debug!("recording loop started");
                }
                state => debug!(%state, "ignoring unexpected start confirmation"),
            }
        } else if message == protocol::MSG_STOPPED {
            match self.state {
                DeviceState::Stopping => {
                    self.state = DeviceState::Stopped;
                    debug!("recording loop stopped");
                }
                state => debug!(%state, "ignoring unexpected stop confirmation"),
            }
        } else if message.contains(protocol::RESET_BANNER) {
            return self.recover(Fault::DeviceAutoReset).await;
        } else if self.state == DeviceState::Overview && self.overview.push_message(message) {
            // Overview point collected.
        } else {
            debug!(message = %message.escape_debug(), "device message");
        }
        Ok(())
    }

    async fn end_of_data(&mut self) -> Result<()> {
        self.link.send(protocol::STOP_SAMPLING).await?;
        self.decoder.reset();
        if !self.producer.flush(None).await {
            warn!("buffer flush at end of data interrupted");
        }
        Ok(())
    }

    async fn handle_byte(&mut self, byte: u8) -> Result<()> {
        match self.demux.push(byte) {
            None => Ok(()),
            Some(DemuxEvent::Message(message)) => self.handle_message(&message).await,
            Some(DemuxEvent::Data(digit)) => match self.decoder.push(digit) {
                Ok(HexWord::Sample(sample)) => {
                    if self.producer.store(sample) {
                        self.producer.swap().await;
                    }
                    Ok(())
                }
                Ok(HexWord::Pending | HexWord::EndMarker(_)) => Ok(()),
                Err(fault) => self.recover(fault).await,
            },
            Some(DemuxEvent::DataEnd) => self.end_of_data().await,
            Some(DemuxEvent::Unexpected(byte)) => self.recover(Fault::UnexpectedByte(byte)).await,
        }
    }

    /// Run one iteration of the control loop.
    ///
    /// Returns an error only for fatal conditions: transport failure or a
    /// reset loop.
    pub async fn step(&mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.poll(Utc::now(), self.state.is_recording(), &self.flags);
        }

        self.apply_commands().await?;

        if self.state == DeviceState::Stopped {
            tokio::time::sleep(IDLE_POLL).await;
            return Ok(());
        }

        match self.link.read_byte().await? {
            Some(byte) => self.handle_byte(byte).await,
            None if self.state == DeviceState::Overview => {
                self.finish_overview();
                Ok(())
            }
            None => self.recover(Fault::CommunicationTimeout).await,
        }
    }

    /// Stop the receiver and flush the current buffer, waiting at most the
    /// configured shutdown bound for the sink.
    pub async fn shutdown(&mut self) {
        info!("stopping receiver");
        if let Err(e) = self.link.send(protocol::HALT).await {
            warn!(error = %e, "cannot send stop to receiver");
        }
        if !self.producer.flush(Some(self.shutdown_wait)).await {
            warn!("failed to flush buffers cleanly, data loss possible");
        }
        self.state = DeviceState::Stopped;
        if let Err(e) = self.link.close().await {
            debug!(error = %e, "error closing device link");
        }
    }

    /// Configure the receiver and run the control loop until the cancel
    /// token fires or a fatal error occurs; both end with
    /// [`shutdown`](Self::shutdown).
    ///
    /// A start flag raised before calling this starts acquisition right
    /// away.
    ///
    /// A reset loop terminates at once: the link is closed without the halt
    /// command or the bounded flush.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_loop().await;
        if matches!(result, Err(Error::ResetLoop)) {
            self.abort().await;
        } else {
            self.shutdown().await;
        }
        result
    }

    async fn abort(&mut self) {
        self.state = DeviceState::Stopped;
        if let Err(e) = self.link.close().await {
            debug!(error = %e, "error closing device link");
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.init().await?;
        if self.flags.take(Command::Start) {
            self.start().await?;
        }
        info!(
            firmware = self.firmware.version,
            channels = self.settings.nchannels,
            samplerate = self.settings.samplerate,
            "acquisition loop running"
        );
        while !self.cancel.is_cancelled() {
            self.step().await?;
        }
        Ok(())
    }
}
