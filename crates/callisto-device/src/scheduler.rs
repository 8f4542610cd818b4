//! Daily schedule evaluation.
//!
//! The [`Scheduler`] owns the current entry list and a [`ScheduleSource`].
//! Once per control-loop iteration it fires due entries by raising command
//! flags; at most once per [`SCHEDULE_CHECK_INTERVAL`] it asks the source
//! whether it changed and, if so, replaces the list wholesale.
//!
//! Losing a schedule that used to have entries (source removed, unreadable
//! or now empty) disables scheduling and falls back to recording.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use callisto_core::error::{Error, Result};
use callisto_core::flags::CommandFlags;
use callisto_core::schedule::{
    ScheduleAction, ScheduleEntry, ScheduleLoad, ScheduleSource, SourceSignature, MAX_SCHEDULE,
    SECONDS_PER_DAY,
};
use callisto_core::types::Command;

/// Minimum time between two looks at the schedule source.
pub const SCHEDULE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Schedule state owned by the control loop.
pub struct Scheduler {
    source: Box<dyn ScheduleSource>,
    entries: Vec<ScheduleEntry>,
    signature: Option<SourceSignature>,
    last_check: Option<DateTime<Utc>>,
}

impl Scheduler {
    /// Create a scheduler with an empty list. Nothing is read until
    /// [`load`](Self::load) or the first [`poll`](Self::poll).
    pub fn new(source: Box<dyn ScheduleSource>) -> Self {
        Scheduler {
            source,
            entries: Vec::new(),
            signature: None,
            last_check: None,
        }
    }

    /// Current entries.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Read the source once at startup. An absent source is an empty
    /// schedule; an unreadable one is an error.
    pub fn load(&mut self, now: DateTime<Utc>) -> Result<&[ScheduleEntry]> {
        self.signature = self.source.signature()?;
        match self.source.load(now) {
            ScheduleLoad::Loaded(entries) => self.replace(entries),
            ScheduleLoad::Absent => {
                debug!("no schedule file");
                self.entries.clear();
            }
            ScheduleLoad::Failed(reason) => return Err(Error::Config(reason)),
        }
        Ok(&self.entries)
    }

    fn replace(&mut self, mut entries: Vec<ScheduleEntry>) {
        if entries.len() > MAX_SCHEDULE {
            warn!(entries = entries.len(), "too many schedule entries, truncating");
            entries.truncate(MAX_SCHEDULE);
        }
        if entries.is_empty() {
            warn!("loaded schedule is empty");
        } else {
            info!(entries = entries.len(), "schedule loaded");
        }
        self.entries = entries;
    }

    fn disable(&mut self, recording: bool, flags: &CommandFlags) {
        warn!("disabling scheduling and starting recording");
        self.entries.clear();
        if !recording {
            flags.request(Command::Start);
        }
    }

    fn check_source(&mut self, now: DateTime<Utc>, recording: bool, flags: &CommandFlags) {
        let had_schedule = !self.entries.is_empty();
        match self.source.signature() {
            Ok(None) => {
                if had_schedule {
                    warn!("schedule file has vanished");
                    self.disable(recording, flags);
                }
                self.signature = None;
            }
            Err(e) => {
                error!(error = %e, "cannot stat schedule file");
                if had_schedule {
                    self.disable(recording, flags);
                }
            }
            Ok(Some(signature)) if self.signature != Some(signature) => {
                debug!("schedule file changed, reloading");
                self.signature = Some(signature);
                match self.source.load(now) {
                    ScheduleLoad::Loaded(entries) => {
                        self.replace(entries);
                        if had_schedule && self.entries.is_empty() {
                            self.disable(recording, flags);
                        }
                    }
                    ScheduleLoad::Absent => {
                        if had_schedule {
                            warn!("schedule file has vanished");
                            self.disable(recording, flags);
                        }
                    }
                    ScheduleLoad::Failed(reason) => {
                        error!(%reason, "cannot read schedule file");
                        if had_schedule {
                            self.disable(recording, flags);
                        }
                    }
                }
            }
            Ok(Some(_)) => debug!("schedule file not changed"),
        }
    }

    /// Reload the source if due and changed, then fire every entry whose
    /// trigger time has passed.
    ///
    /// `recording` tells the fail-safe whether a start request is needed.
    pub fn poll(&mut self, now: DateTime<Utc>, recording: bool, flags: &CommandFlags) {
        let interval = TimeDelta::seconds(SCHEDULE_CHECK_INTERVAL.as_secs() as i64);
        if self.last_check.map_or(true, |last| now - last >= interval) {
            self.last_check = Some(now);
            self.check_source(now, recording, flags);
        }

        for entry in self.entries.iter_mut().filter(|e| now >= e.trigger) {
            match entry.action {
                ScheduleAction::Start => info!("recording (re)started by schedule"),
                ScheduleAction::Stop => info!("recording stopped by schedule"),
                ScheduleAction::Overview => info!("overview started by schedule"),
            }
            flags.request(entry.action.command());
            entry.trigger += TimeDelta::seconds(SECONDS_PER_DAY);
        }
    }
}
