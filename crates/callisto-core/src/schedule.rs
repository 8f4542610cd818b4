//! Schedule entries and the schedule-source interface.
//!
//! A schedule is a small ordered list of daily actions. The control loop
//! owns the list; a [`ScheduleSource`] only knows how to tell whether its
//! backing store changed and how to produce a fresh list.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::types::Command;

/// Maximum number of entries kept from one schedule source.
pub const MAX_SCHEDULE: usize = 150;

/// Seconds between two firings of the same entry.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// What a schedule entry does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleAction {
    Start,
    Stop,
    Overview,
}

impl ScheduleAction {
    /// Parse the measuring-mode code used in schedule files
    /// (0 = stop, 3 = start, 8 = overview).
    pub fn from_mode(mode: i64) -> Option<ScheduleAction> {
        match mode {
            0 => Some(ScheduleAction::Stop),
            3 => Some(ScheduleAction::Start),
            8 => Some(ScheduleAction::Overview),
            _ => None,
        }
    }

    /// The command flag this action raises.
    pub fn command(&self) -> Command {
        match self {
            ScheduleAction::Start => Command::Start,
            ScheduleAction::Stop => Command::Stop,
            ScheduleAction::Overview => Command::Overview,
        }
    }
}

/// One daily action with its next trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Next time this entry fires.
    pub trigger: DateTime<Utc>,
    pub action: ScheduleAction,
}

/// Modification signature of a schedule source.
///
/// Two equal signatures mean the source has not changed since the last load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSignature {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

/// Outcome of reloading a schedule source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleLoad {
    /// The source was read; the list may be empty.
    Loaded(Vec<ScheduleEntry>),
    /// The source does not exist.
    Absent,
    /// The source exists but could not be read.
    Failed(String),
}

/// A backing store for the schedule (normally a file).
pub trait ScheduleSource: Send {
    /// Current modification signature, `Ok(None)` when the source is absent.
    fn signature(&self) -> std::io::Result<Option<SourceSignature>>;

    /// Read the full schedule. Entries whose time of day has already passed
    /// at `now` are rolled forward to their next occurrence.
    fn load(&self, now: DateTime<Utc>) -> ScheduleLoad;
}

/// Pick the initial recording mode from a freshly loaded schedule.
///
/// Returns the action of the start/stop entry with the latest trigger time:
/// after roll-forward that entry is the one that fired most recently, so its
/// action is what should currently be in effect. `None` when the schedule
/// holds no start/stop entries.
pub fn initial_recording(entries: &[ScheduleEntry]) -> Option<bool> {
    entries
        .iter()
        .filter(|e| matches!(e.action, ScheduleAction::Start | ScheduleAction::Stop))
        .max_by_key(|e| e.trigger)
        .map(|e| e.action == ScheduleAction::Start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(h: u32, action: ScheduleAction) -> ScheduleEntry {
        ScheduleEntry {
            trigger: Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap(),
            action,
        }
    }

    #[test]
    fn action_from_mode() {
        assert_eq!(ScheduleAction::from_mode(0), Some(ScheduleAction::Stop));
        assert_eq!(ScheduleAction::from_mode(3), Some(ScheduleAction::Start));
        assert_eq!(ScheduleAction::from_mode(8), Some(ScheduleAction::Overview));
        assert_eq!(ScheduleAction::from_mode(1), None);
    }

    #[test]
    fn initial_recording_uses_latest_trigger() {
        let entries = [
            entry(6, ScheduleAction::Start),
            entry(18, ScheduleAction::Stop),
            entry(20, ScheduleAction::Overview),
        ];
        assert_eq!(initial_recording(&entries), Some(false));

        let entries = [
            entry(23, ScheduleAction::Start),
            entry(18, ScheduleAction::Stop),
        ];
        assert_eq!(initial_recording(&entries), Some(true));
    }

    #[test]
    fn initial_recording_ignores_overview_only() {
        assert_eq!(initial_recording(&[entry(5, ScheduleAction::Overview)]), None);
        assert_eq!(initial_recording(&[]), None);
    }
}
