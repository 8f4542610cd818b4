//! The schedule file.
//!
//! Each line is `HH:MM:SS,focuscode,mode` in UTC, where mode is 0 (stop),
//! 3 (start) or 8 (overview). Entries for other focus codes are skipped,
//! since this daemon never switches focus codes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tracing::{debug, warn};

use callisto_core::schedule::{
    ScheduleAction, ScheduleEntry, ScheduleLoad, ScheduleSource, SourceSignature, MAX_SCHEDULE,
    SECONDS_PER_DAY,
};

use crate::parser;

/// A schedule stored in a file, reloaded when its mtime or size change.
#[derive(Debug, Clone)]
pub struct ScheduleFile {
    path: PathBuf,
    focus_code: u32,
}

impl ScheduleFile {
    pub fn new(path: impl Into<PathBuf>, focus_code: u32) -> Self {
        ScheduleFile {
            path: path.into(),
            focus_code,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse schedule text relative to `now`.
    pub fn parse(&self, text: &str, now: DateTime<Utc>) -> ScheduleLoad {
        let lines = match parser::content_lines(text) {
            Ok(lines) => lines,
            Err(e) => return ScheduleLoad::Failed(e.to_string()),
        };

        let mut entries = Vec::new();
        for (line, content) in lines {
            let Some((time, focus_code, mode)) = parse_line(content) else {
                warn!(line, content, "malformed schedule file entry");
                continue;
            };
            let Some(time) = time else {
                warn!(line, content, "invalid schedule timestamp");
                continue;
            };
            if focus_code != i64::from(self.focus_code) {
                debug!(line, content, "skipping schedule entry of another focus code");
                continue;
            }
            let Some(action) = ScheduleAction::from_mode(mode) else {
                warn!(line, mode, "unsupported measuring mode in schedule file");
                continue;
            };
            if entries.len() >= MAX_SCHEDULE {
                warn!("too many entries in schedule file");
                break;
            }
            let trigger = next_occurrence(time, now);
            debug!(line, %trigger, ?action, "added schedule entry");
            entries.push(ScheduleEntry { trigger, action });
        }
        ScheduleLoad::Loaded(entries)
    }
}

impl ScheduleSource for ScheduleFile {
    fn signature(&self) -> std::io::Result<Option<SourceSignature>> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(SourceSignature {
                modified: meta.modified().ok(),
                len: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load(&self, now: DateTime<Utc>) -> ScheduleLoad {
        debug!(path = %self.path.display(), "reading schedule file");
        match std::fs::read_to_string(&self.path) {
            Ok(text) => self.parse(&text, now),
            Err(e) if e.kind() == ErrorKind::NotFound => ScheduleLoad::Absent,
            Err(e) => ScheduleLoad::Failed(format!(
                "cannot open schedule file {}: {e}",
                self.path.display()
            )),
        }
    }
}

/// Today's occurrence of `time`, or tomorrow's if it already passed.
fn next_occurrence(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let trigger = now.date_naive().and_time(time).and_utc();
    if trigger < now {
        trigger + TimeDelta::seconds(SECONDS_PER_DAY)
    } else {
        trigger
    }
}

/// Split `HH:MM:SS,fc,mode`. The time is `None` when out of range.
fn parse_line(content: &str) -> Option<(Option<NaiveTime>, i64, i64)> {
    let mut fields = content.splitn(3, ',');
    let clock = fields.next()?;
    let focus_code = fields.next()?.trim().parse().ok()?;
    let mode = leading_int(fields.next()?)?;

    let mut parts = clock.split(':').map(|p| p.trim().parse::<i64>());
    let (h, m, s) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(h)), Some(Ok(m)), Some(Ok(s)), None) => (h, m, s),
        _ => return None,
    };
    let time = if (0..=23).contains(&h) && (0..=59).contains(&m) && (0..=59).contains(&s) {
        NaiveTime::from_hms_opt(h as u32, m as u32, s as u32)
    } else {
        None
    };
    Some((time, focus_code, mode))
}

/// Leading (optionally signed) integer, ignoring trailing text.
fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    fn entries(load: ScheduleLoad) -> Vec<ScheduleEntry> {
        match load {
            ScheduleLoad::Loaded(entries) => entries,
            other => panic!("unexpected load result {other:?}"),
        }
    }

    #[test]
    fn entries_roll_forward_when_passed() {
        let schedule = ScheduleFile::new("unused", 59);
        let text = "06:00:00,59,3\n18:30:00,59,0 // evening\n12:00:00,59,8\n";
        let loaded = entries(schedule.parse(text, at(12, 0, 0)));
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].trigger, at(6, 0, 0) + TimeDelta::days(1));
        assert_eq!(loaded[0].action, ScheduleAction::Start);
        assert_eq!(loaded[1].trigger, at(18, 30, 0));
        assert_eq!(loaded[1].action, ScheduleAction::Stop);
        // Exactly now is not in the past.
        assert_eq!(loaded[2].trigger, at(12, 0, 0));
        assert_eq!(loaded[2].action, ScheduleAction::Overview);
    }

    #[test]
    fn invalid_lines_are_skipped() {
        let schedule = ScheduleFile::new("unused", 59);
        let text = "\
garbage
24:00:00,59,3
10:60:00,59,3
10:00:00,01,3
10:00:00,59,5
10:00:00 , 59 , 3
";
        let loaded = entries(schedule.parse(text, at(1, 0, 0)));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].trigger, at(10, 0, 0));
    }

    #[test]
    fn entry_count_is_capped() {
        let schedule = ScheduleFile::new("unused", 59);
        let text: String = (0..MAX_SCHEDULE + 5)
            .map(|i| format!("{:02}:{:02}:00,59,8\n", i / 60 % 24, i % 60))
            .collect();
        assert_eq!(entries(schedule.parse(&text, at(0, 0, 0))).len(), MAX_SCHEDULE);
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let schedule = ScheduleFile::new(dir.path().join("scheduler.cfg"), 59);
        assert_eq!(schedule.signature().unwrap(), None);
        assert_eq!(schedule.load(at(0, 0, 0)), ScheduleLoad::Absent);
    }

    #[test]
    fn signature_tracks_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.cfg");
        std::fs::write(&path, "06:00:00,59,3\n").unwrap();
        let schedule = ScheduleFile::new(&path, 59);
        let first = schedule.signature().unwrap().unwrap();
        assert_eq!(entries(schedule.load(at(0, 0, 0))).len(), 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"18:00:00,59,0\n").unwrap();
        drop(file);
        let second = schedule.signature().unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(entries(schedule.load(at(0, 0, 0))).len(), 2);
    }

    #[test]
    fn leading_int_ignores_trailing_text() {
        assert_eq!(leading_int(" 3 extra"), Some(3));
        assert_eq!(leading_int("-1"), Some(-1));
        assert_eq!(leading_int("x"), None);
    }
}
