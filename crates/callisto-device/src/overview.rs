//! Spectral overview collection.
//!
//! During an overview the receiver sweeps its whole tuning range and
//! reports each point as a `CRX:<MHz>,<value>` status message. The sweep has
//! no end message; the engine finishes the report when the device goes
//! quiet.

use chrono::{DateTime, Utc};

/// Points kept per overview; the sweep covers exactly this many.
pub const MAX_OVERVIEW_POINTS: usize = 13_200;

/// One measured point of the overview sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverviewPoint {
    pub freq_mhz: f64,
    pub value: u32,
}

/// A finished overview, ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewReport {
    /// When the sweep was started.
    pub started: DateTime<Utc>,
    /// Gain level in effect (recorded in the report header).
    pub agc_level: u32,
    pub points: Vec<OverviewPoint>,
}

/// Parse a `CRX:<MHz>,<value>` overview line.
///
/// Whitespace around the numbers is tolerated, as is trailing text after
/// the value.
pub fn parse_point(message: &str) -> Option<OverviewPoint> {
    let body = message.strip_prefix("CRX:")?;
    let (freq, rest) = body.split_once(',')?;
    let freq_mhz = freq.trim().parse::<f64>().ok()?;
    let rest = rest.trim_start();
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let value = rest[..digits].parse::<u32>().ok()?;
    Some(OverviewPoint { freq_mhz, value })
}

/// Accumulates overview points between start and finish.
#[derive(Debug, Default)]
pub struct OverviewCollector {
    started: Option<DateTime<Utc>>,
    points: Vec<OverviewPoint>,
}

impl OverviewCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any previous points and start a new sweep.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.started = Some(now);
        self.points.clear();
    }

    /// Whether a sweep is being collected.
    pub fn is_active(&self) -> bool {
        self.started.is_some()
    }

    /// Points collected so far.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Feed a status message. Returns `true` if it was an overview point
    /// (kept or dropped past the cap).
    pub fn push_message(&mut self, message: &str) -> bool {
        match parse_point(message) {
            Some(point) => {
                if self.points.len() < MAX_OVERVIEW_POINTS {
                    self.points.push(point);
                }
                true
            }
            None => false,
        }
    }

    /// End the sweep and return its report.
    pub fn finish(&mut self, agc_level: u32) -> Option<OverviewReport> {
        let started = self.started.take()?;
        Some(OverviewReport {
            started,
            agc_level,
            points: std::mem::take(&mut self.points),
        })
    }

    /// Drop a sweep in progress.
    pub fn abandon(&mut self) {
        self.started = None;
        self.points.clear();
    }
}
