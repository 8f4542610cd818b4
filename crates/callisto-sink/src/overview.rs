//! Overview report writer.
//!
//! Reports are appended to `<dir>/OVS_<instrument>_<YYYYMMDD>_<HHMMSS>.prn`
//! as semicolon-separated text:
//!
//! ```text
//! Frequency[MHz];Amplitude RX1[mV] at pwm=120
//!  45.000;512
//!  45.062;498
//! ```

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use tracing::{debug, info};

use callisto_core::error::Result;
use callisto_device::{OverviewReport, OverviewSink};

/// Appends overview reports to `.prn` files.
#[derive(Debug, Clone)]
pub struct PrnWriter {
    dir: PathBuf,
    instrument: String,
}

impl PrnWriter {
    pub fn new(dir: impl Into<PathBuf>, instrument: &str) -> Self {
        PrnWriter {
            dir: dir.into(),
            instrument: instrument.to_string(),
        }
    }

    pub fn file_path(&self, report: &OverviewReport) -> PathBuf {
        self.dir.join(format!(
            "OVS_{}_{}.prn",
            self.instrument,
            report.started.format("%Y%m%d_%H%M%S")
        ))
    }
}

/// Render a report in `.prn` format.
pub fn render(report: &OverviewReport) -> String {
    let mut out = format!(
        "Frequency[MHz];Amplitude RX1[mV] at pwm={}\n",
        report.agc_level
    );
    for point in &report.points {
        out.push_str(&format!("{:7.3};{}\n", point.freq_mhz, point.value));
    }
    out
}

impl OverviewSink for PrnWriter {
    fn write_overview(&mut self, report: &OverviewReport) -> Result<()> {
        let path = self.file_path(report);
        debug!(path = %path.display(), points = report.points.len(), "writing overview");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut out = BufWriter::new(file);
        out.write_all(render(report).as_bytes())?;
        out.flush()?;
        info!(path = %path.display(), "overview written");
        Ok(())
    }
}
