//! FITS image writer.
//!
//! One completed buffer becomes one file
//! `<dir>/<instrument>_<YYYYMMDD>_<HHMMSS>_<focuscode>.fit`, named after the
//! UTC time of its first sample. The primary HDU holds an 8-bit image with
//! time along NAXIS1 and frequency along NAXIS2 (highest channel first). A
//! binary-table extension carries the TIME and FREQUENCY axis values.

use std::path::PathBuf;

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use callisto_core::error::Result;
use callisto_device::{BufferSink, CompletedBuffer};

use crate::header::{pad_block, Header};

/// Station metadata recorded in every file.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub instrument: String,
    pub origin: String,
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    /// Meters above sea level.
    pub height: f64,
    /// Name of the channel file, as configured.
    pub frequency_file: String,
    pub agc_level: u32,
    pub focus_code: u32,
}

/// Writes each completed buffer as a FITS file.
#[derive(Debug, Clone)]
pub struct FitsWriter {
    dir: PathBuf,
    station: StationInfo,
    /// Channel frequencies in sweep order, in MHz.
    frequencies: Vec<f64>,
    samplerate: usize,
}

impl FitsWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        station: StationInfo,
        frequencies: Vec<f64>,
        samplerate: usize,
    ) -> Self {
        FitsWriter {
            dir: dir.into(),
            station,
            frequencies,
            samplerate,
        }
    }

    /// Output path for an image starting at `started`.
    pub fn file_path(&self, started: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{:02}.fit",
            self.station.instrument,
            started.format("%Y%m%d_%H%M%S"),
            self.station.focus_code
        ))
    }

    /// Encode a buffer as a complete FITS file.
    pub fn encode(&self, buffer: &CompletedBuffer) -> Vec<u8> {
        let height = buffer.nchannels;
        let width = buffer.sweeps();
        let samples = width * height;
        let sweep_seconds = height as f64 / self.samplerate.max(1) as f64;

        let started = buffer.started();
        let end_us = buffer.timestamp_us + 1_000_000 * samples as i64 / self.samplerate.max(1) as i64;
        let ended = DateTime::from_timestamp_micros(end_us).unwrap_or(started);

        // Transposed, and mirrored so the highest channel is the first row.
        let mut image = vec![0u8; samples];
        for x in 0..width {
            for y in 0..height {
                image[y * width + x] = buffer.data[x * height + height - 1 - y];
            }
        }
        let min = image.iter().copied().min().unwrap_or(0);
        let max = image.iter().copied().max().unwrap_or(0);

        let mut out = self.primary_header(started, ended, width, height, min, max, sweep_seconds);
        out.extend_from_slice(&image);
        pad_block(&mut out, 0);

        let times: Vec<f64> = (0..width).map(|x| x as f64 * sweep_seconds).collect();
        let freqs: Vec<f64> = (0..height)
            .rev()
            .map(|y| self.frequencies.get(y).copied().unwrap_or_default())
            .collect();
        out.extend_from_slice(&axis_table(&times, &freqs));
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn primary_header(
        &self,
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
        width: usize,
        height: usize,
        min: u8,
        max: u8,
        sweep_seconds: f64,
    ) -> Vec<u8> {
        let s = &self.station;
        let day_seconds = started.num_seconds_from_midnight() as f64;
        let mut h = Header::new();
        h.logical("SIMPLE", true, Some("file does conform to FITS standard"))
            .int("BITPIX", 8, Some("number of bits per data pixel"))
            .int("NAXIS", 2, Some("number of data axes"))
            .int("NAXIS1", width as i64, Some("length of data axis 1"))
            .int("NAXIS2", height as i64, Some("length of data axis 2"))
            .logical("EXTEND", true, Some("FITS dataset may contain extensions"))
            .comment(&format!(
                " File created by e-Callisto for Unix version {}",
                env!("CARGO_PKG_VERSION")
            ))
            .string("DATE", &started.format("%Y-%m-%d").to_string(), Some("Time of observation"))
            .string(
                "CONTENT",
                &format!(
                    "{}  Radio flux density, e-CALLISTO ({})",
                    started.format("%Y/%m/%d"),
                    s.instrument
                ),
                Some("Title of image"),
            )
            .string("ORIGIN", &s.origin, Some("Organization name"))
            .string("TELESCOP", "Radio Spectrometer", Some("Type of instrument"))
            .string("INSTRUME", &s.instrument, Some("Name of the spectrometer"))
            .string("OBJECT", "Sun", Some("object description"))
            .string(
                "DATE-OBS",
                &started.format("%Y/%m/%d").to_string(),
                Some("Date observation starts"),
            )
            .string(
                "TIME-OBS",
                &started.format("%H:%M:%S%.3f").to_string(),
                Some("Time observation starts"),
            )
            .string(
                "DATE-END",
                &ended.format("%Y/%m/%d").to_string(),
                Some("date observation ends"),
            )
            .string(
                "TIME-END",
                &ended.format("%H:%M:%S").to_string(),
                Some("time observation ends"),
            )
            .float("BZERO", 0.0, Some("scaling offset"))
            .float("BSCALE", 1.0, Some("scaling factor"))
            .string("BUNIT", "digits", Some("z-axis title"))
            .int("DATAMIN", i64::from(min), Some("minimum element in image"))
            .int("DATAMAX", i64::from(max), Some("maximum element in image"))
            .float("CRVAL1", day_seconds, Some("value on axis 1 at reference pixel [sec of day]"))
            .int("CRPIX1", 0, Some("reference pixel of axis 1"))
            .string("CTYPE1", "Time [UT]", Some("title of axis 1"))
            .float(
                "CDELT1",
                sweep_seconds,
                Some("step between first and second element in x-axis [sec]"),
            )
            .float("CRVAL2", height as f64, Some("value on axis 2 at the reference pixel"))
            .int("CRPIX2", 0, Some("reference pixel of axis 2"))
            .string("CTYPE2", "Frequency [MHz]", Some("title of axis 2"))
            .float("CDELT2", -1.0, Some("step between first and second element in y-axis"))
            .comment(" Warning: the value of CDELT1 may be rounded!")
            .comment(" Warning: the frequency axis may not be regular!")
            .comment(" Warning: the value of CDELT2 may be rounded!")
            .float("OBS_LAT", s.latitude.abs(), Some("observatory latitude in degree"))
            .string(
                "OBS_LAC",
                if s.latitude < 0.0 { "S" } else { "N" },
                Some("observatory latitude code {N,S}"),
            )
            .float("OBS_LON", s.longitude.abs(), Some("observatory longitude in degree"))
            .string(
                "OBS_LOC",
                if s.longitude < 0.0 { "W" } else { "E" },
                Some("observatory longitude code {E,W}"),
            )
            .float("OBS_ALT", s.height, Some("observatory altitude in meter asl"))
            .string("FRQFILE", &s.frequency_file, Some("name of frequency file"))
            .int("PWM_VAL", i64::from(s.agc_level), Some("PWM value to control tuner gain"));
        h.to_bytes()
    }
}

/// Binary table extension with one row holding both axis vectors.
fn axis_table(times: &[f64], freqs: &[f64]) -> Vec<u8> {
    let row_bytes = 8 * (times.len() + freqs.len());
    let mut h = Header::new();
    h.string("XTENSION", "BINTABLE", Some("binary table extension"))
        .int("BITPIX", 8, Some("8-bit bytes"))
        .int("NAXIS", 2, Some("2-dimensional binary table"))
        .int("NAXIS1", row_bytes as i64, Some("width of table in bytes"))
        .int("NAXIS2", 1, Some("number of rows in table"))
        .int("PCOUNT", 0, Some("size of special data area"))
        .int("GCOUNT", 1, Some("one data group (required keyword)"))
        .int("TFIELDS", 2, Some("number of fields in each row"))
        .string("TTYPE1", "TIME", Some("label for field 1"))
        .string("TFORM1", &format!("{}D8.3", times.len()), Some("data format of field: 8-byte DOUBLE"))
        .string("TTYPE2", "FREQUENCY", Some("label for field 2"))
        .string("TFORM2", &format!("{}D8.3", freqs.len()), Some("data format of field: 8-byte DOUBLE"))
        .float("TSCAL1", 1.0, None)
        .float("TSCAL2", 1.0, None)
        .float("TZERO1", 0.0, None)
        .float("TZERO2", 0.0, None);

    let mut out = h.to_bytes();
    for value in times.iter().chain(freqs) {
        out.extend_from_slice(&value.to_be_bytes());
    }
    pad_block(&mut out, 0);
    out
}

impl BufferSink for FitsWriter {
    fn write(&mut self, buffer: &CompletedBuffer) -> Result<()> {
        let path = self.file_path(buffer.started());
        debug!(path = %path.display(), sweeps = buffer.sweeps(), "writing FITS file");
        std::fs::write(&path, self.encode(buffer))?;
        Ok(())
    }
}
