//! The daemon configuration file (`callisto.cfg`).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use callisto_core::error::{Error, Result};
use callisto_core::types::{ClockSource, ReceiverSettings};

use crate::channels::ChannelPlan;
use crate::parser;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "callisto.cfg";

/// Default schedule file name.
pub const DEFAULT_SCHEDULE_FILE: &str = "scheduler.cfg";

/// The only measuring mode this daemon supports (continuous recording).
pub const SUPPORTED_MMODE: i64 = 3;

const REQUIRED_KEYS: [&str; 10] = [
    "rxcomport",
    "instrument",
    "origin",
    "frqfile",
    "datapath",
    "longitude",
    "latitude",
    "height",
    "filetime",
    "focuscode",
];

/// Observatory position, in degrees (east and north positive) and meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

/// Parsed daemon configuration.
///
/// File names are already resolved against the directory of the
/// configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub serial_port: String,
    pub instrument: String,
    pub origin: String,
    pub channel_file: PathBuf,
    pub data_dir: PathBuf,
    /// Directory for overview reports; defaults to `data_dir`.
    pub overview_dir: PathBuf,
    pub schedule_file: PathBuf,
    pub location: Location,
    pub charge_pump: bool,
    pub agc_level: u32,
    pub clock_source: ClockSource,
    /// Seconds per output file.
    pub filetime: usize,
    pub focus_code: u32,
    /// `Some` when forced by the configuration, `None` to follow the
    /// schedule.
    pub autostart: Option<bool>,
    /// TCP port of the command server, 0 when disabled.
    pub net_port: u16,
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot open configuration file {}: {e}", path.display()))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        debug!(path = %path.display(), "reading configuration");
        Config::parse(&text, base)
    }

    /// Parse configuration text, resolving relative file names against
    /// `base`.
    pub fn parse(text: &str, base: &Path) -> Result<Config> {
        let mut serial_port = None;
        let mut instrument = None;
        let mut origin = None;
        let mut channel_file = None;
        let mut data_dir = None;
        let mut overview_dir = None;
        let mut schedule_file = None;
        let mut longitude = None;
        let mut latitude = None;
        let mut height = None;
        let mut filetime = None;
        let mut focus_code = None;
        let mut charge_pump = true;
        let mut agc_level = 120;
        let mut clock_source = ClockSource::Internal;
        let mut autostart = None;
        let mut net_port = 0;
        let mut mmode = SUPPORTED_MMODE;

        for kv in parser::key_values(text)? {
            let value = kv.value.as_str();
            match kv.key.as_str() {
                "rxcomport" => serial_port = Some(value.to_string()),
                "instrument" => instrument = Some(value.to_string()),
                "origin" => origin = Some(value.to_string()),
                "frqfile" => channel_file = Some(resolve(base, value)),
                "datapath" => data_dir = Some(resolve(base, value)),
                "ovspath" => overview_dir = Some(resolve(base, value)),
                "schedulefile" => schedule_file = Some(resolve(base, value)),
                "longitude" => longitude = Some(parse_coordinate(&kv, 'E', 'W')?),
                "latitude" => latitude = Some(parse_coordinate(&kv, 'N', 'S')?),
                "height" => height = Some(parse_number::<f64>(&kv)?),
                "chargepump" => charge_pump = parse_number::<i64>(&kv)? != 0,
                "agclevel" => {
                    agc_level = parse_number::<u32>(&kv)?;
                    if agc_level > 255 {
                        return Err(invalid(&kv));
                    }
                }
                "clocksource" => {
                    clock_source = ClockSource::from_code(parse_number(&kv)?)
                        .ok_or_else(|| invalid(&kv))?;
                }
                "filetime" => filetime = Some(parse_number::<usize>(&kv)?),
                "focuscode" => focus_code = Some(parse_number::<u32>(&kv)?),
                "autostart" => {
                    autostart = match parse_number::<i64>(&kv)? {
                        n if n < 0 => None,
                        0 => Some(false),
                        _ => Some(true),
                    };
                }
                "net_port" => net_port = parse_number::<u16>(&kv)?,
                "mmode" => mmode = parse_number::<i64>(&kv)?,
                other => debug!(key = other, "ignoring configuration key"),
            }
        }

        let present = [
            serial_port.is_some(),
            instrument.is_some(),
            origin.is_some(),
            channel_file.is_some(),
            data_dir.is_some(),
            longitude.is_some(),
            latitude.is_some(),
            height.is_some(),
            filetime.is_some(),
            focus_code.is_some(),
        ];
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .zip(present)
            .filter(|(_, found)| !found)
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing configuration variables: {}",
                missing.join(", ")
            )));
        }

        if mmode != SUPPORTED_MMODE {
            return Err(Error::Config(format!("measuring mode {mmode} not supported")));
        }

        let filetime = filetime.unwrap_or_default();
        if filetime == 0 {
            return Err(Error::Config("filetime must be positive".into()));
        }

        let data_dir = data_dir.unwrap_or_default();
        Ok(Config {
            serial_port: serial_port.unwrap_or_default(),
            instrument: instrument.unwrap_or_default(),
            origin: origin.unwrap_or_default(),
            channel_file: channel_file.unwrap_or_default(),
            overview_dir: overview_dir.unwrap_or_else(|| data_dir.clone()),
            data_dir,
            schedule_file: schedule_file.unwrap_or_else(|| resolve(base, DEFAULT_SCHEDULE_FILE)),
            location: Location {
                longitude: longitude.unwrap_or_default(),
                latitude: latitude.unwrap_or_default(),
                height: height.unwrap_or_default(),
            },
            charge_pump,
            agc_level,
            clock_source,
            filetime,
            focus_code: focus_code.unwrap_or_default(),
            autostart,
            net_port,
        })
    }

    /// Combine this configuration with a channel plan into the settings
    /// the acquisition engine runs with.
    pub fn receiver_settings(&self, plan: &ChannelPlan) -> ReceiverSettings {
        ReceiverSettings {
            clock_source: self.clock_source,
            agc_level: self.agc_level,
            charge_pump: self.charge_pump,
            focus_code: self.focus_code,
            nchannels: plan.channels.len(),
            samplerate: plan.samplerate,
            filetime: self.filetime,
            local_oscillator: plan.local_oscillator,
        }
    }
}

/// Resolve `value` against `base` unless it is absolute.
pub fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn invalid(kv: &parser::KeyValue) -> Error {
    Error::Config(format!(
        "invalid value for [{}] on line {}: {:?}",
        kv.key, kv.line, kv.value
    ))
}

fn parse_number<T: FromStr>(kv: &parser::KeyValue) -> Result<T> {
    kv.value.trim().parse().map_err(|_| invalid(kv))
}

/// Parse `E,7.5`-style coordinates. `negative` flips the sign.
fn parse_coordinate(kv: &parser::KeyValue, positive: char, negative: char) -> Result<f64> {
    let mut chars = kv.value.chars();
    let hemisphere = chars.next().map(|c| c.to_ascii_uppercase());
    let degrees: f64 = chars
        .as_str()
        .trim_start()
        .strip_prefix(',')
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| invalid(kv))?;
    match hemisphere {
        Some(c) if c == positive => Ok(degrees),
        Some(c) if c == negative => Ok(-degrees),
        _ => Err(invalid(kv)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = "\
// station setup
[rxcomport]=/dev/ttyUSB0
[instrument]=TESTSITE
[origin]=Test Observatory
[frqfile]=frq00005.cfg
[datapath]=/var/lib/callisto/
[longitude]=W,7.5
[latitude]=n , 47.25
[height]=416
[filetime]=900
[focuscode]=59
";

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL, Path::new("/etc/callisto")).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.instrument, "TESTSITE");
        assert_eq!(config.origin, "Test Observatory");
        assert_eq!(config.channel_file, PathBuf::from("/etc/callisto/frq00005.cfg"));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/callisto/"));
        assert_eq!(config.overview_dir, config.data_dir);
        assert_eq!(config.schedule_file, PathBuf::from("/etc/callisto/scheduler.cfg"));
        assert_eq!(config.location.longitude, -7.5);
        assert_eq!(config.location.latitude, 47.25);
        assert_eq!(config.location.height, 416.0);
        assert!(config.charge_pump);
        assert_eq!(config.agc_level, 120);
        assert_eq!(config.clock_source, ClockSource::Internal);
        assert_eq!(config.filetime, 900);
        assert_eq!(config.focus_code, 59);
        assert_eq!(config.autostart, None);
        assert_eq!(config.net_port, 0);
    }

    #[test]
    fn optional_keys_override_defaults() {
        let text = format!(
            "{MINIMAL}[chargepump]=0\n[AGCLEVEL]=150\n[clocksource]=2\n[autostart]=1\n\
             [net_port]=6789\n[ovspath]=ovs\n[schedulefile]=/opt/sched.cfg\n[mmode]=3\n"
        );
        let config = Config::parse(&text, Path::new("/etc/callisto")).unwrap();
        assert!(!config.charge_pump);
        assert_eq!(config.agc_level, 150);
        assert_eq!(config.clock_source, ClockSource::External);
        assert_eq!(config.autostart, Some(true));
        assert_eq!(config.net_port, 6789);
        assert_eq!(config.overview_dir, PathBuf::from("/etc/callisto/ovs"));
        assert_eq!(config.schedule_file, PathBuf::from("/opt/sched.cfg"));
    }

    #[test]
    fn autostart_negative_follows_schedule() {
        let text = format!("{MINIMAL}[autostart]=-1\n");
        assert_eq!(Config::parse(&text, Path::new("")).unwrap().autostart, None);
        let text = format!("{MINIMAL}[autostart]=0\n");
        assert_eq!(Config::parse(&text, Path::new("")).unwrap().autostart, Some(false));
    }

    #[test]
    fn missing_keys_are_listed() {
        let text = MINIMAL.replace("[origin]=Test Observatory\n", "");
        let text = text.replace("[height]=416\n", "");
        let err = Config::parse(&text, Path::new("")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("origin"), "{msg}");
        assert!(msg.contains("height"), "{msg}");
    }

    #[test]
    fn unsupported_mmode_is_rejected() {
        let text = format!("{MINIMAL}[mmode]=8\n");
        let err = Config::parse(&text, Path::new("")).unwrap_err();
        assert!(err.to_string().contains("measuring mode 8"));
    }

    #[test]
    fn bad_coordinate_is_rejected() {
        let text = MINIMAL.replace("W,7.5", "X,7.5");
        assert!(matches!(Config::parse(&text, Path::new("")), Err(Error::Config(_))));
        let text = MINIMAL.replace("W,7.5", "W 7.5");
        assert!(matches!(Config::parse(&text, Path::new("")), Err(Error::Config(_))));
    }

    #[test]
    fn bad_number_is_rejected() {
        let text = MINIMAL.replace("[filetime]=900", "[filetime]=soon");
        let err = Config::parse(&text, Path::new("")).unwrap_err();
        assert!(err.to_string().contains("[filetime]"));
    }

    #[test]
    fn load_resolves_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callisto.cfg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.channel_file, dir.path().join("frq00005.cfg"));
        assert_eq!(config.schedule_file, dir.path().join("scheduler.cfg"));
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.cfg")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
