//! Configuration file plus command-line overrides.
//!
//! The optional JSON file has two sections, both optional:
//!
//! ```json
//! {
//!   "reader":   { "family": "sportident", "port": "/dev/ttyUSB0", "timeout": 5000 },
//!   "pipeline": { "poll_interval": 500, "backup_dir": "/var/lib/punchlink" }
//! }
//! ```
//!
//! Flags given on the command line win over the file.

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use clap::Args;
use punchlink_core::DeviceFamily;
use punchlink_hardware::{PortSetting, ReaderConfig};
use punchlink_readout::PipelineConfig;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub reader: Option<ReaderConfig>,
    pub pipeline: Option<PipelineConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Reader and pipeline flags of the `read` command.
#[derive(Debug, Default, Args)]
pub struct ReadArgs {
    /// Reader family: sportident, sportiduino, srpid or sfr
    #[arg(short, long)]
    pub family: Option<DeviceFamily>,

    /// Serial port, or "auto" to probe
    #[arg(short, long)]
    pub port: Option<PortSetting>,

    /// Baud rate to try; repeat for a fallback sequence
    #[arg(short, long = "baud")]
    pub baud_rates: Vec<u32>,

    /// Response timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Pause between presence polls in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Race zero time (HH:MM:SS) for 12-hour cards
    #[arg(long)]
    pub zero_time: Option<NaiveTime>,

    /// Directory for the si<YYYYMMDD>.log backup files
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Trace wire traffic as hex
    #[arg(long)]
    pub debug_wire: bool,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Merge `file` and `args` into the configs of one readout session.
pub fn resolve(file: FileConfig, args: &ReadArgs) -> Result<(ReaderConfig, PipelineConfig)> {
    let family = match (args.family, &file.reader) {
        (Some(family), _) => family,
        (None, Some(reader)) => reader.family,
        (None, None) => bail!("no reader family given; use --family or a config file"),
    };

    let mut reader = match file.reader {
        Some(reader) if reader.family == family => reader,
        _ => ReaderConfig::for_family(family),
    };
    if let Some(port) = &args.port {
        reader.port = port.clone();
    }
    if !args.baud_rates.is_empty() {
        reader.baud_rates = args.baud_rates.clone();
    }
    if let Some(ms) = args.timeout_ms {
        reader.timeout = Duration::from_millis(ms);
    }
    reader.debug |= args.debug_wire;
    reader.validate().context("invalid reader configuration")?;

    let mut pipeline = file
        .pipeline
        .unwrap_or_else(|| PipelineConfig::for_family(family));
    if let Some(ms) = args.poll_ms {
        pipeline.poll_interval = Duration::from_millis(ms);
    }
    if let Some(zero_time) = args.zero_time {
        pipeline.zero_time = zero_time;
    }
    if let Some(dir) = &args.backup_dir {
        pipeline.backup_dir = Some(dir.clone());
    }

    Ok((reader, pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file(json: &str) -> FileConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_family_flag_alone() {
        let args = ReadArgs {
            family: Some(DeviceFamily::Sportident),
            ..ReadArgs::default()
        };
        let (reader, pipeline) = resolve(FileConfig::default(), &args).unwrap();
        assert_eq!(reader.baud_rates, vec![38400, 4800]);
        assert_eq!(reader.port, PortSetting::Auto);
        assert_eq!(pipeline.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_family_is_an_error() {
        assert!(resolve(FileConfig::default(), &ReadArgs::default()).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let config = file(
            r#"{
                "reader": {"family": "srpid", "port": "/dev/ttyUSB3", "baud_rates": [9600], "timeout": 3000},
                "pipeline": {"poll_interval": 800}
            }"#,
        );
        let args = ReadArgs {
            port: Some(PortSetting::Explicit("COM4".into())),
            poll_ms: Some(250),
            debug_wire: true,
            ..ReadArgs::default()
        };

        let (reader, pipeline) = resolve(config, &args).unwrap();
        assert_eq!(reader.family, DeviceFamily::Srpid);
        assert_eq!(reader.port, PortSetting::Explicit("COM4".into()));
        assert_eq!(reader.timeout, Duration::from_millis(3000));
        assert!(reader.debug);
        assert_eq!(pipeline.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_family_flag_replaces_other_family_reader_section() {
        let config = file(r#"{"reader": {"family": "srpid", "baud_rates": [9600], "timeout": 3000}}"#);
        let args = ReadArgs {
            family: Some(DeviceFamily::Sfr),
            ..ReadArgs::default()
        };
        let (reader, pipeline) = resolve(config, &args).unwrap();
        assert_eq!(reader.family, DeviceFamily::Sfr);
        assert!(reader.hid.is_some());
        assert_eq!(pipeline.poll_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = ReadArgs {
            family: Some(DeviceFamily::Sportiduino),
            timeout_ms: Some(0),
            ..ReadArgs::default()
        };
        assert!(resolve(FileConfig::default(), &args).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_sections() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"readers": {{}}}}"#).unwrap();
        assert!(FileConfig::load(tmp.path()).is_err());
    }
}
