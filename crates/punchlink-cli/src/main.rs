//! `punchlink`: read punch cards from the command line.
//!
//! ```bash
//! punchlink ports
//! punchlink read --family sportiduino --port /dev/ttyUSB0 --backup-dir ./backup
//! punchlink replay ./backup/si20250614.log --card-type si5 --zero-time 10:00:00
//! ```
//!
//! Logging goes to stderr and honours `RUST_LOG`; results go to stdout.

mod settings;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use punchlink_core::{CardType, DomainResult, FixedRaceClock, clock::default_zero_time};
use punchlink_hardware::PortSelector;
use punchlink_readout::{ReadoutController, backup::BackupReader, normalize};
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{FileConfig, ReadArgs, resolve};

#[derive(Parser)]
#[command(name = "punchlink")]
#[command(about = "Punch card readout for orienteering timing stations", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate serial ports and whether they open
    Ports,

    /// Read cards from a station until interrupted
    Read(ReadArgs),

    /// Normalize the cards of a backup log again
    Replay {
        /// Backup file (si<YYYYMMDD>.log)
        file: PathBuf,

        /// Card type the log was written for
        #[arg(long, default_value = "si5")]
        card_type: CardType,

        /// Race zero time (HH:MM:SS)
        #[arg(long)]
        zero_time: Option<NaiveTime>,

        /// First race day, if not the date in the file name
        #[arg(long)]
        race_date: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Output {
    Text,
    Json,
}

impl Output {
    fn print(self, result: &DomainResult) {
        match self {
            Output::Json => match serde_json::to_string(result) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "result not serializable"),
            },
            Output::Text => {
                let time = |t: Option<NaiveTime>| t.map_or_else(|| "-".to_string(), |t| t.to_string());
                println!(
                    "card {} ({}) start {} finish {}",
                    result.card_number,
                    result.card_type,
                    time(result.start_time),
                    time(result.finish_time)
                );
                for split in &result.splits {
                    println!("  {:>4}  {}  day {}", split.code, split.time, split.day_offset);
                }
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = if cli.json { Output::Json } else { Output::Text };

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Read(args) => read(args, output).await,
        Commands::Replay {
            file,
            card_type,
            zero_time,
            race_date,
        } => replay(file, card_type, zero_time, race_date, output),
    }
}

fn list_ports() -> Result<()> {
    let selector = PortSelector::new();
    let available = selector.available();
    let candidates = selector.candidates();
    if candidates.is_empty() {
        println!("no candidate serial ports");
    }
    for port in candidates {
        let state = if available.contains(&port) {
            "available"
        } else {
            "unavailable"
        };
        println!("{port}\t{state}");
    }
    Ok(())
}

async fn read(args: ReadArgs, output: Output) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let (reader, pipeline) = resolve(file, &args)?;
    let family = reader.family;

    let mut controller = ReadoutController::new(reader, pipeline)
        .with_callback(move |result| output.print(&result));
    controller
        .start()
        .with_context(|| format!("starting {family} readout"))?;
    info!(%family, "waiting for cards, Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    let died = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("waiting for Ctrl-C")?;
                info!("interrupted");
                break false;
            }
            _ = ticker.tick() => {
                if !controller.is_alive() {
                    break true;
                }
            }
        }
    };

    controller.stop();
    controller.wait().await;

    if died {
        let status = controller.status();
        bail!(
            "{family} readout ended (acquisition {}, normalization {}); restart to retry",
            status.acquisition,
            status.normalization
        );
    }
    Ok(())
}

fn replay(
    file: PathBuf,
    card_type: CardType,
    zero_time: Option<NaiveTime>,
    race_date: Option<NaiveDate>,
    output: Output,
) -> Result<()> {
    let records = BackupReader::read_file(&file, card_type)
        .with_context(|| format!("reading backup log {}", file.display()))?;
    let race_date = race_date
        .or_else(|| BackupReader::date_from_path(&file))
        .unwrap_or_else(|| Local::now().date_naive());
    let clock = FixedRaceClock::new(race_date, zero_time.unwrap_or_else(default_zero_time));

    info!(records = records.len(), file = %file.display(), "replaying backup log");
    for record in &records {
        output.print(&normalize(record, &clock));
    }
    Ok(())
}
