use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use tekscope::{load_config, AcquireOptions, AcquisitionPolicy, Oscilloscope, SampleRange, TransportKind, WaveformSet};

/// Pull waveforms off a Tektronix oscilloscope
#[derive(Parser, Debug)]
#[command(name = "tekscope")]
#[command(about = "Fetch calibrated waveforms from a Tektronix oscilloscope as JSON", long_about = None)]
struct Args {
    /// Sources to acquire, in order
    #[arg(value_name = "SOURCE", default_value = "CH1")]
    sources: Vec<String>,

    /// Configuration file (defaults to tekscope.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host name, IP address or serial device; overrides the config file
    #[arg(short, long)]
    address: Option<String>,

    /// network (VXI-11), socket, serial or http
    #[arg(short, long)]
    transport: Option<TransportKind>,

    /// I/O timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// First record point to transfer (1-based)
    #[arg(long)]
    start: Option<usize>,

    /// Last record point to transfer; defaults to the record length
    #[arg(long)]
    stop: Option<usize>,

    /// Keep going when a source fails to decode
    #[arg(long)]
    best_effort: bool,

    /// Turn the requested sources on before reading them
    #[arg(long)]
    enable: bool,

    /// Print the instrument identification
    #[arg(long)]
    idn: bool,

    /// Read a saved spreadsheet (CSV) instead of talking to a scope
    #[arg(long, value_name = "CSV", conflicts_with_all = ["address", "transport"])]
    import: Option<PathBuf>,

    /// Write JSON here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let data = match &args.import {
        Some(path) => WaveformSet::from_spreadsheet(File::open(path)?)?,
        None => acquire(&args)?,
    };

    for skipped in data.skipped() {
        error!("{} skipped: {}", skipped.source, skipped.reason);
    }

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &data)?;
            writer.flush()?;
            info!("Wrote {} waveforms to {}", data.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &data)?;
            writeln!(writer)?;
        }
    }

    Ok(())
}

fn acquire(args: &Args) -> Result<WaveformSet, Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if args.idn {
        config.print_idn = true;
    }
    if args.best_effort {
        config.policy = AcquisitionPolicy::BestEffort;
    }

    info!("Connecting to {} over {}", config.address, config.transport);
    let mut osc = Oscilloscope::connect(&config)?;

    let options = AcquireOptions {
        range: SampleRange::new(args.start, args.stop),
        enable_channels: args.enable,
        policy: config.policy,
    };
    let data = osc.get_data_with(&args.sources, &options)?;

    if let Some((source, wf)) = data.iter().next() {
        info!("{}: {} points, {} s/pt", source, wf.len(), wf.header().x_increment);
    }

    osc.close()?;
    Ok(data)
}
