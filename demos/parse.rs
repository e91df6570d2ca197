use clap::{Parser as ClapParser, ValueEnum};
use divecomputer::{Context, Descriptor, LogLevel, Parser as _, parser};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    #[value(name = "pretty-json")]
    PrettyJson,
    Raw,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Parse previously downloaded dives", long_about = None)]
struct Args {
    /// Input files to parse
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output filename (if not specified, prints to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "pretty-json")]
    format: OutputFormat,

    /// Device name (e.g., "Suunto Vyper" or "Galileo Sol")
    #[arg(short, long)]
    device: Option<String>,

    /// Device family (e.g., "uwatec-smart")
    #[arg(long)]
    family: Option<String>,

    /// Model number
    #[arg(short, long)]
    model: Option<u32>,

    /// Device time at download (half-second ticks)
    #[arg(short = 'd', long)]
    devtime: Option<u32>,

    /// System time at download (UNIX timestamp)
    #[arg(short = 's', long)]
    systime: Option<i64>,

    /// Dive fingerprint, hex encoded
    #[arg(short = 'p', long)]
    fingerprint: Option<String>,

    /// Log level (0-5, where 0=none, 5=all)
    #[arg(short = 'v', long, default_value = "2")]
    loglevel: u8,
}

#[derive(Debug, Serialize)]
struct DiveOutput {
    vendor: String,
    product: String,
    dives: Vec<divecomputer::Dive>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {}", err.to_status());
            ExitCode::FAILURE
        }
    }
}

fn run() -> divecomputer::Result<()> {
    let args = Args::parse();

    let context = Context::default();
    context.set_loglevel(match args.loglevel {
        0 => LogLevel::None,
        1 => LogLevel::Error,
        2 => LogLevel::Warning,
        3 => LogLevel::Info,
        4 => LogLevel::Debug,
        _ => LogLevel::All,
    });
    context.set_logfunc(|level, _file, _line, function, message| {
        eprintln!("{level}: [{function}] {message}");
    });

    let descriptor = find_descriptor(&args)?;

    let fingerprint = match &args.fingerprint {
        Some(hex) => parser::hex_string_to_bytes(hex)
            .map_err(|err| divecomputer::DcError::InvalidArguments(err.to_string()))?,
        None => Vec::new(),
    };

    let mut output = DiveOutput {
        vendor: descriptor.vendor().to_string(),
        product: descriptor.product().to_string(),
        dives: Vec::new(),
    };

    for path in &args.files {
        let data = fs::read(path)?;

        let mut dive_parser = parser::for_descriptor(&descriptor, data)?;
        if let (Some(devtime), Some(systime)) = (args.devtime, args.systime) {
            let _ = dive_parser.set_clock(devtime, systime);
        }

        match parser::parse_into_dive(dive_parser.as_mut(), &fingerprint) {
            Ok(dive) => output.dives.push(dive),
            Err(err) => eprintln!("Error parsing {}: {err}", path.display()),
        }
    }

    let rendered = match args.format {
        OutputFormat::Json => serde_json::to_string(&output)
            .map_err(|err| divecomputer::DcError::Other(err.to_string()))?,
        OutputFormat::PrettyJson => serde_json::to_string_pretty(&output)
            .map_err(|err| divecomputer::DcError::Other(err.to_string()))?,
        OutputFormat::Raw => format!("{output:#?}"),
    };

    match &args.output {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }

    Ok(())
}

fn find_descriptor(args: &Args) -> divecomputer::Result<Descriptor> {
    if let Some(name) = &args.device {
        divecomputer::descriptor::lookup_name(name)
    } else if let Some(family) = &args.family {
        let family = divecomputer::Descriptors::new()
            .map(|descriptor| descriptor.family())
            .find(|candidate| candidate.name() == family.as_str())
            .unwrap_or(divecomputer::Family::None);
        divecomputer::descriptor::lookup_family(family, args.model)
    } else {
        Err(divecomputer::DcError::InvalidArguments(
            "either --device or --family is required".to_string(),
        ))
    }
}
