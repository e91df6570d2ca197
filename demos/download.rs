use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use divecomputer::iostream::{Direction, IoStream, SerialConfig, Timeout};
use divecomputer::{CancelToken, Context, Device as _, LogLevel, Transport, device, pipeline};

/// Replays a captured byte stream as if it were the device end of the
/// serial link. Useful for exercising a full download without hardware:
/// capture once, replay forever.
struct ReplayStream {
    input: Vec<u8>,
    position: usize,
}

impl ReplayStream {
    fn from_file(path: &PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            input: fs::read(path)?,
            position: 0,
        })
    }
}

impl IoStream for ReplayStream {
    fn transport(&self) -> Transport {
        Transport::Serial
    }

    fn configure(&mut self, _config: &SerialConfig) -> divecomputer::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Timeout) -> divecomputer::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> divecomputer::Result<usize> {
        let available = self.input.len() - self.position;
        let count = buf.len().min(available);
        buf[..count].copy_from_slice(&self.input[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> divecomputer::Result<usize> {
        Ok(buf.len())
    }

    fn purge(&mut self, _direction: Direction) -> divecomputer::Result<()> {
        Ok(())
    }

    fn drain(&mut self) -> divecomputer::Result<()> {
        Ok(())
    }

    fn set_dtr(&mut self, _level: bool) -> divecomputer::Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> divecomputer::Result<()> {
        Ok(())
    }

    fn sleep(&mut self, _ms: u64) -> divecomputer::Result<()> {
        Ok(())
    }
}

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Download dives from a captured transfer", long_about = None)]
struct Args {
    /// Device name (e.g., "Suunto Vyper")
    #[arg(short, long)]
    device: String,

    /// Capture file holding the device side of the transfer
    #[arg(short, long)]
    replay: PathBuf,

    /// Output file for the parsed dives (JSON); stdout otherwise
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fingerprint cache directory
    #[arg(short = 'c', long)]
    cache: Option<PathBuf>,

    /// Explicit fingerprint, hex encoded
    #[arg(short = 'p', long)]
    fingerprint: Option<String>,

    /// Log level (0-5)
    #[arg(short = 'v', long, default_value = "2")]
    loglevel: u8,
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

    let descriptor = divecomputer::descriptor::lookup_name(&args.device)?;
    let stream = ReplayStream::from_file(&args.replay)?;

    let cancel = CancelToken::new();
    let mut session = device::open(&context, &descriptor, Box::new(stream))?;
    let watch = cancel.clone();
    session.set_cancel(Box::new(move || watch.is_cancelled()));

    let options = pipeline::DownloadOptions {
        cachedir: args.cache.clone(),
        fingerprint: match &args.fingerprint {
            Some(hex) => Some(
                divecomputer::parser::hex_string_to_bytes(hex)
                    .map_err(|err| divecomputer::DcError::InvalidArguments(err.to_string()))?,
            ),
            None => None,
        },
    };

    let outcome = pipeline::download(&context, &descriptor, session.as_mut(), &options);
    session.close()?;
    let outcome = outcome?;

    if let Some(devinfo) = outcome.devinfo {
        eprintln!(
            "device: model {:04x} firmware {:04x} serial {:08x}",
            devinfo.model, devinfo.firmware, devinfo.serial
        );
    }
    eprintln!("downloaded {} dive(s)", outcome.dives.len());

    let rendered = serde_json::to_string_pretty(&outcome.dives)
        .map_err(|err| divecomputer::DcError::Other(err.to_string()))?;
    match &args.output {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }

    Ok(())
}
