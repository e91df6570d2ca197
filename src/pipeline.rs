//! Download orchestration: resolve the starting fingerprint, drain the
//! device newest-first, parse every blob, and persist the newest
//! fingerprint for the next incremental run.

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::common::{Family, Status};
use crate::context::{Context, LogLevel};
use crate::descriptor::Descriptor;
use crate::device::{DevInfo, Device, DeviceEvent, EventMask};
use crate::error::Result;
use crate::logmsg;
use crate::parser::{self, Dive, Parser as _};

#[derive(Debug, Default)]
pub struct DownloadOptions {
    /// Directory for fingerprint cache files. No caching without it.
    pub cachedir: Option<PathBuf>,
    /// Explicit fingerprint, overriding the cache.
    pub fingerprint: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub dives: Vec<Dive>,
    pub devinfo: Option<DevInfo>,
}

/// `<cachedir>/<family-name>-<serial:08x>.bin`
pub fn cache_path(cachedir: &Path, family: Family, serial: u32) -> PathBuf {
    cachedir.join(format!("{}-{serial:08x}.bin", family.name()))
}

fn load_fingerprint(cachedir: &Path, family: Family, serial: u32) -> Option<Vec<u8>> {
    fs::read(cache_path(cachedir, family, serial)).ok()
}

/// Run one full download session over an already opened device.
///
/// The fingerprint is persisted only after the transfer finished without
/// error; a cancelled download leaves the cache untouched so the skipped
/// dives are fetched next time.
pub fn download(
    context: &Context,
    descriptor: &Descriptor,
    device: &mut dyn Device,
    options: &DownloadOptions,
) -> Result<DownloadOutcome> {
    let fingerprint = options.fingerprint.clone().or_else(|| {
        let cachedir = options.cachedir.as_ref()?;
        let devinfo = device.devinfo()?;
        load_fingerprint(cachedir, device.family(), devinfo.serial)
    });

    if let Some(fingerprint) = &fingerprint {
        match device.set_fingerprint(fingerprint) {
            Ok(()) => {}
            Err(err) if err.to_status() == Status::InvalidArgs => {
                // A stale cache entry of the wrong size is worthless but
                // not fatal.
                logmsg!(
                    context,
                    LogLevel::Warning,
                    "ignoring fingerprint of unexpected size {}",
                    fingerprint.len()
                );
            }
            Err(err) => return Err(err),
        }
    }

    // Some families disclose their identity mid-transfer only.
    let captured: Arc<Mutex<(Option<DevInfo>, Option<(u32, i64)>)>> =
        Arc::new(Mutex::new((device.devinfo(), None)));
    let sink = captured.clone();
    device.set_events(
        EventMask::DEVINFO | EventMask::CLOCK,
        Box::new(move |event| {
            let mut captured = sink.lock().expect("event capture poisoned");
            match event {
                DeviceEvent::DevInfo(devinfo) => captured.0 = Some(*devinfo),
                DeviceEvent::Clock { devtime, systime } => {
                    captured.1 = Some((*devtime, *systime));
                }
                _ => {}
            }
        }),
    );

    let mut raw: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    device.foreach(&mut |data, fingerprint| {
        raw.push((data.to_vec(), fingerprint.to_vec()));
        ControlFlow::Continue(())
    })?;

    let (devinfo, clock) = captured.lock().expect("event capture poisoned").clone();

    let mut outcome = DownloadOutcome {
        dives: Vec::new(),
        devinfo,
    };
    for (data, fingerprint) in &raw {
        let mut dive_parser = match parser::for_descriptor(descriptor, data.clone()) {
            Ok(dive_parser) => dive_parser,
            Err(err) => {
                logmsg!(context, LogLevel::Error, "skipping unparseable dive: {err}");
                continue;
            }
        };
        if let Some((devtime, systime)) = clock {
            // Families with absolute clocks simply decline.
            let _ = dive_parser.set_clock(devtime, systime);
        }
        match parser::parse_into_dive(dive_parser.as_mut(), fingerprint) {
            Ok(dive) => outcome.dives.push(dive),
            Err(err) => {
                logmsg!(context, LogLevel::Error, "skipping unparseable dive: {err}");
            }
        }
    }

    if let (Some(cachedir), Some(devinfo), Some((_, newest))) =
        (&options.cachedir, outcome.devinfo, raw.first())
        && !newest.is_empty()
    {
        fs::create_dir_all(cachedir)?;
        fs::write(cache_path(cachedir, device.family(), devinfo.serial), newest)?;
    }

    Ok(outcome)
}
