pub mod types;

pub mod cressi_goa;
pub mod oceanic_atom2;
pub mod suunto_d9;
pub mod suunto_eon;
pub mod suunto_solution;
pub mod suunto_vyper;
pub mod uwatec_aladin;
pub mod uwatec_memomouse;
pub mod uwatec_smart;

use std::ops::ControlFlow;
use std::time::Duration;

pub use types::*;

use crate::common::{EventKind, Family, Status};
use crate::descriptor::Descriptor;
use crate::error::{DcError, Result};

/// One decoded sample value, tagged. Streams always deliver `Time` before
/// any other sample of the same instant.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Time(Duration),
    Depth(f64),
    Temperature(f64),
    Pressure { tank: usize, bar: f64 },
    Gasmix(usize),
    Event { kind: EventKind, flags: u32, value: u32 },
    Rbt { minutes: u32 },
    Heartbeat(u32),
    Bearing(u32),
    Setpoint(f64),
    Ppo2 { sensor: Option<u32>, bar: f64 },
    Cns(f64),
    Deco { kind: DecoKind, time: Duration, tts: Duration },
    Vendor { kind: u32, data: Vec<u8> },
}

/// Sample delivery callback. Returning `ControlFlow::Break(())` stops
/// the decode after the current sample.
pub type SampleCallback<'a> = &'a mut dyn FnMut(Sample) -> ControlFlow<()>;

/// Enumerated header fields a parser can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    DiveTime,
    MaxDepth,
    AvgDepth,
    GasmixCount,
    Gasmix,
    TankCount,
    Tank,
    TemperatureSurface,
    TemperatureMinimum,
    TemperatureMaximum,
    Atmospheric,
    DiveMode,
    DecoModel,
    Salinity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    DiveTime(Duration),
    Depth(f64),
    Count(u32),
    Gasmix(Gasmix),
    Tank(Tank),
    Temperature(f64),
    Pressure(f64),
    DiveMode(DiveMode),
    DecoModel(DecoModel),
    Salinity(Salinity),
}

/// Stateless view over one raw dive blob.
///
/// `field` answers `Ok(None)` where the family's layout leaves a field
/// undefined; decoding failures are `DataFormat`. Accessors never mutate
/// the underlying bytes.
pub trait Parser {
    /// Calibrate device-relative timestamps against the host clock.
    fn set_clock(&mut self, _devtime: u32, _systime: i64) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    fn set_atmospheric(&mut self, _bar: f64) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    fn set_density(&mut self, _density: f64) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    fn datetime(&self) -> Result<jiff::civil::DateTime>;

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>>;

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()>;
}

/// Construct the parser for one dive blob of `descriptor`'s family.
pub fn for_descriptor(descriptor: &Descriptor, data: Vec<u8>) -> Result<Box<dyn Parser>> {
    for_family(descriptor.family(), descriptor.model(), data)
}

pub fn for_family(family: Family, model: u32, data: Vec<u8>) -> Result<Box<dyn Parser>> {
    match family {
        Family::SuuntoSolution => Ok(Box::new(suunto_solution::SolutionParser::new(data)?)),
        Family::SuuntoEon => Ok(Box::new(suunto_eon::EonParser::new(data)?)),
        Family::SuuntoVyper => Ok(Box::new(suunto_vyper::VyperParser::new(model, data)?)),
        Family::SuuntoVyper2 => Ok(Box::new(suunto_d9::D9Parser::new(model, data)?)),
        Family::UwatecAladin => Ok(Box::new(uwatec_aladin::AladinParser::new(data)?)),
        Family::UwatecMemoMouse => Ok(Box::new(uwatec_memomouse::MemomouseParser::new(data)?)),
        Family::UwatecSmart => Ok(Box::new(uwatec_smart::SmartParser::new(model, data)?)),
        Family::OceanicAtom2 => Ok(Box::new(oceanic_atom2::Atom2Parser::new(model, data)?)),
        Family::CressiGoa => Ok(Box::new(cressi_goa::GoaParser::new(model, data)?)),
        Family::None => Err(DcError::status_with_context(
            Status::Unsupported,
            "no parser for this family",
        )),
    }
}

/// Run a parser to completion and aggregate its output into a [`Dive`],
/// flushing one [`DiveSample`] row per TIME sample.
pub fn parse_into_dive(parser: &mut dyn Parser, fingerprint: &[u8]) -> Result<Dive> {
    let mut dive = Dive {
        fingerprint: Fingerprint::from(fingerprint),
        ..Default::default()
    };

    let datetime = parser.datetime()?;
    dive.start = datetime.to_zoned(jiff::tz::TimeZone::UTC)?.timestamp();

    if let Some(FieldValue::DiveTime(duration)) = parser.field(FieldType::DiveTime, 0)? {
        dive.duration = duration;
    }
    if let Some(FieldValue::Depth(depth)) = parser.field(FieldType::MaxDepth, 0)? {
        dive.max_depth = depth;
    }
    if let Some(FieldValue::Depth(depth)) = parser.field(FieldType::AvgDepth, 0)? {
        dive.avg_depth = Some(depth);
    }
    if let Some(FieldValue::Temperature(temperature)) =
        parser.field(FieldType::TemperatureSurface, 0)?
    {
        dive.temperature_surface = Some(temperature);
    }
    if let Some(FieldValue::Temperature(temperature)) =
        parser.field(FieldType::TemperatureMinimum, 0)?
    {
        dive.temperature_minimum = Some(temperature);
    }
    if let Some(FieldValue::Temperature(temperature)) =
        parser.field(FieldType::TemperatureMaximum, 0)?
    {
        dive.temperature_maximum = Some(temperature);
    }
    if let Some(FieldValue::Pressure(atmospheric)) = parser.field(FieldType::Atmospheric, 0)? {
        dive.atmospheric_pressure = Some(atmospheric);
    }
    if let Some(FieldValue::DiveMode(mode)) = parser.field(FieldType::DiveMode, 0)? {
        dive.dive_mode = mode;
    }
    if let Some(FieldValue::DecoModel(model)) = parser.field(FieldType::DecoModel, 0)? {
        dive.deco_model = model;
    }
    if let Some(FieldValue::Salinity(salinity)) = parser.field(FieldType::Salinity, 0)? {
        dive.salinity = Some(salinity);
    }

    if let Some(FieldValue::Count(count)) = parser.field(FieldType::GasmixCount, 0)? {
        for index in 0..count {
            if let Some(FieldValue::Gasmix(gasmix)) = parser.field(FieldType::Gasmix, index)? {
                dive.gasmixes.push(gasmix);
            }
        }
    }
    if let Some(FieldValue::Count(count)) = parser.field(FieldType::TankCount, 0)? {
        for index in 0..count {
            if let Some(FieldValue::Tank(tank)) = parser.field(FieldType::Tank, index)? {
                dive.tanks.push(tank);
            }
        }
    }

    let mut rows: Vec<DiveSample> = Vec::new();
    let mut current: Option<DiveSample> = None;
    let gasmixes = dive.gasmixes.clone();

    parser.samples_foreach(&mut |sample| {
        match sample {
            Sample::Time(time) => {
                let next = match current.take() {
                    Some(row) => {
                        let next = row.carry_over(time);
                        rows.push(row);
                        next
                    }
                    None => DiveSample {
                        time,
                        ..Default::default()
                    },
                };
                current = Some(next);
            }
            other => {
                let Some(row) = current.as_mut() else {
                    return ControlFlow::Continue(());
                };
                match other {
                    Sample::Time(_) => unreachable!(),
                    Sample::Depth(depth) => row.depth = depth,
                    Sample::Temperature(temperature) => row.temperature = Some(temperature),
                    Sample::Pressure { tank, bar } => {
                        if let Some(entry) =
                            row.pressure.iter_mut().find(|(index, _)| *index == tank)
                        {
                            entry.1 = bar;
                        } else {
                            row.pressure.push((tank, bar));
                        }
                    }
                    Sample::Gasmix(index) => row.gasmix = gasmixes.get(index).cloned(),
                    Sample::Event { kind, flags, value } => row.events.push(DiveEvent {
                        time: row.time,
                        kind,
                        flags,
                        value,
                    }),
                    Sample::Rbt { minutes } => {
                        row.rbt = Some(Duration::from_secs(minutes as u64 * 60));
                    }
                    Sample::Heartbeat(bpm) => row.heartbeat = Some(bpm as u16),
                    Sample::Bearing(degrees) => row.bearing = Some(degrees as u16),
                    Sample::Setpoint(bar) => row.setpoint = Some(bar),
                    Sample::Ppo2 { sensor, bar } => row.ppo2.push(Ppo2 {
                        sensor: sensor.map_or(Sensor::None, Sensor::Id),
                        bar,
                    }),
                    Sample::Cns(fraction) => row.cns = Some(fraction),
                    Sample::Deco { kind, time, tts } => {
                        row.deco = Some(Deco { kind, time, tts });
                    }
                    Sample::Vendor { .. } => {}
                }
            }
        }
        ControlFlow::Continue(())
    })?;
    if let Some(row) = current {
        rows.push(row);
    }
    dive.samples = rows;

    Ok(dive)
}

/// Decode one packed BCD byte.
pub(crate) fn bcd(byte: u8) -> Result<u8> {
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return Err(DcError::status_with_context(
            Status::DataFormat,
            format!("invalid bcd byte {byte:02x}"),
        ));
    }
    Ok(high * 10 + low)
}

/// Map a 12-hour value with an AM/PM flag onto 0-23.
pub(crate) fn hour_from_12h(hour: u8, pm: bool) -> u8 {
    (hour % 12) + if pm { 12 } else { 0 }
}

/// Pick the decade for a single stored year digit: the most recent decade
/// whose year does not lie in the future.
pub(crate) fn resolve_decade(digit: u8, now_year: i16) -> i16 {
    let base = now_year - now_year % 10;
    let year = base + digit as i16;
    if year > now_year { year - 10 } else { year }
}

/// One pound per square inch, in bar.
pub(crate) const PSI: f64 = 0.068_947_572_9;

/// One foot, in metres.
pub(crate) const FEET: f64 = 0.3048;

/// 2000-01-01T00:00:00Z, the epoch of the Uwatec half-second tick clocks.
pub(crate) const UWATEC_EPOCH: i64 = 946_684_800;

/// Turn a device timestamp into wall time. With a clock sample the wall
/// time is `systime - (devtime - timestamp) / 2`, splitting the tick
/// difference to approximate transmission latency; without one the
/// timestamp is taken relative to the device epoch.
pub(crate) fn uwatec_datetime(
    timestamp: u32,
    clock: Option<(u32, i64)>,
) -> Result<jiff::civil::DateTime> {
    let seconds = match clock {
        Some((devtime, systime)) => systime - (devtime as i64 - timestamp as i64) / 2,
        None => UWATEC_EPOCH + timestamp as i64 / 2,
    };
    let timestamp = jiff::Timestamp::from_second(seconds)?;
    Ok(timestamp.to_zoned(jiff::tz::TimeZone::UTC).datetime())
}
