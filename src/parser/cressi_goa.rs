//! Cressi Goa dive decoding. The header layout is not fixed: it is
//! selected at parse time from a version × dive-mode table, and the
//! clock is stored as BCD with a 12-hour flag.

use std::time::Duration;

use crate::common::{EventKind, Status};
use crate::error::{DcError, Result};
use crate::parser::{
    DiveMode, FieldType, FieldValue, Gasmix, Parser, Sample, SampleCallback, bcd, hour_from_12h,
};

const HDR_VERSION: usize = 0; // u16 LE
const HDR_DIVEMODE: usize = 2;

/// Header geometry for one (version, dive mode) pair.
#[derive(Debug)]
struct Layout {
    header_size: usize,
    datetime: usize, // six BCD bytes: YY MM DD HH(12h) MM SS
    divetime: usize, // seconds, u16 LE
    maxdepth: usize, // decimetres, u16 LE
    temp_minimum: Option<usize>, // 0.1 C, u16 LE
    o2: Option<usize>,
    interval: u64,
}

const SCUBA_V3: Layout = Layout {
    header_size: 0x20,
    datetime: 4,
    divetime: 10,
    maxdepth: 12,
    temp_minimum: Some(14),
    o2: Some(16),
    interval: 5,
};

const SCUBA_V4: Layout = Layout {
    header_size: 0x28,
    datetime: 6,
    divetime: 12,
    maxdepth: 14,
    temp_minimum: Some(16),
    o2: Some(18),
    interval: 5,
};

const GAUGE_V4: Layout = Layout {
    header_size: 0x24,
    datetime: 6,
    divetime: 12,
    maxdepth: 14,
    temp_minimum: Some(16),
    o2: None,
    interval: 5,
};

const FREEDIVE_V4: Layout = Layout {
    header_size: 0x1C,
    datetime: 6,
    divetime: 12,
    maxdepth: 14,
    temp_minimum: None,
    o2: None,
    interval: 1,
};

const MODE_SCUBA: u8 = 0;
const MODE_NITROX: u8 = 1;
const MODE_GAUGE: u8 = 2;
const MODE_FREEDIVE: u8 = 3;

fn layout(version: u16, divemode: u8) -> Option<&'static Layout> {
    match (version, divemode) {
        (3, MODE_SCUBA | MODE_NITROX | MODE_GAUGE) => Some(&SCUBA_V3),
        (4, MODE_SCUBA | MODE_NITROX) => Some(&SCUBA_V4),
        (4, MODE_GAUGE) => Some(&GAUGE_V4),
        (4, MODE_FREEDIVE) => Some(&FREEDIVE_V4),
        _ => None,
    }
}

#[derive(Debug)]
pub struct GoaParser {
    data: Vec<u8>,
    layout: &'static Layout,
    atmospheric: Option<f64>,
}

impl GoaParser {
    pub fn new(_model: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() < 3 {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the version prefix: {}", data.len()),
            ));
        }

        let version = u16::from_le_bytes([data[HDR_VERSION], data[HDR_VERSION + 1]]);
        let divemode = data[HDR_DIVEMODE];
        let Some(layout) = layout(version, divemode) else {
            return Err(DcError::status_with_context(
                Status::Unsupported,
                format!("no layout for version {version} mode {divemode}"),
            ));
        };
        if data.len() < layout.header_size {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than its header: {}", data.len()),
            ));
        }

        Ok(Self {
            data,
            layout,
            atmospheric: None,
        })
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn divemode(&self) -> DiveMode {
        match self.data[HDR_DIVEMODE] {
            MODE_GAUGE => DiveMode::Gauge,
            MODE_FREEDIVE => DiveMode::Freedive,
            _ => DiveMode::OC,
        }
    }
}

impl Parser for GoaParser {
    fn set_atmospheric(&mut self, bar: f64) -> Result<()> {
        self.atmospheric = Some(bar);
        Ok(())
    }

    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let header = &self.data[self.layout.datetime..self.layout.datetime + 6];
        let year = 2000 + bcd(header[0])? as i16;
        let date = jiff::civil::Date::new(year, bcd(header[1])? as i8, bcd(header[2])? as i8)?;

        // Hours are 12-hour BCD with the PM flag in the top bit.
        let pm = header[3] & 0x80 != 0;
        let hour = hour_from_12h(bcd(header[3] & 0x7F)?, pm);
        let time =
            jiff::civil::Time::new(hour as i8, bcd(header[4])? as i8, bcd(header[5])? as i8, 0)?;
        Ok(jiff::civil::DateTime::from_parts(date, time))
    }

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(Duration::from_secs(
                self.u16_at(self.layout.divetime) as u64,
            ))),
            FieldType::MaxDepth => Some(FieldValue::Depth(
                self.u16_at(self.layout.maxdepth) as f64 / 10.0,
            )),
            FieldType::TemperatureMinimum => self.layout.temp_minimum.map(|offset| {
                FieldValue::Temperature(self.u16_at(offset) as f64 / 10.0)
            }),
            FieldType::GasmixCount => Some(FieldValue::Count(u32::from(self.layout.o2.is_some()))),
            FieldType::Gasmix if index == 0 => self.layout.o2.map(|offset| {
                FieldValue::Gasmix(Gasmix::from_o2_percent(self.data[offset]))
            }),
            FieldType::DiveMode => Some(FieldValue::DiveMode(self.divemode())),
            FieldType::Atmospheric => self.atmospheric.map(FieldValue::Pressure),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        let profile = &self.data[self.layout.header_size..];
        if profile.len() % 2 != 0 {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                "sample stream truncated mid-word",
            ));
        }

        let mut samples = Vec::new();
        let mut time = 0u64;
        for word in profile.chunks_exact(2) {
            let word = u16::from_le_bytes([word[0], word[1]]);
            if word & 0x8000 == 0 {
                // Depth word: one reading per interval.
                time += self.layout.interval;
                samples.push(Sample::Time(Duration::from_secs(time)));
                samples.push(Sample::Depth((word & 0x07FF) as f64 / 10.0));
            } else {
                let value = (word & 0x0FFF) as u32;
                match (word >> 12) & 0x07 {
                    0 => samples.push(Sample::Temperature(value as f64 / 10.0)),
                    1 => samples.push(Sample::Event {
                        kind: EventKind::Ascent,
                        flags: 0,
                        value,
                    }),
                    2 => time += self.layout.interval * value as u64,
                    tag => {
                        return Err(DcError::status_with_context(
                            Status::DataFormat,
                            format!("unknown sample tag {tag}"),
                        ));
                    }
                }
            }
        }

        for sample in samples {
            if callback(sample).is_break() {
                break;
            }
        }
        Ok(())
    }
}
