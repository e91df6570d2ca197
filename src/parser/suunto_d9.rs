//! Suunto D9/Vyper 2 dive decoding: typed records with explicit opcodes
//! and multi-gas support in the header.

use std::time::Duration;

use crate::common::{EventKind, Status};
use crate::error::{DcError, Result};
use crate::parser::{DiveMode, FieldType, FieldValue, Gasmix, Parser, Sample, SampleCallback};

const HEADER_SIZE: usize = 16;

const HDR_DATETIME: usize = 0; // year u16 LE, month, day, hour, minute, second
const HDR_INTERVAL: usize = 7;
const HDR_DIVEMODE: usize = 8;
const HDR_NGASES: usize = 9;
const HDR_GASES: usize = 10; // up to three (o2, he) pairs

const REC_TIME_SKIP: u8 = 0x00;
const REC_DEPTH: u8 = 0x01;
const REC_TEMPERATURE: u8 = 0x02;
const REC_PRESSURE: u8 = 0x03;
const REC_GASCHANGE: u8 = 0x04;
const REC_EVENT: u8 = 0x05;

#[derive(Debug)]
pub struct D9Parser {
    data: Vec<u8>,
    samples: Vec<Sample>,
    divetime: Duration,
    maxdepth: f64,
}

impl D9Parser {
    pub fn new(_model: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        let ngases = data[HDR_NGASES];
        if ngases == 0 || ngases > 3 {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("unexpected gas count: {ngases}"),
            ));
        }

        let (samples, divetime, maxdepth) = decode(&data)?;
        Ok(Self {
            data,
            samples,
            divetime,
            maxdepth,
        })
    }
}

fn decode(data: &[u8]) -> Result<(Vec<Sample>, Duration, f64)> {
    let interval = data[HDR_INTERVAL].max(1) as u64;
    let ngases = data[HDR_NGASES] as u32;
    let profile = &data[HEADER_SIZE..];

    let mut samples = Vec::new();
    let mut time = 0u64;
    let mut maxdepth = 0.0f64;
    let mut pending: Vec<Sample> = Vec::new();

    let mut offset = 0;
    while offset < profile.len() {
        let opcode = profile[offset];
        offset += 1;

        let need = match opcode {
            REC_DEPTH | REC_PRESSURE => 2,
            REC_TIME_SKIP | REC_TEMPERATURE | REC_GASCHANGE | REC_EVENT => 1,
            unknown => {
                return Err(DcError::status_with_context(
                    Status::DataFormat,
                    format!("unknown record type {unknown:02x}"),
                ));
            }
        };
        if offset + need > profile.len() {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                "sample stream truncated inside a record",
            ));
        }
        let raw = &profile[offset..offset + need];
        offset += need;

        match opcode {
            REC_TIME_SKIP => time += raw[0] as u64 * interval,
            REC_DEPTH => {
                // A depth record closes the tuple for this instant.
                time += interval;
                samples.push(Sample::Time(Duration::from_secs(time)));

                let depth = u16::from_le_bytes([raw[0], raw[1]]) as f64 / 100.0;
                maxdepth = maxdepth.max(depth);
                samples.push(Sample::Depth(depth));
                samples.append(&mut pending);
            }
            REC_TEMPERATURE => {
                pending.push(Sample::Temperature(raw[0] as i8 as f64));
            }
            REC_PRESSURE => {
                pending.push(Sample::Pressure {
                    tank: 0,
                    bar: u16::from_le_bytes([raw[0], raw[1]]) as f64 / 100.0 * 2.0,
                });
            }
            REC_GASCHANGE => {
                let index = raw[0] as u32;
                if index >= ngases {
                    return Err(DcError::status_with_context(
                        Status::DataFormat,
                        format!("gas change to unknown mix {index}"),
                    ));
                }
                pending.push(Sample::Gasmix(index as usize));
            }
            REC_EVENT => {
                let kind = match raw[0] {
                    0x01 => EventKind::Deco,
                    0x02 => EventKind::Ascent,
                    0x03 => EventKind::SafetyStop,
                    0x04 => EventKind::DeepStop,
                    0x05 => EventKind::Bookmark,
                    _ => EventKind::None,
                };
                pending.push(Sample::Event {
                    kind,
                    flags: 0,
                    value: raw[0] as u32,
                });
            }
            _ => unreachable!(),
        }
    }

    Ok((samples, Duration::from_secs(time), maxdepth))
}

impl Parser for D9Parser {
    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let header = &self.data[HDR_DATETIME..HDR_DATETIME + 7];
        let year = u16::from_le_bytes([header[0], header[1]]) as i16;
        let date = jiff::civil::Date::new(year, header[2] as i8, header[3] as i8)?;
        let time = jiff::civil::Time::new(header[4] as i8, header[5] as i8, header[6] as i8, 0)?;
        Ok(jiff::civil::DateTime::from_parts(date, time))
    }

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let ngases = self.data[HDR_NGASES] as u32;
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(self.divetime)),
            FieldType::MaxDepth => Some(FieldValue::Depth(self.maxdepth)),
            FieldType::GasmixCount => Some(FieldValue::Count(ngases)),
            FieldType::Gasmix if index < ngases => {
                let offset = HDR_GASES + index as usize * 2;
                let oxygen = self.data[offset];
                let helium = self.data[offset + 1] as f64 / 100.0;
                let mut gasmix = Gasmix::from_o2_percent(oxygen);
                gasmix.helium = helium;
                gasmix.nitrogen = 1.0 - gasmix.oxygen - helium;
                Some(FieldValue::Gasmix(gasmix))
            }
            FieldType::DiveMode => Some(FieldValue::DiveMode(match self.data[HDR_DIVEMODE] {
                1 => DiveMode::Gauge,
                2 => DiveMode::Freedive,
                _ => DiveMode::OC,
            })),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        for sample in &self.samples {
            if callback(sample.clone()).is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use super::*;

    fn header(interval: u8, gases: &[(u8, u8)]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..2].copy_from_slice(&2024u16.to_le_bytes());
        data[2..7].copy_from_slice(&[11, 3, 9, 45, 30]);
        data[HDR_INTERVAL] = interval;
        data[HDR_NGASES] = gases.len() as u8;
        for (index, (o2, he)) in gases.iter().enumerate() {
            data[HDR_GASES + index * 2] = *o2;
            data[HDR_GASES + index * 2 + 1] = *he;
        }
        data
    }

    #[test]
    fn test_datetime_with_seconds() {
        let parser = D9Parser::new(0x0E, header(10, &[(21, 0)])).unwrap();
        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2024);
        assert_eq!(datetime.month(), 11);
        assert_eq!(datetime.second(), 30);
    }

    #[test]
    fn test_trimix_header() {
        let parser = D9Parser::new(0x0E, header(10, &[(21, 0), (18, 45)])).unwrap();

        match parser.field(FieldType::Gasmix, 1).unwrap() {
            Some(FieldValue::Gasmix(gasmix)) => {
                assert!((gasmix.oxygen - 0.18).abs() < 1e-9);
                assert!((gasmix.helium - 0.45).abs() < 1e-9);
                assert!((gasmix.oxygen + gasmix.helium + gasmix.nitrogen - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected gasmix: {other:?}"),
        }
        assert!(parser.field(FieldType::Gasmix, 2).unwrap().is_none());
    }

    #[test]
    fn test_records_attach_to_following_depth() {
        let mut data = header(10, &[(21, 0), (50, 0)]);
        data.extend_from_slice(&[REC_TEMPERATURE, 12]);
        data.extend_from_slice(&[REC_GASCHANGE, 1]);
        data.extend_from_slice(&[REC_DEPTH, 0xD0, 0x07]); // 20.00 m

        let mut parser = D9Parser::new(0x0E, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(10)));
        assert_eq!(samples[1], Sample::Depth(20.0));
        assert_eq!(samples[2], Sample::Temperature(12.0));
        assert_eq!(samples[3], Sample::Gasmix(1));
    }

    #[test]
    fn test_gas_change_out_of_range() {
        let mut data = header(10, &[(21, 0)]);
        data.extend_from_slice(&[REC_GASCHANGE, 2]);

        let err = D9Parser::new(0x0E, data).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_unknown_record_is_data_format() {
        let mut data = header(10, &[(21, 0)]);
        data.push(0x99);

        let err = D9Parser::new(0x0E, data).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }
}
