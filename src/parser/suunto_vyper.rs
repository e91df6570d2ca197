//! Suunto Vyper dive decoding: variable-length tagged records. Most
//! bytes are signed depth deltas in feet that each close one sample
//! tuple; a small reserved opcode range carries absolute values, events
//! and time skips.

use std::time::Duration;

use crate::common::{EventKind, Status};
use crate::error::{DcError, Result};
use crate::parser::{
    FEET, FieldType, FieldValue, Gasmix, PSI, Parser, Sample, SampleCallback, Tank,
};

const HEADER_SIZE: usize = 14;

const HDR_DATETIME: usize = 0; // year, month, day, hour, minute
const HDR_INTERVAL: usize = 5;
const HDR_O2: usize = 6;
const HDR_DIVEMODE: usize = 7;
const HDR_ATMOSPHERIC: usize = 8; // millibar, u16 LE
const HDR_TEMP_START: usize = 10; // signed, degrees C
const HDR_PRESSURE_START: usize = 11; // 2 bar units

const OP_ABS_DEPTH: u8 = 0x7A;
const OP_DELTA_TEMP: u8 = 0x7B;
const OP_ABS_PRESSURE: u8 = 0x7C;
const OP_SURFACE: u8 = 0x7D;
const OP_EVENT: u8 = 0x7E;
const OP_TIME_SKIP: u8 = 0x7F;

#[derive(Debug)]
pub struct VyperParser {
    data: Vec<u8>,
    samples: Vec<Sample>,
    divetime: Duration,
    maxdepth: f64,
}

impl VyperParser {
    pub fn new(_model: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
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

fn operands<'a>(profile: &'a [u8], offset: &mut usize, count: usize) -> Result<&'a [u8]> {
    if *offset + count > profile.len() {
        return Err(DcError::status_with_context(
            Status::DataFormat,
            "sample stream truncated inside a record",
        ));
    }
    let slice = &profile[*offset..*offset + count];
    *offset += count;
    Ok(slice)
}

fn decode(data: &[u8]) -> Result<(Vec<Sample>, Duration, f64)> {
    let interval = data[HDR_INTERVAL].max(1) as u64;
    let profile = &data[HEADER_SIZE..];

    let mut samples = Vec::new();
    let mut time = 0u64;
    let mut depth_ft = 0.0f64;
    let mut maxdepth = 0.0f64;
    let mut temperature = data[HDR_TEMP_START] as i8 as i32;
    let mut temperature_changed = true;
    let mut pressure: Option<f64> = None;

    let mut offset = 0;
    while offset < profile.len() {
        let opcode = profile[offset];
        offset += 1;

        let mut complete = false;
        match opcode {
            OP_ABS_DEPTH => {
                let raw = operands(profile, &mut offset, 2)?;
                depth_ft = u16::from_be_bytes([raw[0], raw[1]]) as f64;
                complete = true;
            }
            OP_DELTA_TEMP => {
                let raw = operands(profile, &mut offset, 1)?;
                temperature += raw[0] as i8 as i32;
                temperature_changed = true;
            }
            OP_ABS_PRESSURE => {
                let raw = operands(profile, &mut offset, 2)?;
                pressure = Some(u16::from_be_bytes([raw[0], raw[1]]) as f64 * PSI);
            }
            OP_SURFACE => {
                depth_ft = 0.0;
                complete = true;
            }
            OP_EVENT => {
                let raw = operands(profile, &mut offset, 1)?;
                let kind = match raw[0] {
                    0x01 => EventKind::Deco,
                    0x02 => EventKind::Ascent,
                    0x03 => EventKind::Bookmark,
                    0x04 => EventKind::SafetyStop,
                    _ => EventKind::None,
                };
                samples.push(Sample::Event {
                    kind,
                    flags: 0,
                    value: raw[0] as u32,
                });
            }
            OP_TIME_SKIP => {
                let raw = operands(profile, &mut offset, 1)?;
                time += raw[0] as u64 * interval;
            }
            delta => {
                depth_ft = (depth_ft + delta as i8 as f64).max(0.0);
                complete = true;
            }
        }

        if complete {
            time += interval;
            samples.push(Sample::Time(Duration::from_secs(time)));

            let depth = depth_ft * FEET;
            maxdepth = maxdepth.max(depth);
            samples.push(Sample::Depth(depth));

            if temperature_changed {
                samples.push(Sample::Temperature(temperature as f64));
                temperature_changed = false;
            }
            if let Some(bar) = pressure.take() {
                samples.push(Sample::Pressure { tank: 0, bar });
            }
            if opcode == OP_SURFACE {
                samples.push(Sample::Event {
                    kind: EventKind::Surface,
                    flags: 0,
                    value: 0,
                });
            }
        }
    }

    Ok((samples, Duration::from_secs(time), maxdepth))
}

impl Parser for VyperParser {
    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let header = &self.data[HDR_DATETIME..HDR_DATETIME + 5];
        let year = if header[0] < 90 {
            2000 + header[0] as i16
        } else {
            1900 + header[0] as i16
        };
        let date = jiff::civil::Date::new(year, header[1] as i8, header[2] as i8)?;
        let time = jiff::civil::Time::new(header[3] as i8, header[4] as i8, 0, 0)?;
        Ok(jiff::civil::DateTime::from_parts(date, time))
    }

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(self.divetime)),
            FieldType::MaxDepth => Some(FieldValue::Depth(self.maxdepth)),
            FieldType::TemperatureSurface => Some(FieldValue::Temperature(
                self.data[HDR_TEMP_START] as i8 as f64,
            )),
            FieldType::Atmospheric => {
                let raw = u16::from_le_bytes([
                    self.data[HDR_ATMOSPHERIC],
                    self.data[HDR_ATMOSPHERIC + 1],
                ]);
                if raw == 0 {
                    None
                } else {
                    Some(FieldValue::Pressure(raw as f64 / 1000.0))
                }
            }
            FieldType::GasmixCount => Some(FieldValue::Count(1)),
            FieldType::Gasmix if index == 0 => Some(FieldValue::Gasmix(
                Gasmix::from_o2_percent(self.data[HDR_O2]),
            )),
            FieldType::TankCount => {
                Some(FieldValue::Count(u32::from(self.data[HDR_PRESSURE_START] != 0)))
            }
            FieldType::Tank if index == 0 && self.data[HDR_PRESSURE_START] != 0 => {
                Some(FieldValue::Tank(Tank {
                    gasmix_idx: Some(0),
                    begin_pressure: self.data[HDR_PRESSURE_START] as f64 * 2.0,
                    ..Default::default()
                }))
            }
            FieldType::DiveMode => Some(FieldValue::DiveMode(
                match self.data[HDR_DIVEMODE] {
                    1 => crate::parser::DiveMode::Gauge,
                    _ => crate::parser::DiveMode::OC,
                },
            )),
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

    fn header(interval: u8, o2: u8, temp: i8) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..5].copy_from_slice(&[25, 6, 15, 14, 30]); // 2025-06-15 14:30
        data[HDR_INTERVAL] = interval;
        data[HDR_O2] = o2;
        data[HDR_ATMOSPHERIC..HDR_ATMOSPHERIC + 2].copy_from_slice(&1013u16.to_le_bytes());
        data[HDR_TEMP_START] = temp as u8;
        data[HDR_PRESSURE_START] = 100; // 200 bar
        data
    }

    #[test]
    fn test_datetime() {
        let parser = VyperParser::new(0x0A, header(20, 0, 22)).unwrap();
        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2025);
        assert_eq!(datetime.month(), 6);
        assert_eq!(datetime.hour(), 14);
        assert_eq!(datetime.minute(), 30);
    }

    #[test]
    fn test_delta_depth_records() {
        let mut data = header(20, 32, 22);
        data.extend_from_slice(&[10, 10, 0xF6u8, 0x7D]); // +10ft, +10ft, -10ft, surface

        let mut parser = VyperParser::new(0x0A, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(20)));
        assert_eq!(samples[1], Sample::Depth(10.0 * FEET));
        // Initial temperature is reported with the first tuple.
        assert_eq!(samples[2], Sample::Temperature(22.0));
        assert_eq!(samples[3], Sample::Time(Duration::from_secs(40)));
        assert_eq!(samples[4], Sample::Depth(20.0 * FEET));
        assert_eq!(samples[5], Sample::Time(Duration::from_secs(60)));
        assert_eq!(samples[6], Sample::Depth(10.0 * FEET));
        // Surface marker: depth zero plus an event.
        assert_eq!(samples[7], Sample::Time(Duration::from_secs(80)));
        assert_eq!(samples[8], Sample::Depth(0.0));
        assert!(matches!(
            samples[9],
            Sample::Event {
                kind: EventKind::Surface,
                ..
            }
        ));
    }

    #[test]
    fn test_absolute_and_pressure_records() {
        let mut data = header(10, 0, 20);
        data.extend_from_slice(&[OP_ABS_PRESSURE, 0x0B, 0xB8]); // 3000 psi
        data.extend_from_slice(&[OP_ABS_DEPTH, 0x00, 0x64]); // 100 ft

        let mut parser = VyperParser::new(0x0A, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(10)));
        assert_eq!(samples[1], Sample::Depth(100.0 * FEET));
        assert_eq!(samples[2], Sample::Temperature(20.0));
        assert_eq!(
            samples[3],
            Sample::Pressure {
                tank: 0,
                bar: 3000.0 * PSI
            }
        );
    }

    #[test]
    fn test_time_skip_advances_without_rows() {
        let mut data = header(10, 0, 20);
        data.extend_from_slice(&[OP_TIME_SKIP, 6, 5]); // skip a minute, then +5ft

        let mut parser = VyperParser::new(0x0A, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(70)));
    }

    #[test]
    fn test_truncated_record_is_data_format() {
        let mut data = header(10, 0, 20);
        data.extend_from_slice(&[OP_ABS_DEPTH, 0x00]); // missing one byte

        let err = VyperParser::new(0x0A, data).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_fields() {
        let mut data = header(20, 32, 18);
        data.extend_from_slice(&[50, 50]); // down to 100 ft

        let parser = VyperParser::new(0x0A, data).unwrap();

        match parser.field(FieldType::MaxDepth, 0).unwrap() {
            Some(FieldValue::Depth(depth)) => {
                assert!((depth - 100.0 * FEET).abs() < 1e-9);
            }
            other => panic!("unexpected maxdepth: {other:?}"),
        }
        match parser.field(FieldType::Gasmix, 0).unwrap() {
            Some(FieldValue::Gasmix(gasmix)) => assert!((gasmix.oxygen - 0.32).abs() < 1e-9),
            other => panic!("unexpected gasmix: {other:?}"),
        }
        match parser.field(FieldType::Tank, 0).unwrap() {
            Some(FieldValue::Tank(tank)) => assert_eq!(tank.begin_pressure, 200.0),
            other => panic!("unexpected tank: {other:?}"),
        }
        match parser.field(FieldType::Atmospheric, 0).unwrap() {
            Some(FieldValue::Pressure(bar)) => assert!((bar - 1.013).abs() < 1e-9),
            other => panic!("unexpected atmospheric: {other:?}"),
        }
        assert!(parser.field(FieldType::Salinity, 0).unwrap().is_none());
    }
}
