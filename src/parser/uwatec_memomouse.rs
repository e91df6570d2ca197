//! Uwatec Memomouse dive decoding. The mouse relays logs of the attached
//! Aladin, so the profile encoding is the Aladin one; the 18-byte header
//! additionally carries the summary the unit computed itself.

use std::time::Duration;

use crate::common::Status;
use crate::error::{DcError, Result};
use crate::parser::uwatec_aladin::{DEPTH_SCALE, SAMPLE_INTERVAL, decode_depth_profile};
use crate::parser::{FieldType, FieldValue, Parser, Sample, SampleCallback, uwatec_datetime};

const HEADER_SIZE: usize = 18;

const HDR_TIMESTAMP: usize = 0;
const HDR_DIVETIME: usize = 9; // minutes, u16 LE
const HDR_MAXDEPTH: usize = 11; // quarter metres, u16 LE
const HDR_TEMP_MINIMUM: usize = 13; // 0.1 C, i16 LE

pub struct MemomouseParser {
    data: Vec<u8>,
    clock: Option<(u32, i64)>,
}

impl MemomouseParser {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        Ok(Self { data, clock: None })
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }
}

impl Parser for MemomouseParser {
    fn set_clock(&mut self, devtime: u32, systime: i64) -> Result<()> {
        self.clock = Some((devtime, systime));
        Ok(())
    }

    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let timestamp = u32::from_le_bytes([
            self.data[HDR_TIMESTAMP],
            self.data[HDR_TIMESTAMP + 1],
            self.data[HDR_TIMESTAMP + 2],
            self.data[HDR_TIMESTAMP + 3],
        ]);
        uwatec_datetime(timestamp, self.clock)
    }

    fn field(&self, field: FieldType, _index: u32) -> Result<Option<FieldValue>> {
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(Duration::from_secs(
                self.u16_at(HDR_DIVETIME) as u64 * 60,
            ))),
            FieldType::MaxDepth => Some(FieldValue::Depth(
                self.u16_at(HDR_MAXDEPTH) as f64 * DEPTH_SCALE,
            )),
            FieldType::TemperatureMinimum => Some(FieldValue::Temperature(
                self.u16_at(HDR_TEMP_MINIMUM) as i16 as f64 / 10.0,
            )),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        for sample in decode_depth_profile(&self.data[HEADER_SIZE..], SAMPLE_INTERVAL) {
            if callback(sample).is_break() {
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

    fn blob(timestamp: u32, divetime_min: u16, maxdepth_raw: u16, profile: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[HDR_TIMESTAMP..HDR_TIMESTAMP + 4].copy_from_slice(&timestamp.to_le_bytes());
        data[HDR_DIVETIME..HDR_DIVETIME + 2].copy_from_slice(&divetime_min.to_le_bytes());
        data[HDR_MAXDEPTH..HDR_MAXDEPTH + 2].copy_from_slice(&maxdepth_raw.to_le_bytes());
        data[HDR_TEMP_MINIMUM..HDR_TEMP_MINIMUM + 2]
            .copy_from_slice(&(-45i16 as u16).to_le_bytes());
        data.extend_from_slice(profile);
        data
    }

    #[test]
    fn test_header_fields() {
        let parser = MemomouseParser::new(blob(0x4000, 38, 120, &[4, 8])).unwrap();

        match parser.field(FieldType::DiveTime, 0).unwrap() {
            Some(FieldValue::DiveTime(duration)) => {
                assert_eq!(duration, Duration::from_secs(38 * 60));
            }
            other => panic!("unexpected divetime: {other:?}"),
        }
        match parser.field(FieldType::MaxDepth, 0).unwrap() {
            Some(FieldValue::Depth(depth)) => assert_eq!(depth, 30.0),
            other => panic!("unexpected maxdepth: {other:?}"),
        }
        match parser.field(FieldType::TemperatureMinimum, 0).unwrap() {
            Some(FieldValue::Temperature(temperature)) => {
                assert!((temperature + 4.5).abs() < 1e-9);
            }
            other => panic!("unexpected temperature: {other:?}"),
        }
    }

    #[test]
    fn test_profile_samples() {
        let mut parser = MemomouseParser::new(blob(0, 1, 40, &[40, 20])).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(
            samples,
            vec![
                Sample::Time(Duration::from_secs(20)),
                Sample::Depth(10.0),
                Sample::Time(Duration::from_secs(40)),
                Sample::Depth(5.0),
            ]
        );
    }
}
