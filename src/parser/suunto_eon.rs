//! Suunto Eon dive decoding: a BCD timestamp and plain signed depth
//! deltas, one per interval.

use std::time::Duration;

use crate::common::Status;
use crate::error::{DcError, Result};
use crate::parser::{
    FEET, FieldType, FieldValue, Gasmix, Parser, Sample, SampleCallback, bcd,
};

const HEADER_SIZE: usize = 8;

const HDR_DATETIME: usize = 0; // six BCD bytes
const HDR_INTERVAL: usize = 6;
const HDR_O2: usize = 7;

pub struct EonParser {
    data: Vec<u8>,
    divetime: Duration,
    maxdepth: f64,
}

impl EonParser {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }

        let interval = data[HDR_INTERVAL].max(1) as u64;
        let profile = &data[HEADER_SIZE..];
        let divetime = Duration::from_secs(profile.len() as u64 * interval);
        let mut depth_ft = 0.0f64;
        let mut maxdepth = 0.0f64;
        for byte in profile {
            depth_ft = (depth_ft + *byte as i8 as f64).max(0.0);
            maxdepth = maxdepth.max(depth_ft * FEET);
        }

        Ok(Self {
            data,
            divetime,
            maxdepth,
        })
    }
}

impl Parser for EonParser {
    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let header = &self.data[HDR_DATETIME..HDR_DATETIME + 6];
        let year_bcd = bcd(header[0])? as i16;
        let year = if year_bcd < 90 { 2000 + year_bcd } else { 1900 + year_bcd };
        let date = jiff::civil::Date::new(year, bcd(header[1])? as i8, bcd(header[2])? as i8)?;
        let time = jiff::civil::Time::new(
            bcd(header[3])? as i8,
            bcd(header[4])? as i8,
            bcd(header[5])? as i8,
            0,
        )?;
        Ok(jiff::civil::DateTime::from_parts(date, time))
    }

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(self.divetime)),
            FieldType::MaxDepth => Some(FieldValue::Depth(self.maxdepth)),
            FieldType::GasmixCount => Some(FieldValue::Count(1)),
            FieldType::Gasmix if index == 0 => Some(FieldValue::Gasmix(
                Gasmix::from_o2_percent(self.data[HDR_O2]),
            )),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        let interval = self.data[HDR_INTERVAL].max(1) as u64;
        let mut time = 0u64;
        let mut depth_ft = 0.0f64;
        for byte in &self.data[HEADER_SIZE..] {
            depth_ft = (depth_ft + *byte as i8 as f64).max(0.0);
            time += interval;
            if callback(Sample::Time(Duration::from_secs(time))).is_break()
                || callback(Sample::Depth(depth_ft * FEET)).is_break()
            {
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

    fn blob(profile: &[u8]) -> Vec<u8> {
        let mut data = vec![0x24, 0x12, 0x31, 0x23, 0x59, 0x45, 20, 0];
        data.extend_from_slice(profile);
        data
    }

    #[test]
    fn test_bcd_datetime() {
        let parser = EonParser::new(blob(&[])).unwrap();
        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2024);
        assert_eq!(datetime.month(), 12);
        assert_eq!(datetime.day(), 31);
        assert_eq!(datetime.hour(), 23);
        assert_eq!(datetime.minute(), 59);
        assert_eq!(datetime.second(), 45);
    }

    #[test]
    fn test_invalid_bcd_is_data_format() {
        let mut data = blob(&[]);
        data[1] = 0x1A; // not a BCD month
        let parser = EonParser::new(data).unwrap();
        let err = parser.datetime().unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_delta_samples() {
        let mut parser = EonParser::new(blob(&[30, 0x0A, 0xEC])).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(20)));
        assert_eq!(samples[1], Sample::Depth(30.0 * FEET));
        assert_eq!(samples[3], Sample::Depth(40.0 * FEET));
        assert_eq!(samples[5], Sample::Depth(20.0 * FEET));

        match parser.field(FieldType::MaxDepth, 0).unwrap() {
            Some(FieldValue::Depth(depth)) => assert!((depth - 40.0 * FEET).abs() < 1e-9),
            other => panic!("unexpected maxdepth: {other:?}"),
        }
    }

    #[test]
    fn test_callback_break_stops_the_decode() {
        let mut parser = EonParser::new(blob(&[30, 0x0A, 0xEC])).unwrap();
        let mut count = 0;
        parser
            .samples_foreach(&mut |_| {
                count += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
