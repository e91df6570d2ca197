//! Suunto Solution dive decoding. The oldest format in the catalog: it
//! stores only the last digit of the year, so the decade is inferred
//! from the host clock at decode time.

use std::time::Duration;

use crate::common::Status;
use crate::error::{DcError, Result};
use crate::parser::{
    FEET, FieldType, FieldValue, Parser, Sample, SampleCallback, resolve_decade,
};

const HEADER_SIZE: usize = 3;

const SAMPLE_INTERVAL: u64 = 20;

pub struct SolutionParser {
    data: Vec<u8>,
}

impl SolutionParser {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        Ok(Self { data })
    }

    fn datetime_with_now(&self, now_year: i16) -> Result<jiff::civil::DateTime> {
        let digit = self.data[0];
        if digit > 9 {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("invalid year digit {digit}"),
            ));
        }
        let year = resolve_decade(digit, now_year);
        let date = jiff::civil::Date::new(year, self.data[1] as i8, self.data[2] as i8)?;
        Ok(jiff::civil::DateTime::from_parts(
            date,
            jiff::civil::Time::midnight(),
        ))
    }
}

impl Parser for SolutionParser {
    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        self.datetime_with_now(jiff::Zoned::now().year())
    }

    fn field(&self, field: FieldType, _index: u32) -> Result<Option<FieldValue>> {
        let profile = &self.data[HEADER_SIZE..];
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(Duration::from_secs(
                profile.len() as u64 * SAMPLE_INTERVAL,
            ))),
            FieldType::MaxDepth => Some(FieldValue::Depth(
                profile
                    .iter()
                    .map(|byte| *byte as f64 * FEET)
                    .fold(0.0, f64::max),
            )),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        let mut time = 0u64;
        for byte in &self.data[HEADER_SIZE..] {
            time += SAMPLE_INTERVAL;
            if callback(Sample::Time(Duration::from_secs(time))).is_break()
                || callback(Sample::Depth(*byte as f64 * FEET)).is_break()
            {
                break;
            }
        }
        Ok(())
    }
}
