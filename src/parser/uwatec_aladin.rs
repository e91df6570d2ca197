//! Uwatec Aladin dive decoding: a four-byte tick timestamp followed by
//! one absolute depth byte per 20-second interval.

use std::time::Duration;

use crate::common::Status;
use crate::error::{DcError, Result};
use crate::parser::{FieldType, FieldValue, Parser, Sample, SampleCallback, uwatec_datetime};

const HEADER_SIZE: usize = 4;
pub(crate) const SAMPLE_INTERVAL: u64 = 20;

/// Depth bytes count quarter metres.
pub(crate) const DEPTH_SCALE: f64 = 0.25;

/// Shared with the Memomouse, which relays the same profile encoding.
pub(crate) fn decode_depth_profile(profile: &[u8], interval: u64) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(profile.len() * 2);
    let mut time = 0u64;
    for byte in profile {
        time += interval;
        samples.push(Sample::Time(Duration::from_secs(time)));
        samples.push(Sample::Depth(*byte as f64 * DEPTH_SCALE));
    }
    samples
}

pub(crate) fn profile_stats(profile: &[u8], interval: u64) -> (Duration, f64) {
    let divetime = Duration::from_secs(profile.len() as u64 * interval);
    let maxdepth = profile
        .iter()
        .map(|byte| *byte as f64 * DEPTH_SCALE)
        .fold(0.0, f64::max);
    (divetime, maxdepth)
}

#[derive(Debug)]
pub struct AladinParser {
    data: Vec<u8>,
    clock: Option<(u32, i64)>,
}

impl AladinParser {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        Ok(Self { data, clock: None })
    }

    fn profile(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }
}

impl Parser for AladinParser {
    fn set_clock(&mut self, devtime: u32, systime: i64) -> Result<()> {
        self.clock = Some((devtime, systime));
        Ok(())
    }

    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let timestamp =
            u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
        uwatec_datetime(timestamp, self.clock)
    }

    fn field(&self, field: FieldType, _index: u32) -> Result<Option<FieldValue>> {
        let (divetime, maxdepth) = profile_stats(self.profile(), SAMPLE_INTERVAL);
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(divetime)),
            FieldType::MaxDepth => Some(FieldValue::Depth(maxdepth)),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        for sample in decode_depth_profile(self.profile(), SAMPLE_INTERVAL) {
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

    #[test]
    fn test_samples_and_fields() {
        let mut data = 0x2000u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[4, 40, 8]); // 1 m, 10 m, 2 m

        let mut parser = AladinParser::new(data).unwrap();

        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(samples[0], Sample::Time(Duration::from_secs(20)));
        assert_eq!(samples[1], Sample::Depth(1.0));
        assert_eq!(samples[3], Sample::Depth(10.0));

        match parser.field(FieldType::MaxDepth, 0).unwrap() {
            Some(FieldValue::Depth(depth)) => assert_eq!(depth, 10.0),
            other => panic!("unexpected maxdepth: {other:?}"),
        }
        match parser.field(FieldType::DiveTime, 0).unwrap() {
            Some(FieldValue::DiveTime(duration)) => {
                assert_eq!(duration, Duration::from_secs(60));
            }
            other => panic!("unexpected divetime: {other:?}"),
        }
    }

    #[test]
    fn test_datetime_is_clock_calibrated() {
        let data = 1000u32.to_le_bytes().to_vec();
        let mut parser = AladinParser::new(data).unwrap();

        let uncalibrated = parser.datetime().unwrap();
        assert_eq!(uncalibrated.year(), 2000);

        parser.set_clock(1000, 1_700_000_000).unwrap();
        let calibrated = parser.datetime().unwrap();
        assert_eq!(
            calibrated,
            jiff::Timestamp::from_second(1_700_000_000)
                .unwrap()
                .to_zoned(jiff::tz::TimeZone::UTC)
                .datetime()
        );
    }

    #[test]
    fn test_short_blob_is_rejected() {
        let err = AladinParser::new(vec![1, 2]).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }
}
