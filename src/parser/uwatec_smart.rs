//! Uwatec Smart and Galileo profile decoding. Samples are packed with
//! prefix codes: the number of leading 1-bits selects the token, the
//! remaining bits of the byte are the first value bits, and longer codes
//! occupy the whole byte and carry their value in the following bytes.

use std::time::Duration;

use crate::common::{EventKind, Status};
use crate::error::{DcError, Result};
use crate::parser::{
    FieldType, FieldValue, Gasmix, Parser, Sample, SampleCallback, uwatec_datetime,
};

const HEADER_SIZE: usize = 32;

const HDR_TIMESTAMP: usize = 0;
const HDR_MAXDEPTH: usize = 6;
const HDR_DIVETIME: usize = 8;
const HDR_TEMP_MINIMUM: usize = 10;
const HDR_CALIBRATION: usize = 12;
const HDR_O2: usize = 14;
const HDR_INTERVAL: usize = 15;

pub const GALILEO_SOL: u32 = 0x11;
pub const GALILEO_LUNA: u32 = 0x19;

/// Depth and pressure scale: raw units are 2 cm and 1/4 bar.
const DEPTH_SCALE: f64 = 50.0;
const PRESSURE_SCALE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    DeltaDepth,
    DeltaTemperature,
    DeltaPressure,
    DeltaTemperature16,
    Time,
    Alarms,
    AbsDepth,
    AbsTemperature,
    AbsPressure,
    Rbt,
    Heartrate,
    Bearing,
}

/// One family's code assignment: short prefix codes by leading-ones
/// count, full-byte codes (type bits fill the byte, remaining bits
/// ignored) by exact value.
struct SampleTable {
    prefix: [Token; 4],
    fullbyte: &'static [(u8, Token, usize)],
}

static GALILEO_TABLE: SampleTable = SampleTable {
    prefix: [
        Token::DeltaPressure,    // 0ddddddd
        Token::DeltaDepth,       // 10dddddd
        Token::Time,             // 110ddddd
        Token::DeltaTemperature, // 1110dddd
    ],
    fullbyte: &[
        (0xF0, Token::Alarms, 1),
        (0xF1, Token::AbsDepth, 2),
        (0xF2, Token::AbsPressure, 2),
        (0xF3, Token::AbsTemperature, 2),
        (0xF4, Token::DeltaTemperature16, 2),
        (0xF5, Token::Rbt, 1),
        (0xF6, Token::Heartrate, 1),
        (0xF7, Token::Bearing, 2),
    ],
};

static SMART_TABLE: SampleTable = SampleTable {
    prefix: [
        Token::DeltaDepth,       // 0ddddddd
        Token::DeltaTemperature, // 10dddddd
        Token::Time,             // 110ddddd
        Token::Alarms,           // 1110dddd
    ],
    fullbyte: &[
        (0xF0, Token::AbsDepth, 2),
        (0xF1, Token::AbsTemperature, 2),
        (0xF2, Token::DeltaTemperature16, 2),
        (0xF3, Token::Rbt, 1),
    ],
};

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

pub struct SmartParser {
    model: u32,
    data: Vec<u8>,
    clock: Option<(u32, i64)>,
    atmospheric: Option<f64>,
}

impl SmartParser {
    pub fn new(model: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        Ok(Self {
            model,
            data,
            clock: None,
            atmospheric: None,
        })
    }

    fn table(&self) -> &'static SampleTable {
        match self.model {
            GALILEO_SOL | GALILEO_LUNA => &GALILEO_TABLE,
            _ => &SMART_TABLE,
        }
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn calibration(&self) -> i32 {
        self.u16_at(HDR_CALIBRATION) as i32
    }

    fn interval(&self) -> u64 {
        self.data[HDR_INTERVAL].max(1) as u64
    }

    fn decode(&self) -> Result<Vec<Sample>> {
        let table = self.table();
        let interval = self.interval();
        let calibration = self.calibration();
        let data = &self.data[HEADER_SIZE..];

        let mut samples = Vec::new();
        let mut time = 0u64;
        let mut depth_raw = 0i32;
        let mut have_depth = false;
        let mut temperature_raw = 0i32;
        let mut temperature_changed = false;
        let mut pressure_raw = 0i32;
        let mut pressure_changed = false;
        let mut rbt_changed: Option<u32> = None;
        let mut heartrate_changed: Option<u32> = None;
        let mut bearing_changed: Option<u32> = None;
        let mut alarms = 0u32;

        let mut emit = |time: u64,
                        depth_raw: i32,
                        have_depth: bool,
                        temperature_raw: i32,
                        temperature_changed: &mut bool,
                        pressure_raw: i32,
                        pressure_changed: &mut bool,
                        rbt: &mut Option<u32>,
                        heartrate: &mut Option<u32>,
                        bearing: &mut Option<u32>,
                        alarms: &mut u32,
                        samples: &mut Vec<Sample>| {
            samples.push(Sample::Time(Duration::from_secs(time)));
            if have_depth {
                let depth = (depth_raw - calibration) as f64 / DEPTH_SCALE;
                samples.push(Sample::Depth(depth.max(0.0)));
            }
            if *temperature_changed {
                samples.push(Sample::Temperature(temperature_raw as f64 / 10.0));
                *temperature_changed = false;
            }
            if *pressure_changed {
                samples.push(Sample::Pressure {
                    tank: 0,
                    bar: pressure_raw as f64 * PRESSURE_SCALE,
                });
                *pressure_changed = false;
            }
            if let Some(minutes) = rbt.take() {
                samples.push(Sample::Rbt { minutes });
            }
            if let Some(bpm) = heartrate.take() {
                samples.push(Sample::Heartbeat(bpm));
            }
            if let Some(degrees) = bearing.take() {
                samples.push(Sample::Bearing(degrees));
            }
            if *alarms != 0 {
                for bit in 0..4 {
                    if *alarms & (1 << bit) != 0 {
                        let kind = match bit {
                            0 => EventKind::Ascent,
                            1 => EventKind::Deco,
                            2 => EventKind::Workload,
                            _ => EventKind::Violation,
                        };
                        samples.push(Sample::Event {
                            kind,
                            flags: 0,
                            value: 0,
                        });
                    }
                }
                *alarms = 0;
            }
        };

        let mut offset = 0;
        while offset < data.len() {
            let byte = data[offset];
            offset += 1;

            let ones = byte.leading_ones();
            let (token, value, signed_bits) = if ones <= 3 {
                let nbits = 7 - ones;
                let value = byte as u32 & ((1 << nbits) - 1);
                (table.prefix[ones as usize], value, nbits)
            } else {
                let Some((_, token, extra)) = table
                    .fullbyte
                    .iter()
                    .find(|(code, _, _)| *code == byte)
                    .copied()
                else {
                    return Err(DcError::status_with_context(
                        Status::DataFormat,
                        format!("unknown sample token {byte:02x}"),
                    ));
                };
                if offset + extra > data.len() {
                    return Err(DcError::status_with_context(
                        Status::DataFormat,
                        "sample stream truncated inside a token",
                    ));
                }
                let mut value = 0u32;
                for _ in 0..extra {
                    value = (value << 8) | data[offset] as u32;
                    offset += 1;
                }
                (token, value, extra as u32 * 8)
            };

            match token {
                Token::Time => {
                    // A time marker skips quiet intervals and closes one
                    // sample tuple at the new time.
                    let skip = value.max(1) as u64;
                    time += interval * skip;
                    emit(
                        time,
                        depth_raw,
                        have_depth,
                        temperature_raw,
                        &mut temperature_changed,
                        pressure_raw,
                        &mut pressure_changed,
                        &mut rbt_changed,
                        &mut heartrate_changed,
                        &mut bearing_changed,
                        &mut alarms,
                        &mut samples,
                    );
                }
                Token::DeltaDepth | Token::AbsDepth => {
                    if token == Token::AbsDepth {
                        depth_raw = value as i32;
                    } else {
                        depth_raw += sign_extend(value, signed_bits);
                    }
                    have_depth = true;
                    time += interval;
                    emit(
                        time,
                        depth_raw,
                        have_depth,
                        temperature_raw,
                        &mut temperature_changed,
                        pressure_raw,
                        &mut pressure_changed,
                        &mut rbt_changed,
                        &mut heartrate_changed,
                        &mut bearing_changed,
                        &mut alarms,
                        &mut samples,
                    );
                }
                Token::DeltaTemperature | Token::DeltaTemperature16 => {
                    temperature_raw += sign_extend(value, signed_bits);
                    temperature_changed = true;
                }
                Token::AbsTemperature => {
                    temperature_raw = sign_extend(value, 16);
                    temperature_changed = true;
                }
                Token::DeltaPressure => {
                    pressure_raw += sign_extend(value, signed_bits);
                    pressure_changed = true;
                }
                Token::AbsPressure => {
                    pressure_raw = value as i32;
                    pressure_changed = true;
                }
                Token::Alarms => alarms = value,
                Token::Rbt => rbt_changed = Some(value),
                Token::Heartrate => heartrate_changed = Some(value),
                Token::Bearing => bearing_changed = Some(value),
            }
        }

        Ok(samples)
    }
}

impl Parser for SmartParser {
    fn set_clock(&mut self, devtime: u32, systime: i64) -> Result<()> {
        self.clock = Some((devtime, systime));
        Ok(())
    }

    fn set_atmospheric(&mut self, bar: f64) -> Result<()> {
        self.atmospheric = Some(bar);
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

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(Duration::from_secs(
                self.u16_at(HDR_DIVETIME) as u64,
            ))),
            FieldType::MaxDepth => {
                let raw = self.u16_at(HDR_MAXDEPTH) as i32;
                Some(FieldValue::Depth(
                    ((raw - self.calibration()) as f64 / DEPTH_SCALE).max(0.0),
                ))
            }
            FieldType::TemperatureMinimum => {
                let raw = self.u16_at(HDR_TEMP_MINIMUM) as i16;
                Some(FieldValue::Temperature(raw as f64 / 10.0))
            }
            FieldType::GasmixCount => Some(FieldValue::Count(1)),
            FieldType::Gasmix if index == 0 => Some(FieldValue::Gasmix(
                Gasmix::from_o2_percent(self.data[HDR_O2]),
            )),
            FieldType::Atmospheric => self.atmospheric.map(FieldValue::Pressure),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        let samples = self.decode()?;
        for sample in samples {
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

    fn header(timestamp: u32, interval: u8, calibration: u16) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_SIZE];
        header[HDR_TIMESTAMP..HDR_TIMESTAMP + 4].copy_from_slice(&timestamp.to_le_bytes());
        header[HDR_MAXDEPTH..HDR_MAXDEPTH + 2].copy_from_slice(&600u16.to_le_bytes());
        header[HDR_DIVETIME..HDR_DIVETIME + 2].copy_from_slice(&1800u16.to_le_bytes());
        header[HDR_TEMP_MINIMUM..HDR_TEMP_MINIMUM + 2]
            .copy_from_slice(&(185i16 as u16).to_le_bytes());
        header[HDR_CALIBRATION..HDR_CALIBRATION + 2].copy_from_slice(&calibration.to_le_bytes());
        header[HDR_O2] = 32;
        header[HDR_INTERVAL] = interval;
        header
    }

    fn collect(parser: &mut SmartParser) -> Vec<Sample> {
        let mut out = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                out.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_galileo_bitstream_scenario() {
        let calibration = 100u16;
        let mut data = header(0, 4, calibration);
        data.extend_from_slice(&[0xC2, 0xF1, 0x01, 0xF4, 0xF4, 0x04, 0x80, 0x80, 0x80]);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let samples = collect(&mut parser);

        // TIME=8: two intervals skipped, no depth known yet.
        assert_eq!(samples[0], Sample::Time(Duration::from_secs(8)));
        // TIME=12 with the absolute depth 0x01F4.
        assert_eq!(samples[1], Sample::Time(Duration::from_secs(12)));
        let expected_depth = (0x01F4 - calibration as i32) as f64 / 50.0;
        assert_eq!(samples[2], Sample::Depth(expected_depth));
        // The signed 16-bit delta 0x0480 arrives with the next tuple.
        assert_eq!(samples[3], Sample::Time(Duration::from_secs(16)));
        assert_eq!(samples[4], Sample::Depth(expected_depth));
        assert_eq!(samples[5], Sample::Temperature(0x0480 as f64 / 10.0));
    }

    #[test]
    fn test_negative_deltas_sign_extend() {
        let mut data = header(0, 4, 0);
        // Absolute depth 500, then delta -2 (6-bit two's complement).
        data.extend_from_slice(&[0xF1, 0x01, 0xF4, 0x80 | 0x3E]);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let samples = collect(&mut parser);

        assert_eq!(samples[1], Sample::Depth(500.0 / 50.0));
        assert_eq!(samples[3], Sample::Depth(498.0 / 50.0));
    }

    #[test]
    fn test_unknown_token_is_data_format() {
        let mut data = header(0, 4, 0);
        data.push(0xFF);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let err = parser
            .samples_foreach(&mut |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_truncated_token_is_data_format() {
        let mut data = header(0, 4, 0);
        data.extend_from_slice(&[0xF1, 0x01]); // one value byte missing

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let err = parser
            .samples_foreach(&mut |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_truncated_stream_emits_nothing() {
        let mut data = header(0, 4, 0);
        data.extend_from_slice(&[0x81, 0xF1]); // good token, then truncation

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let mut count = 0;
        let err = parser
            .samples_foreach(&mut |_| {
                count += 1;
                ControlFlow::Continue(())
            })
            .unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_callback_break_stops_the_decode() {
        let mut data = header(0, 4, 0);
        data.extend_from_slice(&[0xF1, 0x01, 0xF4, 0x81, 0x81]);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let mut seen = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                seen.push(sample);
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        // Only the first tuple: the two trailing delta-depth tokens were
        // never delivered.
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Sample::Time(Duration::from_secs(4)));
    }

    #[test]
    fn test_pressure_keeps_tank_index_across_temperature() {
        let mut data = header(0, 4, 0);
        // Absolute pressure, a temperature delta, then a depth delta that
        // closes the tuple.
        data.extend_from_slice(&[0xF2, 0x00, 0xC8, 0xE1, 0x81]);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let samples = collect(&mut parser);

        assert!(samples.contains(&Sample::Pressure {
            tank: 0,
            bar: 200.0 * 0.25
        }));
    }

    #[test]
    fn test_fields_and_datetime() {
        let data = header(7200, 4, 0); // one hour past the epoch, in ticks
        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2000);
        assert_eq!(datetime.hour(), 1);

        match parser.field(FieldType::DiveTime, 0).unwrap() {
            Some(FieldValue::DiveTime(duration)) => {
                assert_eq!(duration, Duration::from_secs(1800));
            }
            other => panic!("unexpected divetime: {other:?}"),
        }
        match parser.field(FieldType::TemperatureMinimum, 0).unwrap() {
            Some(FieldValue::Temperature(temperature)) => {
                assert!((temperature - 18.5).abs() < 1e-9);
            }
            other => panic!("unexpected temperature: {other:?}"),
        }
        assert!(parser.field(FieldType::Salinity, 0).unwrap().is_none());

        parser.set_clock(7200, 1_000_000).unwrap();
        let calibrated = parser.datetime().unwrap();
        assert_eq!(
            calibrated,
            jiff::Timestamp::from_second(1_000_000)
                .unwrap()
                .to_zoned(jiff::tz::TimeZone::UTC)
                .datetime()
        );
    }

    #[test]
    fn test_bit_accounting_is_byte_aligned() {
        // Every token consumes whole bytes: decoding then re-decoding the
        // same stream is deterministic and consumes everything.
        let mut data = header(0, 4, 0);
        data.extend_from_slice(&[0xC1, 0xF1, 0x00, 0x64, 0x81, 0x01, 0xE1]);

        let mut parser = SmartParser::new(GALILEO_SOL, data).unwrap();
        let first = collect(&mut parser);
        let second = collect(&mut parser);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
