//! Oceanic Atom 2 family dive decoding: a fixed 16-byte stride where a
//! prefix tag switches between tank changes, surface intervals and
//! regular readings. Temperature handling differs per model and is kept
//! that way.

use std::time::Duration;

use crate::common::{EventKind, Status};
use crate::error::{DcError, Result};
use crate::parser::{
    FEET, FieldType, FieldValue, Gasmix, PSI, Parser, Sample, SampleCallback,
};

/// Logbook entry (8 bytes) plus one header page.
const HEADER_SIZE: usize = 24;
const STRIDE: usize = 16;

const HDR_DATE: usize = 4; // packed u32 LE
const HDR_INTERVAL: usize = 8;
const HDR_NGASES: usize = 9;
const HDR_MAXDEPTH: usize = 10; // 1/16 ft, u16 LE
const HDR_DIVETIME: usize = 12; // minutes, u16 LE
const HDR_GAS_O2: usize = 14; // three bytes
const HDR_TEMP_SURFACE: usize = 17; // degrees F

const TAG_TANK_CHANGE: u8 = 0xAA;
const TAG_SURFACE: u8 = 0xBB;

pub const ATOM2: u32 = 0x4342;
pub const VEO2: u32 = 0x4245;
pub const GEO: u32 = 0x4359;
pub const PROPLUS2: u32 = 0x4347;
pub const ATOM3: u32 = 0x4434;

fn fahrenheit_to_celsius(degrees: f64) -> f64 {
    (degrees - 32.0) / 1.8
}

pub struct Atom2Parser {
    model: u32,
    data: Vec<u8>,
}

impl Atom2Parser {
    pub fn new(model: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("dive shorter than the header: {}", data.len()),
            ));
        }
        Ok(Self { model, data })
    }

    fn interval(&self) -> u64 {
        match self.data[HDR_INTERVAL] {
            0 => 2,
            1 => 15,
            2 => 30,
            _ => 60,
        }
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }
}

impl Parser for Atom2Parser {
    fn datetime(&self) -> Result<jiff::civil::DateTime> {
        let packed = u32::from_le_bytes([
            self.data[HDR_DATE],
            self.data[HDR_DATE + 1],
            self.data[HDR_DATE + 2],
            self.data[HDR_DATE + 3],
        ]);
        let minute = (packed & 0x3F) as i8;
        let hour = ((packed >> 6) & 0x1F) as i8;
        let day = ((packed >> 11) & 0x1F) as i8;
        let month = ((packed >> 16) & 0x0F) as i8;
        let year = 2000 + ((packed >> 20) & 0x3F) as i16;

        let date = jiff::civil::Date::new(year, month, day)?;
        let time = jiff::civil::Time::new(hour, minute, 0, 0)?;
        Ok(jiff::civil::DateTime::from_parts(date, time))
    }

    fn field(&self, field: FieldType, index: u32) -> Result<Option<FieldValue>> {
        let ngases = (self.data[HDR_NGASES].clamp(1, 3)) as u32;
        let value = match field {
            FieldType::DiveTime => Some(FieldValue::DiveTime(Duration::from_secs(
                self.u16_at(HDR_DIVETIME) as u64 * 60,
            ))),
            FieldType::MaxDepth => Some(FieldValue::Depth(
                self.u16_at(HDR_MAXDEPTH) as f64 / 16.0 * FEET,
            )),
            FieldType::GasmixCount => Some(FieldValue::Count(ngases)),
            FieldType::Gasmix if index < ngases => Some(FieldValue::Gasmix(
                Gasmix::from_o2_percent(self.data[HDR_GAS_O2 + index as usize]),
            )),
            FieldType::TemperatureSurface => Some(FieldValue::Temperature(
                fahrenheit_to_celsius(self.data[HDR_TEMP_SURFACE] as f64),
            )),
            _ => None,
        };
        Ok(value)
    }

    fn samples_foreach(&mut self, callback: SampleCallback) -> Result<()> {
        let interval = self.interval();
        let model = self.model;
        let profile = &self.data[HEADER_SIZE..];
        if profile.len() % STRIDE != 0 {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("profile is not a whole number of slots: {}", profile.len()),
            ));
        }

        let mut time = 0u64;
        let mut tank = 0usize;
        let mut temperature = fahrenheit_to_celsius(self.data[HDR_TEMP_SURFACE] as f64);
        let mut samples = Vec::new();

        for slot in profile.chunks_exact(STRIDE) {
            // Unused slots are skipped without advancing the clock.
            if slot.iter().all(|byte| *byte == 0x00)
                || slot.iter().all(|byte| *byte == 0xFF)
            {
                continue;
            }

            match slot[0] {
                TAG_TANK_CHANGE => {
                    let number = (slot[1] & 0x03) as usize;
                    if number == 0 {
                        return Err(DcError::status_with_context(
                            Status::DataFormat,
                            "tank change to tank zero",
                        ));
                    }
                    tank = number - 1;
                    let psi = (((slot[4] as u16) << 8 | slot[5] as u16) & 0x0FFF) as f64 * 2.0;
                    samples.push(Sample::Gasmix(tank));
                    samples.push(Sample::Pressure {
                        tank,
                        bar: psi * PSI,
                    });
                }
                TAG_SURFACE => {
                    // Surface interval: the clock runs, nothing is logged.
                    time += interval * slot[1].max(1) as u64;
                }
                _ => {
                    time += interval;
                    samples.push(Sample::Time(Duration::from_secs(time)));

                    let raw = (u16::from_le_bytes([slot[2], slot[3]]) & 0x0FFF) as f64;
                    samples.push(Sample::Depth(raw / 16.0 * FEET));

                    // Temperature extraction is model-specific; the sign
                    // conventions are reproduced per model id.
                    match model {
                        GEO => {
                            let sign = (!slot[7] & 0x80) >> 7;
                            let delta = (slot[7] & 0x7F) as f64 / 10.0;
                            if sign != 0 {
                                temperature -= delta;
                            } else {
                                temperature += delta;
                            }
                            samples.push(Sample::Temperature(temperature));
                        }
                        VEO2 | PROPLUS2 => {
                            let sign = (slot[7] & 0x80) >> 7;
                            let delta = (slot[7] & 0x7F) as f64 / 10.0;
                            if sign != 0 {
                                temperature -= delta;
                            } else {
                                temperature += delta;
                            }
                            samples.push(Sample::Temperature(temperature));
                        }
                        _ => {
                            temperature = fahrenheit_to_celsius(slot[8] as f64);
                            samples.push(Sample::Temperature(temperature));
                        }
                    }

                    let psi = (((slot[10] as u16) << 8 | slot[11] as u16) & 0x0FFF) as f64 * 2.0;
                    if psi > 0.0 {
                        samples.push(Sample::Pressure {
                            tank,
                            bar: psi * PSI,
                        });
                    }

                    if slot[1] & 0x01 != 0 {
                        samples.push(Sample::Event {
                            kind: EventKind::Ascent,
                            flags: 0,
                            value: 0,
                        });
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

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use super::*;

    fn packed_date(year: i16, month: u8, day: u8, hour: u8, minute: u8) -> u32 {
        (minute as u32)
            | (hour as u32) << 6
            | (day as u32) << 11
            | (month as u32) << 16
            | ((year - 2000) as u32) << 20
    }

    fn header() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[HDR_DATE..HDR_DATE + 4]
            .copy_from_slice(&packed_date(2025, 8, 14, 9, 41).to_le_bytes());
        data[HDR_INTERVAL] = 2; // 30 s
        data[HDR_NGASES] = 2;
        data[HDR_MAXDEPTH..HDR_MAXDEPTH + 2].copy_from_slice(&(100u16 * 16).to_le_bytes());
        data[HDR_DIVETIME..HDR_DIVETIME + 2].copy_from_slice(&42u16.to_le_bytes());
        data[HDR_GAS_O2] = 0;
        data[HDR_GAS_O2 + 1] = 36;
        data[HDR_TEMP_SURFACE] = 68; // 20 C
        data
    }

    fn regular_slot(depth_raw: u16, temp_f: u8) -> [u8; STRIDE] {
        let mut slot = [0u8; STRIDE];
        slot[0] = 0x01;
        slot[2..4].copy_from_slice(&depth_raw.to_le_bytes());
        slot[8] = temp_f;
        slot
    }

    #[test]
    fn test_packed_datetime() {
        let parser = Atom2Parser::new(ATOM2, header()).unwrap();
        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2025);
        assert_eq!(datetime.month(), 8);
        assert_eq!(datetime.day(), 14);
        assert_eq!(datetime.hour(), 9);
        assert_eq!(datetime.minute(), 41);
    }

    #[test]
    fn test_tank_change_slot() {
        let mut data = header();
        let mut slot = [0u8; STRIDE];
        slot[0] = TAG_TANK_CHANGE;
        slot[1] = 0x02; // tank 2 -> index 1
        slot[4] = 0x0B;
        slot[5] = 0xB8; // raw 0xBB8 & 0x0FFF = 3000 -> 6000 psi
        data.extend_from_slice(&slot);
        data.extend_from_slice(&regular_slot(100 * 16, 68));

        let mut parser = Atom2Parser::new(ATOM2, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        // The tank change comes first and does not advance time.
        assert_eq!(samples[0], Sample::Gasmix(1));
        assert_eq!(
            samples[1],
            Sample::Pressure {
                tank: 1,
                bar: 6000.0 * PSI
            }
        );
        // The first regular slot is still at one interval.
        assert_eq!(samples[2], Sample::Time(Duration::from_secs(30)));
    }

    #[test]
    fn test_tank_change_to_tank_zero_is_data_format() {
        let mut data = header();
        let mut slot = [0u8; STRIDE];
        slot[0] = TAG_TANK_CHANGE;
        slot[1] = 0x00;
        data.extend_from_slice(&slot);

        let mut parser = Atom2Parser::new(ATOM2, data).unwrap();
        let err = parser.samples_foreach(&mut |_| ControlFlow::Continue(())).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }

    #[test]
    fn test_empty_slots_do_not_advance_time() {
        let mut data = header();
        data.extend_from_slice(&[0u8; STRIDE]);
        data.extend_from_slice(&[0xFFu8; STRIDE]);
        data.extend_from_slice(&regular_slot(50 * 16, 70));

        let mut parser = Atom2Parser::new(ATOM2, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(samples[0], Sample::Time(Duration::from_secs(30)));
    }

    #[test]
    fn test_atom2_temperature_is_absolute() {
        let mut data = header();
        data.extend_from_slice(&regular_slot(50 * 16, 86));

        let mut parser = Atom2Parser::new(ATOM2, data).unwrap();
        let mut samples = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        let temperature = samples.iter().find_map(|sample| match sample {
            Sample::Temperature(value) => Some(*value),
            _ => None,
        });
        assert!((temperature.unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_geo_and_veo2_temperature_signs_differ() {
        // The same delta byte moves the temperature in opposite
        // directions on the two models.
        let mut slot = regular_slot(50 * 16, 0);
        slot[7] = 0x85; // sign bit set, delta 0.5

        let mut geo_data = header();
        geo_data.extend_from_slice(&slot);
        let mut geo = Atom2Parser::new(GEO, geo_data).unwrap();
        let mut geo_samples = Vec::new();
        geo
            .samples_foreach(&mut |sample| {
                geo_samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        let mut veo_data = header();
        veo_data.extend_from_slice(&slot);
        let mut veo = Atom2Parser::new(VEO2, veo_data).unwrap();
        let mut veo_samples = Vec::new();
        veo
            .samples_foreach(&mut |sample| {
                veo_samples.push(sample);
                ControlFlow::Continue(())
            })
            .unwrap();

        let surface = fahrenheit_to_celsius(68.0);
        assert!(geo_samples.contains(&Sample::Temperature(surface + 0.5)));
        assert!(veo_samples.contains(&Sample::Temperature(surface - 0.5)));
    }

    #[test]
    fn test_ragged_profile_is_data_format() {
        let mut data = header();
        data.extend_from_slice(&[1, 2, 3]);

        let mut parser = Atom2Parser::new(ATOM2, data).unwrap();
        let err = parser.samples_foreach(&mut |_| ControlFlow::Continue(())).unwrap_err();
        assert_eq!(err.to_status(), Status::DataFormat);
    }
}
