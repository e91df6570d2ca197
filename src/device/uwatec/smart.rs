//! Uwatec Smart and Galileo: IrDA. The link is packet oriented, so every
//! command and answer travels in a framed, CRC-checked packet. A short
//! handshake puts the unit in host mode, single-byte commands read the
//! identity and clock, and one transfer command streams every dive newer
//! than a timestamp filter.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::{DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::hdlc::HdlcStream;
use crate::iostream::{Direction, IoStream, Timeout};

const FINGERPRINT_SIZE: usize = 4;

/// Frame size limit in both directions.
const MTU: usize = 1024;

const CMD_HANDSHAKE1: &[u8] = &[0x1B];
const CMD_HANDSHAKE2: &[u8] = &[0x1C, 0x10, 0x27, 0x00, 0x00];
const HANDSHAKE_ACK: u8 = 0x01;

const CMD_MODEL: u8 = 0x10;
const CMD_SERIAL: u8 = 0x14;
const CMD_DEVTIME: u8 = 0x1A;
const CMD_TRANSFER: u8 = 0xC4;

/// Every dive record is a little-endian length (including itself)
/// followed by the dive blob, which opens with the timestamp.
const RECORD_OVERHEAD: usize = 4;

pub struct SmartDevice {
    base: DeviceBase,
    stream: HdlcStream<Box<dyn IoStream>>,
    devtime: u32,
}

impl std::fmt::Debug for SmartDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartDevice")
            .field("base", &self.base)
            .field("stream", &self.stream)
            .field("devtime", &self.devtime)
            .finish()
    }
}

impl SmartDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        let mut stream = HdlcStream::new(stream, MTU, MTU);
        stream.set_timeout(Timeout::Bounded(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context),
            stream,
            devtime: 0,
        };

        device.handshake(CMD_HANDSHAKE1)?;
        device.handshake(CMD_HANDSHAKE2)?;

        let model = device.command(CMD_MODEL, 1)?[0];
        let serial = device.command(CMD_SERIAL, 4)?;
        let devtime = device.command(CMD_DEVTIME, 4)?;

        device.devtime = u32::from_le_bytes(devtime.try_into().unwrap());

        device.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: model as u32,
            firmware: 0,
            serial: u32::from_le_bytes(serial.try_into().unwrap()),
        }));
        device.base.emit(DeviceEvent::Clock {
            devtime: device.devtime,
            systime: jiff::Timestamp::now().as_second(),
        });

        Ok(device)
    }

    fn handshake(&mut self, command: &[u8]) -> Result<()> {
        self.stream.write_frame(command)?;
        let answer = self.stream.read_frame()?;
        if answer != [HANDSHAKE_ACK] {
            return Err(DcError::status_with_context(
                Status::Protocol,
                "handshake rejected",
            ));
        }
        Ok(())
    }

    fn command(&mut self, command: u8, answer_len: usize) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        self.stream.write_frame(&[command])?;
        self.command_answer(answer_len)
    }

    /// Device clock sample taken at open, in half-second ticks.
    pub fn devtime(&self) -> u32 {
        self.devtime
    }

    /// Ask for everything newer than `filter`. The answer is a length
    /// frame followed by as many data frames as it takes.
    fn transfer(&mut self, filter: u32) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut command = vec![CMD_TRANSFER];
        command.extend_from_slice(&filter.to_le_bytes());
        self.stream.write_frame(&command)?;

        let header = self.command_answer(4)?;
        let length = u32::from_le_bytes(header.try_into().unwrap()) as usize;

        self.base.progress_init(length as u32);

        let mut data = Vec::with_capacity(length);
        while data.len() < length {
            self.base.check_cancelled()?;
            let frame = self.stream.read_frame()?;
            if frame.is_empty() || data.len() + frame.len() > length {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    "data frame overruns the announced length",
                ));
            }
            data.extend_from_slice(&frame);
            self.base.progress_update(data.len() as u32);
        }

        Ok(data)
    }

    fn command_answer(&mut self, len: usize) -> Result<Vec<u8>> {
        let answer = self.stream.read_frame()?;
        if answer.len() != len {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("answer of {} bytes, wanted {len}", answer.len()),
            ));
        }
        Ok(answer)
    }
}

impl Device for SmartDevice {
    fn family(&self) -> Family {
        Family::UwatecSmart
    }

    fn base(&self) -> &DeviceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DeviceBase {
        &mut self.base
    }

    fn fingerprint_size(&self) -> usize {
        FINGERPRINT_SIZE
    }

    fn dump(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.base.ensure_open()?;
        let data = self.transfer(0)?;
        buffer.clear();
        buffer.append(&data);
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;

        if let Some(devinfo) = self.devinfo() {
            self.base.emit(DeviceEvent::DevInfo(devinfo));
        }

        // The device filters on its side: only dives newer than the
        // registered timestamp are transmitted at all.
        let filter = match self.base.fingerprint() {
            fingerprint if fingerprint.len() == FINGERPRINT_SIZE => {
                u32::from_le_bytes(fingerprint.try_into().unwrap())
            }
            _ => 0,
        };

        let data = self.transfer(filter)?;

        let mut offset = 0;
        while offset + RECORD_OVERHEAD <= data.len() {
            let length = u32::from_le_bytes(
                data[offset..offset + RECORD_OVERHEAD].try_into().unwrap(),
            ) as usize;
            if length <= RECORD_OVERHEAD + FINGERPRINT_SIZE || offset + length > data.len() {
                return Err(DcError::status_with_context(
                    Status::DataFormat,
                    format!("bad dive record length {length} at offset {offset}"),
                ));
            }

            let dive = &data[offset + RECORD_OVERHEAD..offset + length];
            let fingerprint = &dive[..FINGERPRINT_SIZE];
            if !self.base.fingerprint().is_empty() && fingerprint == self.base.fingerprint() {
                break;
            }
            if callback(dive, fingerprint).is_break() {
                break;
            }

            offset += length;
        }

        self.base.progress_finish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.base.is_closed() {
            return Ok(());
        }
        let result = self.stream.close();
        self.base.mark_closed();
        result
    }
}
