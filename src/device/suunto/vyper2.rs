//! Suunto Vyper 2, D9 and relatives: 9600 8N1 with big-endian
//! length-prefixed frames and XOR-8 trailers. Dive boundaries come from a
//! logbook ring of per-dive lengths next to the profile ring.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::ringbuffer::Ring;
use crate::device::suunto::common::{make_command, verify_answer};
use crate::device::{self, DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};

const MEMSIZE: u32 = 0x8000;
const CHUNK: usize = 0x80;
const FINGERPRINT_SIZE: usize = 7;

const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;
const CMD_VERSION: u8 = 0x0F;
const CMD_TIMESYNC: u8 = 0x16;

const RB_LOGBOOK: Ring = Ring::new(0x0190, 0x0210);
const LOGBOOK_SLOTS: u32 = RB_LOGBOOK.size() / 2;
const RB_PROFILE: Ring = Ring::new(0x0400, 0x8000);

const SERIAL_ADDRESS: u32 = 0x0023;
const EOP_ADDRESS: u32 = 0x0051; // u16 BE, followed by the newest slot index

pub struct Vyper2Device {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    version: [u8; 4],
}

impl Vyper2Device {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        mut stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(9600, 8, Parity::None, StopBits::One))?;
        stream.set_timeout(Timeout::Bounded(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context),
            stream,
            version: [0; 4],
        };

        let version = device.transfer(CMD_VERSION, &[])?;
        if version.len() != 4 {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("unexpected version block size: {}", version.len()),
            ));
        }
        device.version.copy_from_slice(&version);

        let mut serial = [0u8; 4];
        device.read(SERIAL_ADDRESS, &mut serial)?;

        device.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: version[1] as u32,
            firmware: version[2] as u32,
            serial: u32::from_be_bytes(serial),
        }));

        Ok(device)
    }

    /// One framed exchange: `[cmd, len16be, payload, crc]` both ways.
    fn transfer(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut request = vec![cmd, (payload.len() >> 8) as u8, payload.len() as u8];
        request.extend_from_slice(payload);
        let command = make_command(&request);

        iostream::write_exact(&mut *self.stream, &command)?;
        self.stream.drain()?;

        let mut header = [0u8; 3];
        iostream::read_exact(&mut *self.stream, &mut header)?;
        if header[0] != cmd {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("unexpected answer {:02x} for command {cmd:02x}", header[0]),
            ));
        }

        let length = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut rest = vec![0u8; length + 1];
        iostream::read_exact(&mut *self.stream, &mut rest)?;

        let mut answer = header.to_vec();
        answer.extend_from_slice(&rest);
        verify_answer(cmd, &answer)?;

        Ok(answer[3..3 + length].to_vec())
    }

    /// Read a window that may wrap the profile ring, tail first.
    fn read_ring(&mut self, end: u32, length: u32) -> Result<Vec<u8>> {
        let start = RB_PROFILE.decrement(end, length);
        let first = length.min(RB_PROFILE.end - start);

        let mut out = vec![0u8; length as usize];
        self.read(start, &mut out[..first as usize])?;
        if first < length {
            let rest = (length - first) as usize;
            let offset = first as usize;
            self.read(RB_PROFILE.begin, &mut out[offset..offset + rest])?;
        }
        Ok(out)
    }
}

impl Device for Vyper2Device {
    fn family(&self) -> Family {
        Family::SuuntoVyper2
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

    fn version(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.version.len() {
            return Err(DcError::status(Status::InvalidArgs));
        }
        buf[..self.version.len()].copy_from_slice(&self.version);
        Ok(self.version.len())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.base.ensure_open()?;

        let mut offset = 0;
        while offset < buf.len() {
            let len = CHUNK.min(buf.len() - offset);
            let current = address + offset as u32;
            let payload = [
                (current >> 24) as u8,
                (current >> 16) as u8,
                (current >> 8) as u8,
                current as u8,
                len as u8,
            ];
            let answer = self.transfer(CMD_READ, &payload)?;
            if answer.len() != len {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    format!("read answered {} bytes, wanted {len}", answer.len()),
                ));
            }
            buf[offset..offset + len].copy_from_slice(&answer);
            offset += len;
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.base.ensure_open()?;

        let mut offset = 0;
        while offset < data.len() {
            let len = CHUNK.min(data.len() - offset);
            let current = address + offset as u32;
            let mut payload = vec![
                (current >> 24) as u8,
                (current >> 16) as u8,
                (current >> 8) as u8,
                current as u8,
                len as u8,
            ];
            payload.extend_from_slice(&data[offset..offset + len]);
            self.transfer(CMD_WRITE, &payload)?;
            offset += len;
        }
        Ok(())
    }

    fn dump(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.base.ensure_open()?;
        device::dump_by_blocks(self, 0, MEMSIZE, CHUNK, buffer)
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;
        self.base.progress_init(RB_PROFILE.size());

        if let Some(devinfo) = self.devinfo() {
            self.base.emit(DeviceEvent::DevInfo(devinfo));
        }

        let mut pointers = [0u8; 3];
        self.read(EOP_ADDRESS, &mut pointers)?;
        let eop = u16::from_be_bytes([pointers[0], pointers[1]]) as u32;
        let mut slot = pointers[2] as u32 % LOGBOOK_SLOTS;
        if !RB_PROFILE.contains(eop) {
            return Err(DcError::status_with_context(
                Status::DataFormat,
                format!("end-of-profile pointer out of range: {eop:04x}"),
            ));
        }

        let mut logbook = vec![0u8; RB_LOGBOOK.size() as usize];
        self.read(RB_LOGBOOK.begin, &mut logbook)?;

        let mut budget = RB_PROFILE.size();
        let mut end = eop;
        let mut received = 0u32;
        for _ in 0..LOGBOOK_SLOTS {
            let index = (slot * 2) as usize;
            let length = u16::from_be_bytes([logbook[index], logbook[index + 1]]) as u32;
            // Null and all-ones lengths mark unused or overwritten slots.
            if length == 0 || length == 0xFFFF || length > budget {
                break;
            }

            let dive = self.read_ring(end, length)?;
            received += length;
            self.base.progress_update(received);

            let fingerprint = &dive[..FINGERPRINT_SIZE.min(dive.len())];
            if !self.base.fingerprint().is_empty() && fingerprint == self.base.fingerprint() {
                break;
            }
            if callback(&dive, fingerprint).is_break() {
                break;
            }

            budget -= length;
            end = RB_PROFILE.decrement(end, length);
            slot = (slot + LOGBOOK_SLOTS - 1) % LOGBOOK_SLOTS;
        }

        self.base.progress_finish();
        Ok(())
    }

    fn timesync(&mut self, datetime: &jiff::Zoned) -> Result<()> {
        self.base.ensure_open()?;

        let year = datetime.year() as u16;
        let payload = [
            (year >> 8) as u8,
            year as u8,
            datetime.month() as u8,
            datetime.day() as u8,
            datetime.hour() as u8,
            datetime.minute() as u8,
            datetime.second() as u8,
        ];
        self.transfer(CMD_TIMESYNC, &payload)?;
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
