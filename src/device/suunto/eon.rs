//! Suunto Eon and Solution Alpha: 1200 8N2. A single `'P'` command
//! triggers a full 0x900-byte memory dump terminated by an additive
//! checksum byte; dives are chained through embedded pointers.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::ringbuffer::{Ring, linearize_backward, linearize_forward};
use crate::device::{DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};

const MEMSIZE: usize = 0x900;
const FINGERPRINT_SIZE: usize = 6;

const CMD_DUMP: u8 = b'P';
const CHUNK: usize = 128;

/// Circular profile storage; the header below it carries the pointers.
const RB_PROFILE: Ring = Ring::new(0x100, 0x900);

const HDR_MODEL: usize = 0x00;
const HDR_SERIAL: usize = 0x01; // 3 bytes, big endian
const HDR_FIRMWARE: usize = 0x04;
const HDR_NDIVES: usize = 0x05;
const HDR_EOP: usize = 0x06; // 2 bytes, big endian

pub struct EonDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    header: Option<[u8; 16]>,
}

impl EonDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        mut stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(1200, 8, Parity::None, StopBits::Two))?;
        stream.set_timeout(Timeout::Bounded(3000))?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context),
            stream,
            header: None,
        })
    }

    fn dump_memory(&mut self) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        self.base.progress_init(MEMSIZE as u32 + 1);

        iostream::write_exact(&mut *self.stream, &[CMD_DUMP])?;
        self.stream.drain()?;

        let mut data = vec![0u8; MEMSIZE + 1];
        let mut offset = 0;
        while offset < data.len() {
            self.base.check_cancelled()?;
            let len = CHUNK.min(data.len() - offset);
            iostream::read_exact(&mut *self.stream, &mut data[offset..offset + len])?;
            offset += len;
            self.base.progress_update(offset as u32);
        }

        let received = data[MEMSIZE];
        let computed = crate::checksum::add8(&data[..MEMSIZE], 0x00);
        if received != computed {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("dump checksum mismatch: computed {computed:02x}, received {received:02x}"),
            ));
        }

        data.truncate(MEMSIZE);

        let mut header = [0u8; 16];
        header.copy_from_slice(&data[..16]);
        self.header = Some(header);

        self.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: data[HDR_MODEL] as u32,
            firmware: data[HDR_FIRMWARE] as u32,
            serial: u32::from_be_bytes([0, data[HDR_SERIAL], data[HDR_SERIAL + 1], data[HDR_SERIAL + 2]]),
        }));

        Ok(data)
    }
}

/// Walk the profile ring backwards. Each dive carries, in its last two
/// bytes, the big-endian ring address of its own start; the previous dive
/// ends where the current one begins.
fn extract_dives(
    base: &mut DeviceBase,
    memory: &[u8],
    callback: DiveCallback,
) -> Result<()> {
    let eop = u16::from_be_bytes([memory[HDR_EOP], memory[HDR_EOP + 1]]) as u32;
    if !RB_PROFILE.contains(eop) {
        return Err(DcError::status_with_context(
            Status::DataFormat,
            format!("end-of-profile pointer out of range: {eop:04x}"),
        ));
    }

    let ndives = memory[HDR_NDIVES] as u32;
    let mut budget = RB_PROFILE.size();
    let mut end = eop;

    for _ in 0..ndives {
        let pointer = linearize_backward(memory, RB_PROFILE, end, 2);
        let start = u16::from_be_bytes([pointer[0], pointer[1]]) as u32;
        if start == 0xFFFF || !RB_PROFILE.contains(start) {
            break;
        }

        let length = RB_PROFILE.distance(start, end);
        if length <= 2 || length > budget {
            break;
        }

        let dive = linearize_forward(memory, RB_PROFILE, start, length - 2);
        let fingerprint: Vec<u8> = dive
            .iter()
            .take(FINGERPRINT_SIZE)
            .copied()
            .collect();

        if !base.fingerprint().is_empty() && fingerprint == base.fingerprint() {
            break;
        }
        if callback(&dive, &fingerprint).is_break() {
            break;
        }

        budget -= length;
        end = start;
    }

    base.progress_finish();
    Ok(())
}

impl Device for EonDevice {
    fn family(&self) -> Family {
        Family::SuuntoEon
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
        let Some(header) = &self.header else {
            return Err(DcError::status_with_context(
                Status::Unsupported,
                "identity block is read with the first dump",
            ));
        };
        if buf.len() < header.len() {
            return Err(DcError::status(Status::InvalidArgs));
        }
        buf[..header.len()].copy_from_slice(header);
        Ok(header.len())
    }

    fn dump(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.base.ensure_open()?;
        let data = self.dump_memory()?;
        buffer.clear();
        buffer.append(&data);
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;
        let memory = self.dump_memory()?;
        extract_dives(&mut self.base, &memory, callback)
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

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use super::*;
    use crate::iostream::testing::ScriptedStream;

    /// Build a memory image holding the given dives, oldest first,
    /// starting at the profile begin.
    fn memory_with_dives(dives: &[&[u8]]) -> Vec<u8> {
        let mut memory = vec![0u8; MEMSIZE];
        let mut address = RB_PROFILE.begin;
        for dive in dives {
            let start = address;
            for byte in *dive {
                memory[address as usize] = *byte;
                address = RB_PROFILE.increment(address, 1);
            }
            // Trailing pointer to this dive's start.
            let pointer = (start as u16).to_be_bytes();
            memory[address as usize] = pointer[0];
            address = RB_PROFILE.increment(address, 1);
            memory[address as usize] = pointer[1];
            address = RB_PROFILE.increment(address, 1);
        }
        memory[HDR_EOP] = (address >> 8) as u8;
        memory[HDR_EOP + 1] = address as u8;
        memory[HDR_NDIVES] = dives.len() as u8;
        memory[HDR_MODEL] = 0x02;
        memory[HDR_SERIAL] = 0x12;
        memory[HDR_SERIAL + 1] = 0x34;
        memory[HDR_SERIAL + 2] = 0x56;
        memory
    }

    fn scripted_dump(memory: &[u8]) -> ScriptedStream {
        let mut stream = ScriptedStream::new();
        let mut dump = memory.to_vec();
        dump.push(crate::checksum::add8(memory, 0x00));
        stream.queue_bytes(&dump);
        stream
    }

    fn device_over(stream: ScriptedStream) -> EonDevice {
        EonDevice {
            base: DeviceBase::new(&Context::default()),
            stream: Box::new(stream),
            header: None,
        }
    }

    #[test]
    fn test_dump_verifies_checksum() {
        let memory = memory_with_dives(&[]);
        let mut device = device_over(scripted_dump(&memory));

        let mut buffer = Buffer::new();
        device.dump(&mut buffer).unwrap();
        assert_eq!(buffer.len(), MEMSIZE);
        assert_eq!(device.devinfo().unwrap().serial, 0x123456);
    }

    #[test]
    fn test_dump_rejects_bad_checksum() {
        let memory = memory_with_dives(&[]);
        let mut dump = memory.clone();
        dump.push(crate::checksum::add8(&memory, 0x00).wrapping_add(1));

        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&dump);
        let mut device = device_over(stream);

        let mut buffer = Buffer::new();
        let err = device.dump(&mut buffer).unwrap_err();
        assert_eq!(err.to_status(), Status::Protocol);
    }

    #[test]
    fn test_foreach_newest_first() {
        let old = [0x90u8, 0x01, 0x01, 0x08, 0x00, 0x05, 0xAA];
        let new = [0x90u8, 0x02, 0x02, 0x09, 0x30, 0x10, 0xBB];
        let memory = memory_with_dives(&[&old, &new]);
        let mut device = device_over(scripted_dump(&memory));

        let mut dives: Vec<Vec<u8>> = Vec::new();
        device
            .foreach(&mut |data, fingerprint| {
                assert_eq!(fingerprint, &data[..FINGERPRINT_SIZE]);
                dives.push(data.to_vec());
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(dives.len(), 2);
        assert_eq!(dives[0], new);
        assert_eq!(dives[1], old);
    }

    #[test]
    fn test_foreach_stops_on_fingerprint() {
        let old = [0x90u8, 0x01, 0x01, 0x08, 0x00, 0x05, 0xAA];
        let new = [0x90u8, 0x02, 0x02, 0x09, 0x30, 0x10, 0xBB];
        let memory = memory_with_dives(&[&old, &new]);
        let mut device = device_over(scripted_dump(&memory));

        // The newest dive is already known: nothing gets delivered.
        device.set_fingerprint(&new[..FINGERPRINT_SIZE]).unwrap();
        let mut count = 0;
        device
            .foreach(&mut |_, _| {
                count += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_foreach_honours_early_stop() {
        let old = [0x90u8, 0x01, 0x01, 0x08, 0x00, 0x05, 0xAA];
        let new = [0x90u8, 0x02, 0x02, 0x09, 0x30, 0x10, 0xBB];
        let memory = memory_with_dives(&[&old, &new]);
        let mut device = device_over(scripted_dump(&memory));

        let mut count = 0;
        device
            .foreach(&mut |_, _| {
                count += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
