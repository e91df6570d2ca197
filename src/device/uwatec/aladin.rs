//! Uwatec Aladin: 19200 8N1. The unit transmits on its own once the user
//! starts the transfer, as a single 2050-byte dump with every byte bit
//! reversed and a 16-bit additive checksum over the first 2048 bytes.

use crate::buffer::Buffer;
use crate::checksum::{add16, reverse_bits_buffer};
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::ringbuffer::{Ring, linearize_forward};
use crate::device::{DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};

const DUMP_SIZE: usize = 2050;
/// The checksum covers the 4-byte preamble plus the memory image.
const CHECKSUM_SPAN: usize = 2048;
const MEMSIZE: usize = 2044;
const CHUNK: usize = 256;
const FINGERPRINT_SIZE: usize = 4;

const PREAMBLE: [u8; 4] = [0x55, 0x55, 0x55, 0x00];

/// Offsets into the 2044-byte memory image.
const RB_PROFILE: Ring = Ring::new(0x000, 0x600);
const DIVE_MARKER: u8 = 0xFF;
const HDR_MODEL: usize = 0x7EC;
const HDR_SERIAL: usize = 0x7ED; // 3 bytes, big endian
const HDR_EOP: usize = 0x7F6; // u16 LE
const HDR_DEVTIME: usize = 0x7F8; // u32 LE, half-second ticks

pub struct AladinDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl AladinDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        mut stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(19200, 8, Parity::None, StopBits::One))?;
        stream.set_timeout(Timeout::Bounded(1000))?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context),
            stream,
        })
    }

    fn dump_memory(&mut self) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        // The transfer is started on the unit; all we can do is wait.
        self.base.emit(DeviceEvent::Waiting);
        self.base.progress_init(DUMP_SIZE as u32);

        let mut data = vec![0u8; DUMP_SIZE];
        let mut offset = 0;
        while offset < data.len() {
            self.base.check_cancelled()?;
            let len = CHUNK.min(data.len() - offset);
            iostream::read_exact(&mut *self.stream, &mut data[offset..offset + len])?;
            offset += len;
            self.base.progress_update(offset as u32);
        }

        reverse_bits_buffer(&mut data);

        if data[..4] != PREAMBLE {
            return Err(DcError::status_with_context(
                Status::Protocol,
                "dump does not start with the expected preamble",
            ));
        }

        let received = u16::from_le_bytes([data[CHECKSUM_SPAN], data[CHECKSUM_SPAN + 1]]);
        let computed = add16(&data[..CHECKSUM_SPAN], 0x0000);
        if received != computed {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("dump checksum mismatch: computed {computed:04x}, received {received:04x}"),
            ));
        }

        let memory = data[4..CHECKSUM_SPAN].to_vec();

        self.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: memory[HDR_MODEL] as u32,
            firmware: 0,
            serial: u32::from_be_bytes([
                0,
                memory[HDR_SERIAL],
                memory[HDR_SERIAL + 1],
                memory[HDR_SERIAL + 2],
            ]),
        }));

        let devtime = u32::from_le_bytes([
            memory[HDR_DEVTIME],
            memory[HDR_DEVTIME + 1],
            memory[HDR_DEVTIME + 2],
            memory[HDR_DEVTIME + 3],
        ]);
        let systime = jiff::Timestamp::now().as_second();
        self.base.emit(DeviceEvent::Clock { devtime, systime });

        Ok(memory)
    }
}

/// Marker scan, newest first: every dive record opens with a marker byte
/// followed by its four timestamp bytes.
fn extract_dives(base: &mut DeviceBase, memory: &[u8], callback: DiveCallback) -> Result<()> {
    let eop = u16::from_le_bytes([memory[HDR_EOP], memory[HDR_EOP + 1]]) as u32;
    if !RB_PROFILE.contains(eop) {
        return Err(DcError::status_with_context(
            Status::DataFormat,
            format!("end-of-profile pointer out of range: {eop:04x}"),
        ));
    }

    let mut budget = RB_PROFILE.size();
    let mut end = eop;
    while budget > 0 {
        let mut consumed = 0;
        let mut position = end;
        let mut found = false;
        while consumed < budget {
            position = RB_PROFILE.decrement(position, 1);
            consumed += 1;
            if memory[position as usize] == DIVE_MARKER {
                found = true;
                break;
            }
        }
        // A dive needs at least its timestamp after the marker.
        if !found || consumed < FINGERPRINT_SIZE as u32 + 1 {
            break;
        }

        let dive = linearize_forward(
            memory,
            RB_PROFILE,
            RB_PROFILE.increment(position, 1),
            consumed - 1,
        );
        let fingerprint: Vec<u8> = dive[..FINGERPRINT_SIZE].to_vec();

        if !base.fingerprint().is_empty() && fingerprint == base.fingerprint() {
            break;
        }
        if callback(&dive, &fingerprint).is_break() {
            break;
        }

        budget -= consumed;
        end = position;
    }

    base.progress_finish();
    Ok(())
}

impl Device for AladinDevice {
    fn family(&self) -> Family {
        Family::UwatecAladin
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
        let memory = self.dump_memory()?;
        buffer.clear();
        buffer.append(&memory);
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

    /// Memory image with dives laid down oldest first from the profile
    /// begin; each dive is a marker, a 4-byte timestamp, then samples.
    fn memory_image(dives: &[(u32, &[u8])]) -> Vec<u8> {
        let mut memory = vec![0u8; MEMSIZE];
        let mut address = RB_PROFILE.begin;
        for (timestamp, samples) in dives {
            memory[address as usize] = DIVE_MARKER;
            address = RB_PROFILE.increment(address, 1);
            for byte in timestamp.to_le_bytes().iter().chain(samples.iter()) {
                memory[address as usize] = *byte;
                address = RB_PROFILE.increment(address, 1);
            }
        }
        memory[HDR_EOP..HDR_EOP + 2].copy_from_slice(&(address as u16).to_le_bytes());
        memory[HDR_MODEL] = 0x3F;
        memory[HDR_SERIAL..HDR_SERIAL + 3].copy_from_slice(&[0x01, 0x02, 0x03]);
        memory[HDR_DEVTIME..HDR_DEVTIME + 4].copy_from_slice(&0x00100000u32.to_le_bytes());
        memory
    }

    /// Wrap a memory image the way the wire carries it: preamble, image,
    /// additive checksum, every byte bit-reversed.
    fn wire_dump(memory: &[u8]) -> Vec<u8> {
        let mut dump = Vec::with_capacity(DUMP_SIZE);
        dump.extend_from_slice(&PREAMBLE);
        dump.extend_from_slice(memory);
        let checksum = add16(&dump, 0x0000);
        dump.extend_from_slice(&checksum.to_le_bytes());
        reverse_bits_buffer(&mut dump);
        dump
    }

    fn device_over(stream: ScriptedStream) -> AladinDevice {
        AladinDevice {
            base: DeviceBase::new(&Context::default()),
            stream: Box::new(stream),
        }
    }

    #[test]
    fn test_dump_reverses_and_verifies() {
        let memory = memory_image(&[]);
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&wire_dump(&memory));

        let mut device = device_over(stream);
        let mut buffer = Buffer::new();
        device.dump(&mut buffer).unwrap();

        assert_eq!(buffer.as_slice(), memory.as_slice());
        assert_eq!(device.devinfo().unwrap().serial, 0x010203);
    }

    #[test]
    fn test_dump_rejects_corrupt_checksum() {
        let memory = memory_image(&[]);
        let mut dump = wire_dump(&memory);
        dump[100] ^= 0x01;

        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&dump);

        let mut device = device_over(stream);
        let mut buffer = Buffer::new();
        let err = device.dump(&mut buffer).unwrap_err();
        assert_eq!(err.to_status(), Status::Protocol);
    }

    #[test]
    fn test_checksum_matches_sum_of_first_2048() {
        let memory = memory_image(&[(0x1000, &[1, 2, 3])]);
        let mut dump = wire_dump(&memory);
        reverse_bits_buffer(&mut dump); // undo transit for inspection

        let received = u16::from_le_bytes([dump[2048], dump[2049]]);
        assert_eq!(received, add16(&dump[..2048], 0x0000));
    }

    #[test]
    fn test_foreach_newest_first_with_timestamp_fingerprints() {
        let memory = memory_image(&[(0x1000, &[1, 2, 3]), (0x2000, &[4, 5])]);
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&wire_dump(&memory));

        let mut device = device_over(stream);
        let mut dives: Vec<Vec<u8>> = Vec::new();
        device
            .foreach(&mut |data, fingerprint| {
                assert_eq!(fingerprint, &data[..FINGERPRINT_SIZE]);
                dives.push(data.to_vec());
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(dives.len(), 2);
        assert_eq!(&dives[0][..4], &0x2000u32.to_le_bytes());
        assert_eq!(&dives[1][..4], &0x1000u32.to_le_bytes());
    }

    #[test]
    fn test_foreach_stops_on_known_fingerprint() {
        let memory = memory_image(&[(0x1000, &[1, 2, 3]), (0x2000, &[4, 5])]);
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&wire_dump(&memory));

        let mut device = device_over(stream);
        device.set_fingerprint(&0x2000u32.to_le_bytes()).unwrap();

        let mut count = 0;
        device
            .foreach(&mut |_, _| {
                count += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
