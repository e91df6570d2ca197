//! Suunto Solution: 1200 8N2, poll-driven. Every memory byte is fetched
//! with its own request after a three-byte handshake puts the unit in
//! transfer mode. The oldest interface in the catalog, 256 bytes total.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::ringbuffer::{Ring, linearize_forward};
use crate::device::{DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};

const MEMSIZE: usize = 0x100;

const HANDSHAKE_REQUEST: u8 = 0x3F;
const HANDSHAKE_ACK: u8 = 0x01;
const HANDSHAKE_CONFIRM: u8 = 0x4D;

/// Dive records inside the profile ring start with this marker.
const DIVE_MARKER: u8 = 0x80;

const RB_PROFILE: Ring = Ring::new(0x20, 0x100);

const HDR_MODEL: usize = 0x00;
const HDR_EOP: usize = 0x18;
const HDR_SERIAL: usize = 0x1C; // 4 bytes, big endian

pub struct SolutionDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl std::fmt::Debug for SolutionDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionDevice")
            .field("base", &self.base)
            .finish()
    }
}

impl SolutionDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        mut stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(1200, 8, Parity::None, StopBits::Two))?;
        stream.set_timeout(Timeout::Bounded(1000))?;
        stream.purge(Direction::All)?;

        // 0x3F asks for attention, the unit answers 0x01, 0x4D confirms.
        iostream::write_exact(&mut *stream, &[HANDSHAKE_REQUEST])?;
        let mut answer = [0u8; 1];
        iostream::read_exact(&mut *stream, &mut answer)?;
        if answer[0] != HANDSHAKE_ACK {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("unexpected handshake answer {:02x}", answer[0]),
            ));
        }
        iostream::write_exact(&mut *stream, &[HANDSHAKE_CONFIRM])?;

        Ok(Self {
            base: DeviceBase::new(context),
            stream,
        })
    }

    fn dump_memory(&mut self) -> Result<Vec<u8>> {
        self.base.progress_init(MEMSIZE as u32);

        let mut memory = vec![0u8; MEMSIZE];
        for address in 0..MEMSIZE {
            self.base.check_cancelled()?;

            iostream::write_exact(&mut *self.stream, &[address as u8])?;
            let mut byte = [0u8; 1];
            iostream::read_exact(&mut *self.stream, &mut byte)?;
            memory[address] = byte[0];

            self.base.progress_update(address as u32 + 1);
        }

        self.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: memory[HDR_MODEL] as u32,
            firmware: 0,
            serial: u32::from_be_bytes([
                memory[HDR_SERIAL],
                memory[HDR_SERIAL + 1],
                memory[HDR_SERIAL + 2],
                memory[HDR_SERIAL + 3],
            ]),
        }));

        Ok(memory)
    }
}

/// Scan backwards from the end-of-profile pointer for dive markers.
/// The Solution keeps no timestamps, so there is no fingerprint and
/// every dive is always delivered.
fn extract_dives(base: &mut DeviceBase, memory: &[u8], callback: DiveCallback) -> Result<()> {
    let eop = memory[HDR_EOP] as u32;
    if !RB_PROFILE.contains(eop) {
        return Err(DcError::status_with_context(
            Status::DataFormat,
            format!("end-of-profile pointer out of range: {eop:02x}"),
        ));
    }

    let mut budget = RB_PROFILE.size();
    let mut end = eop;
    while budget > 0 {
        // Hunt backwards for the marker opening this dive.
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
        if !found || consumed < 2 {
            break;
        }

        let dive = linearize_forward(
            memory,
            RB_PROFILE,
            RB_PROFILE.increment(position, 1),
            consumed - 1,
        );
        if callback(&dive, &[]).is_break() {
            break;
        }

        budget -= consumed;
        end = position;
    }

    base.progress_finish();
    Ok(())
}

impl Device for SolutionDevice {
    fn family(&self) -> Family {
        Family::SuuntoSolution
    }

    fn base(&self) -> &DeviceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DeviceBase {
        &mut self.base
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
