//! Oceanic Atom 2 and relatives: 38400 8N1, 16-byte pages. A probe wakes
//! the unit, the version block identifies it, and the log is organised as
//! a logbook ring of 8-byte entries pointing into a profile page ring.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::device::oceanic::common::{self, PAGE_SIZE};
use crate::device::ringbuffer::Ring;
use crate::device::{self, DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};

const MEMSIZE: u32 = 0x8000;
const FINGERPRINT_SIZE: usize = 8;

const CMD_PROBE: u8 = 0x34;
const PROBE_READY: u8 = 0x10;
const CMD_VERSION: u8 = 0x84;
const CMD_READ_PAGE: u8 = 0xB4;
const CMD_QUIT: u8 = 0x6A;

const PROBE_RETRIES: u32 = 3;

/// Pointer page: logbook head index, entry count, end-of-profile page.
const POINTER_PAGE: u16 = 0x0004;

const RB_LOGBOOK_BEGIN: u32 = 0x0240;
const LOGBOOK_ENTRY_SIZE: usize = 8;
const LOGBOOK_SLOTS: u32 = 256;

/// Profile storage, in page numbers.
const RB_PROFILE_PAGES: Ring = Ring::new(0x00A4, 0x0800);

pub struct Atom2Device {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    version: [u8; PAGE_SIZE],
}

impl Atom2Device {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        mut stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(38400, 8, Parity::None, StopBits::One))?;
        stream.set_timeout(Timeout::Bounded(1000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context),
            stream,
            version: [0; PAGE_SIZE],
        };

        device.probe()?;

        let version = common::transfer(
            &mut *device.stream,
            &device.base,
            &[CMD_VERSION],
            PAGE_SIZE,
        )?;
        device.version.copy_from_slice(&version);

        device.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: u16::from_be_bytes([version[0], version[1]]) as u32,
            firmware: u16::from_be_bytes([version[2], version[3]]) as u32,
            serial: u32::from_le_bytes([version[4], version[5], version[6], version[7]]),
        }));

        Ok(device)
    }

    /// Wake the unit: it answers the probe with a ready byte once it is
    /// listening.
    fn probe(&mut self) -> Result<()> {
        let mut attempt = 0;
        loop {
            self.base.check_cancelled()?;
            iostream::write_exact(&mut *self.stream, &[CMD_PROBE])?;

            let mut answer = [0u8; 1];
            match iostream::read_exact(&mut *self.stream, &mut answer) {
                Ok(()) if answer[0] == PROBE_READY => return Ok(()),
                Ok(()) => {
                    return Err(DcError::status_with_context(
                        Status::Protocol,
                        format!("unexpected probe answer {:02x}", answer[0]),
                    ));
                }
                Err(err) if err.to_status() == Status::Timeout && attempt < PROBE_RETRIES => {
                    attempt += 1;
                    self.stream.sleep(100)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn read_page(&mut self, page: u16) -> Result<Vec<u8>> {
        let command = [CMD_READ_PAGE, (page >> 8) as u8, page as u8];
        common::transfer(&mut *self.stream, &self.base, &command, PAGE_SIZE)
    }

    fn read_logbook_entry(&mut self, index: u32) -> Result<Vec<u8>> {
        let address = RB_LOGBOOK_BEGIN + index * LOGBOOK_ENTRY_SIZE as u32;
        let page = self.read_page((address / PAGE_SIZE as u32) as u16)?;
        let offset = (address % PAGE_SIZE as u32) as usize;
        Ok(page[offset..offset + LOGBOOK_ENTRY_SIZE].to_vec())
    }
}

fn entry_is_blank(entry: &[u8]) -> bool {
    entry.iter().all(|byte| *byte == 0x00) || entry.iter().all(|byte| *byte == 0xFF)
}

impl Device for Atom2Device {
    fn family(&self) -> Family {
        Family::OceanicAtom2
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

    /// Page-granular memory read.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.base.ensure_open()?;
        if address % PAGE_SIZE as u32 != 0 || buf.len() % PAGE_SIZE != 0 {
            return Err(DcError::status_with_context(
                Status::InvalidArgs,
                "reads must be page aligned",
            ));
        }

        let mut offset = 0;
        while offset < buf.len() {
            let page = (address / PAGE_SIZE as u32) as u16 + (offset / PAGE_SIZE) as u16;
            let data = self.read_page(page)?;
            buf[offset..offset + PAGE_SIZE].copy_from_slice(&data);
            offset += PAGE_SIZE;
        }
        Ok(())
    }

    fn dump(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.base.ensure_open()?;
        device::dump_by_blocks(self, 0, MEMSIZE, PAGE_SIZE, buffer)
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;
        self.base
            .progress_init(RB_PROFILE_PAGES.size() * PAGE_SIZE as u32);

        if let Some(devinfo) = self.devinfo() {
            self.base.emit(DeviceEvent::DevInfo(devinfo));
        }

        let pointers = self.read_page(POINTER_PAGE)?;
        let mut index = u16::from_le_bytes([pointers[0], pointers[1]]) as u32 % LOGBOOK_SLOTS;
        let count = (u16::from_le_bytes([pointers[2], pointers[3]]) as u32).min(LOGBOOK_SLOTS);

        let mut budget = RB_PROFILE_PAGES.size();
        let mut received = 0u32;
        for _ in 0..count {
            self.base.check_cancelled()?;

            let entry = self.read_logbook_entry(index)?;
            if entry_is_blank(&entry) {
                break;
            }

            // The logbook entry is the fingerprint: no profile transfer
            // is wasted on dives the host already has.
            if !self.base.fingerprint().is_empty() && entry == self.base.fingerprint() {
                break;
            }

            let first = u16::from_le_bytes([entry[0], entry[1]]) as u32;
            let end = u16::from_le_bytes([entry[2], entry[3]]) as u32;
            if !RB_PROFILE_PAGES.contains(first) || !RB_PROFILE_PAGES.contains(end) {
                return Err(DcError::status_with_context(
                    Status::DataFormat,
                    format!("logbook entry points outside the profile: {first:04x}..{end:04x}"),
                ));
            }

            let mut npages = RB_PROFILE_PAGES.distance(first, end);
            if npages == 0 {
                npages = RB_PROFILE_PAGES.size();
            }
            if npages > budget {
                break;
            }

            let mut dive = entry.clone();
            let mut page = first;
            for _ in 0..npages {
                let data = self.read_page(page as u16)?;
                dive.extend_from_slice(&data);
                page = RB_PROFILE_PAGES.increment(page, 1);

                received += PAGE_SIZE as u32;
                self.base.progress_update(received);
            }

            if callback(&dive, &entry).is_break() {
                break;
            }

            budget -= npages;
            index = (index + LOGBOOK_SLOTS - 1) % LOGBOOK_SLOTS;
        }

        self.base.progress_finish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.base.is_closed() {
            return Ok(());
        }
        let result = iostream::write_exact(&mut *self.stream, &[CMD_QUIT])
            .and_then(|_| self.stream.close());
        self.base.mark_closed();
        result
    }
}
