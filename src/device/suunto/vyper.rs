//! Suunto Vyper and friends: 2400 8O1, 32-byte packets, XOR-8 checksums.
//! DTR powers the interface, RTS gates the transmit direction. Dives are
//! streamed one request at a time and arrive back-to-front.

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::{Context, LogLevel};
use crate::descriptor::Descriptor;
use crate::device::suunto::common::{self, ProtocolConfig};
use crate::device::{self, DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};
use crate::logmsg;

const MEMSIZE: u32 = 0x2000;
const PACKET_SIZE: usize = 32;
const FINGERPRINT_SIZE: usize = 5;

const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;
const CMD_DIVE_FIRST: u8 = 0x08;
const CMD_DIVE_NEXT: u8 = 0x09;

const ACK: u8 = 0x06;
const NAK: u8 = 0x15;

const VERSION_ADDRESS: u32 = 0x0024;
const SERIAL_ADDRESS: u32 = 0x0010;

/// Per-packet resend attempts before a corrupt dive packet is fatal.
const PACKET_RETRIES: u32 = 3;

/// Knobs that vary between the genuine interface and the clones.
pub struct VyperConfig {
    /// Whether a packet shorter than 32 bytes ends the current dive.
    pub end_dive_on_short_packet: bool,
    /// Whether the interface echoes every command byte.
    pub echo: bool,
}

impl Default for VyperConfig {
    fn default() -> Self {
        Self {
            end_dive_on_short_packet: true,
            echo: false,
        }
    }
}

pub struct VyperDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    version: [u8; 4],
    config: VyperConfig,
}

impl VyperDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        Self::open_with_config(context, stream, VyperConfig::default())
    }

    pub fn open_with_config(
        context: &Context,
        mut stream: Box<dyn IoStream>,
        config: VyperConfig,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(2400, 8, Parity::Odd, StopBits::One))?;
        stream.set_timeout(Timeout::Bounded(1000))?;

        // DTR powers the interface; give it time to come up.
        stream.set_dtr(true)?;
        stream.sleep(500)?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context),
            stream,
            version: [0; 4],
            config,
        };

        let mut version = [0u8; 4];
        device.read(VERSION_ADDRESS, &mut version)?;
        let mut serial = [0u8; 4];
        device.read(SERIAL_ADDRESS, &mut serial)?;
        device.version = version;

        device.base.emit(DeviceEvent::DevInfo(DevInfo {
            model: version[0] as u32,
            firmware: version[1] as u32,
            serial: u32::from_be_bytes(serial),
        }));

        Ok(device)
    }

    fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            settle_ms: 200,
            echo: self.config.echo,
            retries: 2,
        }
    }

    /// Read one dive, or `None` when the device reports a zero-length
    /// packet: either there are no more dives, or the ring wrapped under
    /// the current one and its partial data must be dropped.
    fn read_dive(&mut self, first: bool) -> Result<Option<Vec<u8>>> {
        let cmd = if first { CMD_DIVE_FIRST } else { CMD_DIVE_NEXT };
        let command = common::make_command(&[cmd, 0xA5]);

        self.base.check_cancelled()?;
        self.stream.set_rts(true)?;
        iostream::write_exact(&mut *self.stream, &command)?;
        self.stream.drain()?;
        self.stream.sleep(200)?;
        self.stream.purge(Direction::Input)?;
        self.stream.set_rts(false)?;

        let mut dive: Vec<u8> = Vec::new();
        let mut npackets = 0u32;
        loop {
            let mut header = [0u8; 2];
            match iostream::read_exact(&mut *self.stream, &mut header) {
                Ok(()) => {}
                Err(err) if err.to_status() == Status::Timeout && npackets > 0 => {
                    // The final packet went missing; what we have is the
                    // whole dive.
                    break;
                }
                Err(err) => return Err(err),
            }

            if header[0] != cmd {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    format!("unexpected dive packet header {:02x}", header[0]),
                ));
            }

            let len = header[1] as usize;
            if len == 0 {
                let mut crc = [0u8; 1];
                iostream::read_exact(&mut *self.stream, &mut crc)?;
                common::verify_answer(cmd, &[header[0], header[1], crc[0]])?;
                if npackets > 0 {
                    logmsg!(
                        self.base.context(),
                        LogLevel::Info,
                        "ring wrapped mid-dive, discarding {} bytes",
                        dive.len()
                    );
                }
                return Ok(None);
            }
            if len > PACKET_SIZE {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    format!("dive packet too large: {len}"),
                ));
            }

            let payload = self.read_dive_packet(cmd, header[1])?;
            dive.extend_from_slice(&payload);
            npackets += 1;

            if len < PACKET_SIZE && self.config.end_dive_on_short_packet {
                break;
            }
        }

        // The profile is transmitted back-to-front.
        crate::checksum::reverse_bytes(&mut dive);
        Ok(Some(dive))
    }

    /// Read the body of one dive packet whose header is already in, ack
    /// it, and resend a NAK for corrupt bodies up to the retry bound.
    fn read_dive_packet(&mut self, cmd: u8, len_byte: u8) -> Result<Vec<u8>> {
        let len = len_byte as usize;
        let mut attempt = 0;
        loop {
            let mut body = vec![0u8; len + 1];
            iostream::read_exact(&mut *self.stream, &mut body)?;

            let mut packet = Vec::with_capacity(len + 3);
            packet.push(cmd);
            packet.push(len_byte);
            packet.extend_from_slice(&body);

            match common::verify_answer(cmd, &packet) {
                Ok(()) => {
                    iostream::write_exact(&mut *self.stream, &[ACK])?;
                    body.truncate(len);
                    return Ok(body);
                }
                Err(err) if attempt < PACKET_RETRIES => {
                    logmsg!(
                        self.base.context(),
                        LogLevel::Warning,
                        "corrupt dive packet, asking for a resend"
                    );
                    attempt += 1;
                    iostream::write_exact(&mut *self.stream, &[NAK])?;
                    // The device resends the whole packet.
                    let mut header = [0u8; 2];
                    iostream::read_exact(&mut *self.stream, &mut header)?;
                    if header != [cmd, len_byte] {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Device for VyperDevice {
    fn family(&self) -> Family {
        Family::SuuntoVyper
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

        let protocol = self.protocol();
        let mut offset = 0;
        while offset < buf.len() {
            let len = PACKET_SIZE.min(buf.len() - offset);
            let current = address + offset as u32;
            let request = [
                CMD_READ,
                (current >> 8) as u8,
                current as u8,
                len as u8,
            ];
            let command = common::make_command(&request);
            let answer = common::transfer(
                &mut *self.stream,
                &self.base,
                &protocol,
                &command,
                len + 5,
            )?;
            if answer[1..4] != request[1..4] {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    "read reply does not match the request header",
                ));
            }
            buf[offset..offset + len].copy_from_slice(&answer[4..4 + len]);
            offset += len;
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.base.ensure_open()?;

        let protocol = self.protocol();
        let mut offset = 0;
        while offset < data.len() {
            let len = PACKET_SIZE.min(data.len() - offset);
            let current = address + offset as u32;
            let mut request = vec![
                CMD_WRITE,
                (current >> 8) as u8,
                current as u8,
                len as u8,
            ];
            request.extend_from_slice(&data[offset..offset + len]);
            let command = common::make_command(&request);
            let answer =
                common::transfer(&mut *self.stream, &self.base, &protocol, &command, 5)?;
            if answer[1..4] != request[1..4] {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    "write reply does not match the request header",
                ));
            }
            offset += len;
        }
        Ok(())
    }

    fn dump(&mut self, buffer: &mut Buffer) -> Result<()> {
        self.base.ensure_open()?;
        device::dump_by_blocks(self, 0, MEMSIZE, PACKET_SIZE, buffer)
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;
        self.base.progress_init(MEMSIZE);

        if let Some(devinfo) = self.devinfo() {
            self.base.emit(DeviceEvent::DevInfo(devinfo));
        }

        let mut received = 0u32;
        let mut first = true;
        loop {
            let Some(dive) = self.read_dive(first)? else {
                break;
            };
            first = false;

            received += dive.len() as u32;
            self.base.progress_update(received);

            let fingerprint = &dive[..FINGERPRINT_SIZE.min(dive.len())];
            if !self.base.fingerprint().is_empty() && fingerprint == self.base.fingerprint() {
                break;
            }
            if callback(&dive, fingerprint).is_break() {
                break;
            }
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
