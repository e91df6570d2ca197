//! Uwatec Memomouse: 9600 8N1, bit-reversed transit. The host pokes the
//! unit with NAKs until it starts talking, then receives the log as a
//! sequence of checksummed carrier packets. The unit transmits its log
//! twice; the repeat is detected by the first duplicated dive header.

use crate::buffer::Buffer;
use crate::checksum::{reverse_bits, xor8};
use crate::common::{Family, Status};
use crate::context::{Context, LogLevel};
use crate::descriptor::Descriptor;
use crate::device::{DevInfo, Device, DeviceBase, DeviceEvent, DiveCallback};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, Parity, SerialConfig, StopBits, Timeout};
use crate::logmsg;

const ACK: u8 = 0x60;
const NAK: u8 = 0xA8;

const PACKET_MAX: usize = 126;
const HEADER_SIZE: usize = 18;
const FINGERPRINT_SIZE: usize = 4;

const GREETING_INTERVAL_MS: u64 = 300;
const PACKET_RETRIES: u32 = 3;

pub struct MemomouseConfig {
    /// Upper bound on the greeting NAK loop. The original protocol waits
    /// forever; a ceiling turns a dead unit into a plain timeout.
    pub greeting_ceiling_ms: u64,
}

impl Default for MemomouseConfig {
    fn default() -> Self {
        Self {
            greeting_ceiling_ms: 20_000,
        }
    }
}

pub struct MemomouseDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    config: MemomouseConfig,
}

impl MemomouseDevice {
    pub fn open(
        context: &Context,
        _descriptor: &Descriptor,
        stream: Box<dyn IoStream>,
    ) -> Result<Self> {
        Self::open_with_config(context, stream, MemomouseConfig::default())
    }

    pub fn open_with_config(
        context: &Context,
        mut stream: Box<dyn IoStream>,
        config: MemomouseConfig,
    ) -> Result<Self> {
        stream.configure(&SerialConfig::new(9600, 8, Parity::None, StopBits::One))?;
        stream.set_timeout(Timeout::Bounded(GREETING_INTERVAL_MS as u32))?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context),
            stream,
            config,
        })
    }

    /// Poke the unit with NAKs until the first carrier byte shows up,
    /// then collect carriers until the line goes quiet again.
    fn read_stream(&mut self) -> Result<Vec<u8>> {
        self.base.emit(DeviceEvent::Waiting);

        let mut length = None;
        let mut waited = 0;
        while length.is_none() {
            self.base.check_cancelled()?;
            iostream::write_exact(&mut *self.stream, &[reverse_bits(NAK)])?;

            let mut byte = [0u8; 1];
            if self.stream.read(&mut byte)? == 1 {
                length = Some(reverse_bits(byte[0]));
            } else {
                waited += GREETING_INTERVAL_MS;
                if waited >= self.config.greeting_ceiling_ms {
                    return Err(DcError::status_with_context(
                        Status::Timeout,
                        "no answer to the greeting",
                    ));
                }
            }
        }

        let mut data = Vec::new();
        let mut len = length.unwrap();
        loop {
            let payload = self.read_carrier_body(len)?;
            data.extend_from_slice(&payload);

            let mut byte = [0u8; 1];
            if self.stream.read(&mut byte)? != 1 {
                // Quiet after at least one carrier: end of stream.
                break;
            }
            len = reverse_bits(byte[0]);
        }

        Ok(data)
    }

    /// Read the body of one carrier whose length byte is already in.
    /// Good carriers are acked; corrupt ones are nak'd and resent whole.
    fn read_carrier_body(&mut self, mut len: u8) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            if len == 0 || len as usize > PACKET_MAX {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    format!("carrier length out of range: {len}"),
                ));
            }

            let mut body = vec![0u8; len as usize + 1];
            iostream::read_exact(&mut *self.stream, &mut body)?;
            for byte in body.iter_mut() {
                *byte = reverse_bits(*byte);
            }

            let received = body[len as usize];
            let computed = xor8(&body[..len as usize], len);
            if received == computed {
                iostream::write_exact(&mut *self.stream, &[reverse_bits(ACK)])?;
                body.truncate(len as usize);
                return Ok(body);
            }

            if attempt >= PACKET_RETRIES {
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    format!("carrier checksum mismatch: computed {computed:02x}, received {received:02x}"),
                ));
            }
            attempt += 1;
            logmsg!(
                self.base.context(),
                LogLevel::Warning,
                "corrupt carrier, asking for a resend"
            );
            iostream::write_exact(&mut *self.stream, &[reverse_bits(NAK)])?;

            let mut byte = [0u8; 1];
            if self.stream.read(&mut byte)? != 1 {
                return Err(DcError::status_with_context(
                    Status::Timeout,
                    "no resend after nak",
                ));
            }
            len = reverse_bits(byte[0]);
        }
    }

    /// Split the inner stream into dive records and drop everything from
    /// the first repeated header onwards: those bytes are the mirrored
    /// copy of the log, not fresh data.
    fn split_dives(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut dives: Vec<Vec<u8>> = Vec::new();
        let mut seen: Vec<[u8; HEADER_SIZE]> = Vec::new();

        let mut offset = 0;
        while offset + 2 <= data.len() {
            let length = u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
            if length < HEADER_SIZE || offset + 2 + length > data.len() {
                break;
            }

            let record = &data[offset + 2..offset + 2 + length];
            let header: [u8; HEADER_SIZE] = record[..HEADER_SIZE].try_into().unwrap();
            if seen.contains(&header) {
                break;
            }
            seen.push(header);
            dives.push(record.to_vec());

            offset += 2 + length;
        }

        dives
    }
}

impl Device for MemomouseDevice {
    fn family(&self) -> Family {
        Family::UwatecMemoMouse
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
        let data = self.read_stream()?;
        buffer.clear();
        buffer.append(&data);
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback) -> Result<()> {
        self.base.ensure_open()?;

        let data = self.read_stream()?;
        let dives = self.split_dives(&data);

        if let Some(newest) = dives.last() {
            self.base.emit(DeviceEvent::DevInfo(DevInfo {
                model: newest[4] as u32,
                firmware: 0,
                serial: u32::from_le_bytes([newest[5], newest[6], newest[7], newest[8]]),
            }));
        }

        // The unit transmits oldest first; deliver newest first.
        for dive in dives.iter().rev() {
            let fingerprint = &dive[..FINGERPRINT_SIZE];
            if !self.base.fingerprint().is_empty() && fingerprint == self.base.fingerprint() {
                break;
            }
            if callback(dive, fingerprint).is_break() {
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
