use std::fmt::{self, Display};

use crate::common::Transport;
use crate::error::{DcError, Result};

/// Timeout policy for [`IoStream::read`] and [`IoStream::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the request is satisfied or the transport fails.
    Blocking,
    /// Return immediately with whatever is available.
    NonBlocking,
    /// Total deadline in milliseconds: accumulate partial reads until the
    /// request is satisfied or the deadline expires, then return the
    /// partial count.
    Bounded(u32),
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Bounded(1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
    Software,
}

/// Serial line parameters. Each family fixes these inside its open
/// routine; they never change for the lifetime of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub databits: u8,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub flowcontrol: FlowControl,
}

impl SerialConfig {
    pub const fn new(baudrate: u32, databits: u8, parity: Parity, stopbits: StopBits) -> Self {
        Self {
            baudrate,
            databits,
            parity,
            stopbits,
            flowcontrol: FlowControl::None,
        }
    }
}

impl Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stopbits = match self.stopbits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{} {}{parity}{stopbits}", self.baudrate, self.databits)
    }
}

/// Which half of the pipe [`IoStream::purge`] discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    All,
}

/// Transport control requests that fall outside the byte-pipe model.
///
/// The C-compatible `(direction, magic, id, size)` code scheme survives
/// only in [`Ioctl::code`] for diagnostics; dispatch is on the variant.
#[derive(Debug)]
pub enum Ioctl<'a> {
    /// Read the remote device name, where the transport knows one.
    DeviceName(&'a mut String),
    /// Read a BLE characteristic into the buffer.
    BleCharacteristicRead(&'a mut Vec<u8>),
    /// Write a BLE characteristic.
    BleCharacteristicWrite(&'a [u8]),
    /// USB control transfer, device to host.
    UsbControlRead {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &'a mut Vec<u8>,
    },
    /// USB control transfer, host to device.
    UsbControlWrite {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &'a [u8],
    },
}

const IOCTL_DIR_READ: u32 = 1;
const IOCTL_DIR_WRITE: u32 = 2;
const IOCTL_MAGIC: u32 = b'D' as u32;

impl Ioctl<'_> {
    /// Legacy control code: `(direction << 30) | (size << 16) | (magic << 8) | id`.
    pub fn code(&self) -> u32 {
        let (dir, id, size) = match self {
            Self::DeviceName(_) => (IOCTL_DIR_READ, 0x01, 0),
            Self::BleCharacteristicRead(data) => (IOCTL_DIR_READ, 0x02, data.len()),
            Self::BleCharacteristicWrite(data) => (IOCTL_DIR_WRITE, 0x03, data.len()),
            Self::UsbControlRead { data, .. } => (IOCTL_DIR_READ, 0x10, data.len()),
            Self::UsbControlWrite { data, .. } => (IOCTL_DIR_WRITE, 0x11, data.len()),
        };
        (dir << 30) | ((size as u32 & 0x3FFF) << 16) | (IOCTL_MAGIC << 8) | id
    }
}

/// Uniform byte pipe between a device driver and a transport backend.
///
/// Implementations decide which capabilities they carry; everything not
/// implemented reports `Unsupported`. The crate itself ships no platform
/// backend — termios, HID, IrDA and BLE implementations plug in here.
pub trait IoStream {
    fn transport(&self) -> Transport;

    fn configure(&mut self, _config: &SerialConfig) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()>;

    /// Read up to `buf.len()` bytes according to the current [`Timeout`]:
    /// blocking fills the buffer or fails, non-blocking returns what is
    /// already there, bounded accumulates until the total deadline and
    /// then returns the partial count.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes; same timeout semantics as `read`.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn purge(&mut self, _direction: Direction) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    /// Block until every written byte is physically transmitted.
    fn drain(&mut self) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn sleep(&mut self, ms: u64) -> Result<()> {
        std::thread::sleep(std::time::Duration::from_millis(ms));
        Ok(())
    }

    /// Number of input bytes that can be read without waiting.
    fn available(&mut self) -> Result<usize> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn ioctl(&mut self, _request: Ioctl<'_>) -> Result<()> {
        Err(DcError::status(crate::common::Status::Unsupported))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fill `buf` completely or fail. A short read under the current
    /// timeout is reported as `Timeout`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>
    where
        Self: Sized,
    {
        read_exact(self, buf)
    }

    /// Write `buf` completely or fail.
    fn write_exact(&mut self, buf: &[u8]) -> Result<()>
    where
        Self: Sized,
    {
        write_exact(self, buf)
    }
}

impl<S: IoStream + ?Sized> IoStream for Box<S> {
    fn transport(&self) -> Transport {
        (**self).transport()
    }

    fn configure(&mut self, config: &SerialConfig) -> Result<()> {
        (**self).configure(config)
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn purge(&mut self, direction: Direction) -> Result<()> {
        (**self).purge(direction)
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        (**self).set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        (**self).set_rts(level)
    }

    fn sleep(&mut self, ms: u64) -> Result<()> {
        (**self).sleep(ms)
    }

    fn available(&mut self) -> Result<usize> {
        (**self).available()
    }

    fn ioctl(&mut self, request: Ioctl<'_>) -> Result<()> {
        (**self).ioctl(request)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Object-safe version of [`IoStream::read_exact`].
pub fn read_exact(stream: &mut (impl IoStream + ?Sized), buf: &mut [u8]) -> Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = stream.read(&mut buf[offset..])?;
        if n == 0 {
            return Err(DcError::status_with_context(
                crate::common::Status::Timeout,
                format!("short read: {offset} of {}", buf.len()),
            ));
        }
        offset += n;
    }
    Ok(())
}

/// Object-safe version of [`IoStream::write_exact`].
pub fn write_exact(stream: &mut (impl IoStream + ?Sized), buf: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = stream.write(&buf[offset..])?;
        if n == 0 {
            return Err(DcError::status_with_context(
                crate::common::Status::Timeout,
                format!("short write: {offset} of {}", buf.len()),
            ));
        }
        offset += n;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport double. Tests script what the "device" sends,
    //! including mid-response gaps, and inspect what the driver wrote.

    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug)]
    enum ScriptEvent {
        Bytes(VecDeque<u8>),
        /// Deadline expiry: the device stays silent for one read call.
        Gap,
    }

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedStream {
        script: VecDeque<ScriptEvent>,
        pub written: Vec<u8>,
        pub timeout: Timeout,
        pub config: Option<SerialConfig>,
        pub dtr: Option<bool>,
        pub rts: Option<bool>,
        pub purges: usize,
        pub drains: usize,
        pub sleeps_ms: u64,
        pub closed: bool,
    }

    impl ScriptedStream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_bytes(&mut self, bytes: &[u8]) -> &mut Self {
            self.script
                .push_back(ScriptEvent::Bytes(bytes.iter().copied().collect()));
            self
        }

        pub fn queue_gap(&mut self) -> &mut Self {
            self.script.push_back(ScriptEvent::Gap);
            self
        }

        pub fn remaining(&self) -> usize {
            self.script
                .iter()
                .map(|event| match event {
                    ScriptEvent::Bytes(bytes) => bytes.len(),
                    ScriptEvent::Gap => 0,
                })
                .sum()
        }
    }

    impl IoStream for ScriptedStream {
        fn transport(&self) -> Transport {
            Transport::Serial
        }

        fn configure(&mut self, config: &SerialConfig) -> Result<()> {
            self.config = Some(*config);
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut offset = 0;
            while offset < buf.len() {
                match self.script.front_mut() {
                    Some(ScriptEvent::Bytes(bytes)) => {
                        while offset < buf.len() {
                            match bytes.pop_front() {
                                Some(byte) => {
                                    buf[offset] = byte;
                                    offset += 1;
                                }
                                None => break,
                            }
                        }
                        if bytes.is_empty() {
                            self.script.pop_front();
                        }
                    }
                    Some(ScriptEvent::Gap) => {
                        self.script.pop_front();
                        return Ok(offset);
                    }
                    None => break,
                }
            }
            if offset < buf.len() && matches!(self.timeout, Timeout::Blocking) {
                return Err(DcError::status_with_context(
                    crate::common::Status::Timeout,
                    "script exhausted",
                ));
            }
            Ok(offset)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn purge(&mut self, _direction: Direction) -> Result<()> {
            self.purges += 1;
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            self.drains += 1;
            Ok(())
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.dtr = Some(level);
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.rts = Some(level);
            Ok(())
        }

        fn sleep(&mut self, ms: u64) -> Result<()> {
            // Simulated time; the tests only care that delays were honoured.
            self.sleeps_ms += ms;
            Ok(())
        }

        fn available(&mut self) -> Result<usize> {
            Ok(match self.script.front() {
                Some(ScriptEvent::Bytes(bytes)) => bytes.len(),
                _ => 0,
            })
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedStream;
    use super::*;
    use crate::common::Status;

    #[test]
    fn test_read_exact_across_chunks() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&[1, 2]).queue_bytes(&[3, 4, 5]);

        let mut buf = [0u8; 5];
        read_exact(&mut stream, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_short_read_is_timeout() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&[1, 2]);

        let mut buf = [0u8; 4];
        let err = read_exact(&mut stream, &mut buf).unwrap_err();
        assert_eq!(err.to_status(), Status::Timeout);
    }

    #[test]
    fn test_gap_yields_partial_read() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&[1, 2]).queue_gap().queue_bytes(&[3]);

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(stream.read(&mut buf[2..]).unwrap(), 1);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_ioctl_code_scheme() {
        let mut name = String::new();
        let code = Ioctl::DeviceName(&mut name).code();
        assert_eq!(code >> 30, 1);
        assert_eq!((code >> 8) & 0xFF, b'D' as u32);
        assert_eq!(code & 0xFF, 0x01);
    }

    #[test]
    fn test_serial_config_display() {
        let config = SerialConfig::new(2400, 8, Parity::Odd, StopBits::One);
        assert_eq!(config.to_string(), "2400 8O1");
    }
}
