//! Framed packet layer over an arbitrary byte stream.
//!
//! Frames are `FLAG | payload (byte-stuffed) | CRC-16 | FLAG`. A corrupt
//! frame is dropped and the reader re-synchronises on the next FLAG,
//! reporting a protocol error for the frame it lost.

use crate::checksum::crc16_ccitt;
use crate::common::{Status, Transport};
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream, SerialConfig, Timeout};

const FLAG: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;
const CRC_INIT: u16 = 0xFFFF;

pub struct HdlcStream<S: IoStream> {
    inner: S,
    imtu: usize,
    omtu: usize,
}

impl<S: IoStream> std::fmt::Debug for HdlcStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdlcStream")
            .field("imtu", &self.imtu)
            .field("omtu", &self.omtu)
            .finish()
    }
}

impl<S: IoStream> HdlcStream<S> {
    pub fn new(inner: S, imtu: usize, omtu: usize) -> Self {
        Self { inner, imtu, omtu }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Send one packet as a single frame.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.omtu {
            return Err(DcError::status_with_context(
                Status::InvalidArgs,
                format!("frame larger than output mtu: {}", payload.len()),
            ));
        }

        iostream::write_exact(&mut self.inner, &encode(payload))
    }

    /// Receive one frame and return its payload.
    ///
    /// Bytes before the opening FLAG are discarded. A CRC mismatch or an
    /// oversize frame consumes the frame and fails with `Protocol`; the
    /// next call starts clean at the following FLAG.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut byte = [0u8; 1];

        // Hunt for the opening flag.
        loop {
            iostream::read_exact(&mut self.inner, &mut byte)?;
            if byte[0] == FLAG {
                break;
            }
        }

        let mut frame = Vec::new();
        let mut escaped = false;
        loop {
            iostream::read_exact(&mut self.inner, &mut byte)?;
            match byte[0] {
                FLAG => {
                    if frame.is_empty() && !escaped {
                        // Back-to-back flags between frames.
                        continue;
                    }
                    break;
                }
                ESCAPE => escaped = true,
                value => {
                    frame.push(if escaped { value ^ ESCAPE_XOR } else { value });
                    escaped = false;
                }
            }
            if frame.len() > self.imtu + 2 {
                self.skip_to_flag()?;
                return Err(DcError::status_with_context(
                    Status::Protocol,
                    "frame larger than input mtu",
                ));
            }
        }

        if escaped || frame.len() < 2 {
            return Err(DcError::status_with_context(
                Status::Protocol,
                "truncated frame",
            ));
        }

        let (payload, trailer) = frame.split_at(frame.len() - 2);
        let received = u16::from_be_bytes([trailer[0], trailer[1]]);
        let computed = crc16_ccitt(payload, CRC_INIT);
        if received != computed {
            return Err(DcError::status_with_context(
                Status::Protocol,
                format!("crc mismatch: computed {computed:04x}, received {received:04x}"),
            ));
        }

        Ok(payload.to_vec())
    }

    fn skip_to_flag(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            iostream::read_exact(&mut self.inner, &mut byte)?;
            if byte[0] == FLAG {
                return Ok(());
            }
        }
    }
}

fn encode(payload: &[u8]) -> Vec<u8> {
    let crc = crc16_ccitt(payload, CRC_INIT);
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(FLAG);
    for byte in payload.iter().chain(crc.to_be_bytes().iter()) {
        if *byte == FLAG || *byte == ESCAPE {
            frame.push(ESCAPE);
            frame.push(byte ^ ESCAPE_XOR);
        } else {
            frame.push(*byte);
        }
    }
    frame.push(FLAG);
    frame
}

/// Wire bytes for one frame, for tests that script the device side of a
/// framed link.
#[cfg(test)]
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    encode(payload)
}

impl<S: IoStream> IoStream for HdlcStream<S> {
    fn transport(&self) -> Transport {
        self.inner.transport()
    }

    fn configure(&mut self, config: &SerialConfig) -> Result<()> {
        self.inner.configure(config)
    }

    fn set_timeout(&mut self, timeout: Timeout) -> Result<()> {
        self.inner.set_timeout(timeout)
    }

    /// One frame per call; the buffer must hold the whole payload.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame = self.read_frame()?;
        if frame.len() > buf.len() {
            return Err(DcError::status_with_context(
                Status::InvalidArgs,
                "buffer smaller than frame",
            ));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_frame(buf)?;
        Ok(buf.len())
    }

    fn purge(&mut self, direction: Direction) -> Result<()> {
        self.inner.purge(direction)
    }

    fn drain(&mut self) -> Result<()> {
        self.inner.drain()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.inner.set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.inner.set_rts(level)
    }

    fn sleep(&mut self, ms: u64) -> Result<()> {
        self.inner.sleep(ms)
    }

    fn available(&mut self) -> Result<usize> {
        self.inner.available()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iostream::testing::ScriptedStream;

    #[test]
    fn test_write_stuffs_reserved_bytes() {
        let mut hdlc = HdlcStream::new(ScriptedStream::new(), 64, 64);
        hdlc.write_frame(&[0x01, FLAG, ESCAPE, 0x02]).unwrap();

        let written = &hdlc.into_inner().written;
        assert_eq!(written[0], FLAG);
        assert_eq!(*written.last().unwrap(), FLAG);
        // No unescaped FLAG or ESCAPE inside the body.
        for byte in &written[1..written.len() - 1] {
            assert_ne!(*byte, FLAG);
        }
        assert_eq!(written[2], ESCAPE);
        assert_eq!(written[3], FLAG ^ ESCAPE_XOR);
    }

    #[test]
    fn test_read_roundtrip() {
        let payload = [0x10, FLAG, 0x30, ESCAPE];
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&encode_frame(&payload));

        let mut hdlc = HdlcStream::new(stream, 64, 64);
        assert_eq!(hdlc.read_frame().unwrap(), payload);
    }

    #[test]
    fn test_crc_error_then_resync() {
        let mut bad = encode_frame(&[1, 2, 3]);
        let body_len = bad.len();
        bad[body_len - 2] ^= 0xFF; // corrupt the crc

        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&bad);
        stream.queue_bytes(&encode_frame(&[4, 5, 6]));

        let mut hdlc = HdlcStream::new(stream, 64, 64);
        let err = hdlc.read_frame().unwrap_err();
        assert_eq!(err.to_status(), Status::Protocol);
        assert_eq!(hdlc.read_frame().unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_leading_noise_is_discarded() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&[0x00, 0x11, 0x22]);
        stream.queue_bytes(&encode_frame(&[9, 9]));

        let mut hdlc = HdlcStream::new(stream, 64, 64);
        assert_eq!(hdlc.read_frame().unwrap(), vec![9, 9]);
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&encode_frame(&[0xAB; 32]));
        stream.queue_bytes(&encode_frame(&[1]));

        let mut hdlc = HdlcStream::new(stream, 8, 64);
        let err = hdlc.read_frame().unwrap_err();
        assert_eq!(err.to_status(), Status::Protocol);
        assert_eq!(hdlc.read_frame().unwrap(), vec![1]);
    }
}
