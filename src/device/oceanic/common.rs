//! Command plumbing shared by the Oceanic serial families: every answer
//! is an ACK byte, a fixed-size payload and an additive checksum. A NAK
//! or a corrupt payload gets the command resent a bounded number of
//! times before the failure surfaces as a protocol error.

use crate::checksum::add8;
use crate::common::Status;
use crate::context::LogLevel;
use crate::device::DeviceBase;
use crate::error::{DcError, Result};
use crate::iostream::{self, IoStream};
use crate::logmsg;

pub(crate) const PAGE_SIZE: usize = 16;

pub(crate) const ACK: u8 = 0x5A;
pub(crate) const NAK: u8 = 0xA5;

const RETRIES: u32 = 3;

/// Send `command` and read back `payload_len` bytes plus the checksum.
pub(crate) fn transfer(
    stream: &mut dyn IoStream,
    base: &DeviceBase,
    command: &[u8],
    payload_len: usize,
) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        base.check_cancelled()?;

        iostream::write_exact(stream, command)?;
        stream.drain()?;

        match receive(stream, payload_len) {
            Ok(payload) => return Ok(payload),
            Err(err) if err.to_status() == Status::Protocol && attempt < RETRIES => {
                logmsg!(
                    base.context(),
                    LogLevel::Warning,
                    "resending command {:02x} after protocol error",
                    command[0]
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn receive(stream: &mut dyn IoStream, payload_len: usize) -> Result<Vec<u8>> {
    let mut status = [0u8; 1];
    iostream::read_exact(stream, &mut status)?;
    if status[0] == NAK {
        return Err(DcError::status_with_context(
            Status::Protocol,
            "device nak'd the command",
        ));
    }
    if status[0] != ACK {
        return Err(DcError::status_with_context(
            Status::Protocol,
            format!("unexpected status byte {:02x}", status[0]),
        ));
    }

    if payload_len == 0 {
        return Ok(Vec::new());
    }

    let mut payload = vec![0u8; payload_len + 1];
    iostream::read_exact(stream, &mut payload)?;

    let received = payload[payload_len];
    let computed = add8(&payload[..payload_len], 0x00);
    if received != computed {
        return Err(DcError::status_with_context(
            Status::Protocol,
            format!("checksum mismatch: computed {computed:02x}, received {received:02x}"),
        ));
    }

    payload.truncate(payload_len);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::iostream::testing::ScriptedStream;

    fn answer(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![ACK];
        out.extend_from_slice(payload);
        out.push(add8(payload, 0x00));
        out
    }

    #[test]
    fn test_transfer_checks_ack_and_checksum() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&answer(&[1, 2, 3]));

        let base = DeviceBase::new(&Context::default());
        let payload = transfer(&mut stream, &base, &[0x84], 3).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_transfer_retries_after_nak() {
        let mut stream = ScriptedStream::new();
        stream.queue_bytes(&[NAK]);
        stream.queue_bytes(&answer(&[7]));

        let base = DeviceBase::new(&Context::default());
        let payload = transfer(&mut stream, &base, &[0xB4, 0x00, 0x10], 1).unwrap();
        assert_eq!(payload, vec![7]);
        // The command went out twice.
        assert_eq!(stream.written, vec![0xB4, 0x00, 0x10, 0xB4, 0x00, 0x10]);
    }

    #[test]
    fn test_transfer_gives_up_eventually() {
        let mut stream = ScriptedStream::new();
        for _ in 0..=RETRIES {
            stream.queue_bytes(&[NAK]);
        }

        let base = DeviceBase::new(&Context::default());
        let err = transfer(&mut stream, &base, &[0x84], 1).unwrap_err();
        assert_eq!(err.to_status(), Status::Protocol);
    }
}
