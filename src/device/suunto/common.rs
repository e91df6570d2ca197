//! The request/response loop shared by the Suunto serial families.
//!
//! One transfer is: raise RTS, write the command, drain, settle, purge
//! the input side, lower RTS, optionally read back the command echo, read
//! the answer, verify command byte and checksum. Protocol errors are
//! retried up to the family's bound; everything else propagates.

use crate::checksum::xor8;
use crate::common::Status;
use crate::context::LogLevel;
use crate::device::DeviceBase;
use crate::error::{DcError, Result};
use crate::iostream::{self, Direction, IoStream};
use crate::logmsg;

pub(crate) struct ProtocolConfig {
    /// Post-write settle before the device starts answering.
    pub settle_ms: u64,
    /// Clone interfaces repeat every command byte in front of the answer.
    pub echo: bool,
    /// Additional attempts after a protocol failure.
    pub retries: u32,
}

/// Append the XOR-8 checksum to a command.
pub(crate) fn make_command(payload: &[u8]) -> Vec<u8> {
    let mut command = payload.to_vec();
    command.push(xor8(payload, 0x00));
    command
}

/// Validate one answer: it must open with the command byte and close with
/// the XOR-8 of everything in between.
pub(crate) fn verify_answer(command: u8, answer: &[u8]) -> Result<()> {
    if answer.len() < 2 || answer[0] != command {
        return Err(DcError::status_with_context(
            Status::Protocol,
            format!("unexpected answer for command {command:02x}"),
        ));
    }

    let received = answer[answer.len() - 1];
    let computed = xor8(&answer[1..answer.len() - 1], 0x00);
    if received != computed {
        return Err(DcError::status_with_context(
            Status::Protocol,
            format!("checksum mismatch: computed {computed:02x}, received {received:02x}"),
        ));
    }

    Ok(())
}

/// Run one command/answer exchange, including the RTS transmit gate.
pub(crate) fn transfer(
    stream: &mut dyn IoStream,
    base: &DeviceBase,
    config: &ProtocolConfig,
    command: &[u8],
    answer_len: usize,
) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        base.check_cancelled()?;

        stream.set_rts(true)?;
        iostream::write_exact(stream, command)?;
        stream.drain()?;
        stream.sleep(config.settle_ms)?;
        stream.purge(Direction::Input)?;
        stream.set_rts(false)?;

        let result = receive(stream, config, command, answer_len);
        match result {
            Ok(answer) => return Ok(answer),
            Err(err) if err.to_status() == Status::Protocol && attempt < config.retries => {
                logmsg!(
                    base.context(),
                    LogLevel::Warning,
                    "retrying command {:02x} after protocol error",
                    command[0]
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn receive(
    stream: &mut dyn IoStream,
    config: &ProtocolConfig,
    command: &[u8],
    answer_len: usize,
) -> Result<Vec<u8>> {
    if config.echo {
        let mut echo = vec![0u8; command.len()];
        iostream::read_exact(stream, &mut echo)?;
        if echo != command {
            return Err(DcError::status_with_context(
                Status::Protocol,
                "command echo mismatch",
            ));
        }
    }

    let mut answer = vec![0u8; answer_len];
    iostream::read_exact(stream, &mut answer)?;
    verify_answer(command[0], &answer)?;
    Ok(answer)
}
