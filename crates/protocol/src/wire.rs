//! The `DRV_INFO` / `DRV_COMMAND` / `DRV_RESPONSE` wire protocol (spec.md
//! §4.6.3). Little-endian, packed: the Open Question in spec.md §9 over
//! byte order is resolved here in favor of stating it as a protocol rule
//! rather than inheriting host endianness.
//!
//! Every message is read in two phases, matching the per-client state
//! machine of spec.md §4.6.4: a fixed-size header that carries enough
//! information to compute (or, for `DRV_COMMAND`'s argument list,
//! incrementally discover) the size of the remaining tail.

use odd_core::{MAX_COMMAND_ARGS, MAX_COMMAND_ARG_LEN, MAX_COMMAND_DESCRIPTION_LEN, MAX_COMMAND_NAME_LEN};

use crate::error::ProtocolError;
use crate::registry::CommandDescriptor;

pub const SIG_DRV_INFO: u8 = 1;
pub const SIG_DRV_COMMAND: u8 = 2;
pub const SIG_DRV_RESPONSE: u8 = 3;

pub fn signature_len() -> usize {
    1
}

pub fn decode_signature(byte: u8) -> Result<u8, ProtocolError> {
    match byte {
        SIG_DRV_INFO | SIG_DRV_COMMAND | SIG_DRV_RESPONSE => Ok(byte),
        other => Err(ProtocolError::UnknownSignature(other)),
    }
}

// ---- DRV_INFO ----

const NAME_SLOT: usize = MAX_COMMAND_NAME_LEN + 1;
const DESCR_SLOT: usize = MAX_COMMAND_DESCRIPTION_LEN + 1;
const RECORD_LEN: usize = NAME_SLOT + DESCR_SLOT + 1;

pub fn drv_info_header_len() -> usize {
    4
}

pub fn drv_info_record_len() -> usize {
    RECORD_LEN
}

/// Full message including the leading signature byte, for the driver side
/// to send.
pub fn encode_drv_info(commands: &[CommandDescriptor]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(1 + 4 + commands.len() * RECORD_LEN);
    buf.push(SIG_DRV_INFO);
    buf.extend_from_slice(&(commands.len() as u32).to_le_bytes());
    for cmd in commands {
        encode_record(&mut buf, cmd)?;
    }
    Ok(buf)
}

fn encode_record(buf: &mut Vec<u8>, cmd: &CommandDescriptor) -> Result<(), ProtocolError> {
    if cmd.name.len() > MAX_COMMAND_NAME_LEN {
        return Err(ProtocolError::NameTooLong);
    }
    if cmd.descr.len() > MAX_COMMAND_DESCRIPTION_LEN {
        return Err(ProtocolError::DescriptionTooLong);
    }
    let mut name_slot = [0u8; NAME_SLOT];
    name_slot[..cmd.name.len()].copy_from_slice(cmd.name.as_bytes());
    buf.extend_from_slice(&name_slot);
    let mut descr_slot = [0u8; DESCR_SLOT];
    descr_slot[..cmd.descr.len()].copy_from_slice(cmd.descr.as_bytes());
    buf.extend_from_slice(&descr_slot);
    buf.push(cmd.arity);
    Ok(())
}

/// Decodes the 4-byte `commands_number` header (excluding the signature,
/// already consumed by the caller's state machine).
pub fn decode_drv_info_count(hdr: &[u8]) -> Result<u32, ProtocolError> {
    let hdr: [u8; 4] =
        hdr.try_into().map_err(|_| ProtocolError::Truncated { needed: 4, got: hdr.len() })?;
    Ok(u32::from_le_bytes(hdr))
}

/// Decodes `count` fixed-size command records from `buf`.
pub fn decode_drv_info_records(buf: &[u8], count: u32) -> Result<Vec<CommandDescriptor>, ProtocolError> {
    let needed = count as usize * RECORD_LEN;
    if buf.len() < needed {
        return Err(ProtocolError::Truncated { needed, got: buf.len() });
    }
    let mut out = Vec::with_capacity(count as usize);
    for chunk in buf[..needed].chunks_exact(RECORD_LEN) {
        let name = nul_terminated_str(&chunk[..NAME_SLOT]);
        let descr = nul_terminated_str(&chunk[NAME_SLOT..NAME_SLOT + DESCR_SLOT]);
        let arity = chunk[NAME_SLOT + DESCR_SLOT];
        out.push(CommandDescriptor { name, descr, arity });
    }
    Ok(out)
}

fn nul_terminated_str(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

// ---- DRV_COMMAND ----

pub fn drv_command_header_len() -> usize {
    8
}

/// Full message including the leading signature byte, for the shell to send.
pub fn encode_drv_command(cmd_idx: u32, args: &[Vec<u8>]) -> Result<Vec<u8>, ProtocolError> {
    if args.len() > MAX_COMMAND_ARGS {
        return Err(ProtocolError::TooManyArguments);
    }
    let mut buf = Vec::with_capacity(9 + args.iter().map(|a| 1 + a.len()).sum::<usize>());
    buf.push(SIG_DRV_COMMAND);
    buf.extend_from_slice(&cmd_idx.to_le_bytes());
    buf.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        if arg.len() > MAX_COMMAND_ARG_LEN {
            return Err(ProtocolError::ArgumentTooLong);
        }
        buf.push(arg.len() as u8);
        buf.extend_from_slice(arg);
    }
    Ok(buf)
}

/// `(cmd_idx, argc)` from the 8-byte header (excluding signature).
pub fn decode_drv_command_header(hdr: &[u8]) -> Result<(u32, u32), ProtocolError> {
    if hdr.len() < 8 {
        return Err(ProtocolError::Truncated { needed: 8, got: hdr.len() });
    }
    let cmd_idx = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    let argc = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
    Ok((cmd_idx, argc))
}

/// Reads one argument's `len` byte, the first half of the per-argument
/// two-phase read driverd performs after the command header.
pub fn decode_arg_len(byte: u8) -> usize {
    byte as usize
}

// ---- DRV_RESPONSE ----

pub fn drv_response_header_len() -> usize {
    4
}

/// Full message including the leading signature byte, for the driver to send.
pub fn encode_drv_response(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.push(SIG_DRV_RESPONSE);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_drv_response_len(hdr: &[u8]) -> Result<u32, ProtocolError> {
    let hdr: [u8; 4] =
        hdr.try_into().map_err(|_| ProtocolError::Truncated { needed: 4, got: hdr.len() })?;
    Ok(u32::from_le_bytes(hdr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmd(name: &str, arity: u8, descr: &str) -> CommandDescriptor {
        CommandDescriptor { name: name.to_string(), arity, descr: descr.to_string() }
    }

    #[test]
    fn drv_info_round_trips() {
        let commands = vec![cmd("p", 1, "print"), cmd("echo", 64, "echo back")];
        let full = encode_drv_info(&commands).unwrap();
        assert_eq!(full[0], SIG_DRV_INFO);
        let count = decode_drv_info_count(&full[1..5]).unwrap();
        assert_eq!(count, 2);
        let decoded = decode_drv_info_records(&full[5..], count).unwrap();
        assert_eq!(decoded, commands);
    }

    #[test]
    fn drv_info_rejects_oversize_name() {
        let long_name = "x".repeat(MAX_COMMAND_NAME_LEN + 1);
        let err = encode_drv_info(&[cmd(&long_name, 0, "")]).unwrap_err();
        assert_eq!(err, ProtocolError::NameTooLong);
    }

    #[test]
    fn drv_command_round_trips() {
        let args = vec![b"hello".to_vec(), b"world".to_vec()];
        let full = encode_drv_command(0, &args).unwrap();
        assert_eq!(full[0], SIG_DRV_COMMAND);
        let (cmd_idx, argc) = decode_drv_command_header(&full[1..9]).unwrap();
        assert_eq!(cmd_idx, 0);
        assert_eq!(argc, 2);
        let mut cursor = 9;
        let mut decoded = Vec::new();
        for _ in 0..argc {
            let len = decode_arg_len(full[cursor]);
            cursor += 1;
            decoded.push(full[cursor..cursor + len].to_vec());
            cursor += len;
        }
        assert_eq!(decoded, args);
    }

    #[test]
    fn drv_response_round_trips() {
        let full = encode_drv_response(b"ok");
        assert_eq!(full[0], SIG_DRV_RESPONSE);
        let len = decode_drv_response_len(&full[1..5]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&full[5..5 + len as usize], b"ok");
    }

    #[test]
    fn unknown_signature_is_rejected() {
        assert_eq!(decode_signature(0x7f), Err(ProtocolError::UnknownSignature(0x7f)));
    }

    proptest::proptest! {
        #[test]
        fn drv_command_round_trips_arbitrary_args(
            args in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..16), 0..8)
        ) {
            let full = encode_drv_command(7, &args).unwrap();
            let (cmd_idx, argc) = decode_drv_command_header(&full[1..9]).unwrap();
            prop_assert_eq!(cmd_idx, 7);
            prop_assert_eq!(argc as usize, args.len());
            let mut cursor = 9;
            for arg in &args {
                let len = decode_arg_len(full[cursor]);
                cursor += 1;
                prop_assert_eq!(&full[cursor..cursor + len], arg.as_slice());
                cursor += len;
            }
        }
    }
}
