//! Message type tags and payload shapes.
//!
//! Each tag is the little-endian `u32` that spells its ASCII four-character
//! code, exactly as the wire format requires.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

pub const GET: u32 = u32::from_le_bytes(*b"GET ");
pub const ACTN: u32 = u32::from_le_bytes(*b"ACTN");
pub const LOGN: u32 = u32::from_le_bytes(*b"LOGN");
pub const ACPT: u32 = u32::from_le_bytes(*b"ACPT");
pub const ACK: u32 = u32::from_le_bytes(*b"ACK ");
pub const NAK: u32 = u32::from_le_bytes(*b"NAK ");
pub const RSP: u32 = u32::from_le_bytes(*b"RSP ");
pub const STAT: u32 = u32::from_le_bytes(*b"STAT");

pub const USERNAME_FIELD_LEN: usize = 64;
pub const MACHINE_NAME_FIELD_LEN: usize = 64;

/// Writes a UTF-8 string into a fixed-size zero-padded field, truncating if
/// the encoded string is longer than the field.
fn write_fixed_str(buf: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(buf.len());
    buf[..copy_len].copy_from_slice(&bytes[..copy_len]);
}

/// Builds a `LOGN` payload: `LOGN | u32 access | 4B localAddr | 64B username | 64B machineName`.
pub fn build_login(access: u32, local_addr: [u8; 4], username: &str, machine_name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + 4 + 4 + USERNAME_FIELD_LEN + MACHINE_NAME_FIELD_LEN);
    payload.write_u32::<LittleEndian>(LOGN).unwrap();
    payload.write_u32::<LittleEndian>(access).unwrap();
    payload.write_all(&local_addr).unwrap();

    let mut username_field = [0u8; USERNAME_FIELD_LEN];
    write_fixed_str(&mut username_field, username);
    payload.write_all(&username_field).unwrap();

    let mut machine_field = [0u8; MACHINE_NAME_FIELD_LEN];
    write_fixed_str(&mut machine_field, machine_name);
    payload.write_all(&machine_field).unwrap();

    payload
}

/// Builds a `GET`/`ACTN` payload: `TAG | u32 seq | u32 subcommand | data`.
pub fn build_command(tag: u32, seq: u32, subcommand: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + 4 + 4 + data.len());
    payload.write_u32::<LittleEndian>(tag).unwrap();
    payload.write_u32::<LittleEndian>(seq).unwrap();
    payload.write_u32::<LittleEndian>(subcommand).unwrap();
    payload.write_all(data).unwrap();
    payload
}

/// Reads the 4-byte little-endian tag from the front of a payload.
pub fn read_tag(payload: &[u8]) -> io::Result<u32> {
    let mut cursor = Cursor::new(payload);
    cursor.read_u32::<LittleEndian>()
}

pub struct AckBody {
    pub sequence: u32,
}

pub struct NakBody {
    pub sequence: u32,
    pub status_code: u32,
}

pub struct RspHeader {
    pub sequence: u32,
    pub subcommand: u32,
    pub status_code: u32,
}

pub struct StatHeader {
    pub substatus: u32,
}

pub struct AcptBody {
    pub granted_access: i32,
}

/// Parses the body of an `ACPT` payload (tag already consumed).
pub fn parse_acpt(payload: &[u8]) -> io::Result<AcptBody> {
    let mut cursor = Cursor::new(&payload[4..]);
    Ok(AcptBody {
        granted_access: cursor.read_i32::<LittleEndian>()?,
    })
}

/// Parses the body of an `ACK` payload (tag already consumed).
pub fn parse_ack(payload: &[u8]) -> io::Result<AckBody> {
    let mut cursor = Cursor::new(&payload[4..]);
    Ok(AckBody {
        sequence: cursor.read_u32::<LittleEndian>()?,
    })
}

/// Parses the body of a `NAK` payload (tag already consumed).
pub fn parse_nak(payload: &[u8]) -> io::Result<NakBody> {
    let mut cursor = Cursor::new(&payload[4..]);
    Ok(NakBody {
        sequence: cursor.read_u32::<LittleEndian>()?,
        status_code: cursor.read_u32::<LittleEndian>()?,
    })
}

/// Parses the fixed-size header of a `RSP` payload (tag already consumed);
/// the response data begins immediately after at offset 16. Slices
/// open-ended so a short payload surfaces as `UnexpectedEof` rather than
/// panicking on an out-of-bounds index.
pub fn parse_rsp_header(payload: &[u8]) -> io::Result<RspHeader> {
    let mut cursor = Cursor::new(&payload[4..]);
    Ok(RspHeader {
        sequence: cursor.read_u32::<LittleEndian>()?,
        subcommand: cursor.read_u32::<LittleEndian>()?,
        status_code: cursor.read_u32::<LittleEndian>()?,
    })
}

/// Parses the fixed-size header of a `STAT` payload (tag already consumed);
/// the substatus-specific data begins at offset 8.
pub fn parse_stat_header(payload: &[u8]) -> io::Result<StatHeader> {
    let mut cursor = Cursor::new(&payload[4..8]);
    Ok(StatHeader {
        substatus: cursor.read_u32::<LittleEndian>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_payload_layout() {
        let payload = build_login(2, [127, 0, 0, 1], "alice", "workstation");
        assert_eq!(payload.len(), 4 + 4 + 4 + 64 + 64);
        assert_eq!(read_tag(&payload).unwrap(), LOGN);
        assert_eq!(&payload[8..12], &[127, 0, 0, 1]);
        assert_eq!(&payload[12..17], b"alice");
        assert_eq!(payload[17], 0);
        assert_eq!(&payload[76..87], b"workstation");
    }

    #[test]
    fn login_payload_truncates_long_names() {
        let long = "x".repeat(100);
        let payload = build_login(1, [0, 0, 0, 0], &long, &long);
        let username_field = &payload[12..76];
        assert_eq!(username_field.len(), 64);
        assert_eq!(username_field, &long.as_bytes()[..64]);
    }

    #[test]
    fn command_payload_layout() {
        let payload = build_command(GET, 0x1234_5678, 0xABCD, &[0xAA, 0xBB]);
        assert_eq!(read_tag(&payload).unwrap(), GET);
        assert_eq!(payload.len(), 4 + 4 + 4 + 2);
    }

    #[test]
    fn rsp_header_parses_and_leaves_data_at_offset_16() {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(RSP).unwrap();
        payload.write_u32::<LittleEndian>(42).unwrap();
        payload.write_u32::<LittleEndian>(0x1234).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.extend_from_slice(&[0x11, 0x22, 0x33]);

        let header = parse_rsp_header(&payload).unwrap();
        assert_eq!(header.sequence, 42);
        assert_eq!(header.subcommand, 0x1234);
        assert_eq!(header.status_code, 0);
        assert_eq!(&payload[16..], &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn rsp_header_rejects_short_payload_without_panicking() {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(RSP).unwrap();
        payload.write_u32::<LittleEndian>(42).unwrap();
        assert!(parse_rsp_header(&payload).is_err());
    }
}
