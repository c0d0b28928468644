//! Frame codec: `SYNC | len | payload | END ` envelope.
//!
//! Pure and stateless: encode/decode never touch connection state, only
//! byte buffers.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const SYNC: [u8; 4] = *b"SYNC";
pub const END: [u8; 4] = *b"END ";

/// Default ceiling on a single frame's payload length.
pub const DEFAULT_MAX_FRAME: u32 = 10 * 1024 * 1024;

/// Smallest legal payload: a bare 4-byte message type tag.
pub const MIN_PAYLOAD_LEN: u32 = 4;

#[derive(Debug)]
pub enum FrameError {
    BadSync,
    BadLength(u32),
    BadEnd,
    ShortRead,
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ShortRead
        } else {
            FrameError::Io(err)
        }
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::BadSync => write!(f, "Bad SYNC"),
            FrameError::BadLength(len) => write!(f, "Bad length {}", len),
            FrameError::BadEnd => write!(f, "Bad END"),
            FrameError::ShortRead => write!(f, "short read, peer closed"),
            FrameError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encodes `payload` as a complete envelope and writes it to `writer` in one
/// call. Callers that need atomicity across the whole envelope (see
/// `Transport::send_message`) must serialize calls to this function
/// themselves; it does not lock anything on its own.
pub fn encode<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&SYNC)?;
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    writer.write_all(&END)?;
    Ok(())
}

/// Reads exactly one frame from `reader` and returns its payload.
///
/// `max_frame` bounds `length`; a frame outside `[MIN_PAYLOAD_LEN, max_frame]`
/// is rejected with `BadLength` before any attempt is made to read the
/// (potentially huge) payload.
pub fn decode<R: Read>(reader: &mut R, max_frame: u32) -> Result<Vec<u8>, FrameError> {
    let mut sync = [0u8; 4];
    reader.read_exact(&mut sync)?;
    if sync != SYNC {
        return Err(FrameError::BadSync);
    }

    let length = reader.read_u32::<LittleEndian>()?;
    if length < MIN_PAYLOAD_LEN || length > max_frame {
        return Err(FrameError::BadLength(length));
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let mut end = [0u8; 4];
    reader.read_exact(&mut end)?;
    if end != END {
        return Err(FrameError::BadEnd);
    }

    Ok(payload)
}
