//! Framing messages on a byte stream.
//!
//! Writes go through [Encoder] (for a [tokio_util::codec::FramedWrite]).
//! Reads use [read_message] directly, because a rejected frame must still be
//! consumed from the stream, and the next read must start on a header boundary.

use std::{cmp, fmt, io};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tracing::debug;
use zerocopy::{AsBytes as _, FromZeroes as _};

use crate::{
    constants::{commands::Command, COMMAND_LEN, HEADER_LEN, MAX_MESSAGE_PAYLOAD},
    wire::{checksum, hex_bytes, Header},
    Error,
};

/// Largest read used to discard a rejected payload.
const DRAIN_CHUNK: usize = 4096;

/// A command from a header: printable ASCII, zero padded.
/// Unlike [Command], this includes commands we don't understand.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandName {
    padded: [u8; COMMAND_LEN],
    len: u8,
}

impl CommandName {
    /// Trailing zeros are padding; what's left must be non-empty and all printable.
    pub fn new(padded: [u8; COMMAND_LEN]) -> Result<Self, FramingError> {
        let len = padded
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |last| last + 1);
        match len != 0 && padded[..len].iter().all(u8::is_ascii_graphic) {
            true => Ok(Self {
                padded,
                len: len as u8,
            }),
            false => Err(FramingError::InvalidCommand(padded)),
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.padded[..usize::from(self.len)]).unwrap_or_default()
    }

    pub fn padded(&self) -> [u8; COMMAND_LEN] {
        self.padded
    }

    /// The [Command] this names, if we have one.
    pub fn known(&self) -> Option<Command> {
        Command::try_from(self.padded).ok()
    }
}

impl From<Command> for CommandName {
    fn from(command: Command) -> Self {
        Self {
            padded: command.padded(),
            len: command.as_str().len() as u8,
        }
    }
}

impl PartialEq<Command> for CommandName {
    fn eq(&self, other: &Command) -> bool {
        self.padded == other.padded()
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandName").field(&self.as_str()).finish()
    }
}

/// A framed message, with the payload left encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub network: u32,
    pub command: CommandName,
    pub payload: Bytes,
}

impl Message {
    pub fn new(network: u32, command: impl Into<CommandName>, payload: impl Into<Bytes>) -> Self {
        Self {
            network,
            command: command.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("payload of {len} bytes is larger than the limit of {max}")]
    PayloadTooLarge { len: u64, max: u32 },
    #[error("message is for network {actual:#010x}, not {expected:#010x}")]
    WrongNetwork { expected: u32, actual: u32 },
    #[error("invalid command bytes {0:02x?}")]
    InvalidCommand([u8; COMMAND_LEN]),
    #[error("checksum for {command} is {actual:02x?}, but the header says {expected:02x?}")]
    ChecksumMismatch {
        command: CommandName,
        expected: [u8; 4],
        actual: [u8; 4],
    },
}

/// Prepends a [Header] with the payload's real length and checksum.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    max_payload: u32,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            max_payload: MAX_MESSAGE_PAYLOAD,
        }
    }
}

impl tokio_util::codec::Encoder<Message> for Encoder {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        let length = match u32::try_from(len) {
            Ok(length) if length <= self.max_payload => length,
            _ => {
                return Err(FramingError::PayloadTooLarge {
                    len: len as u64,
                    max: self.max_payload,
                }
                .into())
            }
        };
        let header = Header {
            magic: item.network.into(),
            command: item.command.padded(),
            length: length.into(),
            checksum: checksum(&item.payload),
        };
        debug!(command = %item.command, size = length, checksum = ?hex_bytes(&header.checksum), "send");
        dst.reserve(HEADER_LEN + len);
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

/// Reads exactly one header.
/// Returns [None] if the stream ends cleanly before it, and [io::ErrorKind::UnexpectedEof] if it ends part way through.
pub async fn read_header<R>(reader: &mut R) -> io::Result<Option<Header>>
where
    R: AsyncRead + Unpin,
{
    let mut header = Header::new_zeroed();
    let buffer = header.as_bytes_mut();
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => filled += n,
        }
    }
    Ok(Some(header))
}

/// Reads one message for `network`.
///
/// The header is checked in this order:
/// - a length over [MAX_MESSAGE_PAYLOAD] fails before anything more is read.
/// - a foreign magic, or an invalid command, fails after the payload has been discarded.
///
/// The stream is left at the next header for every [FramingError] except [FramingError::PayloadTooLarge].
pub async fn read_message<R>(reader: &mut R, network: u32) -> Result<Option<Message>, Error>
where
    R: AsyncRead + Unpin,
{
    let Some(header) = read_header(reader).await? else {
        return Ok(None);
    };

    let length = header.length.get();
    if length > MAX_MESSAGE_PAYLOAD {
        return Err(FramingError::PayloadTooLarge {
            len: length.into(),
            max: MAX_MESSAGE_PAYLOAD,
        }
        .into());
    }

    let actual = header.magic.get();
    if actual != network {
        drain(reader, length).await?;
        return Err(FramingError::WrongNetwork {
            expected: network,
            actual,
        }
        .into());
    }

    let command = match CommandName::new(header.command) {
        Ok(command) => command,
        Err(e) => {
            drain(reader, length).await?;
            return Err(e.into());
        }
    };

    let mut payload = BytesMut::zeroed(length as usize);
    reader.read_exact(&mut payload).await?;

    let actual = checksum(&payload);
    if actual != header.checksum {
        return Err(FramingError::ChecksumMismatch {
            command,
            expected: header.checksum,
            actual,
        }
        .into());
    }

    debug!(%command, size = length, checksum = ?hex_bytes(&actual), "recv");
    Ok(Some(Message {
        network,
        command,
        payload: payload.freeze(),
    }))
}

/// Discards `len` bytes without holding more than [DRAIN_CHUNK] of them.
async fn drain<R>(reader: &mut R, len: u32) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; DRAIN_CHUNK];
    let mut remaining = len as usize;
    while remaining > 0 {
        let want = cmp::min(remaining, DRAIN_CHUNK);
        match reader.read(&mut chunk[..want]).await? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => remaining -= n,
        }
    }
    Ok(())
}
