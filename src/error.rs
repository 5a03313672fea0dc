use std::{io, time::Duration};

use crate::{constants::commands::Command, protocol::CommandName, FramingError, ProtocolViolation};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The version/verack exchange went wrong.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("expected {expected}, but the peer sent {actual}")]
    UnexpectedMessage {
        expected: Command,
        actual: CommandName,
    },
    #[error("peer sent a second version message")]
    DuplicateVersion,
    #[error("couldn't get the newest block for our version message")]
    NewestBlock(#[source] BoxError),
    #[error("peer closed the connection during the handshake")]
    PeerClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad message frame")]
    Framing(#[from] FramingError),
    #[error("peer violated the protocol")]
    Protocol(#[from] ProtocolViolation),
    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),
    #[error("i/o error on the connection")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },
    #[error("couldn't connect to {address}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}
