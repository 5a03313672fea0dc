//! Peer-to-peer wire protocol for bitcoin-style networks.
//!
//! - [wire] holds the binary codec: varints, varstrings, network addresses, header layout and checksum.
//! - [payload] holds the message bodies.
//! - [registry] maps each body to a (possibly fork-specific) serializer.
//! - [protocol] frames messages on a byte stream.
//! - [connector] drives one connection through the handshake and the steady-state loop.
// https://en.bitcoin.it/wiki/Protocol_documentation

pub mod connector;
pub mod error;
pub mod nonce;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use connector::{Config, Connection, Connector, NetworkParams, NewestBlock, State};
pub use error::{Error, HandshakeError};
pub use nonce::NonceCache;
pub use payload::{MessageEncoding, Payload};
pub use protocol::{CommandName, Encoder, FramingError, Message};
pub use registry::{BitcoinAdapter, ChainAdapter, Registry};
pub use wire::ProtocolViolation;

pub mod constants {
    /// Protocol version this crate speaks by default.
    pub const PROTOCOL_VERSION: u32 = 70016;
    /// Version messages carry the sender address, nonce, user agent and start height from here on.
    pub const VERSION_106: u32 = 106;
    /// [crate::wire::NetAddress] gained a timestamp.
    pub const NET_ADDRESS_TIME_VERSION: u32 = 31402;
    /// BIP 0031: ping carries a nonce, and pong exists.
    /// Note that the feature is present *after* this version, unlike the others.
    pub const BIP0031_VERSION: u32 = 60000;
    /// BIP 0037: version messages carry the relay flag.
    pub const BIP0037_VERSION: u32 = 70001;

    /// Upper bound for any message payload, checked before anything is allocated or discarded.
    pub const MAX_MESSAGE_PAYLOAD: u32 = 32 * 1024 * 1024;
    /// Blocks (and so transactions) can't be larger than this after segwit.
    pub const MAX_BLOCK_PAYLOAD: u32 = 4_000_000;
    pub const MAX_USER_AGENT_LEN: usize = 256;
    pub const MAX_INV_PER_MESSAGE: usize = 50_000;
    pub const MAX_VAR_INT_PAYLOAD: u32 = 9;

    pub const HEADER_LEN: usize = 24;
    pub const COMMAND_LEN: usize = 12;

    bitflags::bitflags! {
        /// Features a node advertises in its version message and network addresses.
        #[derive(Default)]
        pub struct ServiceFlags: u64 {
            /// This node can be asked for full blocks instead of just headers.
            const NODE_NETWORK = 1;
            /// See BIP 0064.
            const NODE_GETUTXO = 2;
            /// See BIP 0111.
            const NODE_BLOOM = 4;
            /// See BIP 0144.
            const NODE_WITNESS = 8;
            /// Never formally proposed (as a BIP), and discontinued. Was historically sporadically seen on the network.
            const NODE_XTHIN = 16;
            /// See BIP 0157.
            const NODE_COMPACT_FILTERS = 64;
            /// See BIP 0159.
            const NODE_NETWORK_LIMITED = 1024;
        }
    }

    /// Values for the first field of every [crate::wire::Header], as read from the wire in little endian.
    #[derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        num_enum::TryFromPrimitive,
        num_enum::IntoPrimitive,
        strum::Display,
    )]
    #[repr(u32)]
    pub enum Magic {
        Main = 0xD9B4BEF9,
        Testnet3 = 0x0709110B,
        Regtest = 0xDAB5BFFA,
        Signet = 0x40CF030A,
    }

    /// Allow [Command] and [crate::wire::Header] to use the same arrays
    pub mod commands {
        use std::fmt;

        const fn splat_str_to_array<const N: usize>(s: &str) -> [u8; N] {
            let mut array = [0; N];
            assert!(s.len() <= N, "string is too big to fit into array");
            let mut pos = 0;
            while pos < s.len() {
                array[pos] = s.as_bytes()[pos];
                pos += 1;
            }
            array
        }

        macro_rules! commands {
            ($($name:ident/$variant:ident = $str:expr),* $(,)?) => {
                pub mod names {
                    $(pub const $name: &str = $str;)*
                }
                pub mod padded {
                    $(pub const $name: [u8; super::super::COMMAND_LEN] = super::splat_str_to_array($str);)*
                }
                #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
                pub enum Command {
                    $($variant,)*
                }
                impl Command {
                    pub const fn as_str(&self) -> &'static str {
                        match self {
                            $(Self::$variant => names::$name,)*
                        }
                    }
                    /// Zero padded, as it appears in a header.
                    pub const fn padded(&self) -> [u8; super::COMMAND_LEN] {
                        match self {
                            $(Self::$variant => padded::$name,)*
                        }
                    }
                }
                #[automatically_derived]
                impl TryFrom<[u8; super::COMMAND_LEN]> for Command {
                    type Error = [u8; super::COMMAND_LEN];
                    fn try_from(candidate: [u8; super::COMMAND_LEN]) -> Result<Self, Self::Error> {
                        match candidate {
                            $(padded::$name => Ok(Self::$variant),)*
                            other => Err(other),
                        }
                    }
                }
                #[automatically_derived]
                impl<'a> TryFrom<&'a str> for Command {
                    type Error = &'a str;
                    fn try_from(candidate: &'a str) -> Result<Self, Self::Error> {
                        match candidate {
                            $(names::$name => Ok(Self::$variant),)*
                            other => Err(other),
                        }
                    }
                }
                #[automatically_derived]
                impl fmt::Display for Command {
                    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str(self.as_str())
                    }
                }
            };
        }
        commands!(
            VERSION / Version = "version",
            VERACK / Verack = "verack",
            GETADDR / GetAddr = "getaddr",
            INV / Inv = "inv",
            GETDATA / GetData = "getdata",
            PING / Ping = "ping",
            PONG / Pong = "pong",
            BLOCK / Block = "block",
            TX / Tx = "tx",
        );

        #[cfg(test)]
        mod tests {
            use super::*;

            #[test]
            fn padded_commands_round_trip() {
                assert_eq!(padded::VERACK, *b"verack\0\0\0\0\0\0");
                assert_eq!(Command::try_from(padded::GETDATA), Ok(Command::GetData));
                assert_eq!(Command::try_from("pong"), Ok(Command::Pong));
                assert_eq!(Command::try_from("sendcmpct"), Err("sendcmpct"));
                assert_eq!(Command::Tx.to_string(), "tx");
            }
        }
    }
}
