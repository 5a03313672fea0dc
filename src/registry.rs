//! Maps each [Payload] variant to its wire encoding.
//!
//! Every variant has a bitcoin encoding in [ChainAdapter]'s provided methods.
//! A fork which encodes some body differently implements [ChainAdapter] and overrides just that method.

use bytes::{Bytes, BytesMut};

use crate::{
    constants::commands::Command,
    payload::{self, Block, Inv, MessageEncoding, Payload, Ping, Pong, Tx, Version},
    wire::{decode_all, decode_prefix, DecodeError, ProtocolViolation, Transcode, TranscodeExt as _},
};

/// Per-variant serializers.
///
/// Every method sees the protocol version and [MessageEncoding] in use on the connection,
/// though bitcoin itself only consults the encoding for transactions and blocks.
pub trait ChainAdapter: Send + Sync {
    fn serialize_version(
        &self,
        version: &Version<'_>,
        _pver: u32,
        _encoding: MessageEncoding,
        output: &mut BytesMut,
    ) {
        version.deparse_append(output)
    }
    /// Bytes after the fields `version` declares are ignored, since newer peers may append fields.
    fn deserialize_version<'a>(
        &self,
        input: &'a [u8],
        _pver: u32,
        _encoding: MessageEncoding,
    ) -> Result<Version<'a>, ProtocolViolation> {
        decode_prefix(Version::parse::<DecodeError>, input).map(|(_, version)| version)
    }

    /// Also used for getdata, which has the same body.
    fn serialize_inv(&self, inv: &Inv, _pver: u32, _encoding: MessageEncoding, output: &mut BytesMut) {
        inv.deparse_append(output)
    }
    fn deserialize_inv(
        &self,
        input: &[u8],
        _pver: u32,
        _encoding: MessageEncoding,
    ) -> Result<Inv, ProtocolViolation> {
        decode_all(Inv::parse::<DecodeError>, input)
    }

    fn serialize_ping(&self, ping: &Ping, pver: u32, _encoding: MessageEncoding, output: &mut BytesMut) {
        ping.deparse_versioned(pver, output)
    }
    fn deserialize_ping(
        &self,
        input: &[u8],
        pver: u32,
        _encoding: MessageEncoding,
    ) -> Result<Ping, ProtocolViolation> {
        decode_all(Ping::parser::<DecodeError>(pver), input)
    }

    fn serialize_pong(&self, pong: &Pong, pver: u32, _encoding: MessageEncoding, output: &mut BytesMut) {
        pong.deparse_versioned(pver, output)
    }
    fn deserialize_pong(
        &self,
        input: &[u8],
        pver: u32,
        _encoding: MessageEncoding,
    ) -> Result<Pong, ProtocolViolation> {
        decode_all(Pong::parser::<DecodeError>(pver), input)
    }

    fn serialize_block(
        &self,
        block: &Block<'_>,
        _pver: u32,
        encoding: MessageEncoding,
        output: &mut BytesMut,
    ) {
        block.deparse_encoded(encoding, output)
    }
    fn deserialize_block<'a>(
        &self,
        input: &'a [u8],
        _pver: u32,
        encoding: MessageEncoding,
    ) -> Result<Block<'a>, ProtocolViolation> {
        decode_all(Block::parser::<DecodeError>(encoding), input)
    }

    fn serialize_tx(&self, tx: &Tx<'_>, _pver: u32, encoding: MessageEncoding, output: &mut BytesMut) {
        tx.deparse_encoded(encoding, output)
    }
    fn deserialize_tx<'a>(
        &self,
        input: &'a [u8],
        _pver: u32,
        encoding: MessageEncoding,
    ) -> Result<Tx<'a>, ProtocolViolation> {
        decode_all(Tx::parser::<DecodeError>(encoding), input)
    }
}

/// Bitcoin's own encodings, unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinAdapter;

impl ChainAdapter for BitcoinAdapter {}

/// Dispatches over the whole of [Payload].
#[derive(Debug, Clone, Default)]
pub struct Registry<A = BitcoinAdapter> {
    adapter: A,
}

impl<A: ChainAdapter> Registry<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The returned buffer is exactly the body, so its length is what goes in the header.
    pub fn serialize(
        &self,
        payload: &Payload<'_>,
        pver: u32,
        encoding: MessageEncoding,
    ) -> Result<Bytes, ProtocolViolation> {
        let adapter = &self.adapter;
        let mut output = BytesMut::new();
        match payload {
            Payload::Version(version) => adapter.serialize_version(version, pver, encoding, &mut output),
            Payload::Verack | Payload::GetAddr => {}
            Payload::Inv(inv) | Payload::GetData(inv) => {
                adapter.serialize_inv(inv, pver, encoding, &mut output)
            }
            Payload::Ping(ping) => adapter.serialize_ping(ping, pver, encoding, &mut output),
            Payload::Pong(pong) => adapter.serialize_pong(pong, pver, encoding, &mut output),
            Payload::Block(block) => adapter.serialize_block(block, pver, encoding, &mut output),
            Payload::Tx(tx) => adapter.serialize_tx(tx, pver, encoding, &mut output),
        }
        check_length(payload.command(), output.len(), pver)?;
        Ok(output.freeze())
    }

    /// `input` must be the whole body; its length is checked against [payload::max_payload_length] before decoding.
    pub fn deserialize<'a>(
        &self,
        command: Command,
        input: &'a [u8],
        pver: u32,
        encoding: MessageEncoding,
    ) -> Result<Payload<'a>, ProtocolViolation> {
        let adapter = &self.adapter;
        check_length(command, input.len(), pver)?;
        Ok(match command {
            Command::Version => Payload::Version(adapter.deserialize_version(input, pver, encoding)?),
            Command::Verack => Payload::Verack,
            Command::GetAddr => Payload::GetAddr,
            Command::Inv => Payload::Inv(adapter.deserialize_inv(input, pver, encoding)?),
            Command::GetData => Payload::GetData(adapter.deserialize_inv(input, pver, encoding)?),
            Command::Ping => Payload::Ping(adapter.deserialize_ping(input, pver, encoding)?),
            Command::Pong => Payload::Pong(adapter.deserialize_pong(input, pver, encoding)?),
            Command::Block => Payload::Block(adapter.deserialize_block(input, pver, encoding)?),
            Command::Tx => Payload::Tx(adapter.deserialize_tx(input, pver, encoding)?),
        })
    }
}

fn check_length(command: Command, len: usize, pver: u32) -> Result<(), ProtocolViolation> {
    let max = payload::max_payload_length(command, pver);
    match len > max as usize {
        true => Err(ProtocolViolation::PayloadExceedsLimit {
            command,
            len,
            max,
            pver,
        }),
        false => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        constants::{BIP0031_VERSION, PROTOCOL_VERSION},
        payload::{
            user_agent, BlockHeader, InvType, InvVect, OutPoint, TxIn, TxOut, VersionFields106,
            VersionFieldsMandatory,
        },
        wire::{sha256d, Hash, NetworkAddressWithoutTime, VarBytes},
    };
    use bytes::BufMut as _;
    use pretty_assertions::assert_eq;

    const LATEST: MessageEncoding = MessageEncoding::LATEST;

    fn version() -> Version<'static> {
        let address = NetworkAddressWithoutTime::new(0, std::net::Ipv4Addr::LOCALHOST.into(), 8333);
        Version::new(
            VersionFieldsMandatory {
                version: (PROTOCOL_VERSION as i32).into(),
                services: 0.into(),
                timestamp: 1_700_000_000.into(),
                receiver: address,
            },
            VersionFields106 {
                sender: address,
                nonce: 42.into(),
                user_agent: user_agent("registry", "0.1.0", &["test"]).unwrap(),
                start_height: 0.into(),
            },
            true,
        )
    }

    #[test]
    fn empty_bodies() {
        let registry = Registry::<BitcoinAdapter>::default();
        for payload in [Payload::Verack, Payload::GetAddr] {
            let bin = registry.serialize(&payload, PROTOCOL_VERSION, LATEST).unwrap();
            assert!(bin.is_empty());
            assert_eq!(
                registry.deserialize(payload.command(), &bin, PROTOCOL_VERSION, LATEST),
                Ok(payload)
            );
        }
        assert_eq!(
            registry.deserialize(Command::Verack, &[0], PROTOCOL_VERSION, LATEST),
            Err(ProtocolViolation::PayloadExceedsLimit {
                command: Command::Verack,
                len: 1,
                max: 0,
                pver: PROTOCOL_VERSION
            })
        );
    }

    #[test]
    fn version_round_trips() {
        let registry = Registry::<BitcoinAdapter>::default();
        let payload = Payload::Version(version());
        let bin = registry.serialize(&payload, PROTOCOL_VERSION, LATEST).unwrap();
        assert_eq!(bin.len(), version().deparsed_len());
        assert_eq!(
            registry.deserialize(Command::Version, &bin, PROTOCOL_VERSION, LATEST),
            Ok(payload)
        );
    }

    #[test]
    fn oversized_version_is_rejected_before_decoding() {
        let registry = Registry::<BitcoinAdapter>::default();
        assert_eq!(
            registry.deserialize(Command::Version, &[0xFF; 359], PROTOCOL_VERSION, LATEST),
            Err(ProtocolViolation::PayloadExceedsLimit {
                command: Command::Version,
                len: 359,
                max: 358,
                pver: PROTOCOL_VERSION
            })
        );
    }

    #[test]
    fn ping_follows_pver() {
        let registry = Registry::<BitcoinAdapter>::default();
        let ping = Payload::Ping(Ping { nonce: 7 });
        assert_eq!(registry.serialize(&ping, PROTOCOL_VERSION, LATEST).unwrap().len(), 8);
        assert!(registry.serialize(&ping, BIP0031_VERSION, LATEST).unwrap().is_empty());
        assert_eq!(
            registry.deserialize(Command::Pong, &7u64.to_le_bytes(), PROTOCOL_VERSION, LATEST),
            Ok(Payload::Pong(Pong { nonce: 7 }))
        );
    }

    #[test]
    fn getdata_shares_the_inv_body() {
        let registry = Registry::<BitcoinAdapter>::default();
        let vectors = vec![InvVect::new(InvType::Block, Hash([1; 32]))];
        let inv = registry
            .serialize(&Payload::Inv(Inv { vectors: vectors.clone() }), PROTOCOL_VERSION, LATEST)
            .unwrap();
        let getdata = Payload::GetData(Inv { vectors });
        assert_eq!(getdata.command(), Command::GetData);
        assert_eq!(
            registry.serialize(&getdata, PROTOCOL_VERSION, LATEST).unwrap(),
            inv
        );
        assert_eq!(
            registry.deserialize(Command::GetData, &inv, PROTOCOL_VERSION, LATEST),
            Ok(getdata)
        );
    }

    fn witness_tx() -> Tx<'static> {
        Tx {
            version: 2.into(),
            inputs: vec![TxIn {
                previous_output: OutPoint {
                    hash: Hash([0x11; 32]),
                    index: 0.into(),
                },
                signature_script: VarBytes::owned(Vec::new()),
                sequence: u32::MAX.into(),
            }],
            outputs: vec![TxOut {
                value: 1.into(),
                pk_script: VarBytes::owned(vec![0x51]),
            }],
            witnesses: vec![vec![VarBytes::owned(vec![0xAA])]],
            lock_time: 0.into(),
        }
    }

    #[test]
    fn base_encoding_strips_witnesses() {
        let registry = Registry::<BitcoinAdapter>::default();
        let tx = witness_tx();

        let witness = registry
            .serialize(&Payload::Tx(tx.clone()), PROTOCOL_VERSION, MessageEncoding::Witness)
            .unwrap();
        assert_eq!(&witness[4..6], &[0x00, 0x01]);

        let base = registry
            .serialize(&Payload::Tx(tx.clone()), PROTOCOL_VERSION, MessageEncoding::Base)
            .unwrap();
        // marker, flag, one witness count and one 2 byte item
        assert_eq!(base.len(), witness.len() - 5);
        assert_eq!(&base[4..5], &[0x01]);
        assert_eq!(sha256d(&base), tx.txid());

        let stripped = Tx {
            witnesses: vec![],
            ..tx.clone()
        };
        assert_eq!(
            registry.deserialize(Command::Tx, &base, PROTOCOL_VERSION, MessageEncoding::Base),
            Ok(Payload::Tx(stripped.clone()))
        );
        // a witness-less transaction reads the same either way
        assert_eq!(
            registry.deserialize(Command::Tx, &base, PROTOCOL_VERSION, MessageEncoding::Witness),
            Ok(Payload::Tx(stripped))
        );
        // without the marker, a base peer's parse of a witness encoding goes wrong
        assert!(registry
            .deserialize(Command::Tx, &witness, PROTOCOL_VERSION, MessageEncoding::Base)
            .is_err());
    }

    #[test]
    fn block_follows_the_encoding() {
        let registry = Registry::<BitcoinAdapter>::default();
        let block = Block {
            header: BlockHeader {
                version: 1.into(),
                prev_block: Hash::default(),
                merkle_root: witness_tx().txid(),
                timestamp: 1_231_006_505.into(),
                bits: 0x1d00ffff.into(),
                nonce: 0.into(),
            },
            transactions: vec![witness_tx()],
        };
        let witness = registry
            .serialize(&Payload::Block(block.clone()), PROTOCOL_VERSION, MessageEncoding::Witness)
            .unwrap();
        let base = registry
            .serialize(&Payload::Block(block.clone()), PROTOCOL_VERSION, MessageEncoding::Base)
            .unwrap();
        assert_eq!(&base[81..], &*registry
            .serialize(&Payload::Tx(witness_tx()), PROTOCOL_VERSION, MessageEncoding::Base)
            .unwrap());
        assert_eq!(
            registry.deserialize(Command::Block, &witness, PROTOCOL_VERSION, MessageEncoding::Witness),
            Ok(Payload::Block(block))
        );
    }

    /// Sends ping nonces big endian.
    struct BackwardsPing;

    impl ChainAdapter for BackwardsPing {
        fn serialize_ping(
            &self,
            ping: &Ping,
            _pver: u32,
            _encoding: MessageEncoding,
            output: &mut BytesMut,
        ) {
            output.put_u64(ping.nonce)
        }
        fn deserialize_ping(
            &self,
            input: &[u8],
            _pver: u32,
            _encoding: MessageEncoding,
        ) -> Result<Ping, ProtocolViolation> {
            let nonce = <[u8; 8]>::try_from(input).map_err(|_| ProtocolViolation::Truncated)?;
            Ok(Ping {
                nonce: u64::from_be_bytes(nonce),
            })
        }
    }

    #[test]
    fn adapter_overrides_one_variant() {
        let registry = Registry::new(BackwardsPing);
        let bin = registry
            .serialize(&Payload::Ping(Ping { nonce: 1 }), PROTOCOL_VERSION, LATEST)
            .unwrap();
        assert_eq!(bin.to_vec(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            registry.deserialize(Command::Ping, &bin, PROTOCOL_VERSION, LATEST),
            Ok(Payload::Ping(Ping { nonce: 1 }))
        );
        // everything else is untouched
        assert_eq!(
            registry
                .serialize(&Payload::Pong(Pong { nonce: 1 }), PROTOCOL_VERSION, LATEST)
                .unwrap()
                .to_vec(),
            vec![1, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
