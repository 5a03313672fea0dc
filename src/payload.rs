//! Message bodies.
// https://en.bitcoin.it/wiki/Protocol_documentation#Message_types

use std::fmt;

use bytes::BufMut as _;
use tap::Conv as _;

use crate::{
    constants::{
        commands::Command, BIP0031_VERSION, BIP0037_VERSION, MAX_BLOCK_PAYLOAD,
        MAX_INV_PER_MESSAGE, MAX_USER_AGENT_LEN, MAX_VAR_INT_PAYLOAD, VERSION_106,
    },
    wire::{
        counted, forward, services, sha256d, transcode_and_display_each_field, violation, Hash,
        I32le, I64le, NetAddress, NetworkAddressWithoutTime, ParseError, ProtocolViolation,
        Transcode, TranscodeExt as _, U32le, U64le, VarBytes, VarInt, VarStr,
    },
};

/////////////
// version //
/////////////

transcode_and_display_each_field! {
/// Fields present in all version packets
// https://en.bitcoin.it/wiki/Protocol_documentation#version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionFieldsMandatory {
    /// Identifies protocol version being used by the node
    pub version: I32le,
    /// Bitfield of features to be enabled for this connection.
    @display(services)
    pub services: U64le,
    /// Standard UNIX timestamp in seconds.
    pub timestamp: I64le,
    /// The network address of the node receiving this message.
    @display(forward)
    pub receiver: NetworkAddressWithoutTime,
}}

transcode_and_display_each_field! {
/// Fields present in all version packets at or after version 106
// https://en.bitcoin.it/wiki/Protocol_documentation#version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionFields106<'a> {
    /// Field can be ignored.
    /// This used to be the network address of the node emitting this message, but most P2P implementations send 26 dummy bytes.
    @display(forward)
    pub sender: NetworkAddressWithoutTime,
    /// Node random nonce, randomly generated every time a version packet is sent. This nonce is used to detect connections to self.
    pub nonce: U64le,
    /// User Agent (0x00 if string is 0 bytes long)
    pub user_agent: VarStr<'a>,
    /// The last block received by the emitting node
    pub start_height: I32le,
}}

impl VersionFields106<'_> {
    pub fn into_static(self) -> VersionFields106<'static> {
        let Self {
            sender,
            nonce,
            user_agent,
            start_height,
        } = self;
        VersionFields106 {
            sender,
            nonce,
            user_agent: user_agent.into_static(),
            start_height,
        }
    }
}

transcode_and_display_each_field! {
/// Fields present in all version packets at or after version 70001
// https://en.bitcoin.it/wiki/Protocol_documentation#version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionFields70001 {
    /// Whether the remote peer should announce relayed transactions or not, see BIP 0037
    pub relay: bool,
}}

transcode_and_display_each_field! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VersionBasic {
        pub fields_mandatory: VersionFieldsMandatory,
    }
}

transcode_and_display_each_field! {
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Version106<'a> {
        pub fields_mandatory: VersionFieldsMandatory,
        pub fields_106: VersionFields106<'a>,
    }
}

transcode_and_display_each_field! {
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Version70001<'a> {
        pub fields_mandatory: VersionFieldsMandatory,
        pub fields_106: VersionFields106<'a>,
        pub fields_70001: VersionFields70001,
    }
}

/// The version message, in whichever shape its own version field calls for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version<'a> {
    Basic(VersionBasic),
    Supports106(Version106<'a>),
    Supports70001(Version70001<'a>),
}

impl<'a> Version<'a> {
    /// Picks the shape from `fields_mandatory.version`, dropping whatever that version can't carry.
    pub fn new(
        fields_mandatory: VersionFieldsMandatory,
        fields_106: VersionFields106<'a>,
        relay: bool,
    ) -> Self {
        let version = fields_mandatory.version.get();
        if version < VERSION_106 as i32 {
            Self::Basic(VersionBasic { fields_mandatory })
        } else if version < BIP0037_VERSION as i32 {
            Self::Supports106(Version106 {
                fields_mandatory,
                fields_106,
            })
        } else {
            Self::Supports70001(Version70001 {
                fields_mandatory,
                fields_106,
                fields_70001: VersionFields70001 { relay },
            })
        }
    }

    pub fn into_static(self) -> Version<'static> {
        match self {
            Version::Basic(v) => Version::Basic(v),
            Version::Supports106(Version106 {
                fields_mandatory,
                fields_106,
            }) => Version::Supports106(Version106 {
                fields_mandatory,
                fields_106: fields_106.into_static(),
            }),
            Version::Supports70001(Version70001 {
                fields_mandatory,
                fields_106,
                fields_70001,
            }) => Version::Supports70001(Version70001 {
                fields_mandatory,
                fields_106: fields_106.into_static(),
                fields_70001,
            }),
        }
    }

    pub fn fields_mandatory(&self) -> &VersionFieldsMandatory {
        match self {
            Version::Basic(v) => &v.fields_mandatory,
            Version::Supports106(v) => &v.fields_mandatory,
            Version::Supports70001(v) => &v.fields_mandatory,
        }
    }

    pub fn fields_106(&self) -> Option<&VersionFields106<'a>> {
        match self {
            Version::Basic(_) => None,
            Version::Supports106(v) => Some(&v.fields_106),
            Version::Supports70001(v) => Some(&v.fields_106),
        }
    }

    pub fn protocol_version(&self) -> i32 {
        self.fields_mandatory().version.get()
    }

    pub fn nonce(&self) -> Option<u64> {
        self.fields_106().map(|it| it.nonce.get())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.fields_106().map(|it| &*it.user_agent.0)
    }

    pub fn start_height(&self) -> Option<i32> {
        self.fields_106().map(|it| it.start_height.get())
    }

    pub fn relay(&self) -> Option<bool> {
        match self {
            Version::Supports70001(v) => Some(v.fields_70001.relay),
            _ => None,
        }
    }
}

impl fmt::Display for Version<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Basic(v) => fmt::Display::fmt(v, f),
            Version::Supports106(v) => fmt::Display::fmt(v, f),
            Version::Supports70001(v) => fmt::Display::fmt(v, f),
        }
    }
}

impl<'a> Transcode<'a> for Version<'a> {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let (rest, fields_mandatory) = VersionFieldsMandatory::parse::<IResultErrT>(input)?;
        let version = fields_mandatory.version.get();
        if version < VERSION_106 as i32 {
            return Ok((rest, Self::Basic(VersionBasic { fields_mandatory })));
        }

        let (rest, fields_106) = VersionFields106::parse::<IResultErrT>(rest)?;
        if fields_106.user_agent.len() > MAX_USER_AGENT_LEN {
            return violation(
                input,
                ProtocolViolation::UserAgentTooLong {
                    len: fields_106.user_agent.len(),
                    max: MAX_USER_AGENT_LEN,
                },
            );
        }
        if version < BIP0037_VERSION as i32 {
            return Ok((
                rest,
                Self::Supports106(Version106 {
                    fields_mandatory,
                    fields_106,
                }),
            ));
        }

        // the relay flag is optional on the wire, and absent means relay
        let (rest, relay) = match rest.is_empty() {
            true => (rest, true),
            false => bool::parse::<IResultErrT>(rest)?,
        };
        Ok((
            rest,
            Self::Supports70001(Version70001 {
                fields_mandatory,
                fields_106,
                fields_70001: VersionFields70001 { relay },
            }),
        ))
    }

    fn deparsed_len(&self) -> usize {
        match self {
            Version::Basic(v) => v.deparsed_len(),
            Version::Supports106(v) => v.deparsed_len(),
            Version::Supports70001(v) => v.deparsed_len(),
        }
    }

    fn deparse(&self, output: &mut [u8]) {
        match self {
            Version::Basic(v) => v.deparse(output),
            Version::Supports106(v) => v.deparse(output),
            Version::Supports70001(v) => v.deparse(output),
        }
    }
}

/// Builds a BIP 0014 user agent, `/name:version(comment; comment)/`.
pub fn user_agent(
    name: &str,
    version: &str,
    comments: &[impl AsRef<str>],
) -> Result<VarStr<'static>, ProtocolViolation> {
    let mut agent = format!("/{name}:{version}");
    if !comments.is_empty() {
        agent.push('(');
        agent.push_str(
            &comments
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("; "),
        );
        agent.push(')');
    }
    agent.push('/');
    match agent.len() > MAX_USER_AGENT_LEN {
        true => Err(ProtocolViolation::UserAgentTooLong {
            len: agent.len(),
            max: MAX_USER_AGENT_LEN,
        }),
        false => Ok(VarStr::owned(agent)),
    }
}

/////////
// inv //
/////////

/// Object types an [InvVect] can refer to.
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
pub enum InvType {
    Error = 0,
    Tx = 1,
    Block = 2,
    FilteredBlock = 3,
    CompactBlock = 4,
    WitnessTx = 0x4000_0001,
    WitnessBlock = 0x4000_0002,
    FilteredWitnessBlock = 0x4000_0003,
}

/// BIP 0144 marks witness variants with this bit.
pub const INV_WITNESS_FLAG: u32 = 1 << 30;

fn inv_type(u: &U32le) -> impl fmt::Debug {
    match InvType::try_from(u.get()) {
        Ok(known) => known.to_string(),
        Err(_) => format!("{:#010x}", u.get()),
    }
}

transcode_and_display_each_field! {
/// Inventory vectors are used for notifying other nodes about objects they have or data which is being requested.
// https://en.bitcoin.it/wiki/Protocol_documentation#Inventory_Vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVect {
    @display(inv_type)
    pub kind: U32le,
    pub hash: Hash,
}}

impl InvVect {
    pub fn new(kind: InvType, hash: Hash) -> Self {
        Self {
            kind: kind.conv::<u32>().into(),
            hash,
        }
    }
}

/// Advertises one or more objects; also the shape of getdata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Inv {
    pub vectors: Vec<InvVect>,
}

impl<'a> Transcode<'a> for Inv {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let (_, VarInt(count)) = VarInt::parse::<IResultErrT>(input)?;
        if count > MAX_INV_PER_MESSAGE as u64 {
            return violation(
                input,
                ProtocolViolation::TooManyInvVectors {
                    count,
                    max: MAX_INV_PER_MESSAGE,
                },
            );
        }
        let (rest, vectors) = Vec::<InvVect>::parse::<IResultErrT>(input)?;
        Ok((rest, Self { vectors }))
    }

    fn deparsed_len(&self) -> usize {
        self.vectors.deparsed_len()
    }

    fn deparse(&self, output: &mut [u8]) {
        self.vectors.deparse(output)
    }
}

///////////////
// ping/pong //
///////////////

/// Keepalive, answered by a [Pong] carrying the same nonce.
/// The nonce only exists on the wire after [BIP0031_VERSION].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ping {
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pong {
    pub nonce: u64,
}

impl From<Ping> for Pong {
    fn from(Ping { nonce }: Ping) -> Self {
        Self { nonce }
    }
}

fn carries_nonce(pver: u32) -> bool {
    pver > BIP0031_VERSION
}

fn read_nonce<'a, IResultErrT: ParseError<'a>>(
    pver: u32,
) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], u64, IResultErrT> {
    move |input| match carries_nonce(pver) {
        true => nom::number::complete::le_u64(input),
        false => Ok((input, 0)),
    }
}

fn write_nonce(pver: u32, nonce: u64, output: &mut bytes::BytesMut) {
    if carries_nonce(pver) {
        output.put_u64_le(nonce)
    }
}

impl Ping {
    pub fn parser<'a, IResultErrT: ParseError<'a>>(
        pver: u32,
    ) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let mut nonce = read_nonce(pver);
        move |input| {
            let (rest, nonce) = nonce(input)?;
            Ok((rest, Self { nonce }))
        }
    }

    pub fn deparse_versioned(&self, pver: u32, output: &mut bytes::BytesMut) {
        write_nonce(pver, self.nonce, output)
    }
}

impl Pong {
    pub fn parser<'a, IResultErrT: ParseError<'a>>(
        pver: u32,
    ) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let mut nonce = read_nonce(pver);
        move |input| {
            let (rest, nonce) = nonce(input)?;
            Ok((rest, Self { nonce }))
        }
    }

    pub fn deparse_versioned(&self, pver: u32, output: &mut bytes::BytesMut) {
        write_nonce(pver, self.nonce, output)
    }
}

////////
// tx //
////////

transcode_and_display_each_field! {
// https://en.bitcoin.it/wiki/Protocol_documentation#tx
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// The hash of the referenced transaction.
    pub hash: Hash,
    /// The index of the specific output in the transaction. The first output is 0, etc.
    pub index: U32le,
}}

transcode_and_display_each_field! {
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxIn<'a> {
    @display(forward)
    pub previous_output: OutPoint,
    /// Computational Script for confirming transaction authorization
    pub signature_script: VarBytes<'a>,
    /// Transaction version as defined by the sender. Intended for "replacement" of transactions when information is updated before inclusion into a block.
    pub sequence: U32le,
}}

transcode_and_display_each_field! {
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxOut<'a> {
    /// Transaction Value, in satoshis
    pub value: I64le,
    /// Usually contains the public key as a Bitcoin script setting up conditions to claim this output.
    pub pk_script: VarBytes<'a>,
}}

/// Stack items for one input.
pub type Witness<'a> = Vec<VarBytes<'a>>;

/// Whether transactions, and so blocks, carry BIP 0144 witness data on the wire.
/// Peers which don't advertise [crate::constants::ServiceFlags::NODE_WITNESS] only understand [MessageEncoding::Base].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
pub enum MessageEncoding {
    /// No marker, flag or witnesses.
    Base,
    #[default]
    Witness,
}

impl MessageEncoding {
    pub const LATEST: Self = Self::Witness;
}

/// A transaction, with BIP 0144 witness data when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tx<'a> {
    pub version: I32le,
    pub inputs: Vec<TxIn<'a>>,
    pub outputs: Vec<TxOut<'a>>,
    /// Empty, or one [Witness] per input.
    pub witnesses: Vec<Witness<'a>>,
    pub lock_time: U32le,
}

impl Tx<'_> {
    pub fn has_witness(&self) -> bool {
        self.witnesses.iter().any(|it| !it.is_empty())
    }

    /// Hash of the serialization without witness data.
    pub fn txid(&self) -> Hash {
        let mut output = vec![0; self.deparsed_len_with(false)];
        self.deparse_with(&mut output, false);
        sha256d(&output)
    }

    pub fn deparsed_len_encoded(&self, encoding: MessageEncoding) -> usize {
        self.deparsed_len_with(self.witness_on_wire(encoding))
    }

    /// Grows `output` to fit.
    pub fn deparse_encoded(&self, encoding: MessageEncoding, output: &mut bytes::BytesMut) {
        let witness = self.witness_on_wire(encoding);
        let start = output.len();
        output.resize(start + self.deparsed_len_with(witness), 0);
        self.deparse_with(&mut output[start..], witness)
    }

    /// Transactions without witnesses never use the extended format.
    fn witness_on_wire(&self, encoding: MessageEncoding) -> bool {
        encoding == MessageEncoding::Witness && self.has_witness()
    }

    fn witness_for(&self, input: usize) -> &[VarBytes<'_>] {
        self.witnesses.get(input).map(Vec::as_slice).unwrap_or(&[])
    }

    fn deparsed_len_with(&self, witness: bool) -> usize {
        let mut len = self.version.deparsed_len()
            + self.inputs.deparsed_len()
            + self.outputs.deparsed_len()
            + self.lock_time.deparsed_len();
        if witness {
            // marker and flag
            len += 2;
            len += (0..self.inputs.len())
                .map(|input| {
                    let items = self.witness_for(input);
                    VarInt(items.len() as u64).deparsed_len()
                        + items.iter().map(Transcode::deparsed_len).sum::<usize>()
                })
                .sum::<usize>();
        }
        len
    }

    fn deparse_with(&self, output: &mut [u8], witness: bool) {
        let mut output = self.version.deparse_into_and_advance(output);
        if witness {
            output[..2].copy_from_slice(&[0x00, 0x01]);
            output = &mut output[2..];
        }
        output = self.inputs.deparse_into_and_advance(output);
        output = self.outputs.deparse_into_and_advance(output);
        if witness {
            for input in 0..self.inputs.len() {
                let items = self.witness_for(input);
                output = VarInt(items.len() as u64).deparse_into_and_advance(output);
                for item in items {
                    output = item.deparse_into_and_advance(output);
                }
            }
        }
        self.lock_time.deparse(output)
    }
}

impl<'a> Tx<'a> {
    /// Under [MessageEncoding::Base] a leading zero is an (empty) input count, never a marker.
    pub fn parser<IResultErrT: ParseError<'a>>(
        encoding: MessageEncoding,
    ) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        move |input| Self::parse_encoded(input, encoding)
    }

    fn parse_encoded<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
        encoding: MessageEncoding,
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let (rest, version) = I32le::parse::<IResultErrT>(input)?;
        // A transaction can't have zero inputs, so a zero count is the segwit marker
        let (rest, segwit) = match (encoding, rest) {
            (MessageEncoding::Witness, [0x00, flag, after @ ..]) => match flag {
                0x01 => (after, true),
                other => return violation(rest, ProtocolViolation::InvalidWitnessFlag(*other)),
            },
            _ => (rest, false),
        };
        let (rest, inputs) = Vec::<TxIn>::parse::<IResultErrT>(rest)?;
        let (mut rest, outputs) = Vec::<TxOut>::parse::<IResultErrT>(rest)?;
        let mut witnesses = Vec::new();
        if segwit {
            witnesses.reserve(inputs.len());
            for _ in 0..inputs.len() {
                let (after, witness) = Witness::parse::<IResultErrT>(rest)?;
                witnesses.push(witness);
                rest = after;
            }
        }
        let (rest, lock_time) = U32le::parse::<IResultErrT>(rest)?;
        Ok((
            rest,
            Self {
                version,
                inputs,
                outputs,
                witnesses,
                lock_time,
            },
        ))
    }
}

/// In the [MessageEncoding::LATEST] encoding.
impl<'a> Transcode<'a> for Tx<'a> {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        Self::parse_encoded(input, MessageEncoding::LATEST)
    }

    fn deparsed_len(&self) -> usize {
        self.deparsed_len_encoded(MessageEncoding::LATEST)
    }

    fn deparse(&self, output: &mut [u8]) {
        self.deparse_with(output, self.witness_on_wire(MessageEncoding::LATEST))
    }
}

///////////
// block //
///////////

transcode_and_display_each_field! {
/// 80 bytes, hashed for the block's identity.
// https://en.bitcoin.it/wiki/Protocol_documentation#Block_Headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHeader {
    pub version: I32le,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: U32le,
    /// The calculated difficulty target being used for this block
    pub bits: U32le,
    pub nonce: U32le,
}}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        sha256d(&self.deparse_to_vec())
    }
}

transcode_and_display_each_field! {
// https://en.bitcoin.it/wiki/Protocol_documentation#block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block<'a> {
    @display(forward)
    pub header: BlockHeader,
    pub transactions: Vec<Tx<'a>>,
}}

impl<'a> Block<'a> {
    pub fn parser<IResultErrT: ParseError<'a>>(
        encoding: MessageEncoding,
    ) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let mut transactions = counted(Tx::parser::<IResultErrT>(encoding));
        move |input| {
            let (rest, header) = BlockHeader::parse::<IResultErrT>(input)?;
            let (rest, transactions) = transactions(rest)?;
            Ok((
                rest,
                Self {
                    header,
                    transactions,
                },
            ))
        }
    }

    /// Grows `output` to fit.
    pub fn deparse_encoded(&self, encoding: MessageEncoding, output: &mut bytes::BytesMut) {
        self.header.deparse_append(output);
        VarInt(self.transactions.len() as u64).deparse_append(output);
        for tx in &self.transactions {
            tx.deparse_encoded(encoding, output)
        }
    }
}

/////////////
// Payload //
/////////////

/// Every body this crate understands.
#[derive(Debug, Clone, PartialEq, Eq, enum_as_inner::EnumAsInner)]
pub enum Payload<'a> {
    Version(Version<'a>),
    Verack,
    GetAddr,
    Inv(Inv),
    /// Same body as [Payload::Inv].
    GetData(Inv),
    Ping(Ping),
    Pong(Pong),
    Block(Block<'a>),
    Tx(Tx<'a>),
}

impl Payload<'_> {
    pub fn command(&self) -> Command {
        match self {
            Payload::Version(_) => Command::Version,
            Payload::Verack => Command::Verack,
            Payload::GetAddr => Command::GetAddr,
            Payload::Inv(_) => Command::Inv,
            Payload::GetData(_) => Command::GetData,
            Payload::Ping(_) => Command::Ping,
            Payload::Pong(_) => Command::Pong,
            Payload::Block(_) => Command::Block,
            Payload::Tx(_) => Command::Tx,
        }
    }

    pub fn max_payload_length(&self, pver: u32) -> u32 {
        max_payload_length(self.command(), pver)
    }
}

/// Largest body `command` may have at `pver`.
pub fn max_payload_length(command: Command, pver: u32) -> u32 {
    match command {
        // fixed fields, two addresses, then the user agent, which can be up to MAX_USER_AGENT_LEN
        Command::Version => {
            33 + 2 * NetAddress::deparsed_len(pver, true) as u32
                + MAX_VAR_INT_PAYLOAD
                + MAX_USER_AGENT_LEN as u32
        }
        Command::Verack | Command::GetAddr => 0,
        Command::Inv | Command::GetData => {
            MAX_VAR_INT_PAYLOAD + MAX_INV_PER_MESSAGE as u32 * std::mem::size_of::<InvVect>() as u32
        }
        Command::Ping | Command::Pong => match carries_nonce(pver) {
            true => std::mem::size_of::<u64>() as u32,
            false => 0,
        },
        Command::Block | Command::Tx => MAX_BLOCK_PAYLOAD,
    }
}
