//! Wire representations.
//! Endianness conversions are not done while parsing for the most part, we just store that information in the type system.
//!
//! Almost all integers are encoded in little endian. Only IP or port number are encoded big endian. All field sizes are numbers of bytes.
// https://en.bitcoin.it/wiki/Protocol_documentation#Common_structures
//
// Goals for this module are
// - be fairly direct translations of the bitcoin documentations
// - minimise the number of manual implementations, while still being correct
// - allow zero-copy borrows from the source data
//   - we achieve this with Cows for strings and byte buffers
// - never allocate in proportion to a length we haven't checked

use std::{borrow::Cow, fmt, net};

use bytes::BufMut as _;
use nom::error::ErrorKind;
use tap::Conv as _;
pub use zerocopy::byteorder::{
    little_endian::{I32 as I32le, I64 as I64le, U16 as U16le, U32 as U32le, U64 as U64le},
    network_endian::{U128 as U128netwk, U16 as U16netwk},
};

use crate::constants::{
    commands::Command, ServiceFlags, HEADER_LEN, MAX_MESSAGE_PAYLOAD, NET_ADDRESS_TIME_VERSION,
};

/// Decode and encode this struct on the wire according to the bitcoin protocol.
/// This is for bit interpretation, and only the validation needed to keep decoding safe.
// Generic over lifetime so we can impl for borrowed data
pub trait Transcode<'a> {
    /// Attempt to deserialize this struct.
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT>
    where
        Self: Sized;
    /// The length of this struct when serialized.
    fn deparsed_len(&self) -> usize;
    /// Serialize this struct.
    /// # Panics
    /// Implementations may panic if `output.len() < self.deparsed_len()`
    fn deparse(&self, output: &mut [u8]);
}

/// Reasons a peer's bytes are rejected after framing succeeded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("non-canonical varint {value:#x}: discriminant {discriminant:#04x} must encode at least {min:#x}")]
    NonCanonicalVarInt { discriminant: u8, value: u64, min: u64 },
    #[error("variable length field of {len} bytes is longer than the maximum of {max}")]
    VarLengthTooLong { len: u64, max: u32 },
    #[error("user agent of {len} bytes is longer than the maximum of {max}")]
    UserAgentTooLong { len: usize, max: usize },
    #[error("{count} inventory vectors is more than the maximum of {max}")]
    TooManyInvVectors { count: u64, max: usize },
    #[error("element count {count} can't fit in the remaining {remaining} bytes")]
    CountExceedsPayload { count: u64, remaining: usize },
    #[error("variable length string is not valid utf-8")]
    InvalidUtf8,
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("invalid witness flag {0:#04x}")]
    InvalidWitnessFlag(u8),
    #[error("payload ended early")]
    Truncated,
    #[error("{0} unparsed bytes after the payload")]
    TrailingBytes(usize),
    #[error("{command} payload of {len} bytes is longer than the maximum of {max} at protocol version {pver}")]
    PayloadExceedsLimit {
        command: Command,
        len: usize,
        max: u32,
        pver: u32,
    },
    #[error("malformed payload ({0:?})")]
    Malformed(ErrorKind),
}

// bargain bucket derive macro
macro_rules! transcode_and_display_each_field {
    // Capture struct definition
    (
        $(#[$struct_meta:meta])*
        $struct_vis:vis struct $struct_name:ident$(<$struct_lifetime:lifetime>)? {
            $(
                $(#[$field_meta:meta])*
                $(@display($field_display_override:path))?
                $field_vis:vis $field_name:ident: $field_ty:ty,
            )*
        }
    ) => {
        // Passthrough the struct definition
        $(#[$struct_meta])*
        $struct_vis struct $struct_name$(<$struct_lifetime>)? {
            $(
                $(#[$field_meta])*
                $field_vis $field_name: $field_ty,
            )*
        }

        #[automatically_derived]
        impl<'__input, $($struct_lifetime)?> $crate::wire::Transcode<'__input> for $struct_name$(<$struct_lifetime>)?
        $(
            // allow struct_lifetime to have its own name
            where
                $struct_lifetime: '__input,
                '__input: $struct_lifetime,
        )?
        {
            fn parse<IResultErrT: $crate::wire::ParseError<'__input>>(
                input: &'__input [u8],
            ) -> nom::IResult<&'__input [u8], $struct_name$(<$struct_lifetime>)?, IResultErrT> {
                use nom::Parser as _;
                nom::sequence::tuple((
                    // We must refer to $field_ty here to get the macro to repeat as desired
                    $(<$field_ty as $crate::wire::Transcode>::parse::<IResultErrT>,)*
                )).map(
                    |(
                        $($field_name,)*
                    )| $struct_name {
                        $($field_name,)*
                    },
                )
                .parse(input)
            }

            fn deparsed_len(&self) -> usize {
                [
                    $(<$field_ty as $crate::wire::Transcode>::deparsed_len(&self.$field_name),)*
                ].into_iter().sum()
            }
            fn deparse(&self, output: &mut [u8]) {
                $(let output = <$field_ty as $crate::wire::TranscodeExt>::deparse_into_and_advance(
                    &self.$field_name,
                    output
                );)*
                let _ = output;
            }
        }

        #[automatically_derived]
        impl$(<$struct_lifetime>)? std::fmt::Display for $struct_name$(<$struct_lifetime>)? {
            #[allow(unreachable_patterns)]
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($struct_name))
                    $(
                        .field(stringify!($field_name), &match &self.$field_name {
                            $(
                                _ => format!("{:?}", $field_display_override(&self.$field_name)),
                            )?
                            _ => format!("{:?}", &self.$field_name),
                        })
                    )*
                    .finish()
            }
        }
    };
}
pub(crate) use transcode_and_display_each_field;

////////////////////////////////////////////////////////////////////////////////
// Structs transcribed from https://en.bitcoin.it/wiki/Protocol_documentation //
////////////////////////////////////////////////////////////////////////////////

transcode_and_display_each_field! {
/// Message header for all bitcoin protocol packets
// https://en.bitcoin.it/wiki/Protocol_documentation#Message_structure
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    zerocopy::AsBytes,
    zerocopy::FromBytes,
    zerocopy::FromZeroes,
)]
#[repr(C)]
pub struct Header {
    /// Magic value indicating message origin network, and used to seek to next message when stream state is unknown
    @display(magic)
    pub magic: U32le,
    /// ASCII string identifying the packet content, NULL padded (non-NULL padding results in packet rejected)
    @display(command)
    pub command: [u8; 12],
    /// Length of payload in number of bytes
    pub length: U32le,
    /// First 4 bytes of sha256(sha256(payload))
    @display(hex_bytes)
    pub checksum: [u8; 4],
}}

static_assertions::assert_eq_size!(Header, [u8; HEADER_LEN]);

pub(crate) fn forward(t: &(impl fmt::Display + Clone)) -> impl fmt::Debug {
    DebugWithDisplay(t.clone())
}

fn magic(u: &U32le) -> impl fmt::Debug {
    match crate::constants::Magic::try_from(u.get()) {
        Ok(known) => known.to_string(),
        Err(_) => format!("{:#010x}", u.get()),
    }
}

fn command(c: &[u8; 12]) -> impl fmt::Debug {
    match Command::try_from(*c) {
        Ok(known) => known.to_string(),
        Err(_) => String::from_utf8_lossy(c).into_owned(),
    }
}

pub(crate) fn services(u: &U64le) -> impl fmt::Debug {
    ServiceFlags::from_bits_truncate(u.get())
}

fn ipv6(u: &U128netwk) -> impl fmt::Debug {
    net::Ipv6Addr::from(u.get())
}

pub(crate) fn hex_bytes(b: &impl AsRef<[u8]>) -> impl fmt::Debug {
    DebugWithDisplay(
        b.as_ref()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>(),
    )
}

transcode_and_display_each_field! {
/// When a network address is needed somewhere, this structure is used. Network addresses are not prefixed with a timestamp in the version message.
// https://en.bitcoin.it/wiki/Protocol_documentation#Network_address
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    zerocopy::AsBytes,
    zerocopy::FromBytes,
    zerocopy::FromZeroes,
)]
#[repr(C)]
pub struct NetworkAddressWithoutTime {
    /// same service(s) listed in version.
    @display(services)
    pub services: U64le,
    /// IPv6 address. Network byte order. The original client only supported IPv4 and only read the last 4 bytes to get the IPv4 address. However, the IPv4 address is written into the message as a 16 byte IPv4-mapped IPv6 address
    /// (12 bytes 00 00 00 00 00 00 00 00 00 00 FF FF, followed by the 4 bytes of the IPv4 address).
    @display(ipv6)
    pub ipv6: U128netwk,
    /// port number, network byte order
    pub port: U16netwk,
}}

impl NetworkAddressWithoutTime {
    pub fn new(services: u64, ip_address: net::IpAddr, port: u16) -> Self {
        Self {
            services: services.into(),
            ipv6: match ip_address {
                net::IpAddr::V4(v4) => v4.to_ipv6_mapped(),
                net::IpAddr::V6(v6) => v6,
            }
            .conv::<u128>()
            .into(),
            port: port.into(),
        }
    }
    pub fn ip_addr(&self) -> net::Ipv6Addr {
        self.ipv6.get().into()
    }
}

/// A [NetworkAddressWithoutTime], which is prefixed with a last-seen timestamp everywhere except the version message,
/// and only from [NET_ADDRESS_TIME_VERSION].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddress {
    /// Standard UNIX timestamp in seconds, 32 bits on the wire.
    pub timestamp: Option<u32>,
    pub address: NetworkAddressWithoutTime,
}

impl NetAddress {
    /// Length on the wire at `pver`.
    pub fn deparsed_len(pver: u32, with_timestamp: bool) -> usize {
        let timestamp = match with_timestamp && pver >= NET_ADDRESS_TIME_VERSION {
            true => std::mem::size_of::<u32>(),
            false => 0,
        };
        timestamp + std::mem::size_of::<NetworkAddressWithoutTime>()
    }
}

/// The timestamp is only read if the caller asks for it, *and* `pver` includes it.
pub fn read_net_address<'a, IResultErrT: ParseError<'a>>(
    pver: u32,
    with_timestamp: bool,
) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], NetAddress, IResultErrT> {
    move |input| {
        let (rest, timestamp) = match with_timestamp && pver >= NET_ADDRESS_TIME_VERSION {
            true => {
                let (rest, timestamp) = nom::number::complete::le_u32(input)?;
                (rest, Some(timestamp))
            }
            false => (input, None),
        };
        let (rest, address) = NetworkAddressWithoutTime::parse::<IResultErrT>(rest)?;
        Ok((rest, NetAddress { timestamp, address }))
    }
}

/// A missing timestamp is written as zero if one is required.
pub fn write_net_address(
    output: &mut bytes::BytesMut,
    pver: u32,
    address: &NetAddress,
    with_timestamp: bool,
) {
    if with_timestamp && pver >= NET_ADDRESS_TIME_VERSION {
        output.put_u32_le(address.timestamp.unwrap_or_default());
    }
    output.put_u64_le(address.address.services.get());
    output.put_slice(&address.address.ipv6.get().to_be_bytes());
    // the one big endian integer in the protocol
    output.put_u16(address.address.port.get());
}

/////////////////////
// Fancier structs //
/////////////////////

/// Opaque 32 byte identifier for blocks and transactions, kept in wire order.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    derive_more::From,
    zerocopy::AsBytes,
    zerocopy::FromBytes,
    zerocopy::FromZeroes,
)]
#[repr(transparent)]
pub struct Hash(pub [u8; 32]);

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&hex_bytes(&self.0)).finish()
    }
}

/// Integer can be encoded depending on the represented value to save space.
/// Variable length integers always precede an array/vector of a type of data that may vary in length.
/// Longer numbers are encoded in little endian.
///
/// Only the shortest encoding of a value is accepted.
// https://en.bitcoin.it/wiki/Protocol_documentation#Variable_length_integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct VarInt(pub u64);

impl<T> From<T> for VarInt
where
    T: Into<u64>,
{
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

impl<'a> Transcode<'a> for VarInt {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
        let (rest, discriminant) = le_u8(input)?;
        let (rest, value, min) = match discriminant {
            0xFF => {
                let (rest, value) = le_u64(rest)?;
                (rest, value, 0x1_0000_0000)
            }
            0xFE => {
                let (rest, value) = le_u32(rest)?;
                (rest, value.into(), 0x1_0000)
            }
            0xFD => {
                let (rest, value) = le_u16(rest)?;
                (rest, value.into(), 0xFD)
            }
            small => return Ok((rest, VarInt::from(small))),
        };
        if value < min {
            return violation(
                input,
                ProtocolViolation::NonCanonicalVarInt {
                    discriminant,
                    value,
                    min,
                },
            );
        }
        Ok((rest, VarInt(value)))
    }

    fn deparsed_len(&self) -> usize {
        // a more direct translation of protocol documentation
        #[allow(clippy::match_overlapping_arm)]
        match self.0 {
            ..=0xFC => 1,
            ..=0xFFFF => 3,
            ..=0xFFFF_FFFF => 5,
            _ => 9,
        }
    }
    fn deparse(&self, output: &mut [u8]) {
        use zerocopy::AsBytes as _;
        if match self.0 {
            small @ ..=0xFC => {
                output[0] = small as u8;
                Some(())
            }
            medium @ ..=0xFFFF => {
                output[0] = 0xFD;
                U16le::new(medium as _).write_to_prefix(&mut output[1..])
            }
            large @ ..=0xFFFF_FFFF => {
                output[0] = 0xFE;
                U32le::new(large as _).write_to_prefix(&mut output[1..])
            }
            xlarge => {
                output[0] = 0xFF;
                U64le::new(xlarge).write_to_prefix(&mut output[1..])
            }
        }
        .is_none()
        {
            panic!("attempted to deparse into a buffer too small for VarInt")
        }
    }
}

/// Takes a [VarInt] length, then that many bytes.
/// The length is checked against [MAX_MESSAGE_PAYLOAD] before anything else happens.
fn var_length_bytes<'a, IResultErrT: ParseError<'a>>(
    input: &'a [u8],
) -> nom::IResult<&'a [u8], &'a [u8], IResultErrT> {
    let (rest, VarInt(len)) = VarInt::parse::<IResultErrT>(input)?;
    if len > u64::from(MAX_MESSAGE_PAYLOAD) {
        return violation(
            input,
            ProtocolViolation::VarLengthTooLong {
                len,
                max: MAX_MESSAGE_PAYLOAD,
            },
        );
    }
    nom::bytes::complete::take(len as usize)(rest)
}

fn len_var_int(len: usize) -> VarInt {
    VarInt(len as u64)
}

/// Variable length string can be stored using a variable length integer followed by the string itself.
// https://en.bitcoin.it/wiki/Protocol_documentation#Variable_length_string
// Putting a [Cow] in here is a little cheeky, but it allows us to use the same struct for protocol and business logic
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct VarStr<'a>(pub Cow<'a, str>);

impl VarStr<'_> {
    pub fn borrowed(s: &str) -> VarStr<'_> {
        VarStr(Cow::Borrowed(s))
    }

    pub fn owned(s: impl Into<String>) -> VarStr<'static> {
        VarStr(Cow::Owned(s.into()))
    }

    pub fn into_static(self) -> VarStr<'static> {
        VarStr(Cow::Owned(self.0.into_owned()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> Transcode<'a> for VarStr<'a> {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], VarStr<'a>, IResultErrT> {
        let (rest, bytes) = var_length_bytes::<IResultErrT>(input)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok((rest, VarStr::borrowed(s))),
            Err(e) => Err(nom::Err::Failure(IResultErrT::from_external_error(
                input,
                ErrorKind::MapRes,
                e,
            ))),
        }
    }

    fn deparsed_len(&self) -> usize {
        len_var_int(self.0.len()).deparsed_len() + self.0.len()
    }
    fn deparse(&self, output: &mut [u8]) {
        let output = len_var_int(self.0.len()).deparse_into_and_advance(output);
        output[..self.0.len()].copy_from_slice(self.0.as_bytes())
    }
}

/// Variable length byte buffer, e.g scripts and witness items.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct VarBytes<'a>(pub Cow<'a, [u8]>);

impl VarBytes<'_> {
    pub fn owned(b: impl Into<Vec<u8>>) -> VarBytes<'static> {
        VarBytes(Cow::Owned(b.into()))
    }

    pub fn into_static(self) -> VarBytes<'static> {
        VarBytes(Cow::Owned(self.0.into_owned()))
    }
}

impl fmt::Debug for VarBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VarBytes")
            .field(&hex_bytes(&self.0))
            .finish()
    }
}

impl<'a> Transcode<'a> for VarBytes<'a> {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], VarBytes<'a>, IResultErrT> {
        let (rest, bytes) = var_length_bytes::<IResultErrT>(input)?;
        Ok((rest, VarBytes(Cow::Borrowed(bytes))))
    }

    fn deparsed_len(&self) -> usize {
        len_var_int(self.0.len()).deparsed_len() + self.0.len()
    }
    fn deparse(&self, output: &mut [u8]) {
        let output = len_var_int(self.0.len()).deparse_into_and_advance(output);
        output[..self.0.len()].copy_from_slice(&self.0)
    }
}

/// Most a vector reserves before its elements have parsed, whatever count the peer claims.
pub const MAX_PREALLOCATION: usize = 64 * 1024;

/// Capacity to reserve for `count` elements of `T`.
/// The rest of the vector grows as elements actually parse.
pub(crate) fn preallocation<T>(count: u64) -> usize {
    let element = std::mem::size_of::<T>().max(1);
    usize::try_from(count)
        .unwrap_or(usize::MAX)
        .min(MAX_PREALLOCATION / element)
}

/// [VarInt] count, then that many elements from `element`.
/// Every element takes at least one byte, so a count larger than the remaining input is rejected up front.
pub fn counted<'a, T, IResultErrT: ParseError<'a>>(
    mut element: impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], T, IResultErrT>,
) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], Vec<T>, IResultErrT> {
    move |input| {
        let (mut rest, VarInt(count)) = VarInt::parse::<IResultErrT>(input)?;
        if count > rest.len() as u64 {
            return violation(
                input,
                ProtocolViolation::CountExceedsPayload {
                    count,
                    remaining: rest.len(),
                },
            );
        }
        let mut items = Vec::with_capacity(preallocation::<T>(count));
        for _ in 0..count {
            let (after, item) = element(rest)?;
            items.push(item);
            rest = after;
        }
        Ok((rest, items))
    }
}

/// [VarInt] count, then that many `T`s. See [counted].
impl<'a, T> Transcode<'a> for Vec<T>
where
    T: Transcode<'a>,
{
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        counted(T::parse::<IResultErrT>)(input)
    }

    fn deparsed_len(&self) -> usize {
        len_var_int(self.len()).deparsed_len()
            + self.iter().map(Transcode::deparsed_len).sum::<usize>()
    }

    fn deparse(&self, output: &mut [u8]) {
        let mut output = len_var_int(self.len()).deparse_into_and_advance(output);
        for item in self {
            output = item.deparse_into_and_advance(output);
        }
    }
}

/// `sha256(sha256(bytes))`, in wire order.
pub fn sha256d(bytes: &[u8]) -> Hash {
    use bitcoin_hashes::Hash as _;
    let digest = bitcoin_hashes::sha256d::Hash::hash(bytes);
    let mut hash = Hash::default();
    hash.0.copy_from_slice(&digest[..]);
    hash
}

/// First 4 bytes of `sha256(sha256(bytes))`.
pub fn checksum(bytes: &[u8]) -> [u8; 4] {
    let Hash(digest) = sha256d(bytes);
    [digest[0], digest[1], digest[2], digest[3]]
}

///////////////////////////////
// Primitive implementations //
///////////////////////////////

/// Transcode using [zerocopy::FromBytes]/[zerocopy::AsBytes]
macro_rules! transcode_primitive {
    ($($ty:ty $({ $array_len:ident })?),* $(,)?) => {
        $(
            #[automatically_derived]
            impl<'a $(, const $array_len: usize)?> Transcode<'a> for $ty {
                fn parse<IResultErrT: ParseError<'a>>(input: &'a [u8]) -> nom::IResult<&'a[u8], Self, IResultErrT> {
                    match <$ty as zerocopy::FromBytes>::read_from_prefix(input) {
                        Some(t) => Ok((&input[std::mem::size_of::<$ty>()..], t)),
                        None => Err(nom::Err::Error(IResultErrT::from_error_kind(
                            input,
                            ErrorKind::Eof,
                        ))),
                    }
                }

                fn deparsed_len(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                fn deparse(&self, buffer: &mut [u8]) {
                    <$ty as zerocopy::AsBytes>::write_to_prefix(self, buffer)
                        .expect(concat!(
                            "attempted to deparse into a buffer too small for ",
                            stringify!($ty)
                        ))
                }
            }
        )*
    };
}

transcode_primitive!(
    U32le,
    U64le,
    U128netwk,
    U16netwk,
    I32le,
    I64le,
    Hash,
    [u8; N] { N },
);

impl<'a> Transcode<'a> for bool {
    fn parse<IResultErrT: ParseError<'a>>(
        input: &'a [u8],
    ) -> nom::IResult<&'a [u8], Self, IResultErrT> {
        let (rest, byte) = nom::number::complete::le_u8(input)?;
        match byte {
            0x00 => Ok((rest, false)),
            0x01 => Ok((rest, true)),
            other => violation(input, ProtocolViolation::InvalidBool(other)),
        }
    }

    fn deparsed_len(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn deparse(&self, output: &mut [u8]) {
        output[0] = u8::from(*self)
    }
}

///////////
// Utils //
///////////

/// Common constraint for [nom::IResult]'s error type.
/// This is a single place to add further errors, and allows us to compose parsing automatically
pub trait ParseError<'a>:
    nom::error::ParseError<&'a [u8]>
    + nom::error::FromExternalError<&'a [u8], std::str::Utf8Error>
    + nom::error::FromExternalError<&'a [u8], ProtocolViolation>
{
}

impl<'a, T> ParseError<'a> for T where
    T: nom::error::ParseError<&'a [u8]>
        + nom::error::FromExternalError<&'a [u8], std::str::Utf8Error>
        + nom::error::FromExternalError<&'a [u8], ProtocolViolation>
{
}

/// Rejects `input` without backtracking.
pub(crate) fn violation<'a, T, IResultErrT: ParseError<'a>>(
    input: &'a [u8],
    violation: ProtocolViolation,
) -> nom::IResult<&'a [u8], T, IResultErrT> {
    Err(nom::Err::Failure(IResultErrT::from_external_error(
        input,
        ErrorKind::Verify,
        violation,
    )))
}

/// [nom] error which keeps only the [ProtocolViolation] behind a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub ProtocolViolation);

impl<'a> nom::error::ParseError<&'a [u8]> for DecodeError {
    fn from_error_kind(_: &'a [u8], kind: ErrorKind) -> Self {
        Self(match kind {
            ErrorKind::Eof | ErrorKind::Complete => ProtocolViolation::Truncated,
            other => ProtocolViolation::Malformed(other),
        })
    }

    fn append(_: &'a [u8], _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> nom::error::FromExternalError<&'a [u8], ProtocolViolation> for DecodeError {
    fn from_external_error(_: &'a [u8], _: ErrorKind, e: ProtocolViolation) -> Self {
        Self(e)
    }
}

impl<'a> nom::error::FromExternalError<&'a [u8], std::str::Utf8Error> for DecodeError {
    fn from_external_error(_: &'a [u8], _: ErrorKind, _: std::str::Utf8Error) -> Self {
        Self(ProtocolViolation::InvalidUtf8)
    }
}

/// Run `parser` over `input`, which must be consumed entirely.
pub fn decode_all<'a, T>(
    parser: impl nom::Parser<&'a [u8], T, DecodeError>,
    input: &'a [u8],
) -> Result<T, ProtocolViolation> {
    match decode_prefix(parser, input)? {
        (rest, _) if !rest.is_empty() => Err(ProtocolViolation::TrailingBytes(rest.len())),
        (_, t) => Ok(t),
    }
}

/// Run `parser` over `input`, returning what it didn't consume.
pub fn decode_prefix<'a, T>(
    mut parser: impl nom::Parser<&'a [u8], T, DecodeError>,
    input: &'a [u8],
) -> Result<(&'a [u8], T), ProtocolViolation> {
    match parser.parse(input) {
        Ok(ok) => Ok(ok),
        Err(nom::Err::Error(DecodeError(v)) | nom::Err::Failure(DecodeError(v))) => Err(v),
        Err(nom::Err::Incomplete(_)) => Err(ProtocolViolation::Truncated),
    }
}

struct DebugWithDisplay<T>(T);

impl<T> fmt::Debug for DebugWithDisplay<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

pub(crate) trait TranscodeExt<'a>: Transcode<'a> {
    fn deparse_into_and_advance<'output>(&self, output: &'output mut [u8]) -> &'output mut [u8] {
        self.deparse(output);
        &mut output[self.deparsed_len()..]
    }
    fn deparse_to_vec(&self) -> Vec<u8> {
        use tap::Tap as _;
        vec![0u8; self.deparsed_len()].tap_mut(|it| self.deparse(it))
    }
    /// Grows `output` to fit.
    fn deparse_append(&self, output: &mut bytes::BytesMut) {
        let start = output.len();
        output.resize(start + self.deparsed_len(), 0);
        self.deparse(&mut output[start..]);
    }
}

impl<'a, T> TranscodeExt<'a> for T where T: Transcode<'a> {}

#[cfg(test)]
pub(crate) mod transcoding {
    use super::*;

    use nom::Parser as _;
    use nom_supreme::ParserExt as _;
    use std::fmt;

    pub(crate) fn hex2bin<'a>(hex: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
        use tap::Pipe;
        hex.into_iter()
            .flat_map(str::chars)
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .pipe(hex::decode)
            .expect("invalid hex")
    }

    pub(crate) fn do_test<'example, T>(example_bin: &'example [u8], expected: T)
    where
        T: PartialEq + fmt::Debug + Transcode<'example>,
    {
        use pretty_assertions::assert_eq;

        let (_, parsed_bin) = T::parse::<nom::error::Error<_>>
            .all_consuming()
            .parse(example_bin)
            .expect("failed to completely parse the example");

        assert_eq!(
            expected, parsed_bin,
            "the parsed example text doesn't match the expected struct"
        );

        assert_eq!(
            example_bin,
            expected.deparse_to_vec(),
            "the unparsed struct doesn't match the example bin"
        );
    }

    fn decode<'a, T: Transcode<'a>>(input: &'a [u8]) -> Result<T, ProtocolViolation> {
        decode_all(T::parse::<DecodeError>, input)
    }

    #[test]
    fn header() {
        do_test(
            &hex2bin([
                "F9 BE B4 D9",                         // - Main network magic bytes
                "76 65 72 73 69 6F 6E 00 00 00 00 00", // - "version" command
                "64 00 00 00",                         // - Payload is 100 bytes long
                "35 8d 49 32",                         // - payload checksum (internal byte order)
            ]),
            Header {
                magic: crate::constants::Magic::Main.conv::<u32>().into(),
                command: *b"version\0\0\0\0\0",
                length: 100.into(),
                checksum: [0x35, 0x8d, 0x49, 0x32],
            },
        )
    }

    #[test]
    fn var_str() {
        do_test(
            &hex2bin(["0F 2F 53 61 74 6F 73 68 69 3A 30 2E 37 2E 32 2F"]),
            VarStr::owned("/Satoshi:0.7.2/"),
        );
        do_test(&[0x00], VarStr::borrowed(""));
    }

    #[test]
    fn var_str_rejects_invalid_utf8() {
        assert_eq!(
            decode::<VarStr>(&[0x02, 0xC3, 0x28]),
            Err(ProtocolViolation::InvalidUtf8)
        );
    }

    #[test]
    fn var_str_length_is_checked_before_reading() {
        // 0x02000001 bytes claimed, none present
        assert_eq!(
            decode::<VarStr>(&hex2bin(["FE 01 00 00 02"])),
            Err(ProtocolViolation::VarLengthTooLong {
                len: 0x0200_0001,
                max: MAX_MESSAGE_PAYLOAD
            })
        );
        // within the bound, but not all there
        assert_eq!(
            decode::<VarBytes>(&hex2bin(["FE 00 00 00 02"])),
            Err(ProtocolViolation::Truncated)
        );
    }

    #[test]
    fn var_int_boundaries() {
        do_test(&hex2bin(["00"]), VarInt(0));
        do_test(&hex2bin(["FC"]), VarInt(0xFC));
        do_test(&hex2bin(["FD FD 00"]), VarInt(0xFD));
        do_test(&hex2bin(["FD FF FF"]), VarInt(0xFFFF));
        do_test(&hex2bin(["FE 00 00 01 00"]), VarInt(0x1_0000));
        do_test(&hex2bin(["FE FF FF FF FF"]), VarInt(0xFFFF_FFFF));
        do_test(
            &hex2bin(["FF 00 00 00 00 01 00 00 00"]),
            VarInt(0x1_0000_0000),
        );
        do_test(&hex2bin(["FF FF FF FF FF FF FF FF FF"]), VarInt(u64::MAX));
    }

    #[test]
    fn var_int_rejects_non_canonical() {
        for (bin, discriminant, value, min) in [
            ("FD FC 00", 0xFD, 0xFC, 0xFD),
            ("FD 00 00", 0xFD, 0, 0xFD),
            ("FE FF FF 00 00", 0xFE, 0xFFFF, 0x1_0000),
            ("FF FF FF FF FF 00 00 00 00", 0xFF, 0xFFFF_FFFF, 0x1_0000_0000),
            ("FF 01 00 00 00 00 00 00 00", 0xFF, 1, 0x1_0000_0000),
        ] {
            assert_eq!(
                decode::<VarInt>(&hex2bin([bin])),
                Err(ProtocolViolation::NonCanonicalVarInt {
                    discriminant,
                    value,
                    min
                }),
                "{bin}"
            );
        }
    }

    #[test]
    fn var_int_truncated() {
        assert_eq!(
            decode::<VarInt>(&hex2bin(["FE 01 00"])),
            Err(ProtocolViolation::Truncated)
        );
        assert_eq!(decode::<VarInt>(&[]), Err(ProtocolViolation::Truncated));
    }

    proptest::proptest! {
        #[test]
        fn var_int_round_trips_minimally(value: u64) {
            let bin = VarInt(value).deparse_to_vec();
            let expected_len = match value {
                0..=0xFC => 1,
                0xFD..=0xFFFF => 3,
                0x1_0000..=0xFFFF_FFFF => 5,
                _ => 9,
            };
            proptest::prop_assert_eq!(bin.len(), expected_len);
            proptest::prop_assert_eq!(decode::<VarInt>(&bin), Ok(VarInt(value)));
        }
    }

    #[test]
    fn vec_count_is_checked_against_remaining_input() {
        // claims u32::MAX hashes in a 3 byte payload
        assert_eq!(
            decode::<Vec<Hash>>(&hex2bin(["FE FF FF FF FF AA BB CC"])),
            Err(ProtocolViolation::CountExceedsPayload {
                count: 0xFFFF_FFFF,
                remaining: 3
            })
        );
    }

    #[test]
    fn preallocation_is_bounded_in_bytes() {
        assert_eq!(preallocation::<u8>(10), 10);
        assert_eq!(preallocation::<Hash>(u64::MAX), MAX_PREALLOCATION / 32);
        // one claimed element per remaining byte of a maximum block
        assert!(preallocation::<[u8; 80]>(4_000_000) * 80 <= MAX_PREALLOCATION);
        assert_eq!(preallocation::<()>(u64::MAX), MAX_PREALLOCATION);
    }

    #[test]
    fn counted_vec_grows_past_its_preallocation() {
        let count = MAX_PREALLOCATION / 32 + 1;
        let mut bin = VarInt(count as u64).deparse_to_vec();
        bin.extend(std::iter::repeat(0xAB).take(count * 32));
        let hashes = decode::<Vec<Hash>>(&bin).unwrap();
        assert_eq!(hashes.len(), count);
        assert!(hashes.iter().all(|it| *it == Hash([0xAB; 32])));
    }

    #[test]
    fn bool_is_strict() {
        do_test(&[0x01], true);
        do_test(&[0x00], false);
        assert_eq!(decode::<bool>(&[0x02]), Err(ProtocolViolation::InvalidBool(2)));
    }

    #[test]
    fn checksum_of_empty_payload() {
        assert_eq!(checksum(&[]), [0x5D, 0xF6, 0xE0, 0xE2]);
    }

    /// bug in example at https://en.bitcoin.it/wiki/Protocol_documentation#version
    #[test]
    #[should_panic]
    fn wiki_version_example_checksum() {
        let bin = hex2bin([
            "62 EA 00 00",             // - 60002 (protocol version 60002)
            "01 00 00 00 00 00 00 00", // - 1 (NODE_NETWORK services)
            "11 B2 D0 50 00 00 00 00", // - Tue Dec 18 10:12:33 PST 2012
            "01 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 FF FF 00 00 00 00 00 00", // - Recipient address info - see Network Address
            "01 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 FF FF 00 00 00 00 00 00", // - Sender address info - see Network Address
            "3B 2E B3 5D 8C E6 17 65",                         // - Node ID
            "0F 2F 53 61 74 6F 73 68 69 3A 30 2E 37 2E 32 2F", // - "/Satoshi:0.7.2/" sub-version string (string is 15 bytes long)
            "C0 3E 03 00", // - Last block sending node has is block #212672
        ]);
        assert_eq!([0x35, 0x8d, 0x49, 0x32], checksum(&bin))
    }

    fn net_address_fixture() -> NetAddress {
        NetAddress {
            timestamp: Some(0x4D1015E6),
            address: NetworkAddressWithoutTime::new(
                1,
                net::Ipv4Addr::new(10, 0, 0, 1).into(),
                8333,
            ),
        }
    }

    #[test]
    fn net_address_with_timestamp() {
        let bin = hex2bin([
            "E6 15 10 4D",                                     // - timestamp
            "01 00 00 00 00 00 00 00",                         // - NODE_NETWORK
            "00 00 00 00 00 00 00 00 00 00 FF FF 0A 00 00 01", // - ::ffff:10.0.0.1
            "20 8D",                                           // - port 8333, big endian
        ]);
        let mut output = bytes::BytesMut::new();
        write_net_address(&mut output, NET_ADDRESS_TIME_VERSION, &net_address_fixture(), true);
        pretty_assertions::assert_eq!(bin, output.to_vec());
        assert_eq!(
            decode_all(read_net_address::<DecodeError>(NET_ADDRESS_TIME_VERSION, true), &bin),
            Ok(net_address_fixture())
        );
        assert_eq!(NetAddress::deparsed_len(NET_ADDRESS_TIME_VERSION, true), 30);
    }

    #[test]
    fn net_address_timestamp_needs_version_and_flag() {
        let bin = hex2bin([
            "01 00 00 00 00 00 00 00",
            "00 00 00 00 00 00 00 00 00 00 FF FF 0A 00 00 01",
            "20 8D",
        ]);
        let untimed = NetAddress {
            timestamp: None,
            ..net_address_fixture()
        };
        for (pver, with_timestamp) in [
            (NET_ADDRESS_TIME_VERSION - 1, true),
            (NET_ADDRESS_TIME_VERSION, false),
            (crate::constants::PROTOCOL_VERSION, false),
        ] {
            let mut output = bytes::BytesMut::new();
            write_net_address(&mut output, pver, &net_address_fixture(), with_timestamp);
            pretty_assertions::assert_eq!(bin, output.to_vec());
            assert_eq!(
                decode_all(read_net_address::<DecodeError>(pver, with_timestamp), &bin),
                Ok(untimed)
            );
            assert_eq!(NetAddress::deparsed_len(pver, with_timestamp), 26);
        }
        // port is the trailing big endian pair either way
        assert_eq!(&bin[bin.len() - 2..], &8333u16.to_be_bytes());
    }
}
