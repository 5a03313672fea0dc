//! One outbound connection: dial, handshake, then answer the peer until it goes away.
// https://en.bitcoin.it/wiki/Version_Handshake

use std::{
    fmt,
    future::Future,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use futures::SinkExt as _;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};
use tracing::{debug, info, instrument};

use crate::{
    constants::{commands::Command, Magic, ServiceFlags, PROTOCOL_VERSION},
    error::BoxError,
    payload::{
        user_agent, MessageEncoding, Payload, Version, VersionFields106, VersionFieldsMandatory,
    },
    protocol::{read_message, Encoder, Message},
    registry::{BitcoinAdapter, ChainAdapter, Registry},
    wire::{Hash, NetworkAddressWithoutTime},
    Error, HandshakeError, NonceCache,
};

/// Supplies the hash and height of our best block, for the version message.
/// Must not block for long: it is called on the connection's task.
pub type NewestBlock = Arc<dyn Fn() -> Result<(Hash, i32), BoxError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkParams {
    pub magic: u32,
    pub default_port: u16,
}

impl NetworkParams {
    pub const MAINNET: Self = Self {
        magic: Magic::Main as u32,
        default_port: 8333,
    };
    pub const TESTNET3: Self = Self {
        magic: Magic::Testnet3 as u32,
        default_port: 18333,
    };
    pub const REGTEST: Self = Self {
        magic: Magic::Regtest as u32,
        default_port: 18444,
    };
    pub const SIGNET: Self = Self {
        magic: Magic::Signet as u32,
        default_port: 38333,
    };
}

#[derive(Clone)]
pub struct Config {
    /// `host:port`, with IPv6 hosts in brackets.
    pub address: String,
    pub protocol_version: u32,
    pub params: NetworkParams,
    /// Asks the peer not to announce transactions (BIP 0037).
    pub disable_relay_tx: bool,
    pub services: ServiceFlags,
    pub user_agent_name: String,
    pub user_agent_version: String,
    pub user_agent_comments: Vec<String>,
    /// Start height is zero if this isn't given.
    pub newest_block: Option<NewestBlock>,
    /// Applies to dialing, and to each read and write until the handshake is done.
    pub handshake_timeout: Option<Duration>,
    /// Applies to each read and write after the handshake.
    pub idle_timeout: Option<Duration>,
}

impl Config {
    pub fn new(address: impl Into<String>, params: NetworkParams) -> Self {
        Self {
            address: address.into(),
            protocol_version: PROTOCOL_VERSION,
            params,
            disable_relay_tx: false,
            services: ServiceFlags::empty(),
            user_agent_name: env!("CARGO_PKG_NAME").into(),
            user_agent_version: env!("CARGO_PKG_VERSION").into(),
            user_agent_comments: Vec::new(),
            newest_block: None,
            handshake_timeout: None,
            idle_timeout: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("protocol_version", &self.protocol_version)
            .field("params", &self.params)
            .field("disable_relay_tx", &self.disable_relay_tx)
            .field("services", &self.services)
            .field("user_agent_name", &self.user_agent_name)
            .field("user_agent_version", &self.user_agent_version)
            .field("user_agent_comments", &self.user_agent_comments)
            .field("newest_block", &self.newest_block.is_some())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum State {
    Disconnected,
    Connected,
    VersionSent,
    PeerVersionReceived,
    Established,
    Closed,
}

/// Both halves of a stream, framed.
struct Transport<S> {
    reader: ReadHalf<S>,
    writer: FramedWrite<WriteHalf<S>, Encoder>,
    network: u32,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite,
{
    fn new(stream: S, network: u32) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer: FramedWrite::new(writer, Encoder::default()),
            network,
        }
    }

    async fn send(&mut self, command: Command, payload: Bytes) -> Result<(), Error> {
        self.writer
            .send(Message::new(self.network, command, payload))
            .await
    }

    async fn recv(&mut self) -> Result<Option<Message>, Error> {
        read_message(&mut self.reader, self.network).await
    }
}

/// A stream which has been through the handshake.
pub struct Connection<S> {
    transport: Transport<S>,
    peer_version: Version<'static>,
    protocol_version: u32,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn peer_version(&self) -> &Version<'static> {
        &self.peer_version
    }

    /// The lower of ours and the peer's.
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub async fn send(&mut self, command: Command, payload: Bytes) -> Result<(), Error> {
        self.transport.send(command, payload).await
    }

    /// [None] if the peer closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Message>, Error> {
        self.transport.recv().await
    }

    /// How transactions and blocks should be encoded for this peer.
    pub fn encoding(&self) -> MessageEncoding {
        let services = self.peer_version.fields_mandatory().services.get();
        match ServiceFlags::from_bits_truncate(services).contains(ServiceFlags::NODE_WITNESS) {
            true => MessageEncoding::Witness,
            false => MessageEncoding::Base,
        }
    }

    /// Shuts down our half of the stream, without flushing.
    /// The peer sees EOF; whatever it has already sent can still be read.
    pub async fn close(&mut self) -> Result<(), Error> {
        Ok(self.transport.writer.get_mut().shutdown().await?)
    }
}

pub struct Connector<A = BitcoinAdapter> {
    host: String,
    port: u16,
    config: Config,
    registry: Registry<A>,
    nonces: NonceCache,
    state: State,
    cancel: CancellationToken,
}

impl<A: ChainAdapter> Connector<A> {
    pub fn new(config: Config, registry: Registry<A>, nonces: NonceCache) -> Result<Self, Error> {
        let (host, port) = split_host_port(&config.address)?;
        Ok(Self {
            host,
            port,
            config,
            registry,
            nonces,
            state: State::Disconnected,
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cancelling fails a handshake in progress with [Error::Cancelled], and ends [Connector::run] cleanly.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dial, handshake, then [Connector::run] until the peer leaves.
    #[instrument(skip_all, fields(peer = %self.config.address))]
    pub async fn connect(&mut self) -> Result<(), Error> {
        let stream = self.dial().await?;
        let mut connection = self.handshake(stream).await?;
        self.run(&mut connection).await
    }

    pub async fn dial(&mut self) -> Result<TcpStream, Error> {
        let dialing = async {
            TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|source| Error::Dial {
                    address: self.config.address.clone(),
                    source,
                })
        };
        match within(self.config.handshake_timeout, dialing).await {
            Ok(stream) => {
                self.state = State::Connected;
                info!("connected");
                Ok(stream)
            }
            Err(e) => {
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    /// Exchange version and verack over an already connected `stream`.
    #[instrument(skip_all, fields(peer = %self.config.address))]
    pub async fn handshake<S>(&mut self, stream: S) -> Result<Connection<S>, Error>
    where
        S: AsyncRead + AsyncWrite,
    {
        if self.state == State::Disconnected {
            self.state = State::Connected;
        }
        let result = self.exchange_versions(stream).await;
        if result.is_err() {
            self.state = State::Closed;
        }
        result
    }

    async fn exchange_versions<S>(&mut self, stream: S) -> Result<Connection<S>, Error>
    where
        S: AsyncRead + AsyncWrite,
    {
        let pver = self.config.protocol_version;
        let timeout = self.config.handshake_timeout;
        let mut transport = Transport::new(stream, self.config.params.magic);

        let version = self.local_version()?;
        let payload =
            self.registry
                .serialize(&Payload::Version(version), pver, MessageEncoding::LATEST)?;
        send(&mut transport, &self.cancel, timeout, Command::Version, payload).await?;
        self.state = State::VersionSent;

        let message = match recv(&mut transport, &self.cancel, timeout).await? {
            Some(message) if message.command == Command::Version => message,
            Some(message) => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: Command::Version,
                    actual: message.command,
                }
                .into())
            }
            None => return Err(HandshakeError::PeerClosed.into()),
        };
        let peer_version = match self
            .registry
            .deserialize(Command::Version, &message.payload, pver, MessageEncoding::LATEST)?
        {
            Payload::Version(version) => version.into_static(),
            other => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: Command::Version,
                    actual: other.command().into(),
                }
                .into())
            }
        };
        self.state = State::PeerVersionReceived;
        info!(
            version = peer_version.protocol_version(),
            user_agent = peer_version.user_agent(),
            start_height = peer_version.start_height(),
            services = ?ServiceFlags::from_bits_truncate(peer_version.fields_mandatory().services.get()),
            relay = peer_version.relay(),
            "received version"
        );

        // peers may send feature negotiation (wtxidrelay, sendaddrv2, ...) before their verack
        loop {
            match recv(&mut transport, &self.cancel, timeout).await? {
                Some(message) if message.command == Command::Verack => {
                    self.registry.deserialize(
                        Command::Verack,
                        &message.payload,
                        pver,
                        MessageEncoding::LATEST,
                    )?;
                    break;
                }
                Some(message) if message.command == Command::Version => {
                    return Err(HandshakeError::DuplicateVersion.into())
                }
                Some(message) => debug!(
                    command = %message.command,
                    size = message.payload.len(),
                    "ignoring before verack"
                ),
                None => return Err(HandshakeError::PeerClosed.into()),
            }
        }

        send(&mut transport, &self.cancel, timeout, Command::Verack, Bytes::new()).await?;
        self.state = State::Established;

        let protocol_version = u32::try_from(peer_version.protocol_version())
            .unwrap_or_default()
            .min(pver);
        info!(protocol_version, "handshake complete");
        Ok(Connection {
            transport,
            peer_version,
            protocol_version,
        })
    }

    fn local_version(&self) -> Result<Version<'static>, Error> {
        let start_height = match &self.config.newest_block {
            Some(newest_block) => {
                let (_, height) = newest_block().map_err(HandshakeError::NewestBlock)?;
                height
            }
            None => 0,
        };
        let user_agent = user_agent(
            &self.config.user_agent_name,
            &self.config.user_agent_version,
            &self.config.user_agent_comments,
        )?;

        let nonce = rand::random();
        self.nonces.insert(nonce);

        let receiver = NetworkAddressWithoutTime::new(
            0,
            self.host
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            self.port,
        );
        Ok(Version::new(
            VersionFieldsMandatory {
                version: (self.config.protocol_version as i32).into(),
                services: self.config.services.bits().into(),
                timestamp: chrono::Utc::now().timestamp().into(),
                receiver,
            },
            VersionFields106 {
                sender: NetworkAddressWithoutTime::new(0, Ipv4Addr::UNSPECIFIED.into(), 0),
                nonce: nonce.into(),
                user_agent,
                start_height: start_height.into(),
            },
            !self.config.disable_relay_tx,
        ))
    }

    /// Answers inv with getdata and ping with pong, echoing the payload in both cases.
    /// Everything else is ignored.
    ///
    /// Returns [Ok] when the peer closes the stream, or on cancellation.
    /// Either way our half of `connection` is shut down, though it can still be read from.
    #[instrument(skip_all, fields(peer = %self.config.address))]
    pub async fn run<S>(&mut self, connection: &mut Connection<S>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite,
    {
        let result = match self.answer(connection).await {
            Err(Error::Cancelled) => {
                info!("cancelled");
                Ok(())
            }
            other => other,
        };
        if let Err(error) = connection.close().await {
            debug!(%error, "couldn't shut down the connection");
        }
        self.state = State::Closed;
        result
    }

    async fn answer<S>(&self, connection: &mut Connection<S>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite,
    {
        let timeout = self.config.idle_timeout;
        loop {
            let Some(message) = recv(&mut connection.transport, &self.cancel, timeout).await?
            else {
                info!("peer closed the connection");
                return Ok(());
            };
            let reply = match message.command.known() {
                Some(Command::Inv) => Command::GetData,
                Some(Command::Ping) => Command::Pong,
                _ => {
                    debug!(
                        command = %message.command,
                        size = message.payload.len(),
                        "ignoring"
                    );
                    continue;
                }
            };
            send(
                &mut connection.transport,
                &self.cancel,
                timeout,
                reply,
                message.payload,
            )
            .await?;
        }
    }
}

/// [recv], for writes.
async fn send<S>(
    transport: &mut Transport<S>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    command: Command,
    payload: Bytes,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = within(timeout, transport.send(command, payload)) => result,
    }
}

async fn recv<S>(
    transport: &mut Transport<S>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<Option<Message>, Error>
where
    S: AsyncRead + AsyncWrite,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = within(timeout, transport.recv()) => result,
    }
}

async fn within<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_elapsed| Error::Timeout(duration))?,
        None => future.await,
    }
}

fn split_host_port(address: &str) -> Result<(String, u16), Error> {
    let invalid = |reason: &'static str| Error::InvalidAddress {
        address: address.to_owned(),
        reason,
    };
    let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed
            .strip_suffix(']')
            .ok_or_else(|| invalid("missing ']'"))?,
        None if host.contains(':') => return Err(invalid("too many colons")),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = port.parse().map_err(|_| invalid("invalid port"))?;
    Ok((host.to_owned(), port))
}
