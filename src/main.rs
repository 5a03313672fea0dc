use std::{io, time::Duration};

use bitcoin_p2p_connector::{
    constants::{ServiceFlags, PROTOCOL_VERSION},
    BitcoinAdapter, Config, Connector, NetworkParams, NonceCache, Registry,
};
use clap::Parser as _;
use color_eyre::eyre::Context as _;
use tracing::{debug, info};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct Cli {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Handshake with a peer, then answer its inv and ping messages until it disconnects.
    Connect(ConnectArgs),
}

#[derive(Debug, clap::Args)]
struct ConnectArgs {
    /// `host:port`, or a bare host to use the network's default port.
    address: String,
    #[arg(long, value_enum, default_value_t = Network::Mainnet)]
    network: Network,
    #[arg(long, default_value_t = PROTOCOL_VERSION)]
    protocol_version: u32,
    /// Service bits to advertise, e.g 1033 for NODE_NETWORK | NODE_WITNESS | NODE_NETWORK_LIMITED.
    #[arg(long, default_value_t = 0)]
    services: u64,
    #[arg(long, default_value = env!("CARGO_PKG_NAME"))]
    user_agent_name: String,
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    user_agent_version: String,
    /// Appended to the user agent, may be repeated.
    #[arg(long = "comment")]
    comments: Vec<String>,
    /// Ask the peer not to announce transactions.
    #[arg(long)]
    disable_relay_tx: bool,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    handshake_timeout: Duration,
    /// Give up if the peer is silent for this long after the handshake.
    #[arg(long, value_parser = humantime::parse_duration)]
    idle_timeout: Option<Duration>,
    /// Disconnect as soon as the handshake is complete.
    #[arg(long)]
    handshake_only: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Network {
    Mainnet,
    Testnet3,
    Regtest,
    Signet,
}

impl Network {
    fn params(self) -> NetworkParams {
        match self {
            Network::Mainnet => NetworkParams::MAINNET,
            Network::Testnet3 => NetworkParams::TESTNET3,
            Network::Regtest => NetworkParams::REGTEST,
            Network::Signet => NetworkParams::SIGNET,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(?cli);

    match cli.subcommand {
        Subcommand::Connect(args) => connect(args).await,
    }
}

async fn connect(args: ConnectArgs) -> color_eyre::Result<()> {
    let params = args.network.params();
    let address = match args.address.contains(':') {
        true => args.address,
        false => format!("{}:{}", args.address, params.default_port),
    };
    let config = Config {
        protocol_version: args.protocol_version,
        disable_relay_tx: args.disable_relay_tx,
        services: ServiceFlags::from_bits_truncate(args.services),
        user_agent_name: args.user_agent_name,
        user_agent_version: args.user_agent_version,
        user_agent_comments: args.comments,
        handshake_timeout: Some(args.handshake_timeout),
        idle_timeout: args.idle_timeout,
        ..Config::new(address, params)
    };
    let mut connector = Connector::new(config, Registry::new(BitcoinAdapter), NonceCache::new())
        .wrap_err("invalid configuration")?;

    let cancel = connector.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            cancel.cancel();
        }
    });

    if args.handshake_only {
        let stream = connector.dial().await.wrap_err("couldn't reach peer")?;
        let connection = connector
            .handshake(stream)
            .await
            .wrap_err("handshake failed")?;
        info!(peer_version = %connection.peer_version(), "handshake complete!");
        return Ok(());
    }

    connector
        .connect()
        .await
        .wrap_err_with(|| format!("connection to {} failed", connector.config().address))?;
    info!(state = %connector.state(), "done");
    Ok(())
}
