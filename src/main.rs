use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use telescope_protocol_bridge::alpaca_client::{AlpacaClient, AlpacaError};
use telescope_protocol_bridge::errors::{GatewayError, Result};
use telescope_protocol_bridge::server::{self, EngineConfig, ProtocolMode};
use telescope_protocol_bridge::telescope::{Telescope, TrackingMode};
use telescope_protocol_bridge::{discovery, skyfi};

#[derive(Parser, Debug)]
#[command(name = "telescope_protocol_bridge")]
#[command(about = "NexStar/LX200 to ASCOM Alpaca telescope gateway")]
#[command(version)]
struct Args {
    /// FQDN or IP address of the Alpaca server, or "auto" to discover it
    #[arg(short = 'H', long, default_value = "auto")]
    alpaca_host: String,

    /// TCP port of the Alpaca server
    #[arg(short = 'P', long, default_value_t = discovery::DEFAULT_ALPACA_PORT)]
    alpaca_port: u16,

    /// Override the Alpaca ClientID used for debugging (0 = random)
    #[arg(short = 'c', long, default_value_t = 0)]
    client_id: u32,

    /// Alpaca telescope device id
    #[arg(short = 't', long, default_value_t = 0)]
    telescope_id: u32,

    /// IP to listen on for clients
    #[arg(long, default_value = "0.0.0.0")]
    listen_ip: String,

    /// TCP port to listen on for clients
    #[arg(long, default_value_t = 4030)]
    listen_port: u16,

    /// Protocol spoken to planetarium clients
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Nexstar)]
    mode: Mode,

    /// Mount type, which picks the tracking mode reported to clients
    #[arg(long, value_enum, default_value_t = MountType::Altaz)]
    mount_type: MountType,

    /// Default to high precision in LX200 mode
    #[arg(long)]
    high_precision: bool,

    /// Do not enable tracking automatically before a goto
    #[arg(long)]
    no_auto_track: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Nexstar,
    Lx200,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MountType {
    Altaz,
    Eqn,
    Eqs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("telescope_protocol_bridge={}", log_level))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(mut args: Args) -> Result<()> {
    if args.client_id == 0 {
        args.client_id = rand::random();
        debug!("Selecting random ClientID: {}", args.client_id);
    }

    let ips: Vec<String> = discovery::local_ipv4_addresses()
        .iter()
        .map(|ip| ip.to_string())
        .collect();
    info!("Local interface addresses: {}", ips.join(", "));

    let mode = match args.mode {
        Mode::Nexstar => ProtocolMode::NexStar,
        Mode::Lx200 => ProtocolMode::Lx200,
    };
    let tracking_mode = match args.mount_type {
        MountType::Altaz => TrackingMode::AltAz,
        MountType::Eqn => TrackingMode::EqNorth,
        MountType::Eqs => TrackingMode::EqSouth,
    };

    let listen = format!("{}:{}", args.listen_ip, args.listen_port);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| GatewayError::Listen {
            addr: listen.clone(),
            source: e,
        })?;

    if args.alpaca_host == "auto" {
        // look locally first since Windows can't receive its own broadcasts
        match discovery::find_local_server(args.alpaca_port).await {
            Some(ip) => args.alpaca_host = ip.to_string(),
            None => {
                let (ip, port) = discovery::discover_server(3).await?;
                args.alpaca_host = ip.to_string();
                args.alpaca_port = port;
            }
        }
    }

    let cancel = CancellationToken::new();

    // make the gateway findable by SkySafari-family clients
    tokio::spawn(skyfi::reply_discover(cancel.clone()));

    let client = Arc::new(AlpacaClient::new(
        &args.alpaca_host,
        args.alpaca_port,
        args.client_id,
    ));
    let scope = Arc::new(Telescope::new(args.telescope_id, tracking_mode, client));

    let connected = scope
        .connected()
        .await
        .map_err(|e| GatewayError::Connect {
            id: args.telescope_id,
            source: e,
        })?;
    if !connected {
        scope
            .set_connected(true)
            .await
            .map_err(|e| GatewayError::Connect {
                id: args.telescope_id,
                source: e,
            })?;
        let connected = scope
            .connected()
            .await
            .map_err(|e| GatewayError::Connect {
                id: args.telescope_id,
                source: e,
            })?;
        if !connected {
            return Err(GatewayError::Connect {
                id: args.telescope_id,
                source: AlpacaError::InvalidResponse(
                    "telescope still reports disconnected".to_string(),
                ),
            });
        }
    }

    match scope.name().await {
        Ok(name) => info!("Connected to telescope {}: {}", args.telescope_id, name),
        Err(e) => warn!("Unable to determine name of telescope: {}", e),
    }

    let actions = scope
        .supported_actions()
        .await
        .map_err(|e| GatewayError::Connect {
            id: args.telescope_id,
            source: e,
        })?;
    debug!("SupportedActions: {:?}", actions);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    info!(
        "Waiting for {:?} clients on {}:{}",
        mode, args.listen_ip, args.listen_port
    );
    let config = EngineConfig {
        mode,
        auto_track: !args.no_auto_track,
        high_precision: args.high_precision,
    };
    server::serve(listener, config, scope, cancel).await;
    Ok(())
}
