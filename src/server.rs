//! Accepts planetarium clients and runs one protocol engine per
//! connection.  Engines share nothing but the telescope binding, so
//! connections are fully independent.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lx200::Lx200;
use crate::nexstar::NexStar;
use crate::telescope::{Axis, Telescope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    NexStar,
    Lx200,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub mode: ProtocolMode,
    pub auto_track: bool,
    pub high_precision: bool,
}

/// Accept loop.  Cancelling the token closes the listener; sessions already
/// in flight run until their client disconnects.
pub async fn serve(
    listener: TcpListener,
    config: EngineConfig,
    scope: Arc<Telescope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutting down client listener");
                return;
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Error calling accept(): {}", e);
                        continue;
                    }
                };
                info!("New {:?} client: {}", config.mode, addr);
                let scope = scope.clone();
                tokio::spawn(async move {
                    match config.mode {
                        ProtocolMode::NexStar => {
                            NexStar::new(config.auto_track)
                                .handle_connection(stream, &scope)
                                .await;
                        }
                        ProtocolMode::Lx200 => {
                            // slew-rate bounds are per-session state
                            let rates = match scope.axis_rates(Axis::AzmRa).await {
                                Ok(rates) => rates,
                                Err(e) => {
                                    warn!("Unable to query axis rates: {}", e);
                                    Default::default()
                                }
                            };
                            Lx200::new(config.auto_track, config.high_precision, true, rates)
                                .handle_connection(stream, &scope)
                                .await;
                        }
                    }
                    debug!("Client {} disconnected", addr);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca_client::AlpacaClient;
    use crate::telescope::TrackingMode;
    use crate::test_server::MockAlpaca;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start_gateway(mock: &MockAlpaca, mode: ProtocolMode) -> (std::net::SocketAddr, CancellationToken) {
        let client = Arc::new(AlpacaClient::new("127.0.0.1", mock.port(), 21));
        let scope = Arc::new(Telescope::new(0, TrackingMode::AltAz, client));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let config = EngineConfig {
            mode,
            auto_track: false,
            high_precision: false,
        };
        let token = cancel.clone();
        tokio::spawn(async move {
            serve(listener, config, scope, token).await;
        });
        (addr, cancel)
    }

    #[tokio::test]
    async fn nexstar_session_over_tcp() {
        let mock = MockAlpaca::start().await;
        mock.set_value("rightascension", json!(6.0)).await;
        mock.set_value("declination", json!(45.0)).await;
        let (addr, cancel) = start_gateway(&mock, ProtocolMode::NexStar).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"V").await.unwrap();
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"50#");

        client.write_all(b"E").await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"4000,2000#");

        cancel.cancel();
    }

    #[tokio::test]
    async fn lx200_session_over_tcp() {
        let mock = MockAlpaca::start().await;
        mock.set_value("axisrates", json!([{"Minimum": 0.0, "Maximum": 3.0}]))
            .await;
        mock.set_value("rightascension", json!(12.505)).await;
        let (addr, cancel) = start_gateway(&mock, ProtocolMode::Lx200).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        // two commands in one write, like SkySafari does
        client.write_all(b":P#:GR#").await.unwrap();
        let mut reply = [0u8; 24];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"HIGH PRECISION+12*30'18#");

        cancel.cancel();
    }
}
