use thiserror::Error;

use crate::alpaca_client::AlpacaError;

/// Fatal startup failures carry distinct exit codes so the front-end can
/// report why the gateway never came up.  Everything after startup is
/// handled per-connection and never surfaces here.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unable to listen on {addr}: {source}")]
    Listen {
        addr: String,
        source: std::io::Error,
    },

    #[error("Unable to connect to Alpaca telescope {id}: {source}")]
    Connect { id: u32, source: AlpacaError },

    #[error("Unable to discover an Alpaca server: {0}")]
    Discover(String),
}

impl GatewayError {
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::Listen { .. } => 2,
            GatewayError::Connect { .. } => 3,
            GatewayError::Discover(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
