use domain::ConnectionState;
use plc_codec::knxnetip::Status;
use plc_config::ConfigError;
use plc_dispatch::DispatchError;
use plc_transactions::TransactionError;

/// KNXnet/IP 连接错误。
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(Status),
    #[error("gateway does not support tunneling")]
    TunnelingNotSupported,
    #[error("not connected")]
    NotConnected,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("unexpected connection state: {0}")]
    UnexpectedState(ConnectionState),
    #[error("ping rejected: {0}")]
    PingRejected(Status),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Dispatch(err) if err.is_timeout())
    }
}
