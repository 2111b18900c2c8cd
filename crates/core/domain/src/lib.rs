pub mod data;

pub use data::{FieldResponse, ResponseCode, ValueChange};

/// 连接生命周期状态。
///
/// ```text
/// Disconnected ──connect()──▶ Connecting ──handshake ok──▶ Connected
///      ▲                          │                            │
///      │                  handshake failed            disconnect()
///      │                          ▼                            ▼
///      └────────────────────── Failed ◀      Disconnecting ────┘
/// ```
///
/// `Failed` 只是瞬时状态：握手失败后错误返回给调用方，状态回到 `Disconnected`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// 当前状态下是否允许发起 connect()。
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
