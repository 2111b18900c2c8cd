//! 传输错误类型定义

/// 传输层错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 尚未连接或已关闭
    #[error("transport not connected")]
    NotConnected,

    /// 缓冲数据不足（非致命，稍后重试）
    #[error("not enough data: requested {requested}, available {available}")]
    NotEnoughData { requested: usize, available: usize },

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 连接超时
    #[error("connect timeout after {0}ms")]
    ConnectTimeout(u64),

    /// 对端关闭
    #[error("connection closed by peer")]
    Closed,

    /// 地址无法解析
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
