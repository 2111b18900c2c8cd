//! 分发错误类型定义

use plc_codec::{MalformedFrameError, SerializeError};
use plc_transport::TransportError;
use std::time::Duration;

/// 分发器错误
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// 传输层错误
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// 帧解析失败
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrameError),

    /// 帧序列化失败
    #[error("serialize error: {0}")]
    Serialize(#[from] SerializeError),

    /// 期望在 TTL 内未匹配
    #[error("no matching response within {0:?}")]
    Timeout(Duration),

    /// 分发循环未运行
    #[error("dispatcher not connected")]
    NotConnected,

    /// 分发器已断开，挂起的期望被丢弃
    #[error("dispatcher closed")]
    Closed,

    /// on_match 处理失败
    #[error("handler error: {0}")]
    Handler(String),
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
