//! 传输实例能力模块
//!
//! 有序字节流抽象，不感知帧格式：
//! - `TcpTransport`: TCP 流
//! - `UdpTransport`: 已 connect 的 UDP 套接字，数据报按到达顺序拼接
//! - `TestTransport`: 内存传输，配合 `TestTransportHandle` 注入与取出字节

mod error;
mod tcp;
mod test_transport;
mod udp;

pub use error::TransportError;
pub use tcp::TcpTransport;
pub use test_transport::{TestTransport, TestTransportHandle};
pub use udp::UdpTransport;

use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;

/// 字节流传输实例。
///
/// `peek` 不消费数据；`read` 恰好消费 `count` 字节。
/// 两者在缓冲不足时返回 `NotEnoughData`，调用方稍后重试。
#[async_trait]
pub trait TransportInstance: Send + Sync {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    async fn peek(&mut self, count: usize) -> Result<Vec<u8>, TransportError>;

    async fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError>;

    async fn readable_byte_count(&mut self) -> Result<usize, TransportError>;

    fn local_address(&self) -> Option<SocketAddr>;
}

/// 从已填充的读缓冲窥视前 `count` 字节。
pub(crate) fn peek_buffer(buffer: &BytesMut, count: usize) -> Result<Vec<u8>, TransportError> {
    if buffer.len() < count {
        return Err(TransportError::NotEnoughData {
            requested: count,
            available: buffer.len(),
        });
    }
    Ok(buffer[..count].to_vec())
}

/// 从读缓冲消费前 `count` 字节。
pub(crate) fn take_buffer(buffer: &mut BytesMut, count: usize) -> Result<Vec<u8>, TransportError> {
    if buffer.len() < count {
        return Err(TransportError::NotEnoughData {
            requested: count,
            available: buffer.len(),
        });
    }
    Ok(buffer.split_to(count).to_vec())
}

/// 解析 `host:port`，取第一个地址。
pub(crate) async fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}
