//! TCP 传输实例

use crate::{TransportError, TransportInstance, peek_buffer, take_buffer};
use async_trait::async_trait;
use bytes::BytesMut;
use plc_config::{ConfigError, ConnectionString};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// TCP 传输实例。读操作只搬运套接字中已到达的数据，不阻塞。
///
/// 对端关闭后先交付已缓冲的字节；缓冲耗尽（或只剩永远凑不齐的残帧）时
/// 报告一次 `Closed` 并释放套接字，此后为 `NotConnected`。
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    buffer: BytesMut,
    peer_closed: bool,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            stream: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            peer_closed: false,
        }
    }

    /// 连接字符串中的 `connect-timeout` 优先于 `default_timeout`。
    pub fn from_connection_string(
        connection: &ConnectionString,
        default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let timeout = connection.connect_timeout()?.unwrap_or(default_timeout);
        Ok(Self::new(connection.socket_address()?, timeout))
    }

    fn fill_buffer(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotConnected)?;
        if self.peer_closed {
            return Ok(());
        }
        loop {
            self.buffer.reserve(READ_CHUNK);
            match stream.try_read_buf(&mut self.buffer) {
                Ok(0) => {
                    self.peer_closed = true;
                    debug!(
                        target: "plc.transport",
                        address = %self.address,
                        buffered = self.buffer.len(),
                        "tcp peer closed"
                    );
                    return Ok(());
                }
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// 对端已关闭且缓冲不足 `count` 字节：丢弃残余、释放套接字并返回 `Closed`。
    fn ensure_available(&mut self, count: usize) -> Result<(), TransportError> {
        if self.buffer.len() < count {
            self.fill_buffer()?;
        }
        if self.peer_closed && self.buffer.len() < count {
            if !self.buffer.is_empty() {
                warn!(
                    target: "plc.transport",
                    address = %self.address,
                    discarded = self.buffer.len(),
                    "tcp peer closed mid-frame"
                );
            }
            self.release();
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.stream = None;
        self.peer_closed = false;
        self.buffer.clear();
    }
}

#[async_trait]
impl TransportInstance for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout_ms))??;
        stream.set_nodelay(true)?;
        info!(target: "plc.transport", address = %self.address, "tcp transport connected");
        self.stream = Some(stream);
        self.peer_closed = false;
        self.buffer.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!(target: "plc.transport", address = %self.address, "tcp transport closed");
        }
        self.release();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(data).await?;
        Ok(())
    }

    async fn peek(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_available(count)?;
        peek_buffer(&self.buffer, count)
    }

    async fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_available(count)?;
        take_buffer(&mut self.buffer, count)
    }

    async fn readable_byte_count(&mut self) -> Result<usize, TransportError> {
        self.ensure_available(1)?;
        Ok(self.buffer.len())
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|stream| stream.local_addr().ok())
    }
}
